//! Atom Handles
//!
//! An atom is the fundamental unit of state. The store owns every atom's
//! value; what callers hold is a small typed handle that names the atom.
//!
//! # How Atoms Work
//!
//! 1. `Store::create_atom` registers the initial value and returns an
//!    `Atom<T>` handle.
//!
//! 2. Reads go through the store and return a clone of the current value.
//!
//! 3. Writes replace the value wholesale and notify every observer before
//!    returning.
//!
//! # Typing
//!
//! The value type is part of the handle, so a handle can only be used with
//! values of the type it was created with. Handles are `Copy` and can be
//! passed around freely; they carry no reference to the store.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::graph::NodeId;

pub(crate) mod sealed {
    /// Only the store mints handles.
    pub trait Sealed {}
}

/// Anything that names a node in a store: an [`Atom`] or a
/// [`Selector`](super::Selector).
///
/// The trait is sealed, so a handle can only come from a store:
///
/// ```compile_fail
/// use atomstore_core::graph::NodeId;
/// use atomstore_core::Handle;
///
/// #[derive(Clone, Copy, Debug)]
/// struct Forged;
///
/// impl Handle for Forged {
///     type Value = i32;
///
///     fn node_id(&self) -> NodeId {
///         NodeId::from(0)
///     }
/// }
/// ```
pub trait Handle: sealed::Sealed + Copy + Send + Sync + fmt::Debug + 'static {
    /// The type of value the node holds.
    type Value: Clone + Send + Sync + 'static;

    /// The node this handle refers to.
    fn node_id(&self) -> NodeId;
}

/// A typed handle to a writable atom holding a `T`.
///
/// # Example
///
/// ```rust
/// use atomstore_core::reactive::Store;
///
/// let store = Store::new();
/// let count = store.create_atom(0);
///
/// store.write(&count, 5).unwrap();
/// assert_eq!(store.read(&count).unwrap(), 5);
/// ```
pub struct Atom<T> {
    id: NodeId,
    _value: PhantomData<fn() -> T>,
}

impl<T> Atom<T> {
    pub(crate) fn from_id(id: NodeId) -> Self {
        Self {
            id,
            _value: PhantomData,
        }
    }

    /// Get the atom's unique ID.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> sealed::Sealed for Atom<T> {}

impl<T> Handle for Atom<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.id
    }
}

// Manual impls: deriving would put bounds on `T`.

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Atom<T> {}

impl<T> PartialEq for Atom<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Atom<T> {}

impl<T> Hash for Atom<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atom({})", self.id)
    }
}
