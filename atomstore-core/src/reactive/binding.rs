//! Subscriber Bindings
//!
//! Bindings connect a presentation component to the store without the
//! component knowing about any other component.
//!
//! # Capabilities
//!
//! - A [`ReaderBinding`] gives the component the current value and keeps
//!   calling it back on every change.
//! - A [`WriterBinding`] lets the component produce changes.
//!
//! A pure producer holds only a writer, a pure display only a reader, and
//! an editable list both. The [`Reader`] and [`Writer`] traits express the
//! same split at the type level.
//!
//! # Lifetime
//!
//! A reader binding owns its [`Subscription`]. The registration is released
//! exactly once: when the binding is dropped (normal teardown, early return
//! or unwinding), or earlier through [`ReaderBinding::release`].

use std::fmt;

use super::atom::{Atom, Handle};
use super::store::Store;
use super::subscriber::Subscription;
use crate::error::Result;

/// Live read access to one node.
pub struct ReaderBinding<H: Handle> {
    store: Store,
    handle: H,
    subscription: Subscription,
}

impl<H: Handle> ReaderBinding<H> {
    pub fn handle(&self) -> H {
        self.handle
    }

    /// Re-read the node.
    pub fn current(&self) -> Result<H::Value> {
        self.store.read(&self.handle)
    }

    /// Whether updates are still being delivered.
    pub fn is_bound(&self) -> bool {
        self.subscription.is_active()
    }

    /// Stop receiving updates before the binding is dropped.
    pub fn release(&self) {
        self.subscription.unsubscribe();
    }
}

impl<H: Handle> fmt::Debug for ReaderBinding<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderBinding")
            .field("handle", &self.handle)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Write access to one atom.
pub struct WriterBinding<T> {
    store: Store,
    atom: Atom<T>,
}

impl<T> WriterBinding<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn atom(&self) -> Atom<T> {
        self.atom
    }

    pub fn set(&self, value: T) -> Result<()> {
        self.store.write(&self.atom, value)
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        self.store.update(&self.atom, f)
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }
}

impl<R> WriterBinding<Vec<R>>
where
    R: Clone + Send + Sync + 'static,
{
    /// Append a record to the end of the list.
    pub fn append(&self, record: R) -> Result<()> {
        self.store.append(&self.atom, record)
    }
}

impl<T> fmt::Debug for WriterBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterBinding")
            .field("atom", &self.atom)
            .finish()
    }
}

impl Store {
    /// Bind a reader: returns the current value together with a binding
    /// that calls `on_change` after every later change.
    ///
    /// The value and the registration are taken atomically, so no change
    /// can slip in between them.
    pub fn bind_reader<H, F>(&self, handle: &H, on_change: F) -> Result<(H::Value, ReaderBinding<H>)>
    where
        H: Handle,
        F: Fn(&H::Value) + Send + Sync + 'static,
    {
        let _serial = self.lock();
        let subscription = self.subscribe(handle, on_change)?;
        let current = self.read(handle)?;
        let binding = ReaderBinding {
            store: self.clone(),
            handle: *handle,
            subscription,
        };
        Ok((current, binding))
    }

    /// Bind a writer. Fails with `ReadOnlyWrite` for selectors, up front
    /// rather than on the first write.
    pub fn bind_writer<H: Handle>(&self, handle: &H) -> Result<WriterBinding<H::Value>> {
        self.ensure_writable(handle.node_id())?;
        Ok(WriterBinding {
            store: self.clone(),
            atom: Atom::from_id(handle.node_id()),
        })
    }
}

/// A component that displays a node.
pub trait Reader {
    type Source: Handle;

    fn reader(&self) -> &ReaderBinding<Self::Source>;

    fn current(&self) -> Result<<Self::Source as Handle>::Value> {
        self.reader().current()
    }
}

/// A component that produces changes to an atom.
pub trait Writer {
    type Target: Clone + Send + Sync + 'static;

    fn writer(&self) -> &WriterBinding<Self::Target>;

    fn set(&self, value: Self::Target) -> Result<()> {
        self.writer().set(value)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
