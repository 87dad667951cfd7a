//! Selector Handles
//!
//! A selector is a read-only value derived from atoms or other selectors.
//!
//! # How Selectors Work
//!
//! 1. A selector declares its dependencies up front, in order, and a compute
//!    function over their values.
//!
//! 2. It starts dirty with nothing cached. The first read computes and
//!    caches the value.
//!
//! 3. A write to any upstream atom marks it dirty immediately.
//!
//! 4. It recomputes on the next read, or during the write's notification
//!    pass if it has observers of its own.
//!
//! Unobserved selectors that are never read again never recompute.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use super::atom::{sealed, Handle};
use super::store::Store;
use crate::error::{Result, StoreError};
use crate::graph::NodeId;

/// A typed handle to a selector producing a `T`.
pub struct Selector<T> {
    id: NodeId,
    _value: PhantomData<fn() -> T>,
}

impl<T> Selector<T> {
    pub(crate) fn from_id(id: NodeId) -> Self {
        Self {
            id,
            _value: PhantomData,
        }
    }

    /// Get the selector's unique ID.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> sealed::Sealed for Selector<T> {}

impl<T> Handle for Selector<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Selector<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Selector<T> {}

impl<T> PartialEq for Selector<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Selector<T> {}

impl<T> Hash for Selector<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Selector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({})", self.id)
    }
}

/// The view a compute function gets of its declared dependencies.
///
/// Reading through this view refreshes dirty upstream selectors first, so a
/// compute function always sees settled values.
pub struct Dependencies<'a> {
    store: &'a Store,
    selector: NodeId,
    declared: &'a [NodeId],
}

impl<'a> Dependencies<'a> {
    pub(crate) fn new(store: &'a Store, selector: NodeId, declared: &'a [NodeId]) -> Self {
        Self {
            store,
            selector,
            declared,
        }
    }

    /// Read a declared dependency.
    ///
    /// Fails with [`StoreError::UndeclaredDependency`] for anything not in
    /// the selector's dependency list.
    pub fn get<H: Handle>(&self, handle: &H) -> Result<H::Value> {
        let id = handle.node_id();
        if !self.declared.contains(&id) {
            return Err(StoreError::UndeclaredDependency {
                selector: self.selector,
                dependency: id,
            });
        }
        self.store.read(handle)
    }

    /// The declared dependency ids, in declaration order.
    pub fn ids(&self) -> &[NodeId] {
        self.declared
    }

    /// The selector being computed.
    pub fn selector(&self) -> NodeId {
        self.selector
    }
}

impl fmt::Debug for Dependencies<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("selector", &self.selector)
            .field("declared", &self.declared)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
