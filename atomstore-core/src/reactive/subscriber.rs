//! Subscriber types for the store.
//!
//! A subscription is one registered observer callback on one node. The
//! [`Subscription`] guard returned by `Store::subscribe` is the only way to
//! cancel it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::store::{Store, StoreInner, Value};
use crate::error::BoxError;
use crate::graph::NodeId;

/// Type-erased observer as stored in a node's slot.
pub(crate) type Observer = Arc<dyn Fn(&Value) -> Result<(), BoxError> + Send + Sync>;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generate a new unique subscription ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for one observer registration.
///
/// Dropping the guard unsubscribes. [`Subscription::unsubscribe`] does the
/// same eagerly and is idempotent. The guard only holds a weak reference to
/// the store, so it never keeps a torn-down store alive.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<StoreInner>,
    node: NodeId,
    id: SubscriptionId,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(store: Weak<StoreInner>, node: NodeId, id: SubscriptionId) -> Self {
        Self {
            store,
            node,
            id,
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The node being observed.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Whether this guard still owns a registration.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove the registration. Calling this again is a no-op.
    ///
    /// Safe to call from inside a notification callback, including the
    /// callback being removed.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.store.upgrade() {
            Store::from_inner(inner).remove_observer(self.node, self.id);
        }
    }

    /// Give up the guard but keep the observer registered for as long as
    /// the store lives.
    pub fn detach(self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("node", &self.node)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
