//! Notification Context
//!
//! The notification context tracks which atoms are currently in the middle
//! of a notification pass. This is how the store recognises an observer
//! writing back to the atom that is notifying it.
//!
//! # Implementation
//!
//! Each store keeps a stack of atom ids. A pass pushes its atom when it
//! starts and pops it when it ends. Nested passes (an observer writing a
//! different atom) push on top. The stack lives inside the store rather
//! than in a thread-local, so two stores never see each other's passes.

use smallvec::SmallVec;

use super::store::Store;
use crate::graph::NodeId;

/// The atoms whose notification passes are currently running, innermost last.
#[derive(Debug, Default)]
pub(crate) struct NotificationStack {
    entries: SmallVec<[NodeId; 8]>,
}

impl NotificationStack {
    pub(crate) fn push(&mut self, node: NodeId) {
        self.entries.push(node);
    }

    pub(crate) fn pop(&mut self) -> Option<NodeId> {
        self.entries.pop()
    }

    /// Whether `node` is being notified anywhere on the stack.
    pub(crate) fn contains(&self, node: NodeId) -> bool {
        self.entries.contains(&node)
    }

    pub(crate) fn depth(&self) -> usize {
        self.entries.len()
    }
}

/// Guard that pops the stack when dropped.
///
/// This keeps the stack balanced even if a selector's compute function
/// panics in the middle of a pass.
pub(crate) struct NotificationContext<'a> {
    store: &'a Store,
    node: NodeId,
}

impl<'a> NotificationContext<'a> {
    /// Enter a notification pass for `node`.
    pub(crate) fn enter(store: &'a Store, node: NodeId) -> Self {
        store.with_state(|state| state.notifying.push(node));
        Self { store, node }
    }
}

impl Drop for NotificationContext<'_> {
    fn drop(&mut self) {
        let popped = self.store.with_state(|state| state.notifying.pop());

        // Passes are strictly nested; anything else is a bug in the store.
        debug_assert_eq!(
            popped,
            Some(self.node),
            "NotificationContext mismatch: expected {:?}, got {:?}",
            self.node,
            popped
        );
    }
}
