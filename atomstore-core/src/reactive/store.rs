//! Atom Store
//!
//! The store is the owner and single source of truth for every atom and
//! selector. It is constructed explicitly and passed to whoever needs it;
//! there is no global instance.
//!
//! # How It Works
//!
//! 1. Atoms and selectors are registered once, at start-up, and live until
//!    the store is dropped.
//!
//! 2. A write replaces the atom's value and marks every downstream selector
//!    dirty.
//!
//! 3. The store then runs a notification pass: every observer of the atom
//!    is invoked, then every dirty downstream selector that has observers is
//!    recomputed (dependencies first) and its observers are invoked.
//!
//! 4. When `write` returns, the pass is over.
//!
//! A write made by an observer extends the running pass. Its atom's
//! observers run right away, but its downstream selectors join the queue of
//! the outermost pass, so a selector reached through several written atoms
//! is still delivered once, with the value that includes all of them.
//!
//! # Re-entrancy
//!
//! Observers may read anything, subscribe, unsubscribe (themselves
//! included), and write other atoms; such a write runs its own nested pass.
//! Writing the atom that is currently notifying is governed by
//! [`ReentrancyPolicy`].
//!
//! # Thread Safety
//!
//! The store is meant to be driven from one thread. It is still `Send` and
//! `Sync`: every operation, including its whole notification pass, runs
//! under one re-entrant lock, so access from a second thread waits instead
//! of interleaving. Callbacks run with that lock held and must not block on
//! another thread that uses the same store.

use std::any::{self, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use indexmap::map::Entry;
use indexmap::{IndexMap, IndexSet};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use super::atom::{Atom, Handle};
use super::context::{NotificationContext, NotificationStack};
use super::selector::{Dependencies, Selector};
use super::subscriber::{Observer, Subscription, SubscriptionId};
use crate::config::{ReentrancyPolicy, StoreConfig};
use crate::error::{BoxError, Result, StoreError};
use crate::graph::{DirtyState, Edges, Node, NodeId, NodeKind, UpdateScheduler};

/// A stored value. Replaced wholesale on every write, never mutated in place.
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// Type-erased selector compute function.
type ComputeFn = Arc<dyn Fn(&Dependencies<'_>) -> Result<Value> + Send + Sync>;

pub(crate) type StoreGuard<'a> = ReentrantMutexGuard<'a, RefCell<StoreState>>;

enum Content {
    Atom(Value),
    Selector {
        cached: Option<Value>,
        compute: ComputeFn,
    },
}

/// Everything the store keeps about one node besides its graph edges.
struct Slot {
    key: Option<String>,
    type_id: TypeId,
    type_name: &'static str,
    content: Content,
    observers: IndexMap<SubscriptionId, Observer>,
    recomputes: u64,
}

impl Slot {
    fn new<T: 'static>(key: Option<String>, content: Content) -> Self {
        Self {
            key,
            type_id: TypeId::of::<T>(),
            type_name: any::type_name::<T>(),
            content,
            observers: IndexMap::new(),
            recomputes: 0,
        }
    }

    fn check_type<T: 'static>(&self, id: NodeId) -> Result<()> {
        if self.type_id == TypeId::of::<T>() {
            Ok(())
        } else {
            Err(StoreError::TypeMismatch {
                id,
                expected: any::type_name::<T>(),
            })
        }
    }

    fn label(&self) -> &str {
        self.key.as_deref().unwrap_or("")
    }
}

pub(crate) struct StoreState {
    graph: UpdateScheduler,
    slots: HashMap<NodeId, Slot>,
    keys: HashMap<String, NodeId>,
    pub(crate) notifying: NotificationStack,
    /// Atoms written again during their own pass, under the fixpoint policy.
    pending: IndexSet<NodeId>,
    /// Observed selectors waiting for the outermost pass to deliver them,
    /// with the observers snapshotted when they were queued.
    queued: IndexMap<NodeId, Vec<(SubscriptionId, Observer)>>,
}

impl StoreState {
    fn new() -> Self {
        Self {
            graph: UpdateScheduler::new(),
            slots: HashMap::new(),
            keys: HashMap::new(),
            notifying: NotificationStack::default(),
            pending: IndexSet::new(),
            queued: IndexMap::new(),
        }
    }

    fn slot(&self, id: NodeId) -> Result<&Slot> {
        self.slots.get(&id).ok_or(StoreError::UnknownAtom { id })
    }

    fn observers(&self, id: NodeId) -> Vec<(SubscriptionId, Observer)> {
        self.slots
            .get(&id)
            .map(|slot| {
                slot.observers
                    .iter()
                    .map(|(sub, observer)| (*sub, Arc::clone(observer)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub(crate) struct StoreInner {
    config: StoreConfig,
    state: ReentrantMutex<RefCell<StoreState>>,
}

/// Summary of one node, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub key: Option<String>,
    pub kind: NodeKind,
    pub state: DirtyState,
    pub observers: usize,
    pub recomputes: u64,
    pub dependencies: Vec<NodeId>,
    pub value_type: &'static str,
}

/// What a refresh has to do, decided under the state borrow and carried
/// out after it is released.
enum Refresh {
    Ready(Value),
    Compute(ComputeFn, Edges),
}

/// First failure of a write, plus how many there were.
#[derive(Default)]
struct Failures {
    first: Option<StoreError>,
    count: usize,
}

impl Failures {
    fn record(&mut self, err: StoreError) {
        self.count += 1;
        if self.first.is_none() {
            self.first = Some(err);
        }
    }

    fn into_result(self, id: NodeId) -> Result<()> {
        match self.first {
            None => Ok(()),
            Some(err) => {
                if self.count > 1 {
                    tracing::debug!(node = %id, failures = self.count, "reporting first of several failures");
                }
                Err(err)
            }
        }
    }
}

/// The atom store.
///
/// Cloning a `Store` is cheap and yields another handle to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Create an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                state: ReentrantMutex::new(RefCell::new(StoreState::new())),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<StoreInner> {
        Arc::downgrade(&self.inner)
    }

    /// Hold the store's lock across several operations.
    pub(crate) fn lock(&self) -> StoreGuard<'_> {
        self.inner.state.lock()
    }

    /// Run `f` with exclusive access to the state.
    ///
    /// `f` must not call back into user code: observers, compute functions
    /// and value destructors all run outside this borrow.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Number of atoms and selectors in the store.
    pub fn len(&self) -> usize {
        self.with_state(|state| state.graph.node_count())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// Register a new atom. Never fails.
    pub fn create_atom<T>(&self, initial: T) -> Atom<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Atom::from_id(self.insert_atom(None, initial))
    }

    /// Register a new atom under a key that is unique within this store.
    pub fn create_atom_with_key<T>(&self, key: impl Into<String>, initial: T) -> Result<Atom<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let key = key.into();
        let _serial = self.lock();
        if self.with_state(|state| state.keys.contains_key(&key)) {
            return Err(StoreError::DuplicateKey { key });
        }
        Ok(Atom::from_id(self.insert_atom(Some(key), initial)))
    }

    fn insert_atom<T>(&self, key: Option<String>, initial: T) -> NodeId
    where
        T: Clone + Send + Sync + 'static,
    {
        let value: Value = Arc::new(initial);
        self.with_state(|state| {
            let id = state.graph.add_node(Node::atom());
            if let Some(key) = &key {
                state.keys.insert(key.clone(), id);
            }
            tracing::debug!(node = %id, key = key.as_deref().unwrap_or(""), "atom created");
            state.slots.insert(id, Slot::new::<T>(key, Content::Atom(value)));
            id
        })
    }

    /// Register a selector over `dependencies`.
    ///
    /// Every dependency must already exist in this store. `compute` may only
    /// read the nodes it declares here.
    pub fn create_selector<T, F>(
        &self,
        dependencies: impl IntoIterator<Item = NodeId>,
        compute: F,
    ) -> Result<Selector<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&Dependencies<'_>) -> Result<T> + Send + Sync + 'static,
    {
        let node = Node::selector(dependencies);
        let _serial = self.lock();
        self.with_state(|state| {
            node.dependencies()
                .iter()
                .find(|dep| !state.graph.contains(**dep))
                .map_or(Ok(()), |&id| Err(StoreError::UnknownAtom { id }))
        })?;

        let compute: ComputeFn = Arc::new(move |deps: &Dependencies<'_>| {
            compute(deps).map(|value| Arc::new(value) as Value)
        });
        let id = self.with_state(|state| {
            let id = state.graph.add_node(node);
            state.slots.insert(
                id,
                Slot::new::<T>(
                    None,
                    Content::Selector {
                        cached: None,
                        compute,
                    },
                ),
            );
            id
        });
        tracing::debug!(node = %id, "selector created");
        Ok(Selector::from_id(id))
    }

    /// Selector over a single node.
    pub fn map<H, T, F>(&self, source: &H, f: F) -> Result<Selector<T>>
    where
        H: Handle,
        T: Clone + Send + Sync + 'static,
        F: Fn(&H::Value) -> T + Send + Sync + 'static,
    {
        let source = *source;
        self.create_selector([source.node_id()], move |deps| Ok(f(&deps.get(&source)?)))
    }

    /// Selector over two nodes.
    pub fn combine<A, B, T, F>(&self, a: &A, b: &B, f: F) -> Result<Selector<T>>
    where
        A: Handle,
        B: Handle,
        T: Clone + Send + Sync + 'static,
        F: Fn(&A::Value, &B::Value) -> T + Send + Sync + 'static,
    {
        let (a, b) = (*a, *b);
        self.create_selector([a.node_id(), b.node_id()], move |deps| {
            Ok(f(&deps.get(&a)?, &deps.get(&b)?))
        })
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    /// Current value of an atom, or of a selector (recomputed first if dirty).
    pub fn read<H: Handle>(&self, handle: &H) -> Result<H::Value> {
        let id = handle.node_id();
        let value = self.refresh(id)?;
        (*value)
            .downcast_ref::<H::Value>()
            .cloned()
            .ok_or(StoreError::TypeMismatch {
                id,
                expected: any::type_name::<H::Value>(),
            })
    }

    /// Bring a node up to date and return its value.
    fn refresh(&self, id: NodeId) -> Result<Value> {
        let _serial = self.lock();
        let plan = self.with_state(|state| -> Result<Refresh> {
            let node = state
                .graph
                .get_node(id)
                .ok_or(StoreError::UnknownAtom { id })?;
            let clean = node.is_clean();
            let deps = Edges::from_slice(node.dependencies());
            Ok(match &state.slot(id)?.content {
                Content::Atom(value) => Refresh::Ready(Arc::clone(value)),
                Content::Selector {
                    cached: Some(value),
                    ..
                } if clean => Refresh::Ready(Arc::clone(value)),
                Content::Selector { compute, .. } => Refresh::Compute(Arc::clone(compute), deps),
            })
        })?;

        let (compute, deps) = match plan {
            Refresh::Ready(value) => return Ok(value),
            Refresh::Compute(compute, deps) => (compute, deps),
        };

        let value = compute(&Dependencies::new(self, id, &deps))?;
        let stale = self.with_state(|state| {
            if let Some(node) = state.graph.get_node_mut(id) {
                node.mark_clean();
            }
            let slot = state.slots.get_mut(&id)?;
            slot.recomputes += 1;
            match &mut slot.content {
                Content::Selector { cached, .. } => cached.replace(Arc::clone(&value)),
                Content::Atom(_) => None,
            }
        });
        drop(stale);
        tracing::debug!(node = %id, "selector recomputed");
        Ok(value)
    }

    /// Diagnostics for one node.
    pub fn inspect<H: Handle>(&self, handle: &H) -> Result<NodeInfo> {
        let id = handle.node_id();
        self.with_state(|state| {
            let node = state
                .graph
                .get_node(id)
                .ok_or(StoreError::UnknownAtom { id })?;
            let slot = state.slot(id)?;
            Ok(NodeInfo {
                id,
                key: slot.key.clone(),
                kind: node.kind(),
                state: node.dirty_state(),
                observers: slot.observers.len(),
                recomputes: slot.recomputes,
                dependencies: node.dependencies().to_vec(),
                value_type: slot.type_name,
            })
        })
    }

    // ------------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------------

    /// Fail unless `id` is an atom of this store.
    pub(crate) fn ensure_writable(&self, id: NodeId) -> Result<()> {
        self.with_state(|state| match state.slot(id)?.content {
            Content::Atom(_) => Ok(()),
            Content::Selector { .. } => Err(StoreError::ReadOnlyWrite { id }),
        })
    }

    /// Replace an atom's value and notify everything downstream.
    ///
    /// Every observer of the atom, and of each selector derived from it,
    /// has been invoked exactly once with the settled value by the time
    /// this returns. Observer failures do not stop the pass; the first one
    /// is returned afterwards.
    pub fn write<H: Handle>(&self, handle: &H, value: H::Value) -> Result<()> {
        let id = handle.node_id();
        let _serial = self.lock();

        let (reentrant, key) = self.with_state(|state| -> Result<(bool, Option<String>)> {
            let slot = state.slot(id)?;
            if let Content::Selector { .. } = slot.content {
                return Err(StoreError::ReadOnlyWrite { id });
            }
            slot.check_type::<H::Value>(id)?;
            Ok((state.notifying.contains(id), slot.key.clone()))
        })?;

        if reentrant && self.inner.config.reentrancy == ReentrancyPolicy::Reject {
            tracing::warn!(node = %id, key = key.as_deref().unwrap_or(""), "rejected re-entrant write");
            return Err(StoreError::ReentrantWrite { id });
        }

        let value: Value = Arc::new(value);
        let (previous, invalidated) = self.with_state(|state| {
            let previous = match state.slots.get_mut(&id).map(|slot| &mut slot.content) {
                Some(Content::Atom(current)) => Some(std::mem::replace(current, value)),
                _ => None,
            };
            let invalidated = state.graph.mark_changed(id);
            if reentrant {
                state.pending.insert(id);
            }
            (previous, invalidated.len())
        });
        // Old value goes away outside the borrow; its destructor is user code.
        drop(previous);

        tracing::debug!(
            node = %id,
            key = key.as_deref().unwrap_or(""),
            invalidated,
            deferred = reentrant,
            "atom written"
        );

        if reentrant {
            // The running pass picks the new value up when it finishes.
            return Ok(());
        }
        self.notify(id)
    }

    /// Write `f(&current)` to an atom.
    pub fn update<H, F>(&self, handle: &H, f: F) -> Result<()>
    where
        H: Handle,
        F: FnOnce(&H::Value) -> H::Value,
    {
        let _serial = self.lock();
        self.ensure_writable(handle.node_id())?;
        let current = self.read(handle)?;
        self.write(handle, f(&current))
    }

    /// Append a record to a list atom. Earlier records keep their order.
    pub fn append<R>(&self, list: &Atom<Vec<R>>, record: R) -> Result<()>
    where
        R: Clone + Send + Sync + 'static,
    {
        self.update(list, move |records| {
            let mut next = Vec::with_capacity(records.len() + 1);
            next.extend_from_slice(records);
            next.push(record);
            next
        })
    }

    // ------------------------------------------------------------------------
    // Notification
    // ------------------------------------------------------------------------

    /// Run notification passes for `id` until no re-entrant write is pending.
    fn notify(&self, id: NodeId) -> Result<()> {
        let max_passes = self.inner.config.max_passes.max(1);
        let outermost = self.with_state(|state| state.notifying.depth() == 0);
        let mut failures = Failures::default();
        let mut passes = 0;

        loop {
            passes += 1;
            {
                let _ctx = NotificationContext::enter(self, id);
                self.notification_pass(id, &mut failures);
                if outermost {
                    self.drain_selectors(id, max_passes, &mut failures);
                }
            }

            if !self.with_state(|state| state.pending.shift_remove(&id)) {
                break;
            }
            if passes >= max_passes {
                tracing::warn!(node = %id, passes, "notification did not settle");
                failures.record(StoreError::NotificationLimit { id, passes });
                break;
            }
        }

        failures.into_result(id)
    }

    fn notification_pass(&self, id: NodeId, failures: &mut Failures) {
        // Observer lists are snapshotted up front: anything subscribed
        // during this pass waits for the next write.
        let snapshot = self.with_state(|state| -> Result<_> {
            let value = match &state.slot(id)?.content {
                Content::Atom(value) => Arc::clone(value),
                Content::Selector { .. } => return Err(StoreError::ReadOnlyWrite { id }),
            };
            let observers = state.observers(id);
            let downstream: Vec<_> = state
                .graph
                .affected(id)
                .into_iter()
                .map(|selector| (selector, state.observers(selector)))
                .filter(|(_, observers)| !observers.is_empty())
                .collect();
            Ok((value, observers, downstream, state.notifying.depth()))
        });

        let (value, observers, downstream, depth) = match snapshot {
            Ok(snapshot) => snapshot,
            Err(err) => {
                failures.record(err);
                return;
            }
        };

        tracing::trace!(
            node = %id,
            observers = observers.len(),
            selectors = downstream.len(),
            depth,
            "notification pass"
        );

        self.deliver(id, &value, observers, failures);

        // A selector already queued by a nested write keeps its place.
        let duplicates = self.with_state(|state| {
            downstream
                .into_iter()
                .filter_map(|(selector, observers)| match state.queued.entry(selector) {
                    Entry::Occupied(_) => Some(observers),
                    Entry::Vacant(slot) => {
                        slot.insert(observers);
                        None
                    }
                })
                .collect::<Vec<_>>()
        });
        drop(duplicates);
    }

    /// Deliver queued selectors one at a time, dependencies first, until the
    /// queue is empty. Observers may queue more selectors while this runs.
    fn drain_selectors(&self, id: NodeId, max_passes: usize, failures: &mut Failures) {
        let mut deliveries: HashMap<NodeId, usize> = HashMap::new();

        loop {
            let next = self.with_state(|state| {
                let order = state
                    .graph
                    .topological_sort(state.queued.keys().copied().collect());
                let first = order.first().copied()?;
                state.queued.shift_remove_entry(&first)
            });
            let Some((selector, observers)) = next else {
                return;
            };

            // Re-queued after delivery: an observer keeps changing its inputs.
            let count = deliveries.entry(selector).or_insert(0);
            *count += 1;
            if *count > max_passes {
                tracing::warn!(node = %id, selector = %selector, passes = max_passes, "selector delivery did not settle");
                failures.record(StoreError::NotificationLimit {
                    id: selector,
                    passes: max_passes,
                });
                let abandoned = self.with_state(|state| std::mem::take(&mut state.queued));
                drop((observers, abandoned));
                return;
            }

            self.deliver_selector(selector, observers, failures);
        }
    }

    fn deliver_selector(
        &self,
        selector: NodeId,
        observers: Vec<(SubscriptionId, Observer)>,
        failures: &mut Failures,
    ) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.refresh(selector))) {
            Ok(Ok(value)) => self.deliver(selector, &value, observers, failures),
            Ok(Err(err)) => {
                tracing::warn!(node = %selector, error = %err, "selector failed to recompute");
                failures.record(err);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(node = %selector, %message, "selector panicked");
                failures.record(StoreError::SelectorPanicked { id: selector, message });
            }
        }
    }

    fn deliver(
        &self,
        id: NodeId,
        value: &Value,
        observers: Vec<(SubscriptionId, Observer)>,
        failures: &mut Failures,
    ) {
        for (subscription, observer) in observers {
            // Unsubscribed earlier in this pass.
            if !self.is_subscribed(id, subscription) {
                continue;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| observer(value))) {
                Ok(Ok(())) => {}
                Ok(Err(source)) => {
                    tracing::warn!(node = %id, error = %source, "observer failed");
                    failures.record(StoreError::Observer { id, source });
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::warn!(node = %id, %message, "observer panicked");
                    failures.record(StoreError::ObserverPanicked { id, message });
                }
            }
        }
    }

    fn is_subscribed(&self, id: NodeId, subscription: SubscriptionId) -> bool {
        self.with_state(|state| {
            state
                .slots
                .get(&id)
                .is_some_and(|slot| slot.observers.contains_key(&subscription))
        })
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    /// Call `callback` with the new value after every future change of the
    /// node. It is never called during registration.
    pub fn subscribe<H, F>(&self, handle: &H, callback: F) -> Result<Subscription>
    where
        H: Handle,
        F: Fn(&H::Value) + Send + Sync + 'static,
    {
        self.try_subscribe(handle, move |value| {
            callback(value);
            Ok(())
        })
    }

    /// Like [`Store::subscribe`], for callbacks that can fail.
    ///
    /// An error does not stop the pass; it is reported by the `write` that
    /// triggered it.
    pub fn try_subscribe<H, F>(&self, handle: &H, callback: F) -> Result<Subscription>
    where
        H: Handle,
        F: Fn(&H::Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = handle.node_id();
        let observer: Observer = Arc::new(move |value: &Value| {
            let value = (**value).downcast_ref::<H::Value>().ok_or_else(|| {
                Box::new(StoreError::TypeMismatch {
                    id,
                    expected: any::type_name::<H::Value>(),
                }) as BoxError
            })?;
            callback(value)
        });

        let subscription = SubscriptionId::new();
        let outcome = self.with_state(move |state| match state.slots.get_mut(&id) {
            None => Err((StoreError::UnknownAtom { id }, observer)),
            Some(slot) => match slot.check_type::<H::Value>(id) {
                Ok(()) => {
                    slot.observers.insert(subscription, observer);
                    tracing::trace!(node = %id, key = slot.label(), observers = slot.observers.len(), "subscribed");
                    Ok(())
                }
                Err(err) => Err((err, observer)),
            },
        });
        if let Err((err, rejected)) = outcome {
            drop(rejected);
            return Err(err);
        }

        Ok(Subscription::new(self.downgrade(), id, subscription))
    }

    /// Remove one registration. Returns whether it was still present.
    pub(crate) fn remove_observer(&self, id: NodeId, subscription: SubscriptionId) -> bool {
        let removed = self.with_state(|state| {
            state
                .slots
                .get_mut(&id)
                .and_then(|slot| slot.observers.shift_remove(&subscription))
        });
        let found = removed.is_some();
        // The callback may own captured state with its own destructor.
        drop(removed);
        tracing::trace!(node = %id, found, "unsubscribed");
        found
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("nodes", &self.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

    #[test]
    fn write_then_read() {
        let store = Store::new();
        let text = store.create_atom(String::new());

        store.write(&text, "hello".to_string()).unwrap();
        assert_eq!(store.read(&text).unwrap(), "hello");
    }

    #[test]
    fn last_write_wins() {
        let store = Store::new();
        let counter = store.create_atom(0);
        for v in 1..=10 {
            store.write(&counter, v).unwrap();
        }
        assert_eq!(store.read(&counter).unwrap(), 10);
    }

    #[test]
    fn store_notifies_subscribers() {
        let store = Store::new();
        let atom = store.create_atom(0);
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let _sub = store
            .subscribe(&atom, move |v| {
                call_count_clone.fetch_add(*v, Ordering::SeqCst);
            })
            .unwrap();

        // Never called at registration time.
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        store.write(&atom, 1).unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        store.write(&atom, 2).unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn read_returns_copies() {
        let store = Store::new();
        let list = store.create_atom(vec![1, 2]);

        let mut copy = store.read(&list).unwrap();
        copy.push(3);
        assert_eq!(store.read(&list).unwrap(), vec![1, 2]);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let store = Store::new();
        store.create_atom_with_key("text", String::new()).unwrap();
        let err = store.create_atom_with_key("text", 0).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { key } if key == "text"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn writing_a_selector_is_read_only() {
        let store = Store::new();
        let base = store.create_atom(1);
        let doubled = store.map(&base, |v: &i32| v * 2).unwrap();

        let err = store.write(&doubled, 4).unwrap_err();
        assert!(matches!(err, StoreError::ReadOnlyWrite { id } if id == doubled.id()));
        let err = store.update(&doubled, |v| v + 1).unwrap_err();
        assert!(matches!(err, StoreError::ReadOnlyWrite { .. }));
    }

    #[test]
    fn observed_selector_recomputes_during_write() {
        let store = Store::new();
        let base = store.create_atom(1);
        let doubled = store.map(&base, |v: &i32| v * 2).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _sub = store
            .subscribe(&doubled, move |v| seen_clone.lock().push(*v))
            .unwrap();

        store.write(&base, 3).unwrap();
        store.write(&base, 4).unwrap();

        assert_eq!(*seen.lock(), vec![6, 8]);
        assert_eq!(store.inspect(&doubled).unwrap().state, DirtyState::Clean);
    }

    #[test]
    fn selector_chain_settles_before_notification() {
        let store = Store::new();
        let base = store.create_atom(1);
        let doubled = store.map(&base, |v: &i32| v * 2).unwrap();
        let plus_ten = store.map(&doubled, |v: &i32| v + 10).unwrap();
        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();

        let _sub = store
            .subscribe(&plus_ten, move |v| seen_clone.store(*v, Ordering::SeqCst))
            .unwrap();

        store.write(&base, 5).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn observer_may_unsubscribe_itself() {
        let store = Store::new();
        let atom = store.create_atom(0);
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));

        let sub = {
            let slot = slot.clone();
            let first_calls = first_calls.clone();
            store
                .subscribe(&atom, move |_| {
                    first_calls.fetch_add(1, Ordering::SeqCst);
                    if let Some(sub) = slot.lock().as_ref() {
                        sub.unsubscribe();
                    }
                })
                .unwrap()
        };
        *slot.lock() = Some(sub);

        let second_calls_clone = second_calls.clone();
        let _other = store
            .subscribe(&atom, move |_| {
                second_calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        store.write(&atom, 1).unwrap();
        store.write(&atom, 2).unwrap();

        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn observer_removed_mid_pass_is_skipped() {
        let store = Store::new();
        let atom = store.create_atom(0);
        let victim_calls = Arc::new(AtomicUsize::new(0));
        let victim_calls_clone = victim_calls.clone();
        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let victim_slot_clone = victim_slot.clone();
        let _killer = store
            .subscribe(&atom, move |_| {
                victim_slot_clone.lock().take();
            })
            .unwrap();
        let victim = store
            .subscribe(&atom, move |_| {
                victim_calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        *victim_slot.lock() = Some(victim);

        store.write(&atom, 1).unwrap();
        assert_eq!(victim_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscribing_mid_pass_waits_for_next_write() {
        let store = Store::new();
        let atom = store.create_atom(0);
        let late_calls = Arc::new(AtomicUsize::new(0));
        let held: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let store_clone = store.clone();
        let late_calls_clone = late_calls.clone();
        let held_clone = held.clone();
        let _sub = store
            .subscribe(&atom, move |_| {
                let late_calls = late_calls_clone.clone();
                let sub = store_clone
                    .subscribe(&atom, move |_| {
                        late_calls.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                held_clone.lock().push(sub);
            })
            .unwrap();

        store.write(&atom, 1).unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        store.write(&atom, 2).unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
        held.lock().clear();
    }

    #[test]
    fn observer_failure_does_not_stop_the_pass() {
        let store = Store::new();
        let atom = store.create_atom(0);
        let after = Arc::new(AtomicUsize::new(0));
        let after_clone = after.clone();

        let _bad = store
            .try_subscribe(&atom, |_| Err("display is gone".into()))
            .unwrap();
        let _panics = store
            .subscribe(&atom, |_| panic!("render exploded"))
            .unwrap();
        let _good = store
            .subscribe(&atom, move |_| {
                after_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let err = store.write(&atom, 1).unwrap_err();
        assert!(matches!(err, StoreError::Observer { id, .. } if id == atom.id()));
        assert_eq!(after.load(Ordering::SeqCst), 1);
        // The write itself went through.
        assert_eq!(store.read(&atom).unwrap(), 1);
    }

    #[test]
    fn observer_panic_is_reported() {
        let store = Store::new();
        let atom = store.create_atom(0);
        let _sub = store
            .subscribe(&atom, |v| panic!("bad value {v}"))
            .unwrap();

        let err = store.write(&atom, 7).unwrap_err();
        assert!(matches!(err, StoreError::ObserverPanicked { message, .. } if message == "bad value 7"));
    }

    #[test]
    fn observer_may_write_another_atom() {
        let store = Store::new();
        let celsius = store.create_atom(0.0_f64);
        let fahrenheit = store.create_atom(32.0_f64);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let store_clone = store.clone();
        let _convert = store
            .try_subscribe(&celsius, move |c| {
                store_clone.write(&fahrenheit, c * 9.0 / 5.0 + 32.0)?;
                Ok(())
            })
            .unwrap();
        let seen_clone = seen.clone();
        let _show = store
            .subscribe(&fahrenheit, move |f| seen_clone.lock().push(*f))
            .unwrap();

        store.write(&celsius, 100.0).unwrap();
        assert_eq!(store.read(&fahrenheit).unwrap(), 212.0);
        assert_eq!(*seen.lock(), vec![212.0]);
    }

    #[test]
    fn reentrant_write_is_rejected_by_default() {
        let store = Store::new();
        let atom = store.create_atom(0);
        let store_clone = store.clone();

        let _echo = store
            .try_subscribe(&atom, move |v| {
                store_clone.write(&atom, v + 1)?;
                Ok(())
            })
            .unwrap();

        let err = store.write(&atom, 1).unwrap_err();
        match err {
            StoreError::Observer { source, .. } => {
                let inner = source.downcast_ref::<StoreError>();
                assert!(matches!(inner, Some(StoreError::ReentrantWrite { .. })));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.read(&atom).unwrap(), 1);
    }

    #[test]
    fn fixpoint_policy_reruns_until_settled() {
        let store = Store::with_config(StoreConfig {
            reentrancy: ReentrancyPolicy::Fixpoint,
            max_passes: 16,
        });
        let atom = store.create_atom(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let store_clone = store.clone();
        let calls_clone = calls.clone();

        // Clamp to 10: writes back once, then sees a settled value.
        let _clamp = store
            .try_subscribe(&atom, move |v| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                if *v > 10 {
                    store_clone.write(&atom, 10)?;
                }
                Ok(())
            })
            .unwrap();

        store.write(&atom, 50).unwrap();
        assert_eq!(store.read(&atom).unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fixpoint_policy_reports_runaway_loops() {
        let store = Store::with_config(StoreConfig {
            reentrancy: ReentrancyPolicy::Fixpoint,
            max_passes: 4,
        });
        let atom = store.create_atom(0);
        let store_clone = store.clone();

        let _runaway = store
            .try_subscribe(&atom, move |v| {
                store_clone.write(&atom, v + 1)?;
                Ok(())
            })
            .unwrap();

        let err = store.write(&atom, 1).unwrap_err();
        assert!(matches!(err, StoreError::NotificationLimit { passes: 4, .. }));
        // One pass per value: 1, 2, 3, 4 seen; 5 written but never notified.
        assert_eq!(store.read(&atom).unwrap(), 5);
    }

    #[test]
    fn nested_write_delivers_shared_selector_once() {
        let store = Store::new();
        let a = store.create_atom(0);
        let b = store.create_atom(0);
        let sum = store.combine(&a, &b, |a: &i32, b: &i32| a + b).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let _show = store
            .subscribe(&sum, move |v| seen_clone.lock().push(*v))
            .unwrap();
        let store_clone = store.clone();
        let _mirror = store
            .try_subscribe(&a, move |v| {
                store_clone.write(&b, *v)?;
                Ok(())
            })
            .unwrap();

        store.write(&a, 5).unwrap();
        assert_eq!(*seen.lock(), vec![10]);
    }

    #[test]
    fn panicking_selector_does_not_stop_the_pass() {
        let store = Store::new();
        let atom = store.create_atom(0);
        let broken = store
            .map(&atom, |v: &i32| {
                if *v == 1 {
                    panic!("cannot render one");
                }
                *v
            })
            .unwrap();
        let healthy = store.map(&atom, |v: &i32| v * 10).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _broken_sub = store.subscribe(&broken, |_| {}).unwrap();
        let seen_clone = seen.clone();
        let _healthy_sub = store
            .subscribe(&healthy, move |v| seen_clone.lock().push(*v))
            .unwrap();

        let err = store.write(&atom, 1).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SelectorPanicked { id, message } if id == broken.id() && message == "cannot render one"
        ));
        assert_eq!(*seen.lock(), vec![10]);

        // The broken selector recovers once its input does.
        store.write(&atom, 2).unwrap();
        assert_eq!(store.read(&broken).unwrap(), 2);
        assert_eq!(*seen.lock(), vec![10, 20]);
    }

    #[test]
    fn observer_reading_dirty_selector_recomputes_once() {
        let store = Store::new();
        let atom = store.create_atom(1);
        let computes = Arc::new(AtomicUsize::new(0));
        let computes_clone = computes.clone();
        let doubled = store
            .map(&atom, move |v: &i32| {
                computes_clone.fetch_add(1, Ordering::SeqCst);
                v * 2
            })
            .unwrap();
        let read_during_pass = Arc::new(AtomicI32::new(0));
        let delivered = Arc::new(Mutex::new(Vec::new()));

        let store_clone = store.clone();
        let read_clone = read_during_pass.clone();
        let _peek = store
            .try_subscribe(&atom, move |_| {
                read_clone.store(store_clone.read(&doubled)?, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        let delivered_clone = delivered.clone();
        let _show = store
            .subscribe(&doubled, move |v| delivered_clone.lock().push(*v))
            .unwrap();

        store.write(&atom, 3).unwrap();

        assert_eq!(read_during_pass.load(Ordering::SeqCst), 6);
        assert_eq!(*delivered.lock(), vec![6]);
        assert_eq!(computes.load(Ordering::SeqCst), 1);
        assert_eq!(store.inspect(&doubled).unwrap().recomputes, 1);
    }

    #[test]
    fn selector_observer_may_unsubscribe_itself_or_a_sibling() {
        let store = Store::new();
        let atom = store.create_atom(0);
        let doubled = store.map(&atom, |v: &i32| v * 2).unwrap();
        let own_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let sibling_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let own_calls = Arc::new(AtomicUsize::new(0));
        let sibling_calls = Arc::new(AtomicUsize::new(0));

        let own = {
            let own_slot = own_slot.clone();
            let sibling_slot = sibling_slot.clone();
            let own_calls = own_calls.clone();
            store
                .subscribe(&doubled, move |_| {
                    own_calls.fetch_add(1, Ordering::SeqCst);
                    sibling_slot.lock().take();
                    if let Some(sub) = own_slot.lock().as_ref() {
                        sub.unsubscribe();
                    }
                })
                .unwrap()
        };
        *own_slot.lock() = Some(own);

        let sibling_calls_clone = sibling_calls.clone();
        let sibling = store
            .subscribe(&doubled, move |_| {
                sibling_calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        *sibling_slot.lock() = Some(sibling);

        store.write(&atom, 1).unwrap();
        store.write(&atom, 2).unwrap();

        assert_eq!(own_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sibling_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.inspect(&doubled).unwrap().observers, 0);
    }

    #[test]
    fn nested_write_failure_is_collected() {
        let store = Store::new();
        let source = store.create_atom(0);
        let target = store.create_atom(0);
        let sibling_calls = Arc::new(AtomicUsize::new(0));

        let _broken = store
            .try_subscribe(&target, |_| Err("target display is gone".into()))
            .unwrap();
        let store_clone = store.clone();
        let _forward = store
            .try_subscribe(&source, move |v| {
                store_clone.write(&target, *v)?;
                Ok(())
            })
            .unwrap();
        let sibling_calls_clone = sibling_calls.clone();
        let _sibling = store
            .subscribe(&source, move |_| {
                sibling_calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let err = store.write(&source, 4).unwrap_err();
        match err {
            StoreError::Observer { id, source: inner } => {
                assert_eq!(id, source.id());
                let nested = inner.downcast_ref::<StoreError>();
                assert!(matches!(nested, Some(StoreError::Observer { id, .. }) if *id == target.id()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sibling_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.read(&target).unwrap(), 4);
    }

    #[test]
    fn selector_feeding_its_own_input_is_bounded() {
        let store = Store::with_config(StoreConfig {
            reentrancy: ReentrancyPolicy::Reject,
            max_passes: 4,
        });
        let a = store.create_atom(0);
        let b = store.create_atom(0);
        let sum = store.combine(&a, &b, |a: &i32, b: &i32| a + b).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let store_clone = store.clone();
        let calls_clone = calls.clone();
        let _feedback = store
            .try_subscribe(&sum, move |v| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                store_clone.write(&b, *v)?;
                Ok(())
            })
            .unwrap();

        let err = store.write(&a, 1).unwrap_err();
        assert!(matches!(err, StoreError::NotificationLimit { id, passes: 4 } if id == sum.id()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn append_preserves_order() {
        let store = Store::new();
        let list = store.create_atom(Vec::<&'static str>::new());

        store.append(&list, "A").unwrap();
        store.append(&list, "B").unwrap();
        store.append(&list, "C").unwrap();

        assert_eq!(store.read(&list).unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn inspect_reports_node_details() {
        let store = Store::new();
        let text = store.create_atom_with_key("text", String::new()).unwrap();
        let len = store.map(&text, |t: &String| t.len()).unwrap();

        let info = store.inspect(&text).unwrap();
        assert_eq!(info.key.as_deref(), Some("text"));
        assert_eq!(info.kind, NodeKind::Atom);
        assert_eq!(info.value_type, any::type_name::<String>());

        let info = store.inspect(&len).unwrap();
        assert_eq!(info.kind, NodeKind::Selector);
        assert_eq!(info.dependencies, vec![text.id()]);
    }

    #[test]
    fn store_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Store>();
        assert_send_sync::<Subscription>();
    }

    #[test]
    fn other_threads_are_serialized() {
        let store = Store::new();
        let counter = store.create_atom(0_u64);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.update(&counter, |v| v + 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.read(&counter).unwrap(), 400);
    }
}
