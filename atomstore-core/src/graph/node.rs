//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

/// Inline capacity for edge lists. Most selectors read one or two inputs.
pub(crate) type Edges = SmallVec<[NodeId; 4]>;

/// Unique identifier for a node in the dependency graph.
///
/// Ids come from one process-wide counter, so an id is never reused by a
/// second store. A handle from another store therefore never aliases a node
/// of this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A writable atom. Atoms are the roots of the graph.
    Atom,

    /// A read-only selector derived from earlier nodes.
    Selector,
}

/// Dirty state of a node.
///
/// Atoms are always clean. Selectors flip between the two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed since the last computation (or there never was one).
    Dirty,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    dirty: DirtyState,

    /// Nodes this node reads from, in declaration order.
    dependencies: Edges,

    /// Nodes that read from this node.
    dependents: Edges,
}

impl Node {
    /// Create a new atom node.
    pub fn atom() -> Self {
        Self {
            id: NodeId::new(),
            kind: NodeKind::Atom,
            dirty: DirtyState::Clean,
            dependencies: Edges::new(),
            dependents: Edges::new(),
        }
    }

    /// Create a new selector node reading from `dependencies`.
    ///
    /// Selectors start dirty: nothing has been computed yet.
    pub fn selector(dependencies: impl IntoIterator<Item = NodeId>) -> Self {
        let mut deps = Edges::new();
        for id in dependencies {
            if !deps.contains(&id) {
                deps.push(id);
            }
        }
        Self {
            id: NodeId::new(),
            kind: NodeKind::Selector,
            dirty: DirtyState::Dirty,
            dependencies: deps,
            dependents: Edges::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Mark the node as needing recomputation. No-op for atoms.
    pub fn mark_dirty(&mut self) {
        if self.kind == NodeKind::Selector {
            self.dirty = DirtyState::Dirty;
        }
    }

    /// Get all dependencies, in declaration order.
    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    /// Add a dependent (a node that reads from this node).
    pub fn add_dependent(&mut self, node_id: NodeId) {
        if !self.dependents.contains(&node_id) {
            self.dependents.push(node_id);
        }
    }

    /// Get all dependents.
    pub fn dependents(&self) -> &[NodeId] {
        &self.dependents
    }
}
