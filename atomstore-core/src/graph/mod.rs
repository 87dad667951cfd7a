//! Dependency Graph
//!
//! This module tracks the relationships between atoms and selectors.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are atoms (roots) or selectors
//! - Edges are dependencies: if A reads B, there is an edge from B to A
//!
//! When an atom changes, we traverse the graph to find all affected
//! selectors and mark them dirty. The store then decides which of them
//! must be recomputed right away (observed ones) and which can wait for
//! their next read.
//!
//! # Design Decisions
//!
//! 1. The graph is centralized in the store rather than spread across the
//!    nodes, which makes topological ordering straightforward.
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. Both forward (dependencies) and reverse (dependents) edges are kept.
//!    Dependencies stay in declaration order.

mod node;
mod scheduler;

pub(crate) use node::Edges;
pub use node::{DirtyState, Node, NodeId, NodeKind};
pub use scheduler::UpdateScheduler;
