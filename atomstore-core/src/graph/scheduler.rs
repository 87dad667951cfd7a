//! Update Scheduler
//!
//! The scheduler owns the dependency graph and decides which selectors a
//! write invalidates, and in which order they are refreshed.
//!
//! # Algorithm
//!
//! 1. When an atom changes, collect its dependents, recursively (BFS)
//! 2. Mark every collected selector dirty
//! 3. Sort them topologically (dependencies before dependents)
//!
//! The store then walks that order and recomputes only the selectors that
//! somebody observes. Unobserved selectors stay dirty until their next read.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use super::node::{Node, NodeId};

/// The update scheduler manages the dependency graph.
#[derive(Debug)]
pub struct UpdateScheduler {
    /// All nodes in the graph, in creation order.
    nodes: IndexMap<NodeId, Node>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }

    /// Add a node to the graph and link it to its dependencies.
    ///
    /// Dependencies must already be in the graph. Since a node can only
    /// depend on nodes added before it, the graph stays acyclic.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        for dep_id in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.add_dependent(id);
            }
        }
        self.nodes.insert(id, node);
        id
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Every node downstream of `source`, in topological order.
    ///
    /// Does not touch dirty flags.
    pub fn affected(&self, source_id: NodeId) -> Vec<NodeId> {
        let mut collected = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(source) = self.nodes.get(&source_id) {
            queue.extend(source.dependents().iter().copied());
        }

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&node_id) {
                collected.push(node_id);
                queue.extend(node.dependents().iter().copied());
            }
        }

        self.topological_sort(collected)
    }

    /// Mark everything downstream of `source` dirty.
    ///
    /// Returns the invalidated nodes in topological order.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let affected = self.affected(source_id);
        for node_id in &affected {
            if let Some(node) = self.nodes.get_mut(node_id) {
                node.mark_dirty();
            }
        }
        affected
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that dependencies come before dependents.
    /// Ids not in the graph are dropped.
    pub fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        // Only edges within the node set count.
        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        // Kahn's algorithm
        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*dependent_id);
                        }
                    }
                }
            }
        }

        result
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}
