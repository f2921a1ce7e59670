//! Dependency Arena
//!
//! The arena owns every node of the reactive graph and the edges between
//! them. Nodes are addressed by [`NodeId`] handles, never by pointer, so a
//! computed that depends on another computed that depends on a cell is just
//! a chain of integers.
//!
//! # Algorithm
//!
//! Change propagation itself happens in the runtime (push-dirty, one level
//! at a time). The arena answers the structural questions:
//!
//! 1. Who are the direct dependents of a node, in registration order?
//! 2. Which edges go away when a computation re-tracks its reads?
//! 3. Which nodes can a change to a source reach, in topological order?

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;
use serde::Serialize;
use smallvec::SmallVec;

use super::node::{Node, NodeId, NodeKind};

/// Dependents snapshot. Most cells have only a handful of subscribers.
pub type Dependents = SmallVec<[NodeId; 8]>;

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Generational arena holding the dependency graph.
pub struct DependencyGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Add a node to the graph and return its handle.
    pub fn insert(&mut self, node: Node) -> NodeId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId::new(index, 0)
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node.
    pub fn remove(&mut self, node_id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(node_id.index() as usize)?;
        if slot.generation != node_id.generation() {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(node_id.index());
        self.len -= 1;

        // Remove this node from its dependencies' dependent lists
        for dep_id in node.dependencies() {
            if let Some(dep) = self.get_mut(*dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        // Remove this node from its dependents' dependency lists
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.get_mut(*dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }

        Some(node)
    }

    /// Get a reference to a node.
    pub fn get(&self, node_id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(node_id.index() as usize)?;
        if slot.generation != node_id.generation() {
            return None;
        }
        slot.node.as_ref()
    }

    fn get_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(node_id.index() as usize)?;
        if slot.generation != node_id.generation() {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.get(node_id).is_some()
    }

    /// Set or replace a node's label.
    pub fn set_label(&mut self, node_id: NodeId, label: impl Into<String>) {
        if let Some(node) = self.get_mut(node_id) {
            node.set_label(label);
        }
    }

    /// Add a dependency edge: `dependent` reads `dependency`.
    ///
    /// Returns `true` if the edge is new. Edges to or from missing nodes are
    /// ignored.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) -> bool {
        if dependency == dependent || !self.contains(dependency) || !self.contains(dependent) {
            return false;
        }
        let added = self
            .get_mut(dependency)
            .map(|node| node.add_dependent(dependent))
            .unwrap_or(false);
        if let Some(node) = self.get_mut(dependent) {
            node.add_dependency(dependency);
        }
        added
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.get_mut(dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.get_mut(dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Drop every dependency of `owner` that is not in `keep`.
    ///
    /// This is the second half of dynamic dependency tracking: reads add
    /// edges as they happen, and once the evaluation finishes the edges that
    /// were not used this time are pruned. Returns the removed handles.
    pub fn retain_dependencies(&mut self, owner: NodeId, keep: &IndexSet<NodeId>) -> Vec<NodeId> {
        let stale: Vec<NodeId> = match self.get(owner) {
            Some(node) => node
                .dependencies()
                .iter()
                .filter(|dep| !keep.contains(*dep))
                .copied()
                .collect(),
            None => return Vec::new(),
        };

        for dep in &stale {
            self.remove_edge(*dep, owner);
        }
        stale
    }

    /// Direct dependents of a node, in registration order.
    pub fn dependents(&self, node_id: NodeId) -> Dependents {
        self.get(node_id)
            .map(|node| node.dependents().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every node reachable from `source`, dependencies before dependents.
    ///
    /// The source itself is not included.
    pub fn affected(&self, source_id: NodeId) -> Vec<NodeId> {
        let mut reached = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(source) = self.get(source_id) {
            queue.extend(source.dependents().iter().copied());
        }

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.get(node_id) {
                reached.push(node_id);
                queue.extend(node.dependents().iter().copied());
            }
        }

        self.topological_sort(reached)
    }

    /// Kahn's algorithm restricted to the given nodes.
    ///
    /// Nodes caught in a cycle have a non-zero in-degree forever and are
    /// left out of the result.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        for &node_id in &nodes {
            if let Some(node) = self.get(node_id) {
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

        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.get(node_id) {
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

    /// Get the total number of live nodes in the graph.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Serializable copy of the whole graph.
    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let node = slot.node.as_ref()?;
                Some(NodeSnapshot {
                    id: NodeId::new(index as u32, slot.generation),
                    kind: node.kind(),
                    label: node.label().map(str::to_owned),
                    dependencies: node.dependencies().iter().copied().collect(),
                    dependents: node.dependents().iter().copied().collect(),
                })
            })
            .collect();
        GraphSnapshot { nodes }
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// One node of a [`GraphSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: Option<String>,
    pub dependencies: Vec<NodeId>,
    pub dependents: Vec<NodeId>,
}

/// Point-in-time copy of the dependency graph, for debugging tools.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeSnapshot>,
}

impl GraphSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn find(&self, node_id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove_nodes() {
        let mut graph = DependencyGraph::new();

        let id1 = graph.insert(Node::cell());
        let id2 = graph.insert(Node::computed());

        assert_eq!(graph.len(), 2);

        graph.remove(id1);
        assert_eq!(graph.len(), 1);
        assert!(graph.get(id1).is_none());
        assert!(graph.get(id2).is_some());
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let mut graph = DependencyGraph::new();

        let old = graph.insert(Node::cell());
        graph.remove(old);
        let new = graph.insert(Node::cell());

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(graph.get(old).is_none());
        assert!(graph.get(new).is_some());

        // Removing through the stale handle must not touch the new node
        assert!(graph.remove(old).is_none());
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn add_and_remove_edges() {
        let mut graph = DependencyGraph::new();

        let source_id = graph.insert(Node::cell());
        let derived_id = graph.insert(Node::computed());

        assert!(graph.add_edge(source_id, derived_id));
        assert!(!graph.add_edge(source_id, derived_id));

        assert!(graph.get(source_id).unwrap().dependents().contains(&derived_id));
        assert!(graph.get(derived_id).unwrap().dependencies().contains(&source_id));

        graph.remove_edge(source_id, derived_id);

        assert!(!graph.get(source_id).unwrap().dependents().contains(&derived_id));
        assert!(!graph.get(derived_id).unwrap().dependencies().contains(&source_id));
    }

    #[test]
    fn removing_node_drops_its_edges() {
        let mut graph = DependencyGraph::new();
        let cell = graph.insert(Node::cell());
        let computed = graph.insert(Node::computed());
        let effect = graph.insert(Node::new(NodeKind::Effect));

        graph.add_edge(cell, computed);
        graph.add_edge(computed, effect);

        graph.remove(computed);

        assert!(graph.get(cell).unwrap().dependents().is_empty());
        assert!(graph.get(effect).unwrap().dependencies().is_empty());
    }

    #[test]
    fn retain_dependencies_prunes_stale_reads() {
        let mut graph = DependencyGraph::new();
        let a = graph.insert(Node::cell());
        let b = graph.insert(Node::cell());
        let c = graph.insert(Node::cell());
        let effect = graph.insert(Node::new(NodeKind::Effect));

        graph.add_edge(a, effect);
        graph.add_edge(b, effect);
        graph.add_edge(c, effect);

        let keep: IndexSet<NodeId> = [a, c].into_iter().collect();
        let removed = graph.retain_dependencies(effect, &keep);

        assert_eq!(removed, vec![b]);
        assert!(graph.dependents(b).is_empty());
        assert_eq!(graph.dependents(a).as_slice(), &[effect]);
    }

    #[test]
    fn affected_is_topologically_ordered() {
        let mut graph = DependencyGraph::new();

        // Chain: source -> derived1 -> derived2, plus source -> derived2
        let source_id = graph.insert(Node::cell());
        let derived1_id = graph.insert(Node::computed());
        let derived2_id = graph.insert(Node::computed());

        graph.add_edge(source_id, derived2_id);
        graph.add_edge(source_id, derived1_id);
        graph.add_edge(derived1_id, derived2_id);

        let reached = graph.affected(source_id);
        assert_eq!(reached.len(), 2);

        let pos1 = reached.iter().position(|&id| id == derived1_id);
        let pos2 = reached.iter().position(|&id| id == derived2_id);
        assert!(pos1 < pos2);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let mut graph = DependencyGraph::new();
        let cell = graph.insert(Node::cell().with_label("count"));
        let computed = graph.insert(Node::computed());
        graph.add_edge(cell, computed);

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.find(cell).unwrap().dependents, vec![computed]);

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"count\""));
        assert!(json.contains("\"computed\""));
    }
}
