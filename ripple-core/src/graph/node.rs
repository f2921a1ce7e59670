//! Graph Nodes
//!
//! This module defines the node types that live in the dependency arena.

use std::fmt;

use indexmap::IndexSet;
use serde::Serialize;

/// Handle to a node in the dependency arena.
///
/// A handle is an arena slot index plus the generation of the slot at the
/// time the node was inserted. Once a node is removed its slot may be reused,
/// but the generation changes, so an old handle never aliases the new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the arena.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "node#{}", self.index)
        } else {
            write!(f, "node#{}v{}", self.index, self.generation)
        }
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A reactive cell (`Ref`). Cells are the roots of the graph: they have
    /// dependents but never dependencies.
    Cell,

    /// A cached derived value. Has dependencies and may have dependents.
    Computed,

    /// A value watcher bound to a single cell.
    Watcher,

    /// A side-effecting body that re-tracks its dependencies on every run.
    Effect,
}

impl NodeKind {
    /// Whether nodes of this kind read other nodes.
    pub fn has_dependencies(&self) -> bool {
        !matches!(self, NodeKind::Cell)
    }
}

/// A node in the dependency graph.
///
/// Both edge directions are stored as insertion-ordered sets. The order of
/// `dependents` is the order in which subscribers are notified.
#[derive(Debug)]
pub struct Node {
    kind: NodeKind,
    label: Option<String>,

    /// Nodes this node reads from.
    dependencies: IndexSet<NodeId>,

    /// Nodes that read from this node, in registration order.
    dependents: IndexSet<NodeId>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            label: None,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
        }
    }

    /// Create a new cell node.
    pub fn cell() -> Self {
        Self::new(NodeKind::Cell)
    }

    /// Create a new computed node.
    pub fn computed() -> Self {
        Self::new(NodeKind::Computed)
    }

    /// Attach a human-readable label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    pub(crate) fn add_dependency(&mut self, node_id: NodeId) -> bool {
        self.dependencies.insert(node_id)
    }

    pub(crate) fn remove_dependency(&mut self, node_id: NodeId) -> bool {
        // shift_remove keeps the remaining order intact
        self.dependencies.shift_remove(&node_id)
    }

    /// Nodes this node reads from.
    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    pub(crate) fn add_dependent(&mut self, node_id: NodeId) -> bool {
        self.dependents.insert(node_id)
    }

    pub(crate) fn remove_dependent(&mut self, node_id: NodeId) -> bool {
        self.dependents.shift_remove(&node_id)
    }

    /// Nodes that read from this node, in registration order.
    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_node_has_no_dependencies() {
        let node = Node::cell();
        assert_eq!(node.kind(), NodeKind::Cell);
        assert!(!node.kind().has_dependencies());
        assert!(node.dependencies().is_empty());
    }

    #[test]
    fn dependents_keep_insertion_order() {
        let mut node = Node::cell();
        let a = NodeId::new(7, 0);
        let b = NodeId::new(2, 0);
        let c = NodeId::new(5, 0);

        node.add_dependent(a);
        node.add_dependent(b);
        node.add_dependent(c);
        // Duplicate insert does not move the entry
        assert!(!node.add_dependent(a));

        let order: Vec<_> = node.dependents().iter().copied().collect();
        assert_eq!(order, vec![a, b, c]);

        node.remove_dependent(b);
        let order: Vec<_> = node.dependents().iter().copied().collect();
        assert_eq!(order, vec![a, c]);
    }

    #[test]
    fn node_id_display() {
        assert_eq!(NodeId::new(3, 0).to_string(), "node#3");
        assert_eq!(NodeId::new(3, 2).to_string(), "node#3v2");
    }

    #[test]
    fn label_is_optional() {
        let node = Node::computed();
        assert!(node.label().is_none());

        let node = Node::computed().with_label("total");
        assert_eq!(node.label(), Some("total"));
    }
}
