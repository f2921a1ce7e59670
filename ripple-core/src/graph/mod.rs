//! Dependency Graph
//!
//! This module implements the arena that records relationships between
//! cells, computed values, watchers and effects.
//!
//! # Overview
//!
//! The dependency graph is a directed graph where:
//!
//! - Nodes represent cells or computations (computed values, watchers, effects)
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a cell changes, the runtime walks the edges out of the cell to find
//! the computations to invalidate or re-run.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a generational arena and are addressed by integer
//!    handles. Nothing in the graph holds a pointer to anything else, which
//!    sidesteps reference cycles and makes the graph serializable.
//!
//! 2. Both forward (dependencies) and reverse (dependents) edges are stored
//!    so that pruning stale reads and notifying subscribers are both cheap.
//!
//! 3. Edge sets are insertion ordered. Subscribers of a cell are notified in
//!    the order they subscribed.

mod arena;
mod node;

pub use arena::{Dependents, DependencyGraph, GraphSnapshot, NodeSnapshot};
pub use node::{Node, NodeId, NodeKind};
