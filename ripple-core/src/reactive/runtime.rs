//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, computed
//! values, watchers and effects. It owns the dependency graph and delivers
//! change notifications.
//!
//! # How It Works
//!
//! 1. Every cell, computed, watcher and effect gets a node in the graph.
//!
//! 2. When a computed or effect reads a node, the runtime records the read in
//!    the caller's tracking frame and adds the graph edge right away.
//!
//! 3. When a cell's value changes, the runtime:
//!    a. Snapshots the cell's direct dependents under the graph lock
//!    b. Releases the lock
//!    c. Notifies each dependent in registration order. Computeds mark
//!       themselves dirty and forward the notification to their own
//!       dependents; watchers and effects run or queue themselves.
//!
//! No lock is held while user code runs, so a callback may freely read and
//! write cells, create watchers, or stop itself.
//!
//! # Ownership
//!
//! Computeds are owned by their handles; the runtime keeps only a weak
//! reference and the node disappears when the last handle drops. Watchers
//! and effects are owned by the runtime until their handle is stopped.

use std::any::Any;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::commands::LoopDetector;
use crate::config::RuntimeConfig;
use crate::error::ConfigError;
use crate::graph::{DependencyGraph, GraphSnapshot, Node, NodeId};
use crate::observe::Observability;

use super::context::Tracker;
use super::scheduler::FlushScheduler;

/// A change notification travelling along one graph edge.
///
/// Cells attach the new and old values; computeds forward a bare
/// invalidation with no values.
pub(crate) struct Change<'a> {
    pub source: NodeId,
    new: Option<&'a dyn Any>,
    old: Option<&'a dyn Any>,
}

impl<'a> Change<'a> {
    pub fn value_changed(source: NodeId, new: &'a dyn Any, old: &'a dyn Any) -> Self {
        Self {
            source,
            new: Some(new),
            old: Some(old),
        }
    }

    pub fn invalidated(source: NodeId) -> Self {
        Self {
            source,
            new: None,
            old: None,
        }
    }

    /// The (new, old) pair, if this change carries values of type `T`.
    pub fn values<T: 'static>(&self) -> Option<(&'a T, &'a T)> {
        let new = self.new?.downcast_ref::<T>()?;
        let old = self.old?.downcast_ref::<T>()?;
        Some((new, old))
    }
}

/// A node that reacts when one of its dependencies changes.
pub(crate) trait Reactive: Send + Sync {
    fn notify(self: Arc<Self>, change: &Change<'_>);
}

/// Registry entry for a reactive node.
pub(crate) enum Reactor {
    /// Kept alive by the runtime (watchers, effects).
    Owned(Arc<dyn Reactive>),
    /// Kept alive by user handles (computeds).
    Borrowed(Weak<dyn Reactive>),
}

struct RuntimeInner {
    config: RuntimeConfig,
    graph: Mutex<DependencyGraph>,
    tracker: Tracker,
    reactors: DashMap<NodeId, Reactor>,
    scheduler: FlushScheduler,
    loops: Arc<LoopDetector>,
    observability: Observability,
}

/// Handle to a reactive runtime.
///
/// Cloning is cheap and every clone refers to the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::build(RuntimeConfig::default())
    }

    /// Create a runtime with a validated configuration.
    pub fn with_config(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RuntimeConfig) -> Self {
        let loops = Arc::new(LoopDetector::new(config.loop_detection.clone()));
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                graph: Mutex::new(DependencyGraph::new()),
                tracker: Tracker::new(),
                reactors: DashMap::new(),
                scheduler: FlushScheduler::new(),
                loops,
                observability: Observability::new(),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Run every post-mode watcher invocation queued so far.
    ///
    /// Returns the number of invocations executed.
    pub fn flush_watchers(&self) -> usize {
        self.inner.scheduler.flush()
    }

    /// Number of post-mode invocations waiting for a flush.
    pub fn pending_flushes(&self) -> usize {
        self.inner.scheduler.len()
    }

    /// Run `f` without recording any reads it makes.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.tracker.untracked(f)
    }

    /// Whether the calling thread is inside a tracked evaluation.
    pub fn is_tracking(&self) -> bool {
        self.inner.tracker.is_tracking()
    }

    pub fn observability(&self) -> &Observability {
        &self.inner.observability
    }

    pub fn loop_detector(&self) -> &Arc<LoopDetector> {
        &self.inner.loops
    }

    /// Number of live nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.inner.graph.lock().len()
    }

    /// Serializable copy of the dependency graph.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.inner.graph.lock().snapshot()
    }

    /// Every node a change to `node` can reach, in topological order.
    pub fn affected_by(&self, node: NodeId) -> Vec<NodeId> {
        self.inner.graph.lock().affected(node)
    }

    /// Direct dependents of `node`, in notification order.
    pub fn dependents_of(&self, node: NodeId) -> Vec<NodeId> {
        self.inner.graph.lock().dependents(node).into_vec()
    }

    /// Direct dependencies of `node`, in first-read order.
    pub fn dependencies_of(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .graph
            .lock()
            .get(node)
            .map(|n| n.dependencies().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Label of a node, falling back to its handle.
    pub fn label_of(&self, node: NodeId) -> String {
        self.inner
            .graph
            .lock()
            .get(node)
            .and_then(|n| n.label().map(str::to_owned))
            .unwrap_or_else(|| node.to_string())
    }

    // ------------------------------------------------------------------
    // Crate-internal plumbing
    // ------------------------------------------------------------------

    pub(crate) fn insert_node(&self, node: Node) -> NodeId {
        self.inner.graph.lock().insert(node)
    }

    pub(crate) fn set_label(&self, node: NodeId, label: impl Into<String>) {
        self.inner.graph.lock().set_label(node, label);
    }

    pub(crate) fn register(&self, node: NodeId, reactor: Reactor) {
        self.inner.reactors.insert(node, reactor);
    }

    /// Remove a node, its edges, its reactor and any queued invocations.
    pub(crate) fn remove_node(&self, node: NodeId) {
        let removed = self.inner.graph.lock().remove(node);
        let reactor = self.inner.reactors.remove(&node);
        let purged = self.inner.scheduler.purge(node);
        if removed.is_some() {
            tracing::trace!(node = %node, purged, "removed node");
        }
        // The reactor may own closures holding cells; drop it with no locks held.
        drop(reactor);
    }

    /// Add an explicit edge, used by watchers bound to one cell.
    pub(crate) fn link(&self, dependency: NodeId, dependent: NodeId) {
        self.inner.graph.lock().add_edge(dependency, dependent);
    }

    /// Record that the current evaluation read `node`.
    pub(crate) fn track_read(&self, node: NodeId) {
        if let Some(owner) = self.inner.tracker.record_read(node) {
            self.inner.graph.lock().add_edge(node, owner);
        }
    }

    /// Run `f` as `owner`, then drop edges to nodes it no longer reads.
    pub(crate) fn run_tracked<R>(&self, owner: NodeId, f: impl FnOnce() -> R) -> R {
        let (result, reads) = self.inner.tracker.run_tracked(owner, f);
        let stale = self.inner.graph.lock().retain_dependencies(owner, &reads);
        if !stale.is_empty() {
            tracing::trace!(
                owner = %owner,
                dropped = stale.len(),
                kept = reads.len(),
                "pruned stale dependencies"
            );
        }
        result
    }

    pub(crate) fn is_evaluating(&self, node: NodeId) -> bool {
        self.inner.tracker.is_evaluating(node)
    }

    pub(crate) fn scheduler(&self) -> &FlushScheduler {
        &self.inner.scheduler
    }

    /// Notify the direct dependents of `change.source`.
    ///
    /// This is the core update propagation mechanism.
    pub(crate) fn notify_dependents(&self, change: &Change<'_>) {
        let dependents = self.inner.graph.lock().dependents(change.source);
        if dependents.is_empty() {
            return;
        }

        // Computeds go first so that watchers and effects running in the
        // second pass never read a cache this change has not dirtied yet.
        let mut derived: SmallVec<[Arc<dyn Reactive>; 8]> = SmallVec::new();
        let mut observers: SmallVec<[Arc<dyn Reactive>; 8]> = SmallVec::new();
        for id in &dependents {
            let Some(entry) = self.inner.reactors.get(id) else {
                continue;
            };
            match &*entry {
                Reactor::Borrowed(weak) => derived.extend(weak.upgrade()),
                Reactor::Owned(reactive) => observers.push(Arc::clone(reactive)),
            }
        }

        tracing::trace!(
            source = %change.source,
            derived = derived.len(),
            observers = observers.len(),
            "propagating change"
        );

        for reactive in derived.into_iter().chain(observers) {
            reactive.notify(change);
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("nodes", &self.node_count())
            .field("pending_flushes", &self.pending_flushes())
            .field("observability", &self.inner.observability)
            .finish()
    }
}
