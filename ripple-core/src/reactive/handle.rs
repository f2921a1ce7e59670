//! Watcher handles.
//!
//! Creating a watcher or effect returns a [`WatchHandle`]. The runtime keeps
//! the watcher alive until [`WatchHandle::stop`] is called; dropping the
//! handle does not stop it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ComputeError;
use crate::graph::NodeId;

use super::runtime::Runtime;

/// State shared between a watcher and its handles.
#[derive(Debug)]
pub(crate) struct WatchState {
    active: AtomicBool,
    runs: AtomicU64,
    last_error: Mutex<Option<ComputeError>>,
}

impl WatchState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
            runs: AtomicU64::new(0),
            last_error: Mutex::new(None),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Flip to inactive. Returns `true` for the call that did the flip.
    fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    pub fn record_run(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_outcome(&self, outcome: Result<(), ComputeError>) {
        *self.last_error.lock() = outcome.err();
    }
}

/// Cleanup handle for a watcher or effect.
///
/// Clones refer to the same watcher. `stop` is idempotent.
#[derive(Clone)]
pub struct WatchHandle {
    rt: Runtime,
    node: NodeId,
    state: Arc<WatchState>,
}

impl WatchHandle {
    pub(crate) fn new(rt: Runtime, node: NodeId, state: Arc<WatchState>) -> Self {
        Self { rt, node, state }
    }

    /// Unsubscribe from every dependency.
    ///
    /// After this returns the callback is never invoked again, including
    /// post-mode invocations that were already queued.
    pub fn stop(&self) {
        if self.state.deactivate() {
            tracing::debug!(watcher = %self.node, "watcher stopped");
            self.rt.remove_node(self.node);
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn id(&self) -> NodeId {
        self.node
    }

    /// Number of times the callback (or effect body) has run.
    pub fn run_count(&self) -> u64 {
        self.state.runs.load(Ordering::SeqCst)
    }

    /// Error returned by the most recent run of a fallible effect.
    pub fn last_error(&self) -> Option<ComputeError> {
        self.state.last_error.lock().clone()
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.node)
            .field("active", &self.is_active())
            .field("runs", &self.run_count())
            .finish()
    }
}
