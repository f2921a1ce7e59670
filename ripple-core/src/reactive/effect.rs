//! Watch Effects
//!
//! A watch effect is a side-effecting function that re-runs whenever
//! anything it read on its previous run changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately inside a
//!    tracking frame to establish its dependencies.
//!
//! 2. When any dependency changes, the effect re-runs (inline, or at the
//!    next flush in post mode).
//!
//! 3. Every run re-tracks from scratch. Dependencies the last run did not
//!    read are dropped, so conditional reads give a dynamic dependency set.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (recompute on access); effects are eager.
//!
//! # Re-entrancy
//!
//! An effect that writes a cell it reads would trigger itself. That nested
//! run is skipped. When two threads trigger the same effect at once, one of
//! them runs it and the other leaves a request for one more run behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::FlushMode;
use crate::error::ComputeError;
use crate::graph::{Node, NodeId, NodeKind};

use super::handle::{WatchHandle, WatchState};
use super::runtime::{Change, Reactive, Reactor, Runtime};

type EffectFn = Box<dyn Fn() -> Result<(), ComputeError> + Send + Sync>;

struct EffectInner {
    node: NodeId,
    rt: Runtime,
    state: Arc<WatchState>,
    flush: FlushMode,
    body: EffectFn,
    running: Mutex<()>,
    rerun: AtomicBool,
}

impl EffectInner {
    /// Returns `false` when the effect was already stopped.
    fn run(&self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        if self.rt.is_evaluating(self.node) {
            tracing::trace!(effect = %self.node, "skipping re-entrant run");
            return true;
        }

        self.rerun.store(true, Ordering::SeqCst);
        while self.rerun.load(Ordering::SeqCst) {
            // Whoever holds the lock will see our request and loop again
            let Some(_running) = self.running.try_lock() else {
                break;
            };
            if !self.rerun.swap(false, Ordering::SeqCst) {
                break;
            }
            if !self.state.is_active() {
                break;
            }
            self.run_once();
        }
        true
    }

    fn run_once(&self) {
        let outcome = self.rt.run_tracked(self.node, || (self.body)());
        self.state.record_run();
        self.rt.observability().with_hook(|hook| hook.on_effect_run(self.node));

        if let Err(err) = &outcome {
            tracing::warn!(effect = %self.node, error = %err, "effect failed");
        }
        self.state.set_outcome(outcome);
    }
}

impl Reactive for EffectInner {
    fn notify(self: Arc<Self>, _change: &Change<'_>) {
        if !self.state.is_active() {
            return;
        }
        match self.flush {
            FlushMode::Sync => {
                self.run();
            }
            FlushMode::Post => {
                let node = self.node;
                let this = Arc::clone(&self);
                self.rt.scheduler().enqueue(node, move || this.run());
            }
        }
    }
}

/// Run `f` now and again whenever anything it read changes.
///
/// Re-runs happen inline with the change. Use
/// [`watch_effect_with_flush`] to defer them to a flush.
///
/// # Example
///
/// ```rust
/// use ripple_core::{watch_effect, Ref, Runtime};
///
/// let rt = Runtime::new();
/// let count = Ref::new(&rt, 0);
///
/// let c = count.clone();
/// let handle = watch_effect(&rt, move || {
///     println!("count is {}", c.get());
/// });
///
/// count.set(5); // prints "count is 5"
/// assert_eq!(handle.run_count(), 2);
/// handle.stop();
/// ```
pub fn watch_effect<F>(rt: &Runtime, f: F) -> WatchHandle
where
    F: Fn() + Send + Sync + 'static,
{
    spawn(rt, FlushMode::Sync, Box::new(move || {
        f();
        Ok(())
    }))
}

/// Like [`watch_effect`], for a body that can fail.
///
/// A failing run is logged and kept as [`WatchHandle::last_error`]; the
/// effect stays subscribed to what it read before failing.
pub fn try_watch_effect<F>(rt: &Runtime, f: F) -> WatchHandle
where
    F: Fn() -> Result<(), ComputeError> + Send + Sync + 'static,
{
    spawn(rt, FlushMode::Sync, Box::new(f))
}

/// Like [`watch_effect`] with an explicit flush mode for re-runs.
///
/// The first run is always immediate.
pub fn watch_effect_with_flush<F>(rt: &Runtime, f: F, flush: FlushMode) -> WatchHandle
where
    F: Fn() + Send + Sync + 'static,
{
    spawn(rt, flush, Box::new(move || {
        f();
        Ok(())
    }))
}

fn spawn(rt: &Runtime, flush: FlushMode, body: EffectFn) -> WatchHandle {
    let node = rt.insert_node(Node::new(NodeKind::Effect));
    let state = WatchState::new();

    let effect = Arc::new(EffectInner {
        node,
        rt: rt.clone(),
        state: Arc::clone(&state),
        flush,
        body,
        running: Mutex::new(()),
        rerun: AtomicBool::new(false),
    });

    rt.register(node, Reactor::Owned(effect.clone()));
    tracing::debug!(effect = %node, flush = %flush, "effect registered");

    effect.run();
    WatchHandle::new(rt.clone(), node, state)
}
