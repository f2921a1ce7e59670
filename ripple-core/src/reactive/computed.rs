//! Computed Values
//!
//! A [`Computed`] is a cached derived value that re-evaluates only when one
//! of the dependencies it read last time has changed.
//!
//! # How Computeds Work
//!
//! 1. Construction runs nothing. The first read evaluates the function
//!    inside a tracking frame and caches the result.
//!
//! 2. Later reads return the cached value as long as the cache is clean.
//!
//! 3. When a dependency changes, the computed is marked dirty and forwards
//!    the invalidation to its own dependents. It does not recompute yet.
//!
//! 4. The next read recomputes, re-tracking dependencies from scratch. A
//!    branch that stopped being read stops invalidating the cache.
//!
//! # Concurrency
//!
//! Evaluation is serialized per computed. A reader on another thread waits
//! for a running evaluation and then takes the fresh value. If a
//! dependency changes while the function is running, the result is stored
//! but the cache stays dirty, so the next read sees the new input.

use std::any::Any;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{ComputeError, ReactiveError};
use crate::graph::{Node, NodeId};

use super::runtime::{Change, Reactive, Reactor, Runtime};

/// Cache state of a computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    /// The cached value is up to date.
    Clean,

    /// A dependency changed, or the value was never computed.
    Dirty,

    /// The last evaluation failed. The next read retries.
    Failed,
}

/// Hit/miss counters for a computed's cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of reads served from cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

type ComputeFn<T> = Box<dyn Fn() -> Result<T, ComputeError> + Send + Sync>;

struct Cache<T> {
    value: Option<T>,
    state: CacheState,
    error: Option<ComputeError>,
}

struct ComputedInner<T> {
    node: NodeId,
    rt: Runtime,
    compute: ComputeFn<T>,
    cache: Mutex<Cache<T>>,
    /// Held for the duration of an evaluation.
    evaluating: Mutex<()>,
    /// Bumped by every invalidation.
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn cached(&self) -> Option<T> {
        let cache = self.cache.lock();
        match (&cache.value, cache.state) {
            (Some(value), CacheState::Clean) => Some(value.clone()),
            _ => None,
        }
    }

    fn evaluate(&self) -> Result<T, ReactiveError> {
        if let Some(value) = self.cached() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let _evaluating = self.evaluating.lock();

        // Another thread may have finished the work while we waited
        if let Some(value) = self.cached() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let epoch = self.epoch.load(Ordering::SeqCst);

        let outcome = self
            .rt
            .run_tracked(self.node, || catch_unwind(AssertUnwindSafe(|| (self.compute)())));

        let outcome = outcome.unwrap_or_else(|payload| Err(ComputeError::from_panic(payload)));

        match outcome {
            Ok(value) => {
                let fresh = self.epoch.load(Ordering::SeqCst) == epoch;
                let old = {
                    let mut cache = self.cache.lock();
                    cache.state = if fresh { CacheState::Clean } else { CacheState::Dirty };
                    cache.error = None;
                    cache.value.replace(value.clone())
                };

                tracing::trace!(computed = %self.node, fresh, "recomputed");

                self.rt.observability().with_hook(|hook| {
                    hook.on_computed_change(
                        self.node,
                        old.as_ref().map(|v| v as &dyn Any),
                        &value,
                    );
                });
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(computed = %self.node, error = %err, "computation failed");
                let mut cache = self.cache.lock();
                cache.state = CacheState::Failed;
                cache.error = Some(err.clone());
                Err(err.into())
            }
        }
    }
}

impl<T> Reactive for ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn notify(self: Arc<Self>, _change: &Change<'_>) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cache.lock().state = CacheState::Dirty;

        // Forwarded even when already dirty: a dependent may not have
        // re-read since the last invalidation.
        tracing::trace!(computed = %self.node, "marked dirty");
        self.rt.notify_dependents(&Change::invalidated(self.node));
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.rt.remove_node(self.node);
    }
}

/// A cached derived value.
///
/// # Example
///
/// ```rust
/// use ripple_core::{Computed, Ref, Runtime};
///
/// let rt = Runtime::new();
/// let count = Ref::new(&rt, 5);
///
/// let c = count.clone();
/// let doubled = Computed::new(&rt, move || c.get() * 2);
///
/// assert_eq!(doubled.get(), 10);
///
/// count.set(7);
/// assert_eq!(doubled.get(), 14);
/// ```
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a computed from an infallible function.
    ///
    /// The function is not run until the first read.
    pub fn new<F>(rt: &Runtime, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(rt, Box::new(move || Ok(compute())))
    }

    /// Create a computed whose function can fail.
    pub fn fallible<F>(rt: &Runtime, compute: F) -> Self
    where
        F: Fn() -> Result<T, ComputeError> + Send + Sync + 'static,
    {
        Self::build(rt, Box::new(compute))
    }

    fn build(rt: &Runtime, compute: ComputeFn<T>) -> Self {
        let node = rt.insert_node(Node::computed());
        let inner = Arc::new(ComputedInner {
            node,
            rt: rt.clone(),
            compute,
            cache: Mutex::new(Cache {
                value: None,
                state: CacheState::Dirty,
                error: None,
            }),
            evaluating: Mutex::new(()),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        });

        let weak: Weak<dyn Reactive> = Arc::downgrade(&inner) as Weak<dyn Reactive>;
        rt.register(node, Reactor::Borrowed(weak));
        Self { inner }
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.inner.rt.set_label(self.inner.node, label);
        self
    }

    pub fn id(&self) -> NodeId {
        self.inner.node
    }

    /// Get the value, recomputing if the cache is not clean.
    ///
    /// # Panics
    ///
    /// Panics if the computation fails or the computed reads itself. Use
    /// [`try_get`](Self::try_get) to handle those cases.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("computed {} failed: {err}", self.inner.node),
        }
    }

    /// Get the value, reporting failures and cycles as errors.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        let node = self.inner.node;

        // Checked before tracking so the cycle never becomes an edge
        if self.inner.rt.is_evaluating(node) {
            tracing::warn!(computed = %node, "computed read itself");
            return Err(ReactiveError::Cycle { node });
        }

        self.inner.rt.track_read(node);
        self.inner.evaluate()
    }

    /// Get the value without subscribing the current frame.
    pub fn get_untracked(&self) -> Result<T, ReactiveError> {
        self.inner.rt.untracked(|| self.try_get())
    }

    /// Force the next read to recompute and invalidate dependents.
    pub fn invalidate(&self) {
        Arc::clone(&self.inner).notify(&Change::invalidated(self.inner.node));
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.cache.lock().state != CacheState::Clean
    }

    pub fn state(&self) -> CacheState {
        self.inner.cache.lock().state
    }

    /// Whether a value has been computed at least once.
    pub fn has_value(&self) -> bool {
        self.inner.cache.lock().value.is_some()
    }

    /// Error from the last evaluation, if it failed.
    pub fn last_error(&self) -> Option<ComputeError> {
        self.inner.cache.lock().error.clone()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
        }
    }

    /// Number of nodes read by the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.rt.dependencies_of(self.inner.node).len()
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.inner.cache.lock();
        f.debug_struct("Computed")
            .field("id", &self.inner.node)
            .field("state", &cache.state)
            .field("value", &cache.value)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Ref;
    use std::sync::atomic::AtomicUsize;

    fn counted<T, F>(rt: &Runtime, f: F) -> (Computed<T>, Arc<AtomicUsize>)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let computed = Computed::new(rt, move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            f()
        });
        (computed, calls)
    }

    #[test]
    fn computed_is_lazy() {
        let rt = Runtime::new();
        let (computed, calls) = counted(&rt, || 42);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(computed.is_dirty());
        assert!(!computed.has_value());

        assert_eq!(computed.get(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn computed_caches_between_changes() {
        let rt = Runtime::new();
        let count = Ref::new(&rt, 5);
        let c = count.clone();
        let (doubled, calls) = counted(&rt, move || c.get() * 2);

        for _ in 0..3 {
            assert_eq!(doubled.get(), 10);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        count.set(10);
        assert!(doubled.is_dirty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(doubled.get(), 20);
        assert_eq!(doubled.get(), 20);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(doubled.stats(), CacheStats { hits: 3, misses: 2 });
    }

    #[test]
    fn unchanged_set_keeps_cache() {
        let rt = Runtime::new();
        let count = Ref::new(&rt, 1);
        let c = count.clone();
        let (computed, calls) = counted(&rt, move || c.get() + 1);

        computed.get();
        count.set(1);
        computed.get();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chained_computeds_invalidate_transitively() {
        let rt = Runtime::new();
        let base = Ref::new(&rt, 2);

        let b = base.clone();
        let squared = Computed::new(&rt, move || b.get() * b.get());
        let s = squared.clone();
        let (plus_one, calls) = counted(&rt, move || s.get() + 1);

        assert_eq!(plus_one.get(), 5);

        base.set(3);
        assert!(squared.is_dirty());
        assert!(plus_one.is_dirty());
        assert_eq!(plus_one.get(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dynamic_dependencies_follow_branch() {
        let rt = Runtime::new();
        let toggle = Ref::new(&rt, true);
        let a = Ref::new(&rt, 1);
        let b = Ref::new(&rt, 100);

        let (t, ra, rb) = (toggle.clone(), a.clone(), b.clone());
        let (picked, calls) = counted(&rt, move || if t.get() { ra.get() } else { rb.get() });

        assert_eq!(picked.get(), 1);
        assert_eq!(picked.dependency_count(), 2);

        // b is not read while toggle is true
        b.set(200);
        assert!(!picked.is_dirty());

        toggle.set(false);
        assert_eq!(picked.get(), 200);
        assert_eq!(a.subscriber_count(), 0);

        a.set(5);
        assert!(!picked.is_dirty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fallible_computed_reports_and_retries() {
        let rt = Runtime::new();
        let input = Ref::new(&rt, -1_i32);
        let i = input.clone();
        let root = Computed::fallible(&rt, move || {
            let v = i.get();
            if v < 0 {
                Err(ComputeError::failed("negative input"))
            } else {
                Ok(f64::from(v).sqrt())
            }
        });

        let err = root.try_get().unwrap_err();
        assert!(matches!(err, ReactiveError::Compute(ComputeError::Failed(_))));
        assert_eq!(root.state(), CacheState::Failed);

        input.set(16);
        assert_eq!(root.try_get().unwrap(), 4.0);
        assert_eq!(root.last_error(), None);
    }

    #[test]
    fn panicking_computation_becomes_error() {
        let rt = Runtime::new();
        let computed: Computed<i32> = Computed::new(&rt, || panic!("bad math"));

        let err = computed.try_get().unwrap_err();
        assert!(matches!(
            err,
            ReactiveError::Compute(ComputeError::Panicked(ref msg)) if msg == "bad math"
        ));
        assert!(!rt.is_tracking());
    }

    #[test]
    fn self_read_is_a_cycle() {
        let rt = Runtime::new();
        let slot: Arc<Mutex<Option<Computed<i32>>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();

        let looping = Computed::fallible(&rt, move || {
            let me = slot_clone.lock().clone();
            match me {
                Some(me) => me.try_get().map_err(|e| ComputeError::failed(e.to_string())),
                None => Ok(0),
            }
        });
        *slot.lock() = Some(looping.clone());

        let err = looping.try_get().unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert_eq!(looping.dependency_count(), 0);

        // Break the Arc cycle through the slot
        slot.lock().take();
    }

    #[test]
    fn invalidate_forces_recompute() {
        let rt = Runtime::new();
        let (computed, calls) = counted(&rt, || 7);

        computed.get();
        computed.invalidate();
        assert!(computed.is_dirty());
        computed.get();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_computed_unsubscribes() {
        let rt = Runtime::new();
        let count = Ref::new(&rt, 1);
        let c = count.clone();
        let computed = Computed::new(&rt, move || c.get());

        computed.get();
        assert_eq!(count.subscriber_count(), 1);

        drop(computed);
        assert_eq!(count.subscriber_count(), 0);
        count.set(2);
    }
}
