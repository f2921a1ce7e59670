//! Watchers
//!
//! A watcher runs a callback with `(new, old)` whenever one cell changes.
//! Unlike an effect it does not track reads; it is bound to exactly the
//! cell it was created for.
//!
//! # Options
//!
//! - `immediate()`: invoke once at registration with `new == old == current`.
//! - `deep()`: skip notifications whose values are structurally equal.
//! - `deep_compare(f)`: skip notifications for which `f(old, new)` holds.
//!   This replaces the comparison rule entirely.
//! - `flush(mode)`: run inline (`Sync`) or queue for
//!   [`Runtime::flush_watchers`] (`Post`).
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{watch, FlushMode, Ref, Runtime, WatchOptions};
//!
//! let rt = Runtime::new();
//! let count = Ref::new(&rt, 0);
//!
//! let handle = watch(
//!     &count,
//!     |new, old| println!("{old} -> {new}"),
//!     WatchOptions::new().flush(FlushMode::Post),
//! );
//!
//! count.set(1);
//! count.set(2);
//! assert_eq!(rt.flush_watchers(), 2);
//!
//! handle.stop();
//! ```

use std::sync::Arc;

use crate::config::FlushMode;
use crate::graph::{Node, NodeId, NodeKind};

use super::cell::Ref;
use super::compare::{Comparator, Structural};
use super::handle::{WatchHandle, WatchState};
use super::runtime::{Change, Reactive, Reactor, Runtime};

/// Configuration for [`watch`].
pub struct WatchOptions<T> {
    immediate: bool,
    comparator: Comparator<T>,
    flush: Option<FlushMode>,
}

impl<T> WatchOptions<T> {
    pub fn new() -> Self {
        Self {
            immediate: false,
            comparator: Comparator::Shallow,
            flush: None,
        }
    }

    /// Fire once at registration time.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Compare old and new structurally before firing.
    pub fn deep(mut self) -> Self
    where
        T: Structural,
    {
        self.comparator = Comparator::deep();
        self
    }

    /// Treat old and new as unchanged whenever `equal(old, new)` is true.
    pub fn deep_compare<F>(mut self, equal: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.comparator = Comparator::custom(equal);
        self
    }

    /// Override the runtime's default flush mode.
    pub fn flush(mut self, mode: FlushMode) -> Self {
        self.flush = Some(mode);
        self
    }
}

impl<T> Default for WatchOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for WatchOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchOptions")
            .field("immediate", &self.immediate)
            .field("comparator", &self.comparator)
            .field("flush", &self.flush)
            .finish()
    }
}

type Callback<T> = Box<dyn Fn(&T, &T) + Send + Sync>;

struct Watcher<T> {
    node: NodeId,
    rt: Runtime,
    state: Arc<WatchState>,
    comparator: Comparator<T>,
    flush: FlushMode,
    callback: Callback<T>,
}

impl<T> Watcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Returns whether the callback ran.
    fn fire(&self, new: &T, old: &T) -> bool {
        // A queued invocation may outlive stop()
        if !self.state.is_active() {
            return false;
        }
        self.state.record_run();
        self.rt.observability().with_hook(|hook| {
            hook.on_watch_callback(self.node, new, old);
        });
        (self.callback)(new, old);
        true
    }
}

impl<T> Reactive for Watcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn notify(self: Arc<Self>, change: &Change<'_>) {
        if !self.state.is_active() {
            return;
        }
        let Some((new, old)) = change.values::<T>() else {
            return;
        };

        if self.comparator.is_unchanged(old, new) {
            tracing::trace!(
                watcher = %self.node,
                comparator = self.comparator.name(),
                "values unchanged, skipping"
            );
            return;
        }

        match self.flush {
            FlushMode::Sync => {
                self.fire(new, old);
            }
            FlushMode::Post => {
                let (new, old) = (new.clone(), old.clone());
                let node = self.node;
                let this = Arc::clone(&self);
                self.rt
                    .scheduler()
                    .enqueue(node, move || this.fire(&new, &old));
            }
        }
    }
}

/// Watch a cell and run `callback(new, old)` when it changes.
///
/// The watcher stays registered until [`WatchHandle::stop`] is called.
pub fn watch<T, F>(source: &Ref<T>, callback: F, options: WatchOptions<T>) -> WatchHandle
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T, &T) + Send + Sync + 'static,
{
    let rt = source.runtime().clone();
    let node = rt.insert_node(Node::new(NodeKind::Watcher));
    let state = WatchState::new();
    let flush = options.flush.unwrap_or(rt.config().default_flush);

    let watcher = Arc::new(Watcher {
        node,
        rt: rt.clone(),
        state: Arc::clone(&state),
        comparator: options.comparator,
        flush,
        callback: Box::new(callback),
    });

    rt.register(node, Reactor::Owned(watcher.clone()));
    rt.link(source.id(), node);

    tracing::debug!(
        watcher = %node,
        source = %source.id(),
        flush = %flush,
        comparator = watcher.comparator.name(),
        "watcher registered"
    );

    if options.immediate {
        let current = source.get_untracked();
        watcher.fire(&current, &current);
    }

    WatchHandle::new(rt, node, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&i32, &i32) + Send + Sync + 'static) {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        (calls, move |_: &i32, _: &i32| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn immediate_fires_with_current_value() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, 7);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _handle = watch(
            &cell,
            move |new, old| seen_clone.lock().push((*new, *old)),
            WatchOptions::new().immediate(),
        );

        assert_eq!(*seen.lock(), vec![(7, 7)]);
        cell.set(8);
        assert_eq!(*seen.lock(), vec![(7, 7), (8, 7)]);
    }

    #[test]
    fn post_mode_replays_every_change() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, 0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _handle = watch(
            &cell,
            move |new, old| seen_clone.lock().push((*new, *old)),
            WatchOptions::new().flush(FlushMode::Post),
        );

        cell.set(1);
        cell.set(2);
        cell.set(3);
        assert!(seen.lock().is_empty());
        assert_eq!(rt.pending_flushes(), 3);

        assert_eq!(rt.flush_watchers(), 3);
        assert_eq!(*seen.lock(), vec![(1, 0), (2, 1), (3, 2)]);
        assert_eq!(rt.flush_watchers(), 0);
    }

    #[test]
    fn runtime_default_flush_applies() {
        let config = crate::RuntimeConfig::default().with_default_flush(FlushMode::Post);
        let rt = Runtime::with_config(config).unwrap();
        let cell = Ref::new(&rt, 0);
        let (calls, cb) = counter();
        let _handle = watch(&cell, cb, WatchOptions::new());

        cell.set(1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        rt.flush_watchers();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deep_watch_skips_structurally_equal_values() {
        let rt = Runtime::new();
        // Notify on every set so the watcher's comparator decides
        let cell = Ref::with_equality(&rt, vec![1, 2, 3], |_, _| false);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let _handle = watch(
            &cell,
            move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::new().deep(),
        );

        cell.set(vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        cell.set(vec![1, 2, 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shallow_watch_fires_on_every_notifying_set() {
        let rt = Runtime::new();
        let cell = Ref::with_equality(&rt, vec![1], |_, _| false);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let _handle = watch(
            &cell,
            move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::new(),
        );

        cell.set(vec![1]);
        cell.set(vec![1]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn custom_comparator_replaces_rule() {
        #[derive(Clone, PartialEq)]
        struct User {
            id: u32,
            name: String,
        }

        let rt = Runtime::new();
        let cell = Ref::new(
            &rt,
            User {
                id: 1,
                name: "ada".into(),
            },
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let _handle = watch(
            &cell,
            move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::new().deep_compare(|a: &User, b: &User| a.id == b.id),
        );

        // Different name, same id
        cell.set(User {
            id: 1,
            name: "grace".into(),
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        cell.set(User {
            id: 2,
            name: "grace".into(),
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_is_idempotent_and_final() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, 0);
        let (calls, cb) = counter();
        let handle = watch(&cell, cb, WatchOptions::new());

        cell.set(1);
        handle.stop();
        handle.stop();
        assert!(!handle.is_active());

        cell.set(2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.run_count(), 1);
        assert_eq!(cell.subscriber_count(), 0);
    }

    #[test]
    fn stop_discards_pending_post_invocations() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, 0);
        let (calls, cb) = counter();
        let handle = watch(&cell, cb, WatchOptions::new().flush(FlushMode::Post));

        cell.set(1);
        cell.set(2);
        handle.stop();

        assert_eq!(rt.flush_watchers(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callback_may_stop_its_own_watcher() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, 0);
        let slot: Arc<Mutex<Option<WatchHandle>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let handle = watch(
            &cell,
            move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                if let Some(h) = slot_clone.lock().as_ref() {
                    h.stop();
                }
            },
            WatchOptions::new(),
        );
        *slot.lock() = Some(handle.clone());

        cell.set(1);
        cell.set(2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!handle.is_active());
    }

    #[test]
    fn flush_counts_only_callbacks_that_ran() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, 0);
        let slot: Arc<Mutex<Option<WatchHandle>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();

        let _stopper = watch(
            &cell,
            move |_, _| {
                if let Some(h) = slot_clone.lock().as_ref() {
                    h.stop();
                }
            },
            WatchOptions::new().flush(FlushMode::Post),
        );
        let (calls, cb) = counter();
        let stopped = watch(&cell, cb, WatchOptions::new().flush(FlushMode::Post));
        *slot.lock() = Some(stopped.clone());

        cell.set(1);
        cell.set(2);
        assert_eq!(rt.pending_flushes(), 4);

        assert_eq!(rt.flush_watchers(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!stopped.is_active());
    }

    #[test]
    fn independent_watchers_do_not_interfere() {
        let rt = Runtime::new();
        let a = Ref::new(&rt, 0);
        let b = Ref::new(&rt, 0);
        let (calls_a, cb_a) = counter();
        let (calls_b, cb_b) = counter();
        let _ha = watch(&a, cb_a, WatchOptions::new());
        let _hb = watch(&b, cb_b, WatchOptions::new());

        a.set(1);
        a.set(2);
        assert_eq!(calls_a.load(Ordering::SeqCst), 2);
        assert_eq!(calls_b.load(Ordering::SeqCst), 0);
    }
}
