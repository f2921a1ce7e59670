//! Reactive Cell
//!
//! A [`Ref`] is the fundamental reactive primitive. It holds a value and
//! notifies the computations that read it when the value changes.
//!
//! # How Cells Work
//!
//! 1. When a cell is read inside a tracking frame (computed or effect), the
//!    frame's owner is subscribed to the cell.
//!
//! 2. `set` stores the new value and bumps the version. If the value differs
//!    from the old one under the cell's equality rule, every subscriber is
//!    notified with `(new, old)`, in the order they subscribed.
//!
//! # Thread Safety
//!
//! The value and version sit behind one mutex. Notification happens after
//! the mutex is released, so a subscriber may read or write this cell, or
//! subscribe and unsubscribe, without deadlocking.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::graph::{Node, NodeId};

use super::compare::EqualityFn;
use super::handle::WatchHandle;
use super::runtime::{Change, Runtime};
use super::watch::{watch, WatchOptions};

struct CellState<T> {
    value: T,
    version: u64,
}

struct RefInner<T> {
    node: NodeId,
    rt: Runtime,
    state: Mutex<CellState<T>>,
    equal: EqualityFn<T>,
}

impl<T> Drop for RefInner<T> {
    fn drop(&mut self) {
        self.rt.remove_node(self.node);
    }
}

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use ripple_core::{Ref, Runtime};
///
/// let rt = Runtime::new();
/// let count = Ref::new(&rt, 0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// assert_eq!(count.version(), 1);
/// ```
pub struct Ref<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<RefInner<T>>,
}

impl<T> Ref<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a cell that notifies when the new value is `!=` the old one.
    pub fn new(rt: &Runtime, value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equality(rt, value, |old, new| old == new)
    }

    /// Create a cell with a custom equality rule.
    ///
    /// `set` notifies only when `equal(old, new)` is `false`. A rule that
    /// always returns `false` makes every `set` notify.
    pub fn with_equality<F>(rt: &Runtime, value: T, equal: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let node = rt.insert_node(Node::cell());
        Self {
            inner: Arc::new(RefInner {
                node,
                rt: rt.clone(),
                state: Mutex::new(CellState { value, version: 0 }),
                equal: Arc::new(equal),
            }),
        }
    }

    /// Attach a label, used in logs, snapshots and loop reports.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.inner.rt.set_label(self.inner.node, label);
        self
    }

    pub fn id(&self) -> NodeId {
        self.inner.node
    }

    /// The cell's label, or its handle if it has none.
    pub fn label(&self) -> String {
        self.inner.rt.label_of(self.inner.node)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.rt
    }

    /// Get the current value.
    ///
    /// Inside a tracking frame this also subscribes the frame's owner.
    pub fn get(&self) -> T {
        self.inner.rt.track_read(self.inner.node);
        self.get_untracked()
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> T {
        self.inner.state.lock().value.clone()
    }

    /// Borrow the current value. Tracked like [`get`](Self::get).
    ///
    /// The cell is locked while `f` runs; `f` must not touch this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.rt.track_read(self.inner.node);
        f(&self.inner.state.lock().value)
    }

    /// Store a new value and notify subscribers if it changed.
    ///
    /// Returns whether subscribers were notified. The version is bumped
    /// either way.
    pub fn set(&self, value: T) -> bool {
        self.replace_with(|_| value)
    }

    /// Update the value using a function of the current one.
    ///
    /// The read and the write happen under one lock, so concurrent updates
    /// are not lost. `f` must not touch this cell.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        self.replace_with(f)
    }

    fn replace_with<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let (new, old, version) = {
            let mut state = self.inner.state.lock();
            let next = f(&state.value);
            let old = std::mem::replace(&mut state.value, next);
            state.version += 1;
            if (self.inner.equal)(&old, &state.value) {
                tracing::trace!(cell = %self.inner.node, version = state.version, "set without change");
                return false;
            }
            (state.value.clone(), old, state.version)
        };

        tracing::trace!(cell = %self.inner.node, version, "cell changed");

        let rt = &self.inner.rt;
        rt.observability().with_hook(|hook| {
            hook.on_ref_change(&rt.label_of(self.inner.node), &old, &new);
        });
        rt.notify_dependents(&Change::value_changed(self.inner.node, &new, &old));
        true
    }

    /// Number of `set`/`update` calls so far, changing or not.
    pub fn version(&self) -> u64 {
        self.inner.state.lock().version
    }

    /// Number of direct subscribers (computeds, watchers, effects).
    pub fn subscriber_count(&self) -> usize {
        self.inner.rt.dependents_of(self.inner.node).len()
    }

    /// Register a plain callback run synchronously on every change.
    pub fn subscribe<F>(&self, callback: F) -> WatchHandle
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        watch(self, callback, WatchOptions::new().flush(crate::FlushMode::Sync))
    }
}

impl<T> Clone for Ref<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Ref<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ref")
            .field("id", &self.inner.node)
            .field("value", &self.get_untracked())
            .field("version", &self.version())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ref_get_and_set() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, 0);
        assert_eq!(cell.get(), 0);

        assert!(cell.set(42));
        assert_eq!(cell.get(), 42);
    }

    #[test]
    fn ref_update() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, 10);
        cell.update(|v| v + 5);
        assert_eq!(cell.get(), 15);
    }

    #[test]
    fn unchanged_set_bumps_version_without_notifying() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let _handle = cell.subscribe(move |_, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!cell.set(1));
        assert_eq!(cell.version(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(cell.set(2));
        assert_eq!(cell.version(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribers_receive_new_and_old() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, String::from("a"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _handle = cell.subscribe(move |new, old| {
            seen_clone.lock().push(format!("{old}->{new}"));
        });

        cell.set("b".into());
        cell.set("c".into());

        assert_eq!(*seen.lock(), vec!["a->b", "b->c"]);
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, 0);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let order = order.clone();
                cell.subscribe(move |_, _| order.lock().push(n))
            })
            .collect();

        cell.set(1);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        assert_eq!(cell.subscriber_count(), handles.len());
    }

    #[test]
    fn custom_equality_still_stores_value() {
        #[derive(Clone, Debug)]
        struct Item {
            id: u32,
            note: &'static str,
        }

        let rt = Runtime::new();
        let cell = Ref::with_equality(&rt, Item { id: 1, note: "a" }, |a, b| a.id == b.id);

        assert!(!cell.set(Item { id: 1, note: "b" }));
        assert_eq!(cell.get().note, "b");
        assert!(cell.set(Item { id: 2, note: "b" }));
    }

    #[test]
    fn subscriber_can_write_the_same_cell() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, 0);
        let writer = cell.clone();

        // Clamp to 10 from inside the callback
        let _handle = cell.subscribe(move |new, _| {
            if *new > 10 {
                writer.set(10);
            }
        });

        cell.set(25);
        assert_eq!(cell.get(), 10);
    }

    #[test]
    fn ref_clone_shares_state() {
        let rt = Runtime::new();
        let cell1 = Ref::new(&rt, 0);
        let cell2 = cell1.clone();

        cell1.set(42);
        assert_eq!(cell2.get(), 42);
        assert_eq!(cell1.id(), cell2.id());
    }

    #[test]
    fn dropping_last_handle_removes_node() {
        let rt = Runtime::new();
        let cell = Ref::new(&rt, 0).with_label("count");
        assert_eq!(cell.label(), "count");
        assert_eq!(rt.node_count(), 1);

        drop(cell);
        assert_eq!(rt.node_count(), 0);
    }
}
