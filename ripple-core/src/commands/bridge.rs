//! Auto-Command Bridge
//!
//! [`AutoCommands`] turns cell changes into commands for the host loop. A
//! component creates one bridge, binds the cells it exposes, and every
//! change to a bound cell enqueues one command built by a
//! [`CommandGenerator`].
//!
//! Each generated command is first counted by the runtime's
//! [`LoopDetector`]. By default a detected loop is only logged and
//! recorded; with [`AutoCommands::halt_on_loop`] the bridge stops
//! enqueueing commands for the looping pair while it stays over the
//! threshold.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::FlushMode;
use crate::error::{ReactiveError, Result};
use crate::reactive::{watch, Ref, Runtime, WatchHandle, WatchOptions};

use super::loops::LoopDetector;
use super::queue::{Command, CommandOrigin, CommandQueue};

/// Message describing one change to a bound cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChanged {
    pub component_id: String,
    pub ref_id: String,
    /// Per-bridge sequence number, starting at 1.
    pub sequence: u64,
}

/// Builds the command enqueued for a state change.
pub trait CommandGenerator<M>: Send + Sync {
    fn generate(&self, change: &StateChanged) -> Command<M>;
}

impl<M, F> CommandGenerator<M> for F
where
    F: Fn(&StateChanged) -> Command<M> + Send + Sync,
{
    fn generate(&self, change: &StateChanged) -> Command<M> {
        self(change)
    }
}

/// Generator producing `M::from(StateChanged)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateChangedGenerator;

impl<M> CommandGenerator<M> for StateChangedGenerator
where
    M: From<StateChanged> + 'static,
{
    fn generate(&self, change: &StateChanged) -> Command<M> {
        let change = change.clone();
        Command::new(move || M::from(change.clone()))
    }
}

struct BridgeInner<M> {
    component_id: String,
    queue: Arc<CommandQueue<M>>,
    detector: Arc<LoopDetector>,
    generator: Box<dyn CommandGenerator<M>>,
    enabled: AtomicBool,
    halt_on_loop: AtomicBool,
    sequence: AtomicU64,
}

impl<M> BridgeInner<M> {
    fn emit(&self, ref_id: &str) -> Result<()> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(event) = self.detector.record(&self.component_id, ref_id) {
            if self.halt_on_loop.load(Ordering::SeqCst) {
                tracing::debug!(
                    component = %self.component_id,
                    cell = ref_id,
                    count = event.command_count,
                    "dropping command for looping cell"
                );
                return Err(ReactiveError::CommandLoop(event));
            }
        }

        let change = StateChanged {
            component_id: self.component_id.clone(),
            ref_id: ref_id.to_owned(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
        };
        let command = self
            .generator
            .generate(&change)
            .with_origin(CommandOrigin::new(&*self.component_id, ref_id));
        self.queue.enqueue(command);
        Ok(())
    }
}

/// Per-component bridge from cell changes to host commands.
///
/// Dropping the bridge unbinds every cell it bound.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use ripple_core::commands::{AutoCommands, CommandQueue, StateChanged, StateChangedGenerator};
/// use ripple_core::{Ref, Runtime};
///
/// let rt = Runtime::new();
/// let queue = Arc::new(CommandQueue::<StateChanged>::new());
/// let bridge = AutoCommands::new(&rt, "counter", queue.clone(), StateChangedGenerator);
///
/// let count = Ref::new(&rt, 0).with_label("count");
/// bridge.bind(&count);
///
/// count.set(1);
/// let msg = queue.dequeue().unwrap().run();
/// assert_eq!(msg.ref_id, "count");
/// ```
pub struct AutoCommands<M> {
    inner: Arc<BridgeInner<M>>,
    handles: Mutex<Vec<WatchHandle>>,
}

impl<M: 'static> AutoCommands<M> {
    pub fn new<G>(
        rt: &Runtime,
        component_id: impl Into<String>,
        queue: Arc<CommandQueue<M>>,
        generator: G,
    ) -> Self
    where
        G: CommandGenerator<M> + 'static,
    {
        Self {
            inner: Arc::new(BridgeInner {
                component_id: component_id.into(),
                queue,
                detector: Arc::clone(rt.loop_detector()),
                generator: Box::new(generator),
                enabled: AtomicBool::new(true),
                halt_on_loop: AtomicBool::new(false),
                sequence: AtomicU64::new(0),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Refuse to enqueue commands for a pair the detector has flagged.
    pub fn halt_on_loop(self, halt: bool) -> Self {
        self.inner.halt_on_loop.store(halt, Ordering::SeqCst);
        self
    }

    /// Emit a command on every change of `source`.
    ///
    /// The cell is identified by its label at bind time, so label it
    /// first. The returned handle unbinds just this cell.
    pub fn bind<T>(&self, source: &Ref<T>) -> WatchHandle
    where
        T: Clone + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let ref_id = source.label();
        tracing::debug!(component = %inner.component_id, cell = %ref_id, "bound cell");

        let handle = watch(
            source,
            move |_, _| {
                if let Err(err) = inner.emit(&ref_id) {
                    tracing::trace!(cell = %ref_id, error = %err, "auto command suppressed");
                }
            },
            WatchOptions::new().flush(FlushMode::Sync),
        );
        let mut handles = self.handles.lock();
        // Bindings stopped through their own handle are dropped here
        handles.retain(|h| h.is_active());
        handles.push(handle.clone());
        drop(handles);
        handle
    }

    /// Enqueue a command for `ref_id` by hand.
    pub fn emit(&self, ref_id: &str) -> Result<()> {
        self.inner.emit(ref_id)
    }

    pub fn enable(&self) {
        self.inner.enabled.store(true, Ordering::SeqCst);
    }

    /// Stop generating commands. Bindings stay in place.
    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn component_id(&self) -> &str {
        &self.inner.component_id
    }

    pub fn queue(&self) -> &Arc<CommandQueue<M>> {
        &self.inner.queue
    }

    /// Number of cells currently bound.
    pub fn bound_count(&self) -> usize {
        self.handles.lock().iter().filter(|h| h.is_active()).count()
    }

    /// Stop every binding.
    pub fn unbind_all(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            handle.stop();
        }
    }
}

impl<M> Drop for AutoCommands<M> {
    fn drop(&mut self) {
        for handle in self.handles.get_mut().drain(..) {
            handle.stop();
        }
    }
}

impl<M> std::fmt::Debug for AutoCommands<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoCommands")
            .field("component_id", &self.inner.component_id)
            .field("enabled", &self.inner.enabled.load(Ordering::SeqCst))
            .field("bound", &self.handles.lock().len())
            .finish()
    }
}
