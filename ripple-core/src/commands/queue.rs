//! Command Queue
//!
//! State changes that the host event loop must hear about are turned into
//! [`Command`]s: zero-argument thunks that produce a host message when run.
//! Producers (usually watcher callbacks, possibly on several threads)
//! enqueue; the host drains in FIFO order.
//!
//! Inspection (`peek`, `get_all`, `len`) never removes anything. Only
//! `dequeue`, `drain`, `drain_coalesced` and `clear` do.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

/// Where a command came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CommandOrigin {
    pub component_id: String,
    pub ref_id: String,
}

impl CommandOrigin {
    pub fn new(component_id: impl Into<String>, ref_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            ref_id: ref_id.into(),
        }
    }
}

/// A deferred host message.
pub struct Command<M> {
    thunk: Arc<dyn Fn() -> M + Send + Sync>,
    origin: Option<CommandOrigin>,
}

impl<M> Command<M> {
    pub fn new<F>(thunk: F) -> Self
    where
        F: Fn() -> M + Send + Sync + 'static,
    {
        Self {
            thunk: Arc::new(thunk),
            origin: None,
        }
    }

    /// A command that always yields a clone of `message`.
    pub fn message(message: M) -> Self
    where
        M: Clone + Send + Sync + 'static,
    {
        Self::new(move || message.clone())
    }

    pub fn with_origin(mut self, origin: CommandOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn origin(&self) -> Option<&CommandOrigin> {
        self.origin.as_ref()
    }

    /// Produce the message.
    pub fn run(&self) -> M {
        (self.thunk)()
    }
}

impl<M> Clone for Command<M> {
    fn clone(&self) -> Self {
        Self {
            thunk: Arc::clone(&self.thunk),
            origin: self.origin.clone(),
        }
    }
}

impl<M> fmt::Debug for Command<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// How [`CommandQueue::drain_coalesced`] treats repeated commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoalescePolicy {
    /// Return every command.
    #[default]
    KeepAll,

    /// Keep only the newest command per origin. Commands without an origin
    /// are always kept. Survivors keep their relative order.
    LatestPerOrigin,
}

/// Thread-safe FIFO of pending commands.
pub struct CommandQueue<M> {
    entries: Mutex<VecDeque<Command<M>>>,
    ready: Notify,
}

impl<M> CommandQueue<M> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
        }
    }

    pub fn enqueue(&self, command: Command<M>) {
        let len = {
            let mut entries = self.entries.lock();
            entries.push_back(command);
            entries.len()
        };
        tracing::trace!(pending = len, "command enqueued");
        self.ready.notify_one();
    }

    pub fn dequeue(&self) -> Option<Command<M>> {
        self.entries.lock().pop_front()
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&self) -> Vec<Command<M>> {
        let drained: Vec<_> = self.entries.lock().drain(..).collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "drained commands");
        }
        drained
    }

    /// Drain, then drop commands superseded under `policy`.
    pub fn drain_coalesced(&self, policy: CoalescePolicy) -> Vec<Command<M>> {
        let drained = self.drain();
        match policy {
            CoalescePolicy::KeepAll => drained,
            CoalescePolicy::LatestPerOrigin => coalesce_latest(drained),
        }
    }

    /// The oldest command, left in place.
    pub fn peek(&self) -> Option<Command<M>> {
        self.entries.lock().front().cloned()
    }

    /// A copy of every pending command, oldest first.
    pub fn get_all(&self) -> Vec<Command<M>> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Discard everything. Returns how many commands were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    /// Wait until at least one command is pending.
    ///
    /// Returns immediately if the queue is not empty. Meant for async host
    /// loops: `queue.wait_for_commands().await; for cmd in queue.drain() { .. }`.
    pub async fn wait_for_commands(&self) {
        loop {
            if !self.is_empty() {
                return;
            }
            self.ready.notified().await;
        }
    }
}

fn coalesce_latest<M>(commands: Vec<Command<M>>) -> Vec<Command<M>> {
    let mut latest: IndexMap<CommandOrigin, usize> = IndexMap::new();
    for (index, command) in commands.iter().enumerate() {
        if let Some(origin) = command.origin() {
            latest.insert(origin.clone(), index);
        }
    }

    commands
        .into_iter()
        .enumerate()
        .filter(|(index, command)| match command.origin() {
            Some(origin) => latest.get(origin) == Some(index),
            None => true,
        })
        .map(|(_, command)| command)
        .collect()
}

impl<M> Default for CommandQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for CommandQueue<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("pending", &self.len())
            .finish()
    }
}
