//! Flush Scheduler
//!
//! Watchers registered with [`FlushMode::Post`](crate::FlushMode::Post) do
//! not run inside the `set` that triggered them. Their invocations are
//! appended here and replayed by an explicit flush.
//!
//! Invocations are never coalesced. Three `set` calls that each change the
//! value queue three invocations, and a flush runs all three with the
//! (new, old) pair captured at the time of each change. Every state
//! transition is delivered at least once; collapsing to the latest value is
//! left to the callback if it wants that.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::graph::NodeId;

/// A deferred invocation. Returns `false` when its watcher was stopped
/// before the job got to run.
type Job = Box<dyn FnOnce() -> bool + Send>;

struct PendingFlush {
    owner: NodeId,
    job: Job,
}

/// FIFO of deferred watcher invocations.
#[derive(Default)]
pub struct FlushScheduler {
    pending: Mutex<VecDeque<PendingFlush>>,
}

impl FlushScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an invocation on behalf of `owner`.
    pub fn enqueue(&self, owner: NodeId, job: impl FnOnce() -> bool + Send + 'static) {
        self.pending.lock().push_back(PendingFlush {
            owner,
            job: Box::new(job),
        });
    }

    /// Run every invocation queued at the time of the call, in order.
    ///
    /// Returns the number executed. Jobs whose watcher was stopped earlier
    /// in the same flush are skipped and not counted. Invocations queued by
    /// the jobs themselves stay pending until the next flush.
    pub fn flush(&self) -> usize {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return 0;
        }

        let _span = tracing::debug_span!("flush_watchers", pending = batch.len()).entered();
        let mut executed = 0;
        for entry in batch {
            if (entry.job)() {
                executed += 1;
            }
        }
        tracing::debug!(executed, "flushed post-mode watchers");
        executed
    }

    /// Drop every pending invocation owned by `owner`.
    pub fn purge(&self, owner: NodeId) -> usize {
        let removed: VecDeque<PendingFlush> = {
            let mut pending = self.pending.lock();
            let (removed, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(|entry| entry.owner == owner);
            *pending = kept;
            removed
        };
        // Removed jobs may own the last handle to a cell; they drop unlocked.
        removed.len()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl std::fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("pending", &self.len())
            .finish()
    }
}
