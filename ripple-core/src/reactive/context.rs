//! Tracking Context
//!
//! The tracking context records which computation is currently running, so
//! that reading a cell can register that computation as a dependent.
//!
//! # Implementation
//!
//! Every thread that evaluates something gets its own [`TrackingStack`]. The
//! stacks live in a registry owned by the runtime, keyed by thread id, rather
//! than in a hidden thread-local: a read on one thread is never attributed to
//! a frame opened on another, and the whole structure can be inspected.
//!
//! Entering a computation pushes a frame, the computation runs, and the
//! frame is popped with the set of nodes that were read. Nested evaluations
//! (a computed reading another computed) push their own frame, so reads are
//! always attributed to the innermost one.

use std::thread::{self, ThreadId};

use dashmap::DashMap;
use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::graph::NodeId;

/// One evaluation in progress.
#[derive(Debug, Clone)]
struct Frame {
    /// The computation reads are attributed to. `None` for an untracked
    /// scope, which swallows reads without recording an owner.
    owner: Option<NodeId>,

    /// Nodes read during this frame, first read first.
    reads: IndexSet<NodeId>,
}

/// Stack of active evaluations for one thread.
#[derive(Debug, Clone, Default)]
pub struct TrackingStack {
    frames: SmallVec<[Frame; 4]>,
}

impl TrackingStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, owner: Option<NodeId>) {
        self.frames.push(Frame {
            owner,
            reads: IndexSet::new(),
        });
    }

    fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Record a read in the innermost frame.
    ///
    /// Returns the frame owner the first time a node is read in this frame,
    /// and `None` for repeated reads or untracked scopes.
    fn record(&mut self, node: NodeId) -> Option<NodeId> {
        let frame = self.frames.last_mut()?;
        let owner = frame.owner?;
        if frame.reads.insert(node) {
            Some(owner)
        } else {
            None
        }
    }

    pub fn current_owner(&self) -> Option<NodeId> {
        self.frames.last().and_then(|frame| frame.owner)
    }

    /// Whether `node` has a frame anywhere on this stack.
    pub fn is_evaluating(&self, node: NodeId) -> bool {
        self.frames.iter().any(|frame| frame.owner == Some(node))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Registry of per-thread tracking stacks.
#[derive(Debug, Default)]
pub struct Tracker {
    stacks: DashMap<ThreadId, TrackingStack>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a new tracking frame for `owner` on the calling thread.
    ///
    /// The frame is popped when the returned guard is dropped, even if the
    /// computation panics.
    pub fn enter(&self, owner: Option<NodeId>) -> FrameGuard<'_> {
        let thread = thread::current().id();
        self.stacks.entry(thread).or_default().push(owner);
        FrameGuard {
            tracker: self,
            thread,
            owner,
            finished: false,
        }
    }

    /// Run `f` inside a frame owned by `owner` and return what it read.
    pub fn run_tracked<R>(&self, owner: NodeId, f: impl FnOnce() -> R) -> (R, IndexSet<NodeId>) {
        let guard = self.enter(Some(owner));
        let result = f();
        (result, guard.finish())
    }

    /// Run `f` with tracking suppressed.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter(None);
        f()
    }

    /// Record a read of `node` in the calling thread's innermost frame.
    ///
    /// Returns the owner that should be subscribed to `node`, or `None` when
    /// nothing is tracking or the node was already read in this frame.
    pub fn record_read(&self, node: NodeId) -> Option<NodeId> {
        let thread = thread::current().id();
        let mut stack = self.stacks.get_mut(&thread)?;
        stack.record(node)
    }

    /// The computation currently tracking reads on this thread.
    pub fn current_owner(&self) -> Option<NodeId> {
        let thread = thread::current().id();
        self.stacks.get(&thread)?.current_owner()
    }

    pub fn is_tracking(&self) -> bool {
        self.current_owner().is_some()
    }

    /// Whether `node` is being evaluated further up this thread's stack.
    pub fn is_evaluating(&self, node: NodeId) -> bool {
        let thread = thread::current().id();
        self.stacks
            .get(&thread)
            .map(|stack| stack.is_evaluating(node))
            .unwrap_or(false)
    }

    /// Depth of the calling thread's stack.
    pub fn depth(&self) -> usize {
        let thread = thread::current().id();
        self.stacks.get(&thread).map(|stack| stack.depth()).unwrap_or(0)
    }

    fn pop(&self, thread: ThreadId, expected: Option<NodeId>) -> IndexSet<NodeId> {
        let popped = match self.stacks.get_mut(&thread) {
            Some(mut stack) => stack.pop(),
            None => None,
        };
        self.stacks.remove_if(&thread, |_, stack| stack.is_empty());

        match popped {
            Some(frame) => {
                // Verify we're popping the right frame.
                debug_assert_eq!(
                    frame.owner, expected,
                    "tracking frame mismatch: expected {:?}, got {:?}",
                    expected, frame.owner
                );
                frame.reads
            }
            None => IndexSet::new(),
        }
    }
}

/// Guard that pops a tracking frame when dropped.
pub struct FrameGuard<'a> {
    tracker: &'a Tracker,
    thread: ThreadId,
    owner: Option<NodeId>,
    finished: bool,
}

impl FrameGuard<'_> {
    /// Pop the frame and return the nodes read while it was active.
    pub fn finish(mut self) -> IndexSet<NodeId> {
        self.finished = true;
        self.tracker.pop(self.thread, self.owner)
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker.pop(self.thread, self.owner);
        }
    }
}
