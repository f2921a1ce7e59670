//! Reactive Primitives
//!
//! This module implements the core reactive system: cells, computeds,
//! watchers and effects, plus the runtime that connects them.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Ref`] is a container for mutable state. When a cell is read within a
//! tracking frame (a computed or an effect), the frame's owner is registered
//! as a dependent. When the cell's value changes, all dependents are
//! notified.
//!
//! ## Computeds
//!
//! A [`Computed`] is a derived value that caches its result. A dependency
//! change only marks it dirty; the next read recomputes.
//!
//! ## Watchers and Effects
//!
//! [`watch`] runs a callback with the new and old value of one cell.
//! [`watch_effect`] runs a function that may read anything and re-runs it
//! when any of it changes. Both can run inline or be deferred to
//! [`Runtime::flush_watchers`].
//!
//! # Implementation Notes
//!
//! Reads are attributed through a per-thread stack of tracking frames, so a
//! computed that reads another computed records its reads in the innermost
//! frame only. Dependencies live in an arena graph owned by the runtime
//! (see [`crate::graph`]) rather than in the cells themselves.

mod cell;
mod compare;
mod computed;
mod context;
mod effect;
mod handle;
mod runtime;
mod scheduler;
mod watch;

pub use cell::Ref;
pub use compare::{Comparator, EqualityFn, Structural};
pub use computed::{CacheState, CacheStats, Computed};
pub use context::{FrameGuard, Tracker, TrackingStack};
pub use effect::{try_watch_effect, watch_effect, watch_effect_with_flush};
pub use handle::WatchHandle;
pub use runtime::Runtime;
pub use scheduler::FlushScheduler;
pub use watch::{watch, WatchOptions};
