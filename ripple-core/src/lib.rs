//! Ripple Core
//!
//! This crate provides the reactive state core for terminal UI
//! applications. It implements:
//!
//! - Reactive primitives (cells, computeds, watchers, effects)
//! - Dependency tracking over an arena-based dependency graph
//! - Deferred ("post") watcher flushing
//! - A command queue that bridges state changes to a host event loop,
//!   with loop detection
//! - An optional instrumentation hook
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `graph`: Dependency graph arena and diagnostics snapshots
//! - `commands`: Command queue, auto-command bridge, loop detector
//! - `observe`: Instrumentation hook
//! - `config` / `error`: Runtime configuration and error types
//!
//! Everything hangs off an explicit [`Runtime`]; there is no global state.
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{watch_effect, Computed, Ref, Runtime};
//!
//! let rt = Runtime::new();
//!
//! // Create a cell
//! let count = Ref::new(&rt, 0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = Computed::new(&rt, move || c.get() * 2);
//!
//! // Create an effect
//! let (c, d) = (count.clone(), doubled.clone());
//! let handle = watch_effect(&rt, move || {
//!     println!("Count: {}, Doubled: {}", c.get(), d.get());
//! });
//!
//! // Update the cell
//! count.set(5);
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//!
//! handle.stop();
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod graph;
pub mod observe;
pub mod reactive;

pub use commands::{AutoCommands, Command, CommandQueue, LoopDetector, LoopEvent};
pub use config::{FlushMode, LoopDetectionConfig, RuntimeConfig};
pub use error::{ComputeError, ConfigError, ReactiveError, Result};
pub use graph::{GraphSnapshot, NodeId, NodeKind};
pub use observe::{Hook, Observability};
pub use reactive::{
    try_watch_effect, watch, watch_effect, watch_effect_with_flush, CacheStats, Computed, Ref,
    Runtime, Structural, WatchHandle, WatchOptions,
};
