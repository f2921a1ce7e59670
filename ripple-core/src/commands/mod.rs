//! Commands for the host event loop.
//!
//! The reactive core never talks to the terminal directly. Instead, state
//! changes that the host must react to become [`Command`]s on a
//! [`CommandQueue`], which the host drains on its own schedule.
//!
//! - [`queue`]: the command type and the FIFO queue.
//! - [`bridge`]: [`AutoCommands`], which binds cells and emits a command per
//!   change.
//! - [`loops`]: [`LoopDetector`], which spots state → command → state
//!   feedback cycles.

pub mod bridge;
pub mod loops;
pub mod queue;

pub use bridge::{AutoCommands, CommandGenerator, StateChanged, StateChangedGenerator};
pub use loops::{LoopDetector, LoopEvent};
pub use queue::{CoalescePolicy, Command, CommandOrigin, CommandQueue};
