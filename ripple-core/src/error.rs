//! Error types for the reactive core.

use thiserror::Error;

use crate::commands::LoopEvent;
use crate::graph::NodeId;

pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Errors surfaced by reactive operations.
#[derive(Debug, Error)]
pub enum ReactiveError {
    #[error("computation failed: {0}")]
    Compute(#[from] ComputeError),

    #[error("dependency cycle detected while evaluating {node}")]
    Cycle { node: NodeId },

    #[error("command loop detected: {0}")]
    CommandLoop(LoopEvent),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure of a user-supplied compute function or effect body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    #[error("{0}")]
    Failed(String),

    #[error("computation panicked: {0}")]
    Panicked(String),
}

impl ComputeError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Build an error from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self::Panicked(message)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown flush mode: {0:?} (expected \"sync\" or \"post\")")]
    UnknownFlushMode(String),

    #[error("loop detection threshold must be at least 1")]
    ZeroThreshold,

    #[error("loop detection window must be longer than 0 ms")]
    ZeroWindow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        let err = ComputeError::from_panic(Box::new("boom"));
        assert_eq!(err, ComputeError::Panicked("boom".into()));

        let err = ComputeError::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(err.to_string(), "computation panicked: owned boom");

        let err = ComputeError::from_panic(Box::new(42_u8));
        assert_eq!(err, ComputeError::Panicked("non-string panic payload".into()));
    }

    #[test]
    fn compute_error_converts_into_reactive_error() {
        let err: ReactiveError = ComputeError::failed("bad input").into();
        assert_eq!(err.to_string(), "computation failed: bad input");
    }
}
