//! Runtime configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config:
//!
//! ```json
//! {
//!   "default_flush": "post",
//!   "loop_detection": { "enabled": true, "threshold": 100, "window_ms": 1000 }
//! }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// When a watcher callback runs relative to the `set` that triggered it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Run inline, before `set` returns.
    #[default]
    Sync,

    /// Queue the invocation until [`Runtime::flush_watchers`](crate::Runtime::flush_watchers).
    Post,
}

impl FlushMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushMode::Sync => "sync",
            FlushMode::Post => "post",
        }
    }
}

impl FromStr for FlushMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(FlushMode::Sync),
            "post" => Ok(FlushMode::Post),
            other => Err(ConfigError::UnknownFlushMode(other.to_owned())),
        }
    }
}

impl fmt::Display for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for the command loop detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDetectionConfig {
    pub enabled: bool,

    /// A (component, cell) pair generating more than this many commands
    /// inside one window is reported as a loop.
    pub threshold: usize,

    pub window_ms: u64,
}

impl LoopDetectionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 100,
            window_ms: 1_000,
        }
    }
}

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Flush mode for watchers that do not pick one explicitly.
    pub default_flush: FlushMode,
    pub loop_detection: LoopDetectionConfig,
}

impl RuntimeConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loop_detection.threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if self.loop_detection.window_ms == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(())
    }

    pub fn with_default_flush(mut self, mode: FlushMode) -> Self {
        self.default_flush = mode;
        self
    }

    pub fn with_loop_threshold(mut self, threshold: usize) -> Self {
        self.loop_detection.threshold = threshold;
        self
    }

    pub fn with_loop_window(mut self, window: Duration) -> Self {
        self.loop_detection.window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }
}
