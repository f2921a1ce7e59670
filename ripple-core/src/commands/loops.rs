//! Loop Detection
//!
//! A watcher that turns a state change into a command, whose handling
//! changes the same state again, forms a feedback loop. The detector counts
//! commands per (component, cell) pair in fixed time windows and flags any
//! pair whose count goes over the threshold inside one window.
//!
//! Detection is advisory. The detector only records what it saw; the
//! command bridge decides whether a flagged loop stops command generation.

use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::LoopDetectionConfig;

type Key = (String, String);

/// A (component, cell) pair that generated too many commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopEvent {
    pub component_id: String,
    pub ref_id: String,
    /// Commands counted in the window that tripped the threshold.
    pub command_count: u64,
}

impl fmt::Display for LoopEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "component {:?} generated {} commands for {:?} within one window",
            self.component_id, self.command_count, self.ref_id
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

/// Rate monitor for command generation.
pub struct LoopDetector {
    config: LoopDetectionConfig,
    windows: DashMap<Key, Window>,
    detected: Mutex<IndexMap<Key, LoopEvent>>,
}

impl LoopDetector {
    pub fn new(config: LoopDetectionConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            detected: Mutex::new(IndexMap::new()),
        }
    }

    pub fn config(&self) -> &LoopDetectionConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Count one command for `(component_id, ref_id)` now.
    ///
    /// Returns the loop event if this command put the pair over the
    /// threshold.
    pub fn record(&self, component_id: &str, ref_id: &str) -> Option<LoopEvent> {
        self.record_at(component_id, ref_id, Instant::now())
    }

    /// Count one command at an explicit instant.
    pub fn record_at(&self, component_id: &str, ref_id: &str, now: Instant) -> Option<LoopEvent> {
        if !self.config.enabled {
            return None;
        }

        let window_len = self.config.window();
        let key = (component_id.to_owned(), ref_id.to_owned());
        let count = {
            let mut window = self.windows.entry(key.clone()).or_insert(Window {
                started: now,
                count: 0,
            });
            if expired(window.started, now, window_len) {
                window.started = now;
                window.count = 0;
            }
            window.count += 1;
            window.count
        };

        if count <= self.config.threshold as u64 {
            return None;
        }

        let event = LoopEvent {
            component_id: key.0.clone(),
            ref_id: key.1.clone(),
            command_count: count,
        };

        let mut detected = self.detected.lock();
        match detected.get_mut(&key) {
            Some(existing) => {
                existing.command_count = existing.command_count.max(count);
            }
            None => {
                tracing::warn!(
                    component = component_id,
                    cell = ref_id,
                    count,
                    threshold = self.config.threshold,
                    window_ms = self.config.window_ms,
                    "command loop detected"
                );
                detected.insert(key, event.clone());
            }
        }
        Some(event)
    }

    /// Commands counted for the pair in its current window.
    pub fn count(&self, component_id: &str, ref_id: &str) -> u64 {
        let key = (component_id.to_owned(), ref_id.to_owned());
        self.windows.get(&key).map(|w| w.count).unwrap_or(0)
    }

    /// Every pair flagged since the last reset, in detection order.
    pub fn detected_loops(&self) -> Vec<LoopEvent> {
        self.detected.lock().values().cloned().collect()
    }

    pub fn has_loops(&self) -> bool {
        !self.detected.lock().is_empty()
    }

    /// Forget all counters and detected loops.
    pub fn reset(&self) {
        self.windows.clear();
        self.detected.lock().clear();
        tracing::debug!("loop detector reset");
    }
}

fn expired(started: Instant, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(started) >= window
}

impl fmt::Debug for LoopDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopDetector")
            .field("config", &self.config)
            .field("tracked", &self.windows.len())
            .field("detected", &self.detected.lock().len())
            .finish()
    }
}
