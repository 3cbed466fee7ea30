//! Runtime configuration.

use crate::clock::DEFAULT_RESYNC_ATTEMPTS;
use crate::resync::DEFAULT_RESYNC_INTERVAL;
use std::time::Duration;

/// Settings for [`crate::Runtime::start`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Period between two clock resyncs.
    pub resync_interval: Duration,
    /// Samples taken per resync; the one with the smallest latency wins.
    pub resync_attempts: usize,
    /// Whether to run the background resync thread at all.
    pub resync_enabled: bool,
    /// Name of the scheduler thread.
    pub scheduler_thread_name: String,
    /// Whether the reset signal also empties the scheduler queue.
    pub clear_scheduler_on_reset: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            resync_attempts: DEFAULT_RESYNC_ATTEMPTS,
            resync_enabled: true,
            scheduler_thread_name: "vibelang-scheduler".to_string(),
            clear_scheduler_on_reset: true,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Set the samples per resync (at least one).
    pub fn with_resync_attempts(mut self, attempts: usize) -> Self {
        self.resync_attempts = attempts.max(1);
        self
    }

    pub fn with_resync_enabled(mut self, enabled: bool) -> Self {
        self.resync_enabled = enabled;
        self
    }

    pub fn with_scheduler_thread_name(mut self, name: impl Into<String>) -> Self {
        self.scheduler_thread_name = name.into();
        self
    }

    pub fn with_clear_scheduler_on_reset(mut self, clear: bool) -> Self {
        self.clear_scheduler_on_reset = clear;
        self
    }
}
