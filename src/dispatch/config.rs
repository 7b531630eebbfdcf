//! Worker pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EnsError, Result};

/// Default wait before a stalled queue gets an extra worker
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_millis(500);

/// Configuration for the dispatch worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Prefix for worker thread names
    pub thread_name_prefix: String,
    /// Workers kept alive while idle
    pub min_threads: usize,
    /// Upper bound on workers that are not blocked in a request
    pub max_threads: usize,
    /// Events that may wait for a worker before deliveries are rejected
    pub max_queue_depth: usize,
    /// How long a surplus worker idles before it exits
    pub keep_alive: Duration,
    /// How long the oldest queued event may wait with every worker busy
    /// before an extra worker starts; `None` disables this
    pub stall_threshold: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "ens-worker".to_string(),
            min_threads: 2,
            max_threads: 64,
            max_queue_depth: 4096,
            keep_alive: Duration::from_secs(10),
            stall_threshold: Some(DEFAULT_STALL_THRESHOLD),
        }
    }
}

impl DispatchConfig {
    /// Create a config with the given thread bounds
    pub fn new(min_threads: usize, max_threads: usize) -> Self {
        Self {
            min_threads,
            max_threads,
            ..Default::default()
        }
    }

    /// Set the worker thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the queue depth
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the idle keep-alive
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the stall threshold
    pub fn with_stall_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.stall_threshold = threshold;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(EnsError::invalid_parameter(
                "max_threads",
                "Worker pool needs at least one thread",
            ));
        }

        if self.min_threads > self.max_threads {
            return Err(EnsError::invalid_parameter(
                "min_threads",
                format!(
                    "min_threads ({}) exceeds max_threads ({})",
                    self.min_threads, self.max_threads
                ),
            ));
        }

        if self.max_queue_depth == 0 {
            return Err(EnsError::invalid_parameter(
                "max_queue_depth",
                "Queue depth must be greater than 0",
            ));
        }

        if self.stall_threshold == Some(Duration::ZERO) {
            return Err(EnsError::invalid_parameter(
                "stall_threshold",
                "Stall threshold must be greater than 0 (use None to disable)",
            ));
        }

        if self.thread_name_prefix.is_empty() {
            return Err(EnsError::invalid_parameter(
                "thread_name_prefix",
                "Thread name prefix cannot be empty",
            ));
        }

        Ok(())
    }
}
