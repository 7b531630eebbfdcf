//! Runtime configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    buffers::{BufferPoolConfig, SizeClass},
    dispatch::DispatchConfig,
    error::{EnsError, Result},
};

/// Default bound on a blocking request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a runtime instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name used in log output
    pub name: String,
    /// Buffer pool layout
    pub pool: BufferPoolConfig,
    /// Worker pool bounds
    pub dispatch: DispatchConfig,
    /// Longest a request waits for its response; `None` waits until the
    /// session ends
    pub request_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: "ens".to_string(),
            pool: BufferPoolConfig::default(),
            dispatch: DispatchConfig::default(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl RuntimeConfig {
    /// Create a default config with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the buffer pool config
    pub fn with_pool(mut self, pool: BufferPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the dispatch config
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EnsError::invalid_parameter(
                "name",
                "Runtime name cannot be empty",
            ));
        }

        if self.request_timeout == Some(Duration::ZERO) {
            return Err(EnsError::invalid_parameter(
                "request_timeout",
                "Request timeout must be greater than 0 (use None to wait indefinitely)",
            ));
        }

        self.pool.validate()?;
        self.dispatch.validate()
    }
}

/// Builder for runtime configurations
#[derive(Debug)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
    size_classes: Vec<SizeClass>,
}

impl RuntimeConfigBuilder {
    /// Create a new builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: RuntimeConfig::new(name),
            size_classes: Vec::new(),
        }
    }

    /// Add a buffer size class, replacing the default classes
    pub fn size_class(mut self, block_size: usize, block_count: usize) -> Self {
        self.size_classes.push(SizeClass::new(block_size, block_count));
        self
    }

    /// Wait up to `timeout` for a free buffer before failing an allocation
    pub fn allocation_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool.allocation_timeout = Some(timeout);
        self
    }

    /// Set the worker thread bounds
    pub fn threads(mut self, min_threads: usize, max_threads: usize) -> Self {
        self.config.dispatch.min_threads = min_threads;
        self.config.dispatch.max_threads = max_threads;
        self
    }

    /// Set the dispatch queue depth
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.config.dispatch.max_queue_depth = depth;
        self
    }

    /// Set the idle keep-alive of surplus workers
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.dispatch.keep_alive = keep_alive;
        self
    }

    /// Add a worker once a queued event has waited `threshold` with every
    /// worker busy
    pub fn stall_threshold(mut self, threshold: Duration) -> Self {
        self.config.dispatch.stall_threshold = Some(threshold);
        self
    }

    /// Keep the pool within `max_threads` plus workers blocked in requests
    pub fn no_stall_growth(mut self) -> Self {
        self.config.dispatch.stall_threshold = None;
        self
    }

    /// Bound blocking requests
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Let requests wait until their session ends
    pub fn no_request_timeout(mut self) -> Self {
        self.config.request_timeout = None;
        self
    }

    /// Build the configuration
    pub fn build(mut self) -> Result<RuntimeConfig> {
        if !self.size_classes.is_empty() {
            self.config.pool.size_classes = self.size_classes;
        }
        self.config.pool.name = format!("{}_pool", self.config.name);
        self.config.validate()?;
        Ok(self.config)
    }
}
