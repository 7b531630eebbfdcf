//! Buffer pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EnsError, Result};

/// One size class of the pool: `block_count` blocks of `block_size` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeClass {
    /// Size of each block in bytes
    pub block_size: usize,
    /// Number of blocks in this class
    pub block_count: usize,
}

impl SizeClass {
    /// Create a new size class
    pub fn new(block_size: usize, block_count: usize) -> Self {
        Self {
            block_size,
            block_count,
        }
    }

    /// Bytes reserved by this class
    pub fn total_bytes(&self) -> usize {
        self.block_size.saturating_mul(self.block_count)
    }
}

/// Configuration for the runtime buffer pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Name of the buffer pool
    pub name: String,
    /// Size classes, smallest first after validation
    pub size_classes: Vec<SizeClass>,
    /// Alignment of every block (block sizes are rounded up to it)
    pub alignment: usize,
    /// How long `alloc` may wait for a release before failing; `None` fails immediately
    pub allocation_timeout: Option<Duration>,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            name: "ens_pool".to_string(),
            size_classes: vec![
                SizeClass::new(256, 1024),
                SizeClass::new(4096, 256),
                SizeClass::new(64 * 1024, 32),
            ],
            alignment: 64,
            allocation_timeout: None,
        }
    }
}

impl BufferPoolConfig {
    /// Create a new configuration with custom name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Replace all size classes
    pub fn with_size_classes(mut self, classes: Vec<SizeClass>) -> Self {
        self.size_classes = classes;
        self
    }

    /// Use a single size class
    pub fn with_single_class(mut self, block_size: usize, block_count: usize) -> Self {
        self.size_classes = vec![SizeClass::new(block_size, block_count)];
        self
    }

    /// Set block alignment
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set allocation timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.allocation_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.size_classes.is_empty() {
            return Err(EnsError::invalid_parameter(
                "size_classes",
                "At least one size class is required",
            ));
        }

        if !self.alignment.is_power_of_two() {
            return Err(EnsError::invalid_parameter(
                "alignment",
                "Alignment must be a power of two",
            ));
        }

        for class in &self.size_classes {
            if class.block_size == 0 {
                return Err(EnsError::invalid_parameter(
                    "block_size",
                    "Block size cannot be zero",
                ));
            }
            if class.block_size > u32::MAX as usize {
                return Err(EnsError::invalid_parameter(
                    "block_size",
                    "Block size must fit the 32-bit userdata length",
                ));
            }
            if class.block_count == 0 {
                return Err(EnsError::invalid_parameter(
                    "block_count",
                    "Block count cannot be zero",
                ));
            }
            if class.block_count > u32::MAX as usize {
                return Err(EnsError::invalid_parameter(
                    "block_count",
                    "Block count exceeds u32 index space",
                ));
            }
        }

        let mut sizes: Vec<usize> = self
            .size_classes
            .iter()
            .map(|class| self.aligned_block_size(class.block_size))
            .collect();
        sizes.sort_unstable();
        if sizes.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(EnsError::invalid_parameter(
                "size_classes",
                "Size classes must have distinct aligned block sizes",
            ));
        }

        Ok(())
    }

    /// Block size after rounding up to the configured alignment
    pub fn aligned_block_size(&self, block_size: usize) -> usize {
        (block_size + self.alignment - 1) & !(self.alignment - 1)
    }

    /// Total number of buffers across all classes
    pub fn total_buffers(&self) -> usize {
        self.size_classes.iter().map(|class| class.block_count).sum()
    }

    /// Total bytes mapped for all classes
    pub fn total_memory_required(&self) -> usize {
        self.size_classes
            .iter()
            .map(|class| self.aligned_block_size(class.block_size) * class.block_count)
            .sum()
    }

    /// Largest block size on offer
    pub fn max_block_size(&self) -> usize {
        self.size_classes
            .iter()
            .map(|class| class.block_size)
            .max()
            .unwrap_or(0)
    }
}

/// Builder pattern for buffer pool configuration
pub struct BufferPoolConfigBuilder {
    config: BufferPoolConfig,
}

impl BufferPoolConfigBuilder {
    /// Create a new builder with no size classes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: BufferPoolConfig {
                size_classes: Vec::new(),
                ..BufferPoolConfig::new(name)
            },
        }
    }

    /// Add a size class
    pub fn size_class(mut self, block_size: usize, block_count: usize) -> Self {
        self.config
            .size_classes
            .push(SizeClass::new(block_size, block_count));
        self
    }

    /// Set alignment
    pub fn alignment(mut self, alignment: usize) -> Self {
        self.config.alignment = alignment;
        self
    }

    /// Set timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.allocation_timeout = Some(timeout);
        self
    }

    /// No timeout
    pub fn no_timeout(mut self) -> Self {
        self.config.allocation_timeout = None;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<BufferPoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
