//! Buffer management for zero-copy data transfer
//!
//! Every payload that crosses the runtime API lives in a buffer taken from a
//! bounded pool. The pool is split into size classes, each backed by an
//! anonymous memory mapping carved into fixed-size blocks.

pub mod arena;
pub mod buffer;
pub mod config;
pub mod pool;
pub mod stats;

// Re-export main types
pub use arena::SlabArena;
pub use buffer::Buffer;
pub use config::{BufferPoolConfig, BufferPoolConfigBuilder, SizeClass};
pub use pool::BufferPool;
pub use stats::{AtomicBufferPoolStats, BufferPoolStats};
