//! Runtime facade tying the pool, sessions, dispatch and transactions together

pub mod config;
pub mod manager;
pub mod stats;

// Re-export main types
pub use config::{RuntimeConfig, RuntimeConfigBuilder, DEFAULT_REQUEST_TIMEOUT};
pub use manager::Runtime;
pub use stats::RuntimeStats;
