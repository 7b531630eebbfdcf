//! Event dispatch
//!
//! Event functions run on an elastic worker pool. The engine enforces the
//! per-session lifecycle ordering while letting data events of one session
//! run concurrently.

pub mod config;
pub mod engine;
pub mod event;
pub mod pool;
pub mod stats;

// Re-export main types
pub use config::{DispatchConfig, DEFAULT_STALL_THRESHOLD};
pub use engine::{Completion, Delivery, Dispatcher};
pub use event::{
    Event, EventHandler, EventType, Sqn, EVENT_NOTIFY, EVENT_REQUEST, EVENT_SESSION_DISCONNECT,
    EVENT_SESSION_END, EVENT_SESSION_START,
};
pub use pool::{BlockingGuard, Job, Rejected, WorkerPool};
pub use stats::{AtomicDispatchStats, DispatchStats};
