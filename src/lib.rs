//! # ENS Runtime - Session and Event Runtime for Workloads
//!
//! Workloads publish event functions on named interfaces, start sessions to
//! other workloads' interfaces and exchange data over them with blocking
//! request/response or fire-and-forget notify transfers. All payloads live
//! in a bounded pool of pre-mapped buffers whose ownership moves between
//! the runtime and the workload without copying.
//!
//! ## Features
//!
//! - **Buffer pool**: size-classed arenas over anonymous mappings, bounded capacity
//! - **Session table**: linked endpoint pairs with strict lifecycle ordering
//! - **Dispatch engine**: elastic worker pool that grows past blocked requesters
//! - **Transactions**: request/response matching by session and sequence number
//! - **C API**: the `ENSSession*` functions for C and C++ workloads
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                    Runtime                      │
//! ├─────────────────────────────────────────────────┤
//! │  Interface registry  │  Session table           │
//! │  Transaction tracker │  Dispatch engine         │
//! ├─────────────────────────────────────────────────┤
//! │                  Buffer pool                    │
//! └─────────────────────────────────────────────────┘
//!           │                         │
//!           ▼                         ▼
//! ┌─────────────────┐    ┌─────────────────────────┐
//! │   C API Layer   │    │     Rust Native API     │
//! │   (ENSSession*) │    │   (Runtime, Buffer)     │
//! └─────────────────┘    └─────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use ens_runtime::{Event, EventType, Runtime, RuntimeConfig};
//!
//! # fn main() -> ens_runtime::Result<()> {
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//!
//! // Echo notifies back on the same session, answer requests unchanged
//! runtime.register_interface("latency.responder", |rt: &Runtime, event: &mut Event| {
//!     if event.kind == EventType::Notify {
//!         if let Some(data) = event.take_data() {
//!             if let Err(e) = rt.notify(event.session_id, event.sqn, data) {
//!                 log::warn!("echo on session {} failed: {}", event.session_id, e);
//!             }
//!         }
//!     }
//! })?;
//!
//! let session = runtime.session_start("latency.responder", None)?;
//! let response = runtime.request(session, 1, runtime.alloc_from(b"ping")?)?;
//! assert_eq!(response.as_ref().map(|b| b.as_slice()), Some(&b"ping"[..]));
//! runtime.session_end(session)?;
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod error;
pub mod buffers;
pub mod sessions;
pub mod dispatch;
pub mod transactions;
pub mod runtime;

// Lock helpers
pub(crate) mod sync;

#[cfg(feature = "c-api")]
pub mod ffi;

// Main API re-exports
pub use error::{EnsError, Result};
pub use buffers::{Buffer, BufferPool, BufferPoolConfig, BufferPoolConfigBuilder, BufferPoolStats, SizeClass};
pub use sessions::{AbortReason, Direction, Session, SessionId, SessionState, SessionStats, Termination};
pub use dispatch::{BlockingGuard, DispatchConfig, DispatchStats, Event, EventHandler, EventType, Sqn};
pub use transactions::TransactionStats;
pub use runtime::{Runtime, RuntimeConfig, RuntimeConfigBuilder, RuntimeStats};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 2;
pub const VERSION_PATCH: u32 = 0;
