//! Blocking request/response transactions
//!
//! A request parks its caller on a per-transaction condition variable until
//! the responder's event function returns, the session ends, or the
//! configured timeout expires.

pub mod pending;
pub mod stats;
pub mod tracker;

// Re-export main types
pub use pending::{Outcome, PendingTransaction};
pub use stats::{AtomicTransactionStats, TransactionStats};
pub use tracker::TransactionTracker;
