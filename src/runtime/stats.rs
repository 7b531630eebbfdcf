//! Aggregated runtime statistics

use serde::{Deserialize, Serialize};

use crate::{
    buffers::BufferPoolStats, dispatch::DispatchStats, sessions::SessionStats,
    transactions::TransactionStats,
};

/// Snapshot of every component of a runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub name: String,
    pub pool: BufferPoolStats,
    pub dispatch: DispatchStats,
    pub sessions: SessionStats,
    pub transactions: TransactionStats,
}

impl RuntimeStats {
    /// Multi-line summary for logs and the CLI
    pub fn summary(&self) -> String {
        format!(
            "runtime '{}'\n  {}\n  {}\n  sessions: {} live endpoints, {} started, {} ended, {} disconnected, {} aborted\n  \
             transactions: {} pending, {} sent, {} matched, {} failed, {} timed out, {} orphaned, {} notifies",
            self.name,
            self.pool.summary(),
            self.dispatch.summary(),
            self.sessions.active_endpoints,
            self.sessions.sessions_started,
            self.sessions.endpoints_ended,
            self.sessions.endpoints_disconnected,
            self.sessions.sessions_aborted,
            self.transactions.pending,
            self.transactions.requests_sent,
            self.transactions.responses_matched,
            self.transactions.requests_failed,
            self.transactions.requests_timed_out,
            self.transactions.orphaned_responses,
            self.transactions.notifies_sent
        )
    }
}
