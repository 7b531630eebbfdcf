//! Transaction statistics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time transaction statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionStats {
    /// Requests waiting for a response
    pub pending: usize,
    /// Requests accepted for delivery
    pub requests_sent: u64,
    /// Responses handed to a waiting requester
    pub responses_matched: u64,
    /// Requests that failed (send error, session end, responder panic)
    pub requests_failed: u64,
    /// Requests whose wait expired
    pub requests_timed_out: u64,
    /// Responses that arrived after their requester gave up
    pub orphaned_responses: u64,
    /// Requests refused because the sqn was still pending
    pub sequence_conflicts: u64,
    /// Notifies accepted for delivery
    pub notifies_sent: u64,
}

impl TransactionStats {
    /// Share of sent requests that got a response (0.0 to 1.0)
    pub fn completion_rate(&self) -> f64 {
        if self.requests_sent == 0 {
            return 1.0;
        }
        self.responses_matched as f64 / self.requests_sent as f64
    }
}

#[derive(Debug, Default)]
pub struct AtomicTransactionStats {
    requests_sent: AtomicU64,
    responses_matched: AtomicU64,
    requests_failed: AtomicU64,
    requests_timed_out: AtomicU64,
    orphaned_responses: AtomicU64,
    sequence_conflicts: AtomicU64,
    notifies_sent: AtomicU64,
}

impl AtomicTransactionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self) {
        self.responses_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.requests_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orphan(&self) {
        self.orphaned_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.sequence_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notify(&self) {
        self.notifies_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pending: usize) -> TransactionStats {
        TransactionStats {
            pending,
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            orphaned_responses: self.orphaned_responses.load(Ordering::Relaxed),
            sequence_conflicts: self.sequence_conflicts.load(Ordering::Relaxed),
            notifies_sent: self.notifies_sent.load(Ordering::Relaxed),
        }
    }
}
