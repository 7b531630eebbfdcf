//! Session table statistics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time session statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Endpoints currently in the table (two per session)
    pub active_endpoints: usize,
    /// Sessions started
    pub sessions_started: u64,
    /// Endpoints closed with SESSION_END
    pub endpoints_ended: u64,
    /// Endpoints closed with SESSION_DISCONNECT
    pub endpoints_disconnected: u64,
    /// Sessions closed through the deprecated abort call
    pub sessions_aborted: u64,
    /// Session starts that failed
    pub start_failures: u64,
}

#[derive(Debug, Default)]
pub struct AtomicSessionStats {
    sessions_started: AtomicU64,
    endpoints_ended: AtomicU64,
    endpoints_disconnected: AtomicU64,
    sessions_aborted: AtomicU64,
    start_failures: AtomicU64,
}

impl AtomicSessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_start(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_end(&self) {
        self.endpoints_ended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.endpoints_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.sessions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_start_failure(&self) {
        self.start_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_endpoints: usize) -> SessionStats {
        SessionStats {
            active_endpoints,
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            endpoints_ended: self.endpoints_ended.load(Ordering::Relaxed),
            endpoints_disconnected: self.endpoints_disconnected.load(Ordering::Relaxed),
            sessions_aborted: self.sessions_aborted.load(Ordering::Relaxed),
            start_failures: self.start_failures.load(Ordering::Relaxed),
        }
    }
}
