//! Dispatch statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time statistics for the dispatch engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Live worker threads
    pub threads: usize,
    /// Workers waiting for a job
    pub idle_threads: usize,
    /// Workers parked in a blocking request
    pub blocked_threads: usize,
    /// Jobs waiting for a worker
    pub queued: usize,
    /// Jobs currently executing
    pub running: usize,
    /// Worker threads started over the pool's lifetime
    pub threads_spawned: u64,
    /// Worker threads that exited
    pub threads_retired: u64,
    /// Data events handed to event functions
    pub events_delivered: u64,
    /// Lifecycle events handed to event functions
    pub lifecycle_delivered: u64,
    /// Events that could not be delivered
    pub delivery_failures: u64,
    /// Jobs the pool refused (queue full or shut down)
    pub jobs_rejected: u64,
    /// Lifecycle or backlog events run on the calling thread after a refusal
    pub inline_runs: u64,
    /// Event functions that panicked
    pub handler_panics: u64,
    /// Workers started because the queue stalled
    pub stall_spawns: u64,
}

impl DispatchStats {
    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "DispatchStats {{ threads: {} (idle {}, blocked {}), queued: {}, delivered: {}, \
             lifecycle: {}, failures: {}, rejected: {}, panics: {}, stall spawns: {} }}",
            self.threads,
            self.idle_threads,
            self.blocked_threads,
            self.queued,
            self.events_delivered,
            self.lifecycle_delivered,
            self.delivery_failures,
            self.jobs_rejected,
            self.handler_panics,
            self.stall_spawns
        )
    }
}

/// Thread-safe dispatch counters
#[derive(Debug, Default)]
pub struct AtomicDispatchStats {
    threads_spawned: AtomicU64,
    threads_retired: AtomicU64,
    events_delivered: AtomicU64,
    lifecycle_delivered: AtomicU64,
    delivery_failures: AtomicU64,
    jobs_rejected: AtomicU64,
    inline_runs: AtomicU64,
    handler_panics: AtomicU64,
    stall_spawns: AtomicU64,
}

impl AtomicDispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_spawn(&self) {
        self.threads_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retire(&self) {
        self.threads_retired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lifecycle(&self) {
        self.lifecycle_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inline(&self) {
        self.inline_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stall_spawn(&self) {
        self.stall_spawns.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the counters; live thread figures are filled in by the pool
    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            threads_spawned: self.threads_spawned.load(Ordering::Relaxed),
            threads_retired: self.threads_retired.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            lifecycle_delivered: self.lifecycle_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
            inline_runs: self.inline_runs.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            stall_spawns: self.stall_spawns.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}
