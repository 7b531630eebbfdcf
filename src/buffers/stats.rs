//! Buffer pool statistics tracking

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time statistics for a buffer pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferPoolStats {
    /// Number of buffers the pool can hand out
    pub capacity: usize,
    /// Number of buffers currently owned by the runtime or a workload
    pub currently_in_use: usize,
    /// Peak number of buffers in use simultaneously
    pub peak_usage: usize,
    /// Successful allocations
    pub total_allocations: u64,
    /// Buffers returned to the pool
    pub total_releases: u64,
    /// Allocation requests that failed
    pub allocation_failures: u64,
    /// Rejected raw-pointer operations (double free, foreign pointer)
    pub ownership_violations: u64,
}

impl BufferPoolStats {
    /// Allocation success rate (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        let attempts = self.total_allocations + self.allocation_failures;
        if attempts == 0 {
            return 1.0;
        }
        self.total_allocations as f64 / attempts as f64
    }

    /// Pool utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.currently_in_use as f64 / self.capacity as f64
    }

    /// Buffers that can still be allocated
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.currently_in_use)
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "BufferPoolStats {{ capacity: {}, in_use: {}, peak: {}, allocations: {}, \
             releases: {}, failures: {}, violations: {}, utilization: {:.2}% }}",
            self.capacity,
            self.currently_in_use,
            self.peak_usage,
            self.total_allocations,
            self.total_releases,
            self.allocation_failures,
            self.ownership_violations,
            self.utilization() * 100.0
        )
    }
}

/// Thread-safe statistics for buffer pools
#[derive(Debug)]
pub struct AtomicBufferPoolStats {
    capacity: usize,
    currently_in_use: AtomicUsize,
    peak_usage: AtomicUsize,
    total_allocations: AtomicU64,
    total_releases: AtomicU64,
    allocation_failures: AtomicU64,
    ownership_violations: AtomicU64,
}

impl AtomicBufferPoolStats {
    /// Create new atomic statistics for a pool of `capacity` buffers
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            currently_in_use: AtomicUsize::new(0),
            peak_usage: AtomicUsize::new(0),
            total_allocations: AtomicU64::new(0),
            total_releases: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
            ownership_violations: AtomicU64::new(0),
        }
    }

    /// Record a successful allocation
    pub fn record_allocation(&self) {
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        let in_use = self.currently_in_use.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_usage.fetch_max(in_use, Ordering::Relaxed);
    }

    /// Record a buffer returning to the pool
    pub fn record_release(&self) {
        self.total_releases.fetch_add(1, Ordering::Relaxed);
        self.currently_in_use.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an allocation failure
    pub fn record_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected raw-pointer operation
    pub fn record_violation(&self) {
        self.ownership_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Buffers currently outstanding
    pub fn in_use(&self) -> usize {
        self.currently_in_use.load(Ordering::Relaxed)
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> BufferPoolStats {
        BufferPoolStats {
            capacity: self.capacity,
            currently_in_use: self.currently_in_use.load(Ordering::Relaxed),
            peak_usage: self.peak_usage.load(Ordering::Relaxed),
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
            total_releases: self.total_releases.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            ownership_violations: self.ownership_violations.load(Ordering::Relaxed),
        }
    }
}
