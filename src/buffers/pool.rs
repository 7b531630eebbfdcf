//! Bounded buffer pool shared by every session and workload

use std::{
    sync::{Arc, Condvar, Mutex},
    time::Instant,
};

use crate::{
    error::{EnsError, Result},
    sync::{CondvarExt, MutexExt},
};

use super::{
    arena::SlabArena,
    buffer::Buffer,
    config::BufferPoolConfig,
    stats::{AtomicBufferPoolStats, BufferPoolStats},
};

/// Pool of pre-mapped buffers, one arena per size class.
///
/// Cloning is cheap and yields another handle to the same pool.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
pub(crate) struct PoolInner {
    config: BufferPoolConfig,
    /// Ordered by ascending block size
    arenas: Vec<SlabArena>,
    stats: AtomicBufferPoolStats,
    /// Release generation, bumped whenever a block returns
    releases: Mutex<u64>,
    released: Condvar,
}

impl PoolInner {
    pub(super) fn arena(&self, class: usize) -> &SlabArena {
        &self.arenas[class]
    }

    pub(super) fn release(&self, class: usize, index: u32) {
        if self.arenas[class].release(index) {
            self.stats.record_release();
            self.wake_waiters();
        } else {
            self.stats.record_violation();
            log::error!(
                "pool '{}': block {} of class {} released twice",
                self.config.name,
                index,
                class
            );
        }
    }

    fn wake_waiters(&self) {
        if self.config.allocation_timeout.is_some() {
            *self.releases.lock_unpoisoned() += 1;
            self.released.notify_all();
        }
    }
}

impl BufferPool {
    /// Create a new buffer pool
    pub fn new(config: BufferPoolConfig) -> Result<Self> {
        config.validate()?;

        let mut classes = config.size_classes.clone();
        classes.sort_by_key(|class| class.block_size);

        let arenas = classes
            .iter()
            .map(|class| SlabArena::new(config.aligned_block_size(class.block_size), class.block_count))
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "buffer pool '{}' mapped {} buffers in {} classes ({} bytes)",
            config.name,
            config.total_buffers(),
            arenas.len(),
            config.total_memory_required()
        );

        let stats = AtomicBufferPoolStats::new(config.total_buffers());

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                arenas,
                stats,
                releases: Mutex::new(0),
                released: Condvar::new(),
            }),
        })
    }

    /// Allocate a buffer with a payload of `length` bytes.
    ///
    /// Takes the smallest size class that fits, falling back to larger
    /// classes when it is exhausted. Fails with `PoolExhausted` once nothing
    /// fits, after waiting at most `allocation_timeout`.
    pub fn alloc(&self, length: usize) -> Result<Buffer> {
        let max = self.max_block_size();
        if length > max {
            self.inner.stats.record_failure();
            return Err(EnsError::buffer_too_large(length, max));
        }

        let deadline = self
            .inner
            .config
            .allocation_timeout
            .map(|timeout| Instant::now() + timeout);

        loop {
            let generation = *self.inner.releases.lock_unpoisoned();

            if let Some(buffer) = self.try_alloc(length) {
                return Ok(buffer);
            }

            let Some(deadline) = deadline else { break };

            let mut guard = self.inner.releases.lock_unpoisoned();
            let mut expired = false;
            while *guard == generation {
                let now = Instant::now();
                if now >= deadline {
                    expired = true;
                    break;
                }
                guard = self
                    .inner
                    .released
                    .wait_timeout_unpoisoned(guard, deadline - now)
                    .0;
            }
            if expired {
                break;
            }
        }

        self.inner.stats.record_failure();
        Err(EnsError::pool_exhausted(
            length,
            self.inner.stats.in_use(),
            self.capacity(),
        ))
    }

    /// Allocate a buffer holding a copy of `data`
    pub fn alloc_from(&self, data: &[u8]) -> Result<Buffer> {
        let mut buffer = self.alloc(data.len())?;
        buffer.fill_from(data)?;
        Ok(buffer)
    }

    /// Return a buffer to the pool
    pub fn free(&self, buffer: Buffer) {
        if !buffer.belongs_to(&self.inner) {
            log::warn!(
                "pool '{}': freeing a buffer owned by another pool",
                self.inner.config.name
            );
        }
        drop(buffer);
    }

    /// Take ownership of a buffer handed out with `Buffer::into_raw_parts`.
    ///
    /// Rejects pointers that are not block starts of this pool, blocks that
    /// are not currently on the C side, and lengths beyond the block size.
    pub fn from_raw(&self, ptr: *mut u8, len: usize) -> Result<Buffer> {
        let (class, index) = self.locate(ptr)?;
        let block_size = self.inner.arenas[class].block_size();
        if len > block_size {
            self.inner.stats.record_violation();
            return Err(EnsError::buffer_too_large(len, block_size));
        }

        if !self.inner.arenas[class].reclaim_raw(index) {
            self.inner.stats.record_violation();
            return Err(EnsError::invalid_buffer(format!(
                "buffer {:p} is not held by the workload (freed or already handed over)",
                ptr
            )));
        }

        Ok(Buffer::new(self.adopt_raw_reference(), class, index, len))
    }

    /// Free a buffer the C side holds as a raw pointer
    pub fn free_raw(&self, ptr: *mut u8) -> Result<()> {
        let (class, index) = self.locate(ptr)?;
        if !self.inner.arenas[class].free_raw(index) {
            self.inner.stats.record_violation();
            return Err(EnsError::invalid_buffer(format!(
                "double free or runtime-owned buffer {:p}",
                ptr
            )));
        }

        drop(self.adopt_raw_reference());
        self.inner.stats.record_release();
        self.inner.wake_waiters();
        Ok(())
    }

    /// Whether `buffer` was allocated from this pool
    pub fn owns(&self, buffer: &Buffer) -> bool {
        buffer.belongs_to(&self.inner)
    }

    /// Get current statistics
    pub fn stats(&self) -> BufferPoolStats {
        self.inner.stats.snapshot()
    }

    /// Get pool configuration
    pub fn config(&self) -> &BufferPoolConfig {
        &self.inner.config
    }

    /// Total number of buffers
    pub fn capacity(&self) -> usize {
        self.inner.stats.snapshot().capacity
    }

    /// Number of buffers not currently owned by anyone
    pub fn available(&self) -> usize {
        self.inner.arenas.iter().map(SlabArena::free_count).sum()
    }

    /// Largest payload a single buffer can carry
    pub fn max_block_size(&self) -> usize {
        self.inner
            .arenas
            .last()
            .map(SlabArena::block_size)
            .unwrap_or(0)
    }

    /// Take back the pool reference a block carried while raw.
    ///
    /// Only call after the block left the raw state, which happens once per
    /// `Buffer::into_raw_parts`.
    fn adopt_raw_reference(&self) -> Arc<PoolInner> {
        // SAFETY: `into_raw_parts` leaked one strong count of this Arc for the
        // block, and the state transition just observed hands it to us alone
        unsafe { Arc::from_raw(Arc::as_ptr(&self.inner)) }
    }

    fn try_alloc(&self, length: usize) -> Option<Buffer> {
        for (class, arena) in self.inner.arenas.iter().enumerate() {
            if arena.block_size() < length {
                continue;
            }
            if let Some(index) = arena.acquire() {
                self.inner.stats.record_allocation();
                return Some(Buffer::new(Arc::clone(&self.inner), class, index, length));
            }
        }
        None
    }

    fn locate(&self, ptr: *mut u8) -> Result<(usize, u32)> {
        if ptr.is_null() {
            return Err(EnsError::invalid_buffer("null buffer pointer"));
        }

        self.inner
            .arenas
            .iter()
            .enumerate()
            .find_map(|(class, arena)| arena.index_of(ptr).map(|index| (class, index)))
            .ok_or_else(|| {
                self.inner.stats.record_violation();
                EnsError::invalid_buffer(format!("pointer {:p} was not allocated by this pool", ptr))
            })
    }
}
