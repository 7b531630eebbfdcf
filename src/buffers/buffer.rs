//! Move-only handle to a pooled buffer

use std::{fmt, mem::ManuallyDrop, ptr, slice, sync::Arc};

use crate::error::{EnsError, Result};

use super::pool::PoolInner;

/// A buffer borrowed from the runtime pool.
///
/// `Buffer` is the single owner of its block: moving it into `notify` or
/// `request` hands ownership to the runtime, receiving it in an event hands
/// ownership to the workload. Dropping it returns the block to the pool.
pub struct Buffer {
    pool: Arc<PoolInner>,
    class: usize,
    index: u32,
    len: usize,
}

impl Buffer {
    pub(super) fn new(pool: Arc<PoolInner>, class: usize, index: u32, len: usize) -> Self {
        Self {
            pool,
            class,
            index,
            len,
        }
    }

    /// Length of the payload in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the underlying block
    pub fn capacity(&self) -> usize {
        self.pool.arena(self.class).block_size()
    }

    /// Raw pointer to the payload
    pub fn as_ptr(&self) -> *const u8 {
        self.data_ptr()
    }

    /// Payload as a byte slice
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the block is owned by this handle and len <= capacity
        unsafe { slice::from_raw_parts(self.data_ptr(), self.len) }
    }

    /// Payload as a mutable byte slice
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access
        unsafe { slice::from_raw_parts_mut(self.data_ptr(), self.len) }
    }

    /// Change the payload length without touching the bytes
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        let capacity = self.capacity();
        if len > capacity {
            return Err(EnsError::buffer_too_large(len, capacity));
        }
        self.len = len;
        Ok(())
    }

    /// Write `data` at `offset`, growing the payload if needed
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let capacity = self.capacity();
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= capacity)
            .ok_or_else(|| EnsError::buffer_too_large(offset.saturating_add(data.len()), capacity))?;

        // SAFETY: end <= capacity and the source cannot alias a block we own exclusively
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.data_ptr().add(offset), data.len());
        }

        if end > self.len {
            self.len = end;
        }
        Ok(())
    }

    /// Replace the payload with `data`
    pub fn fill_from(&mut self, data: &[u8]) -> Result<()> {
        self.write(0, data)?;
        self.len = data.len();
        Ok(())
    }

    /// Drop the payload, keeping the block
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Whether this buffer came from the pool behind `pool`
    pub(crate) fn belongs_to(&self, pool: &Arc<PoolInner>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    /// Hand the block across the C boundary.
    ///
    /// The returned pointer stays valid until it is passed back through
    /// `BufferPool::from_raw` or released with `BufferPool::free_raw`, even
    /// if every pool handle is dropped in between: the raw block keeps its
    /// pool reference.
    pub fn into_raw_parts(self) -> (*mut u8, usize) {
        // The pool reference is not dropped; the pool takes it back when
        // the block leaves the raw state
        let this = ManuallyDrop::new(self);
        let marked = this.pool.arena(this.class).mark_raw(this.index);
        debug_assert!(marked, "live Buffer must be in the held state");
        (this.data_ptr(), this.len)
    }

    fn data_ptr(&self) -> *mut u8 {
        self.pool.arena(self.class).block_ptr(self.index).as_ptr()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.pool.release(self.class, self.index);
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("class", &self.class)
            .field("index", &self.index)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for Buffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}
