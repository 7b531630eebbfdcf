//! Fixed-size block arena backing one size class of the buffer pool

use std::{
    ptr::NonNull,
    sync::{
        atomic::{AtomicU8, Ordering},
        Mutex,
    },
};

use memmap2::MmapMut;

use crate::{
    error::{EnsError, Result},
    sync::MutexExt,
};

/// Block is on the free list
pub(crate) const BLOCK_FREE: u8 = 0;
/// Block is owned by a live `Buffer` value
pub(crate) const BLOCK_HELD: u8 = 1;
/// Block was handed across the C boundary as a raw pointer
pub(crate) const BLOCK_RAW: u8 = 2;

/// Arena of equally sized blocks over an anonymous memory mapping.
///
/// Every block carries an ownership state so that raw pointers coming back
/// from C can be checked before the runtime touches them.
#[derive(Debug)]
pub struct SlabArena {
    /// Keeps the mapping alive; all access goes through `base`
    _map: MmapMut,
    base: NonNull<u8>,
    block_size: usize,
    block_count: usize,
    /// Free block indices, popped from the back
    free: Mutex<Vec<u32>>,
    states: Box<[AtomicU8]>,
}

impl SlabArena {
    /// Map `block_count` blocks of `block_size` bytes
    pub fn new(block_size: usize, block_count: usize) -> Result<Self> {
        if block_size == 0 || block_count == 0 {
            return Err(EnsError::invalid_parameter(
                "block_size",
                "Arena needs a non-zero block size and count",
            ));
        }

        let total = block_size.checked_mul(block_count).ok_or_else(|| {
            EnsError::invalid_parameter("block_count", "Arena size overflows usize")
        })?;

        let mut map = MmapMut::map_anon(total)
            .map_err(|e| EnsError::platform(e, "Failed to map buffer arena"))?;
        let base = NonNull::new(map.as_mut_ptr())
            .ok_or_else(|| EnsError::invalid_buffer("Arena mapping returned a null base"))?;

        // Lowest indices are handed out first
        let free = (0..block_count as u32).rev().collect();
        let states = (0..block_count).map(|_| AtomicU8::new(BLOCK_FREE)).collect();

        Ok(Self {
            _map: map,
            base,
            block_size,
            block_count,
            free: Mutex::new(free),
            states,
        })
    }

    /// Take a free block, marking it held
    pub fn acquire(&self) -> Option<u32> {
        let index = self.free.lock_unpoisoned().pop()?;
        self.states[index as usize].store(BLOCK_HELD, Ordering::Release);
        Some(index)
    }

    /// Return a held block to the free list
    pub fn release(&self, index: u32) -> bool {
        if !self.transition(index, BLOCK_HELD, BLOCK_FREE) {
            return false;
        }
        self.free.lock_unpoisoned().push(index);
        true
    }

    /// Hand a held block to the C side
    pub fn mark_raw(&self, index: u32) -> bool {
        self.transition(index, BLOCK_HELD, BLOCK_RAW)
    }

    /// Take a raw block back from the C side
    pub fn reclaim_raw(&self, index: u32) -> bool {
        self.transition(index, BLOCK_RAW, BLOCK_HELD)
    }

    /// Free a raw block directly from the C side
    pub fn free_raw(&self, index: u32) -> bool {
        if !self.transition(index, BLOCK_RAW, BLOCK_FREE) {
            return false;
        }
        self.free.lock_unpoisoned().push(index);
        true
    }

    /// Pointer to the start of a block
    pub fn block_ptr(&self, index: u32) -> NonNull<u8> {
        debug_assert!((index as usize) < self.block_count);
        // SAFETY: index is within the mapping, so the offset stays in bounds
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index as usize * self.block_size)) }
    }

    /// Map a pointer back to its block index, if it is the start of one of ours
    pub fn index_of(&self, ptr: *const u8) -> Option<u32> {
        let addr = ptr as usize;
        let base = self.base.as_ptr() as usize;
        let end = base + self.block_size * self.block_count;
        if addr < base || addr >= end {
            return None;
        }
        let offset = addr - base;
        if offset % self.block_size != 0 {
            return None;
        }
        Some((offset / self.block_size) as u32)
    }

    /// Current ownership state of a block
    pub fn state(&self, index: u32) -> u8 {
        self.states[index as usize].load(Ordering::Acquire)
    }

    /// Size of each block
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks in the arena
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Number of blocks on the free list
    pub fn free_count(&self) -> usize {
        self.free.lock_unpoisoned().len()
    }

    fn transition(&self, index: u32, from: u8, to: u8) -> bool {
        match self.states.get(index as usize) {
            Some(state) => state
                .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            None => false,
        }
    }
}

// SAFETY: the mapping is owned by the arena and block access is serialised by
// the ownership states; the raw base pointer is never handed out unguarded.
unsafe impl Send for SlabArena {}
unsafe impl Sync for SlabArena {}
