//! Region Cursor - Lock-Free Bump Pointer Into the Current Region
//!
//! The current and evacuation regions are published through a cursor so the
//! common allocation path never takes the region lock. One `AtomicU64` packs
//! the region index and the offset of its top:
//!
//! ```text
//!  63            32 31             0
//! ┌────────────────┬────────────────┐
//! │  region index  │   top offset   │
//! └────────────────┴────────────────┘
//! ```
//!
//! Index `u32::MAX` is the full sentinel: every bump against it fails. The
//! lock holder retires a region by swapping the sentinel in, which hands back
//! the exact final top for the region table.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

const SENTINEL_INDEX: u32 = u32::MAX;
const SEALED: u64 = (SENTINEL_INDEX as u64) << 32;

/// RegionCursor - packed (region, offset) bump pointer
pub struct RegionCursor {
    word: CachePadded<AtomicU64>,
}

impl RegionCursor {
    /// Create a cursor pointing at the full sentinel
    pub fn sealed() -> Self {
        Self {
            word: CachePadded::new(AtomicU64::new(SEALED)),
        }
    }

    #[inline]
    fn pack(index: usize, offset: usize) -> u64 {
        debug_assert!(index < SENTINEL_INDEX as usize);
        debug_assert!(offset <= u32::MAX as usize);
        ((index as u64) << 32) | offset as u64
    }

    #[inline]
    fn unpack(word: u64) -> Option<(usize, usize)> {
        let index = (word >> 32) as u32;
        if index == SENTINEL_INDEX {
            return None;
        }
        Some((index as usize, (word & u32::MAX as u64) as usize))
    }

    /// Bump the cursor by `size` bytes at `alignment`
    ///
    /// # Arguments
    /// * `size` - Bytes to reserve, already rounded to the space alignment
    /// * `alignment` - Power-of-two alignment of the returned offset
    /// * `region_size` - Limit of the offset
    ///
    /// # Returns
    /// * `Some((index, offset))` - Region and in-region offset of the object
    /// * `None` - Sealed, or not enough room in the region
    #[inline]
    pub fn try_bump(
        &self,
        size: usize,
        alignment: usize,
        region_size: usize,
    ) -> Option<(usize, usize)> {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let (index, offset) = Self::unpack(current)?;
            let start = (offset + alignment - 1) & !(alignment - 1);
            let new_offset = start.checked_add(size)?;
            if new_offset > region_size {
                return None;
            }

            match self.word.compare_exchange_weak(
                current,
                Self::pack(index, new_offset),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some((index, start)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Publish `index` with its top at `offset`
    ///
    /// Caller holds the region lock and has sealed the previous region.
    pub fn install(&self, index: usize, offset: usize) {
        self.word.store(Self::pack(index, offset), Ordering::Release);
    }

    /// Swap the sentinel in, returning the retired region and its final top offset
    pub fn seal(&self) -> Option<(usize, usize)> {
        Self::unpack(self.word.swap(SEALED, Ordering::AcqRel))
    }

    /// Region and top offset currently published, without retiring it
    pub fn peek(&self) -> Option<(usize, usize)> {
        Self::unpack(self.word.load(Ordering::Acquire))
    }

    /// Published region index
    pub fn region_index(&self) -> Option<usize> {
        self.peek().map(|(index, _)| index)
    }
}

impl Default for RegionCursor {
    fn default() -> Self {
        Self::sealed()
    }
}
