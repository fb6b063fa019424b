//! TLAB - Thread-Local Allocation Buffer
//!
//! A TLAB is a whole region checked out by one mutator thread. While the
//! thread holds it, the region's `top` sits at `end` and the thread bumps its
//! own cursor without touching the region lock. Revocation writes the real
//! usage back into the region.
//!
//! ## How it works
//!
//! 1. Thread asks the space for a TLAB (`alloc_new_tlab`)
//! 2. Thread allocates from its buffer (bump pointer, no shared state)
//! 3. Buffer full: thread asks for a new one, revoking the old
//! 4. Collection or thread exit: buffer revoked back to its region

use crate::util::Alignment;

/// Tlab - bounds and counters of one thread's allocation buffer
///
/// An inactive buffer has all bounds at zero and refuses every allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlab {
    /// Index of the backing region, `None` when inactive
    region: Option<usize>,

    /// Buffer start (the region's begin)
    start: usize,

    /// Bump pointer
    pos: usize,

    /// Buffer end (the region's end)
    end: usize,

    /// Objects allocated from this buffer
    objects: usize,
}

impl Tlab {
    /// Create an active buffer over `[start, end)` backed by `region`
    pub fn new(region: usize, start: usize, end: usize) -> Self {
        debug_assert!(start < end);
        Self {
            region: Some(region),
            start,
            pos: start,
            end,
            objects: 0,
        }
    }

    /// Bump-allocate from the buffer
    ///
    /// # Arguments
    /// * `size` - Requested size, rounded up to `alignment`
    /// * `alignment` - Power-of-two alignment of the returned address
    ///
    /// # Returns
    /// * `Some(addr)` - Start of the new object
    /// * `None` - Buffer inactive or exhausted
    #[inline]
    pub fn alloc(&mut self, size: usize, alignment: usize) -> Option<usize> {
        self.region?;
        let size = Alignment::checked_align_up(size, alignment)?;
        let addr = Alignment::checked_align_up(self.pos, alignment)?;
        let new_pos = addr.checked_add(size)?;
        if new_pos > self.end {
            return None;
        }
        self.pos = new_pos;
        self.objects += 1;
        Some(addr)
    }

    /// Check if the buffer is backed by a region
    pub fn is_active(&self) -> bool {
        self.region.is_some()
    }

    /// Backing region index
    pub fn region(&self) -> Option<usize> {
        self.region
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Bytes consumed so far
    pub fn bytes_used(&self) -> usize {
        self.pos - self.start
    }

    /// Bytes still available
    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    /// Objects allocated so far
    pub fn objects(&self) -> usize {
        self.objects
    }

    /// Deactivate the buffer, returning its final state
    pub fn take(&mut self) -> Tlab {
        std::mem::take(self)
    }
}
