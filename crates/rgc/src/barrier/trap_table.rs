//! Region Trap Table - Byte-per-Granule Read-Barrier Table
//!
//! One byte per `granularity` bytes of the covered range. A set byte means a
//! reference into that granule must take the read barrier's slow path.

use crate::barrier::ReadBarrierTable;
use std::sync::atomic::{AtomicU8, Ordering};

/// RegionTrapTable - default [`ReadBarrierTable`] implementation
pub struct RegionTrapTable {
    /// One entry per granule
    entries: Box<[AtomicU8]>,

    /// First covered address
    begin: usize,

    /// Bytes per entry
    granularity: usize,
}

impl RegionTrapTable {
    /// Create a cleared table covering `[begin, begin + capacity)`
    ///
    /// # Arguments
    /// * `begin` - First covered address
    /// * `capacity` - Covered bytes
    /// * `granularity` - Bytes per entry, normally the region size
    pub fn new(begin: usize, capacity: usize, granularity: usize) -> Self {
        debug_assert!(granularity.is_power_of_two());
        let count = capacity.div_ceil(granularity);
        Self {
            entries: (0..count).map(|_| AtomicU8::new(0)).collect(),
            begin,
            granularity,
        }
    }

    /// Check whether references into `addr` trap
    pub fn is_set(&self, addr: usize) -> bool {
        match self.entry_index(addr) {
            Some(index) => self.entries[index].load(Ordering::Acquire) != 0,
            None => false,
        }
    }

    /// Number of set entries
    pub fn count_set(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.load(Ordering::Relaxed) != 0)
            .count()
    }

    fn entry_index(&self, addr: usize) -> Option<usize> {
        if addr < self.begin {
            return None;
        }
        let index = (addr - self.begin) / self.granularity;
        (index < self.entries.len()).then_some(index)
    }
}

impl ReadBarrierTable for RegionTrapTable {
    fn set_all(&self) {
        for entry in self.entries.iter() {
            entry.store(1, Ordering::Release);
        }
    }

    fn clear_range(&self, begin: usize, end: usize) {
        let begin = begin.max(self.begin);
        if begin >= end {
            return;
        }
        let first = (begin - self.begin) / self.granularity;
        let last = ((end - self.begin).div_ceil(self.granularity)).min(self.entries.len());
        for entry in self.entries.iter().take(last).skip(first) {
            entry.store(0, Ordering::Release);
        }
    }

    fn is_all_cleared(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.load(Ordering::Acquire) == 0)
    }
}
