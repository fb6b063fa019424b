//! Region Table - Locked Bookkeeping of Every Region
//!
//! The table is what the region lock protects: the region array, the
//! current and evacuation region selection, the non-free counter and the
//! epoch. Every method assumes the caller holds the lock (it takes
//! `&mut self` through the `parking_lot::MutexGuard`).
//!
//! Invariant violations found here are fatal: the full table is logged at
//! error level and the process panics. They indicate corruption that no
//! caller can recover from.

use crate::heap::region::{IllegalTransition, Region, RegionState};
use std::fmt;

/// RegionTable - the region array and its counters
pub struct RegionTable {
    /// Space name, for dumps
    name: String,

    /// All regions, contiguous and in address order
    regions: Vec<Region>,

    /// Size of one region
    region_size: usize,

    /// Begin of region 0
    begin: usize,

    /// Regions not Free
    num_non_free_regions: usize,

    /// Epoch, starts at 1
    time: u64,

    /// Region behind the mutator cursor
    current_region: Option<usize>,

    /// Region behind the evacuation cursor
    evac_region: Option<usize>,
}

impl RegionTable {
    /// Create a table of `num_regions` Free regions starting at `begin`
    pub fn new(name: &str, begin: usize, num_regions: usize, region_size: usize) -> Self {
        let regions = (0..num_regions)
            .map(|i| {
                let region_begin = begin + i * region_size;
                Region::new(i, region_begin, region_begin + region_size)
            })
            .collect();

        Self {
            name: name.to_string(),
            regions,
            region_size,
            begin,
            num_non_free_regions: 0,
            time: 1,
            current_region: None,
            evac_region: None,
        }
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn region_size(&self) -> usize {
        self.region_size
    }

    pub fn num_non_free_regions(&self) -> usize {
        self.num_non_free_regions
    }

    /// Current epoch
    pub fn time(&self) -> u64 {
        self.time
    }

    pub(crate) fn advance_time(&mut self) -> u64 {
        self.time += 1;
        self.time
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, index: usize) -> &Region {
        &self.regions[index]
    }

    pub(crate) fn region_mut(&mut self, index: usize) -> &mut Region {
        &mut self.regions[index]
    }

    /// Index of the region containing `addr`
    pub fn index_of(&self, addr: usize) -> Option<usize> {
        if addr < self.begin {
            return None;
        }
        let index = (addr - self.begin) / self.region_size;
        (index < self.regions.len()).then_some(index)
    }

    pub fn current_region(&self) -> Option<usize> {
        self.current_region
    }

    pub fn evac_region(&self) -> Option<usize> {
        self.evac_region
    }

    pub(crate) fn set_current_region(&mut self, index: Option<usize>) {
        self.current_region = index;
    }

    pub(crate) fn set_evac_region(&mut self, index: Option<usize>) {
        self.evac_region = index;
    }

    /// Check the evacuation reserve still holds after `extra` more regions
    ///
    /// Mutators may never take more than half the regions, so copying can
    /// always find room for survivors.
    pub fn reserve_allows(&self, extra: usize) -> bool {
        (self.num_non_free_regions + extra) * 2 <= self.regions.len()
    }

    /// Lowest-indexed Free region
    pub fn find_free_region(&self) -> Option<usize> {
        self.regions.iter().position(Region::is_free)
    }

    /// Start of the lowest run of `count` contiguous Free regions
    pub fn find_free_run(&self, count: usize) -> Option<usize> {
        if count == 0 || count > self.regions.len() {
            return None;
        }
        let mut left = 0;
        while left + count <= self.regions.len() {
            match self.regions[left..left + count]
                .iter()
                .position(|r| !r.is_free())
            {
                None => return Some(left),
                Some(offset) => left += offset + 1,
            }
        }
        None
    }

    /// Length of the longest run of Free regions
    pub fn largest_free_run(&self) -> usize {
        let mut longest = 0;
        let mut run = 0;
        for region in &self.regions {
            if region.is_free() {
                run += 1;
                longest = longest.max(run);
            } else {
                run = 0;
            }
        }
        longest
    }

    /// Free → Allocated/ToSpace at the current epoch
    pub(crate) fn unfree(&mut self, index: usize) {
        let time = self.time;
        let result = self.regions[index].unfree(time);
        self.check(result);
        self.num_non_free_regions += 1;
    }

    /// Claim `[head, head + 1 + tails)` for one object of `object_size` bytes
    pub(crate) fn unfree_large(&mut self, head: usize, object_size: usize, tail_count: usize) {
        let time = self.time;
        let result = self.regions[head].unfree_large(time, object_size, tail_count);
        self.check(result);

        let mut remaining = object_size.saturating_sub(self.region_size);
        for index in head + 1..=head + tail_count {
            let covered = remaining.min(self.region_size);
            let result = self.regions[index].unfree_large_tail(time, covered);
            self.check(result);
            remaining -= covered;
        }
        self.num_non_free_regions += 1 + tail_count;
    }

    /// Return a region to Free
    pub(crate) fn clear_region(&mut self, index: usize) {
        if self.regions[index].is_free() {
            self.fatal(&format!("region {} cleared twice", index));
        }
        self.regions[index].clear();
        self.num_non_free_regions -= 1;
    }

    /// Return every region to Free
    pub(crate) fn clear_all(&mut self) {
        for region in &mut self.regions {
            region.clear();
        }
        self.num_non_free_regions = 0;
        self.current_region = None;
        self.evac_region = None;
    }

    /// Abort on an illegal transition
    pub(crate) fn check(&self, result: std::result::Result<(), IllegalTransition>) {
        if let Err(err) = result {
            self.fatal(&err.to_string());
        }
    }

    /// Log the whole table at error level and panic with `message`
    pub fn fatal(&self, message: &str) -> ! {
        let mut dump = String::new();
        // Writing into a String cannot fail
        let _ = self.dump_regions(&mut dump);
        log::error!("{}: {}\n{}", self.name, message, dump);
        panic!("{}: {}", self.name, message);
    }

    /// Write one line per region
    pub fn dump_regions(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for region in &self.regions {
            writeln!(out, "{}", region)?;
        }
        Ok(())
    }

    /// Write one line per non-free region
    pub fn dump_non_free_regions(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for region in self.regions.iter().filter(|r| !r.is_free()) {
            writeln!(out, "{}", region)?;
        }
        Ok(())
    }

    /// Check the structural invariants of the table
    ///
    /// # Returns
    /// * `Ok(())` - Every invariant holds
    /// * `Err(message)` - Description of the first violation
    pub fn verify(&self) -> std::result::Result<(), String> {
        let mut non_free = 0;
        let mut expected_tails = 0usize;
        let mut head_space = None;

        for (i, region) in self.regions.iter().enumerate() {
            if region.index() != i {
                return Err(format!("region {} stored at index {}", region.index(), i));
            }
            let expected_begin = self.begin + i * self.region_size;
            if region.begin() != expected_begin || region.len() != self.region_size {
                return Err(format!("region {} has bounds {:#x}-{:#x}", i, region.begin(), region.end()));
            }
            if region.top() < region.begin() || region.top() > region.end() {
                return Err(format!("region {} top {:#x} out of bounds", i, region.top()));
            }
            if !region.is_free() {
                non_free += 1;
            }

            match region.state() {
                RegionState::LargeTail { space } => {
                    if expected_tails == 0 {
                        return Err(format!("orphan large tail at region {}", i));
                    }
                    if Some(space) != head_space {
                        return Err(format!("large tail {} disagrees with its head's space", i));
                    }
                    expected_tails -= 1;
                }
                state => {
                    if expected_tails != 0 {
                        return Err(format!("region {} interrupts a large object", i));
                    }
                    if let RegionState::Large {
                        space,
                        object_size,
                        tail_count,
                    } = state
                    {
                        let regions = object_size.div_ceil(self.region_size);
                        if regions != tail_count + 1 {
                            return Err(format!(
                                "large region {} holds {} bytes but has {} tails",
                                i, object_size, tail_count
                            ));
                        }
                        expected_tails = tail_count;
                        head_space = Some(space);
                    }
                }
            }
        }

        if expected_tails != 0 {
            return Err("large object runs past the last region".to_string());
        }
        if non_free != self.num_non_free_regions {
            return Err(format!(
                "non-free counter {} but {} regions are not free",
                self.num_non_free_regions, non_free
            ));
        }
        Ok(())
    }
}
