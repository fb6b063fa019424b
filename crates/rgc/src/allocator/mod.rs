//! Allocator Module - Region Space Allocation Paths
//!
//! All allocation in RGC hands out memory from regions of a `RegionSpace`.
//!
//! ## Allocation Paths
//!
//! - **Shared bump pointer**: lock-free CAS on the current region's cursor,
//!   falling back to the region lock to install a fresh region
//! - **Evacuation bump pointer**: same, on a separate cursor, used by the
//!   copying phase for survivors
//! - **TLAB (Thread-Local Allocation Buffer)**: a whole region owned by one
//!   mutator thread, bump-allocated without any shared state
//! - **Large Object Allocation**: objects above one region take a run of
//!   contiguous regions
//!
//! ## Evacuation Reserve
//!
//! Mutator allocation never takes a region that would leave fewer Free
//! regions than non-free ones. The copying phase relies on that reserve to
//! find room for survivors, so evacuation allocation skips the check.

pub mod cursor;
pub mod tlab;

pub use cursor::RegionCursor;
pub use tlab::Tlab;

use crate::error::{Result, RgcError};
use crate::heap::{RegionSpace, RegionTable};
use crate::logging::SpaceEvent;
use crate::runtime::{MutatorThread, ThreadRegistry};
use crate::util::Alignment;

/// Allocation - memory handed out by the space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Start of the object
    pub addr: usize,

    /// Bytes consumed from the space
    pub bytes_allocated: usize,

    /// Bytes the caller may use
    pub usable_size: usize,
}

impl Allocation {
    fn bump(addr: usize, size: usize) -> Self {
        Self {
            addr,
            bytes_allocated: size,
            usable_size: size,
        }
    }
}

impl RegionSpace {
    /// Allocate memory for a mutator object
    ///
    /// ## Allocation Flow
    ///
    /// 1. Size above one region -> `alloc_large`
    /// 2. CAS on the current region cursor (fast path)
    /// 3. Take the region lock, retry the cursor
    /// 4. Install a Free region as current, subject to the evacuation reserve
    ///
    /// # Arguments
    /// * `size` - Object size in bytes
    /// * `alignment` - Power-of-two alignment (raised to the space alignment)
    ///
    /// # Returns
    /// * `Ok(Allocation)` - Zeroed memory inside the space
    /// * `Err(RgcError::OutOfMemory)` - No region may be handed out
    /// * `Err(RgcError::InvalidArgument)` - Zero size or bad alignment
    pub fn alloc(&self, size: usize, alignment: usize) -> Result<Allocation> {
        let (size, alignment) = self.check_request(size, alignment)?;
        if size > self.config.region_size {
            return self.alloc_large_internal(size, false);
        }
        self.alloc_shared(size, alignment, false)
    }

    /// Allocate room for a survivor during the copying phase
    ///
    /// Skips the evacuation reserve and never marks regions newly allocated.
    pub fn alloc_for_evacuation(&self, size: usize, alignment: usize) -> Result<Allocation> {
        let (size, alignment) = self.check_request(size, alignment)?;
        if size > self.config.region_size {
            return self.alloc_large_internal(size, true);
        }
        self.alloc_shared(size, alignment, true)
    }

    /// Allocate an object over a run of contiguous regions
    ///
    /// # Returns
    /// * `Ok(Allocation)` - Region-aligned head address; `bytes_allocated`
    ///   covers every region of the run
    /// * `Err(RgcError::OutOfMemory)` - No long enough Free run, or the run
    ///   would breach the evacuation reserve
    pub fn alloc_large(&self, size: usize) -> Result<Allocation> {
        let (size, _) = self.check_request(size, self.config.alignment)?;
        self.alloc_large_internal(size, false)
    }

    fn check_request(&self, size: usize, alignment: usize) -> Result<(usize, usize)> {
        if size == 0 {
            return Err(RgcError::InvalidArgument(
                "allocation size must be > 0".to_string(),
            ));
        }
        if !alignment.is_power_of_two() || alignment > self.config.region_size {
            return Err(RgcError::InvalidArgument(format!(
                "alignment {} must be a power of two no larger than a region",
                alignment
            )));
        }
        let alignment = alignment.max(self.config.alignment);
        let size = Alignment::checked_align_up(size, alignment).ok_or_else(|| {
            RgcError::InvalidArgument(format!("allocation size {} overflows", size))
        })?;
        Ok((size, alignment))
    }

    #[inline]
    fn bump_cursor(&self, for_evac: bool, size: usize, alignment: usize) -> Option<Allocation> {
        let cursor = if for_evac {
            &self.evac_cursor
        } else {
            &self.current_cursor
        };
        let (index, offset) = cursor.try_bump(size, alignment, self.config.region_size)?;
        let addr = self.mapping.begin() + index * self.config.region_size + offset;
        Some(Allocation::bump(addr, size))
    }

    fn alloc_shared(&self, size: usize, alignment: usize, for_evac: bool) -> Result<Allocation> {
        if let Some(allocation) = self.bump_cursor(for_evac, size, alignment) {
            return Ok(allocation);
        }

        let mut table = self.table.lock();

        // Another thread may have installed a fresh region meanwhile
        if let Some(allocation) = self.bump_cursor(for_evac, size, alignment) {
            return Ok(allocation);
        }

        if !for_evac && !table.reserve_allows(1) {
            let non_free = table.num_non_free_regions();
            drop(table);
            return Err(self.allocation_failure(size, non_free, for_evac));
        }
        let Some(index) = table.find_free_region() else {
            let non_free = table.num_non_free_regions();
            drop(table);
            return Err(self.allocation_failure(size, non_free, for_evac));
        };

        let cursor = if for_evac {
            &self.evac_cursor
        } else {
            &self.current_cursor
        };
        self.seal_cursor(&mut table, cursor);
        table.unfree(index);
        if !for_evac {
            table.region_mut(index).set_newly_allocated();
        }

        let Some(allocation) = table.region_mut(index).alloc(size, alignment) else {
            table.fatal(&format!(
                "{} bytes do not fit in fresh region {}",
                size, index
            ));
        };
        let region = table.region(index);
        cursor.install(index, region.top() - region.begin());
        if for_evac {
            table.set_evac_region(Some(index));
        } else {
            table.set_current_region(Some(index));
        }

        log::trace!(
            "{}: installed region {} for {} allocation",
            self.config.name,
            index,
            if for_evac { "evacuation" } else { "mutator" }
        );
        Ok(allocation)
    }

    fn alloc_large_internal(&self, size: usize, for_evac: bool) -> Result<Allocation> {
        let region_size = self.config.region_size;
        let count = Alignment::blocks(size, region_size);

        let mut table = self.table.lock();
        if !for_evac && !table.reserve_allows(count) {
            let non_free = table.num_non_free_regions();
            drop(table);
            return Err(self.allocation_failure(size, non_free, for_evac));
        }
        let Some(head) = table.find_free_run(count) else {
            let non_free = table.num_non_free_regions();
            drop(table);
            return Err(self.allocation_failure(size, non_free, for_evac));
        };

        table.unfree_large(head, size, count - 1);
        if !for_evac {
            for index in head..head + count {
                table.region_mut(index).set_newly_allocated();
            }
        }
        let addr = table.region(head).begin();
        drop(table);

        log::debug!(
            "{}: large object of {} bytes at regions {}..{}",
            self.config.name,
            size,
            head,
            head + count
        );
        Ok(Allocation {
            addr,
            bytes_allocated: count * region_size,
            usable_size: count * region_size,
        })
    }

    fn allocation_failure(
        &self,
        requested: usize,
        num_non_free_regions: usize,
        for_evacuation: bool,
    ) -> RgcError {
        let num_regions = self.num_regions();
        self.logger.log(SpaceEvent::AllocationFailure {
            requested,
            num_non_free_regions,
            num_regions,
            for_evacuation,
        });
        RgcError::out_of_memory(
            requested,
            (num_regions - num_non_free_regions) * self.config.region_size,
        )
    }

    // ========================================================================
    // Thread-local allocation buffers
    // ========================================================================

    /// Give `thread` a whole Free region as its TLAB
    ///
    /// Any TLAB the thread already holds is revoked first.
    ///
    /// # Returns
    /// * `true` - The thread holds a fresh TLAB
    /// * `false` - No Free region, or the evacuation reserve would be breached
    pub fn alloc_new_tlab(&self, thread: &MutatorThread) -> bool {
        let mut table = self.table.lock();
        let mut tlab = thread.lock_tlab();
        let revoked = self.revoke_locked(&mut table, thread, &mut tlab);

        let granted = if table.reserve_allows(1) {
            table.find_free_region().map(|index| {
                table.unfree(index);
                let region = table.region_mut(index);
                region.set_newly_allocated();
                let (begin, end) = (region.begin(), region.end());
                region.set_top(end);
                let result = region.set_tlab_owner(Some(thread.id()));
                table.check(result);
                *tlab = Tlab::new(index, begin, end);
                index
            })
        } else {
            None
        };
        drop(tlab);
        drop(table);

        if let Some(event) = revoked {
            self.logger.log(event);
        }
        match granted {
            Some(region) => {
                self.logger.log(SpaceEvent::TlabGranted {
                    thread: thread.id().as_u64(),
                    region,
                });
                true
            }
            None => false,
        }
    }

    /// Hand the thread's TLAB back to the space; no-op without one
    pub fn revoke_thread_local_buffers(&self, thread: &MutatorThread) {
        let event = {
            let mut table = self.table.lock();
            let mut tlab = thread.lock_tlab();
            self.revoke_locked(&mut table, thread, &mut tlab)
        };
        if let Some(event) = event {
            self.logger.log(event);
        }
    }

    /// Revoke the TLAB of every registered thread
    pub fn revoke_all_thread_local_buffers(&self, registry: &ThreadRegistry) {
        let mut events = Vec::new();
        registry.for_each_locked(|thread| {
            let mut table = self.table.lock();
            let mut tlab = thread.lock_tlab();
            events.extend(self.revoke_locked(&mut table, thread, &mut tlab));
        });
        for event in events {
            self.logger.log(event);
        }
    }

    /// Write the buffer's usage into its region and release ownership
    ///
    /// Caller holds the region lock and the thread's TLAB lock.
    fn revoke_locked(
        &self,
        table: &mut RegionTable,
        thread: &MutatorThread,
        tlab: &mut Tlab,
    ) -> Option<SpaceEvent> {
        let buffer = tlab.take();
        let index = buffer.region()?;

        let owner = table.region(index).tlab_owner();
        if owner != Some(thread.id()) {
            table.fatal(&format!(
                "thread {} revoked region {} owned by {:?}",
                thread.id(),
                index,
                owner
            ));
        }

        let region = table.region_mut(index);
        region.record_thread_local_allocations(buffer.objects(), buffer.bytes_used());
        let result = region.set_tlab_owner(None);
        table.check(result);

        Some(SpaceEvent::TlabRevoked {
            thread: thread.id().as_u64(),
            region: index,
            objects: buffer.objects(),
            bytes: buffer.bytes_used(),
        })
    }

    /// Debug check that `thread` holds no TLAB
    pub fn assert_thread_local_buffers_revoked(&self, thread: &MutatorThread) {
        debug_assert!(
            !thread.has_tlab(),
            "thread {} ({}) still holds a TLAB",
            thread.id(),
            thread.name()
        );
    }

    /// Debug check that no registered thread holds a TLAB
    pub fn assert_all_thread_local_buffers_revoked(&self, registry: &ThreadRegistry) {
        if cfg!(debug_assertions) {
            registry.for_each_locked(|thread| self.assert_thread_local_buffers_revoked(thread));
        }
    }

    /// Allocate from the thread's TLAB, refilling it once when exhausted
    ///
    /// Objects above one region bypass the TLAB.
    pub fn alloc_thread_local(
        &self,
        thread: &MutatorThread,
        size: usize,
        alignment: usize,
    ) -> Result<Allocation> {
        let (size, alignment) = self.check_request(size, alignment)?;
        if size > self.config.region_size {
            return self.alloc_large_internal(size, false);
        }
        if let Some(addr) = thread.alloc_in_tlab(size, alignment) {
            return Ok(Allocation::bump(addr, size));
        }
        if self.alloc_new_tlab(thread) {
            if let Some(addr) = thread.alloc_in_tlab(size, alignment) {
                return Ok(Allocation::bump(addr, size));
            }
        }
        let non_free = self.num_non_free_regions();
        Err(self.allocation_failure(size, non_free, false))
    }

    /// Count one more object in the region holding `addr`
    ///
    /// Only for shared-cursor regions; TLAB regions get their count on revoke.
    pub fn record_alloc(&self, addr: usize) -> Result<()> {
        let index = self.region_index_of(addr).ok_or_else(|| {
            RgcError::InvalidArgument(format!("{:#x} outside {}", addr, self.config.name))
        })?;
        let mut table = self.table.lock();
        let region = table.region_mut(index);
        if !region.is_allocated() || region.tlab_owner().is_some() {
            return Err(RgcError::InvalidState {
                expected: "Allocated region without a TLAB".to_string(),
                actual: region.to_string(),
            });
        }
        region.record_alloc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SpaceConfig, KB};
    use crate::logging::{EventLogger, LoggerConfig};
    use std::sync::Arc;

    const REGION: usize = 256 * KB;

    fn space(num_regions: usize) -> RegionSpace {
        let logger = Arc::new(EventLogger::new(LoggerConfig {
            console: false,
            ..Default::default()
        }));
        let config = SpaceConfig {
            name: "alloc test".to_string(),
            capacity: num_regions * REGION,
            ..Default::default()
        };
        RegionSpace::create_with_logger(config, logger).unwrap()
    }

    #[test]
    fn test_alloc_bumps_within_region() {
        let space = space(8);
        let a = space.alloc(24, 8).unwrap();
        let b = space.alloc(24, 8).unwrap();

        assert_eq!(a.addr, space.begin());
        assert_eq!(b.addr, a.addr + 24);
        assert_eq!(a.bytes_allocated, 24);
        assert_eq!(space.num_non_free_regions(), 1);

        let region = space.region_snapshot(0).unwrap();
        assert!(region.is_newly_allocated());
        assert_eq!(region.top(), space.begin() + 48);
    }

    #[test]
    fn test_alloc_rounds_and_aligns() {
        let space = space(8);
        let a = space.alloc(3, 8).unwrap();
        assert_eq!(a.bytes_allocated, 8);

        let b = space.alloc(16, 64).unwrap();
        assert_eq!(b.addr % 64, 0);
        assert_eq!(b.bytes_allocated, 64);
    }

    #[test]
    fn test_alloc_rejects_bad_arguments() {
        let space = space(8);
        assert!(matches!(space.alloc(0, 8), Err(RgcError::InvalidArgument(_))));
        assert!(matches!(space.alloc(8, 3), Err(RgcError::InvalidArgument(_))));
        assert!(matches!(
            space.alloc(8, 2 * REGION),
            Err(RgcError::InvalidArgument(_))
        ));
        assert!(space.alloc(usize::MAX - 2, 8).is_err());
    }

    #[test]
    fn test_alloc_moves_to_next_region() {
        let space = space(8);
        space.alloc(REGION - 16, 8).unwrap();
        let next = space.alloc(32, 8).unwrap();

        assert_eq!(next.addr, space.begin() + REGION);
        assert_eq!(space.num_non_free_regions(), 2);
        // The retired region keeps its final top
        assert_eq!(
            space.region_snapshot(0).unwrap().top(),
            space.begin() + REGION - 16
        );
    }

    #[test]
    fn test_mutator_reserve_leaves_room_for_evacuation() {
        let space = space(8);
        for _ in 0..4 {
            space.alloc(REGION, 8).unwrap();
        }

        let err = space.alloc(64, 8).unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(
            err,
            RgcError::OutOfMemory {
                requested: 64,
                available
            } if available == 4 * REGION
        ));

        let survivor = space.alloc_for_evacuation(64, 8).unwrap();
        assert_eq!(survivor.addr, space.begin() + 4 * REGION);
        assert!(!space.region_snapshot(4).unwrap().is_newly_allocated());
        assert!(logger_saw_failure(&space));
    }

    fn logger_saw_failure(space: &RegionSpace) -> bool {
        space
            .logger()
            .events()
            .iter()
            .any(|e| matches!(e, SpaceEvent::AllocationFailure { .. }))
    }

    #[test]
    fn test_alloc_large_spans_regions() {
        let space = space(8);
        let large = space.alloc_large(2 * REGION + 8).unwrap();

        assert_eq!(large.addr, space.begin());
        assert_eq!(large.bytes_allocated, 3 * REGION);
        assert_eq!(space.num_non_free_regions(), 3);

        let head = space.region_snapshot(0).unwrap();
        assert!(head.is_large());
        assert_eq!(head.top(), head.end());
        let last = space.region_snapshot(2).unwrap();
        assert!(last.is_large_tail());
        assert_eq!(last.top(), last.begin() + 8);
        assert!(space.verify().is_ok());
    }

    #[test]
    fn test_alloc_above_region_goes_large() {
        let space = space(8);
        let a = space.alloc(REGION + 1, 8).unwrap();
        assert_eq!(a.bytes_allocated, 2 * REGION);
        assert!(space.region_snapshot(0).unwrap().is_large());
    }

    #[test]
    fn test_alloc_large_respects_reserve() {
        let space = space(8);
        assert!(space.alloc_large(5 * REGION).is_err());
        assert!(space.alloc_large(4 * REGION).is_ok());
    }

    #[test]
    fn test_tlab_grant_and_revoke() {
        let space = space(8);
        let registry = ThreadRegistry::new();
        let thread = registry.register("mutator").unwrap();

        assert!(space.alloc_new_tlab(&thread));
        let region = space.region_snapshot(0).unwrap();
        assert_eq!(region.tlab_owner(), Some(thread.id()));
        assert_eq!(region.top(), region.end());

        let a = space.alloc_thread_local(&thread, 16, 8).unwrap();
        let b = space.alloc_thread_local(&thread, 40, 8).unwrap();
        assert_eq!(a.addr, space.begin());
        assert_eq!(b.addr, space.begin() + 16);

        space.revoke_thread_local_buffers(&thread);
        assert!(!thread.has_tlab());
        space.assert_thread_local_buffers_revoked(&thread);

        let region = space.region_snapshot(0).unwrap();
        assert_eq!(region.tlab_owner(), None);
        assert_eq!(region.objects_allocated(), 2);
        assert_eq!(region.bytes_allocated(), 56);

        // Nothing left to revoke
        space.revoke_thread_local_buffers(&thread);
        assert_eq!(space.region_snapshot(0).unwrap().objects_allocated(), 2);
    }

    #[test]
    fn test_new_tlab_revokes_old_one() {
        let space = space(8);
        let thread = MutatorThread::new(crate::runtime::MutatorId::new(7), "worker");

        assert!(space.alloc_new_tlab(&thread));
        thread.alloc_in_tlab(8, 8).unwrap();
        assert!(space.alloc_new_tlab(&thread));

        assert_eq!(space.region_snapshot(0).unwrap().tlab_owner(), None);
        assert_eq!(space.region_snapshot(1).unwrap().tlab_owner(), Some(thread.id()));
        assert_eq!(thread.tlab().region(), Some(1));
    }

    #[test]
    fn test_tlab_refill_in_alloc_thread_local() {
        let space = space(8);
        let thread = MutatorThread::new(crate::runtime::MutatorId::new(1), "t");

        space.alloc_thread_local(&thread, REGION - 8, 8).unwrap();
        let next = space.alloc_thread_local(&thread, 64, 8).unwrap();

        assert_eq!(next.addr, space.begin() + REGION);
        assert_eq!(space.num_non_free_regions(), 2);
    }

    #[test]
    fn test_revoke_all() {
        let space = space(8);
        let registry = ThreadRegistry::new();
        let threads: Vec<_> = (0..3)
            .map(|i| registry.register(format!("t{}", i)).unwrap())
            .collect();
        for thread in &threads {
            assert!(space.alloc_new_tlab(thread));
            thread.alloc_in_tlab(32, 8).unwrap();
        }

        space.revoke_all_thread_local_buffers(&registry);
        space.assert_all_thread_local_buffers_revoked(&registry);

        assert!(threads.iter().all(|t| !t.has_tlab()));
        assert_eq!(space.bytes_allocated(), 3 * 32);
        assert_eq!(space.objects_allocated(), 3);
    }

    #[test]
    fn test_record_alloc() {
        let space = space(8);
        let a = space.alloc(16, 8).unwrap();
        space.record_alloc(a.addr).unwrap();

        assert_eq!(space.objects_allocated(), 1);
        assert!(matches!(
            space.record_alloc(space.begin() + REGION),
            Err(RgcError::InvalidState { .. })
        ));
        assert!(space.record_alloc(space.limit()).is_err());
    }
}
