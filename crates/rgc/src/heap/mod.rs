//! Heap Management Module - Region Space
//!
//! The region space divides one contiguous, region-aligned mapping into
//! fixed-size regions. Mutators bump-allocate in regions (directly, or
//! through a TLAB that owns a whole region); objects larger than a region
//! take a run of contiguous regions. A copying collector uses the space to
//! decide which regions to evacuate each epoch and to reclaim them after
//! their survivors were copied.
//!
//! Space Structure:
//! ```text
//! ┌───────────────────────────── RegionSpace ─────────────────────────────┐
//! │  Mutex<RegionTable>                                                   │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐     │
//! │  │ Region 0 │ │ Region 1 │ │ Region 2 │ │ Region 3 │ │   ...    │     │
//! │  │ Allocated│ │  Large   │ │LargeTail │ │   Free   │ │          │     │
//! │  └──────────┘ └──────────┘ └──────────┘ └──────────┘ └──────────┘     │
//! │  current cursor ─▶ region 0        evacuation cursor ─▶ (sealed)      │
//! │  LiveBitmap (one bit per alignment granule over the whole mapping)    │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lock order: thread registry locks, then the region lock, then a thread's
//! TLAB lock. The region lock is never held while calling back into user
//! code.

pub mod bitmap;
pub mod evacuation;
pub mod memory_mapping;
pub mod page;
pub mod region;
pub mod table;

pub use bitmap::LiveBitmap;
pub use evacuation::{EvacuationPlan, ReclaimSummary};
pub use memory_mapping::HeapMapping;
pub use region::{IllegalTransition, Region, RegionState, RegionType};
pub use table::RegionTable;

use crate::allocator::RegionCursor;
use crate::barrier::ReadBarrierTable;
use crate::config::SpaceConfig;
use crate::error::{Result, RgcError};
use crate::logging::{self, EventLogger, SpaceEvent};
use crate::stats::{CycleStatsCollector, PhaseTimer, SpaceStats};
use crate::util::Alignment;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// RegionSpace - a region-partitioned space with evacuation planning
///
/// # Examples
///
/// ```rust
/// use rgc::{RegionSpace, SpaceConfig};
///
/// let space = RegionSpace::create(SpaceConfig {
///     capacity: 8 * 256 * 1024,
///     ..Default::default()
/// })?;
///
/// let allocation = space.alloc(64, 8)?;
/// assert!(space.contains(allocation.addr));
///
/// // Collection boundaries
/// let plan = space.set_from_space(None, false);
/// let summary = space.clear_from_space();
/// assert_eq!(plan.epoch, summary.epoch);
/// # Ok::<(), rgc::RgcError>(())
/// ```
pub struct RegionSpace {
    /// Validated configuration
    pub(crate) config: SpaceConfig,

    /// Backing memory
    pub(crate) mapping: HeapMapping,

    /// Region lock and everything it protects
    pub(crate) table: Mutex<RegionTable>,

    /// Lock-free bump pointer into the current region
    pub(crate) current_cursor: RegionCursor,

    /// Lock-free bump pointer into the evacuation region
    pub(crate) evac_cursor: RegionCursor,

    /// Object start bits, set by the mark phase
    pub(crate) live_bitmap: LiveBitmap,

    /// Event sink
    pub(crate) logger: Arc<EventLogger>,

    /// Per-epoch statistics
    pub(crate) cycle_stats: CycleStatsCollector,
}

impl RegionSpace {
    /// Create a space with its own anonymous mapping
    ///
    /// Events go to the global logger.
    ///
    /// # Returns
    /// * `Ok(Self)` - Space with every region Free
    /// * `Err(RgcError::Configuration)` - Invalid configuration
    /// * `Err(RgcError::HeapInitialization)` - Mapping failed
    pub fn create(config: SpaceConfig) -> Result<Self> {
        Self::create_with_logger(config, logging::global_logger())
    }

    /// Create a space that records events in `logger`
    pub fn create_with_logger(config: SpaceConfig, logger: Arc<EventLogger>) -> Result<Self> {
        config.validate()?;
        let mapping = Self::create_mem_map(&config.name, config.capacity, config.region_size)?;
        Self::build(config, mapping, logger)
    }

    /// Reserve a mapping suitable for a space
    ///
    /// # Arguments
    /// * `name` - Name of the space, for diagnostics
    /// * `capacity` - Usable size, a multiple of `region_size`
    /// * `region_size` - Alignment of the mapping's window
    ///
    /// # Returns
    /// * `Ok(HeapMapping)` - Region-aligned mapping of exactly `capacity` bytes
    /// * `Err(RgcError::HeapInitialization)` - Bad arguments or the OS refused
    pub fn create_mem_map(name: &str, capacity: usize, region_size: usize) -> Result<HeapMapping> {
        if !region_size.is_power_of_two() {
            return Err(RgcError::HeapInitialization(format!(
                "region size ({}) of {} must be a power of two",
                region_size, name
            )));
        }
        HeapMapping::anonymous(name, capacity, region_size).map_err(|e| {
            log::error!(
                "Failed to create region space mapping {} of {} bytes: {}",
                name,
                capacity,
                e
            );
            RgcError::HeapInitialization(e.to_string())
        })
    }

    /// Create a space over an existing mapping
    ///
    /// The mapping's capacity overrides `config.capacity`.
    pub fn from_mapping(mut config: SpaceConfig, mapping: HeapMapping) -> Result<Self> {
        config.capacity = mapping.capacity();
        config.validate()?;
        if !Alignment::is_aligned(mapping.begin(), config.region_size) {
            return Err(RgcError::HeapInitialization(format!(
                "mapping begin {:#x} is not aligned to the region size ({})",
                mapping.begin(),
                config.region_size
            )));
        }
        Self::build(config, mapping, logging::global_logger())
    }

    fn build(config: SpaceConfig, mapping: HeapMapping, logger: Arc<EventLogger>) -> Result<Self> {
        let num_regions = config.num_regions();
        let table = RegionTable::new(&config.name, mapping.begin(), num_regions, config.region_size);
        let live_bitmap = LiveBitmap::new(mapping.begin(), mapping.capacity(), config.alignment);

        let space = Self {
            table: Mutex::new(table),
            current_cursor: RegionCursor::sealed(),
            evac_cursor: RegionCursor::sealed(),
            live_bitmap,
            logger,
            cycle_stats: CycleStatsCollector::default(),
            mapping,
            config,
        };

        if cfg!(debug_assertions) {
            let table = space.table.lock();
            if let Err(message) = table.verify() {
                table.fatal(&message);
            }
            let first = table.region(0);
            let last = table.region(num_regions - 1);
            debug_assert_eq!(first.begin(), space.mapping.begin());
            debug_assert_eq!(last.end(), space.mapping.end());
            debug_assert!(space
                .current_cursor
                .try_bump(space.config.alignment, space.config.alignment, space.config.region_size)
                .is_none());
        }

        log::debug!(
            "{}: {} regions of {} at {:#x}-{:#x}",
            space.config.name,
            num_regions,
            crate::util::pretty_size(space.config.region_size),
            space.mapping.begin(),
            space.mapping.end()
        );
        Ok(space)
    }

    // ========================================================================
    // Geometry
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    pub fn begin(&self) -> usize {
        self.mapping.begin()
    }

    /// End of the last region
    pub fn limit(&self) -> usize {
        self.mapping.end()
    }

    pub fn capacity(&self) -> usize {
        self.mapping.capacity()
    }

    pub fn region_size(&self) -> usize {
        self.config.region_size
    }

    pub fn num_regions(&self) -> usize {
        self.config.num_regions()
    }

    pub fn num_non_free_regions(&self) -> usize {
        self.table.lock().num_non_free_regions()
    }

    /// Current epoch
    pub fn time(&self) -> u64 {
        self.table.lock().time()
    }

    pub fn logger(&self) -> &Arc<EventLogger> {
        &self.logger
    }

    pub fn cycle_stats(&self) -> &CycleStatsCollector {
        &self.cycle_stats
    }

    // ========================================================================
    // Collection boundaries
    // ========================================================================

    /// Open a collection epoch: decide which regions are evacuated
    ///
    /// # Arguments
    /// * `rb_table` - Optional read-barrier table to keep in step
    /// * `force_evacuate_all` - Evacuate every non-free region
    pub fn set_from_space(
        &self,
        rb_table: Option<&dyn ReadBarrierTable>,
        force_evacuate_all: bool,
    ) -> EvacuationPlan {
        let timer = PhaseTimer::start();
        let plan = {
            let mut table = self.table.lock();
            self.seal_cursor(&mut table, &self.current_cursor);
            self.seal_cursor(&mut table, &self.evac_cursor);
            evacuation::plan_evacuation(
                &mut table,
                rb_table,
                force_evacuate_all,
                self.config.evacuate_live_percent_threshold,
            )
        };
        self.cycle_stats.record_plan(&plan, timer.elapsed());
        self.log_cycle_boundary(SpaceEvent::EvacuationPlanned {
            epoch: plan.epoch,
            evacuated_regions: plan.evacuated_regions,
            retained_regions: plan.retained_regions,
            evacuated_bytes: plan.evacuated_bytes,
            forced: plan.forced,
        });
        plan
    }

    /// Close a collection epoch: free evacuated regions, promote the rest
    pub fn clear_from_space(&self) -> ReclaimSummary {
        let timer = PhaseTimer::start();
        let summary = {
            let mut table = self.table.lock();
            self.seal_cursor(&mut table, &self.evac_cursor);
            evacuation::reclaim_from_space(&mut table, &self.live_bitmap, |begin, len| {
                self.live_bitmap.clear_range(begin, begin + len);
                self.release_pages(begin, len);
            })
        };
        self.cycle_stats.record_reclaim(&summary, timer.elapsed());
        self.log_cycle_boundary(SpaceEvent::FromSpaceCleared {
            epoch: summary.epoch,
            freed_regions: summary.freed_regions,
            freed_bytes: summary.freed_bytes,
            promoted_regions: summary.promoted_regions,
            bitmap_cleared_regions: summary.bitmap_cleared_regions,
        });
        summary
    }

    fn log_cycle_boundary(&self, event: SpaceEvent) {
        if self.config.verbose {
            log::info!("{}: {}", self.config.name, event);
        }
        self.logger.log(event);
    }

    // ========================================================================
    // Size queries
    // ========================================================================

    /// Bytes covered by from-space regions
    pub fn from_space_size(&self) -> usize {
        self.count_regions(Region::is_in_from_space) * self.config.region_size
    }

    /// Bytes covered by unevacuated from-space regions
    pub fn unevac_from_space_size(&self) -> usize {
        self.count_regions(Region::is_in_unevac_from_space) * self.config.region_size
    }

    /// Bytes covered by to-space regions
    pub fn to_space_size(&self) -> usize {
        self.count_regions(Region::is_in_to_space) * self.config.region_size
    }

    fn count_regions(&self, predicate: fn(&Region) -> bool) -> usize {
        self.table.lock().regions().iter().filter(|r| predicate(r)).count()
    }

    /// Bytes handed out in non-free regions
    pub fn bytes_allocated(&self) -> usize {
        let mut table = self.table.lock();
        self.sync_cursor_tops(&mut table);
        table.regions().iter().map(Region::bytes_allocated).sum()
    }

    /// Objects recorded in non-free regions
    pub fn objects_allocated(&self) -> usize {
        self.table
            .lock()
            .regions()
            .iter()
            .map(Region::objects_allocated)
            .sum()
    }

    /// Snapshot of the space
    pub fn stats(&self) -> SpaceStats {
        let mut table = self.table.lock();
        self.sync_cursor_tops(&mut table);

        let mut stats = SpaceStats {
            name: self.config.name.clone(),
            capacity: self.capacity(),
            region_size: self.config.region_size,
            num_regions: table.num_regions(),
            num_non_free_regions: table.num_non_free_regions(),
            epoch: table.time(),
            ..Default::default()
        };
        for region in table.regions() {
            match region.space() {
                Some(RegionType::ToSpace) => stats.to_space_regions += 1,
                Some(RegionType::FromSpace) => stats.from_space_regions += 1,
                Some(RegionType::UnevacFromSpace) => stats.unevac_from_space_regions += 1,
                None => continue,
            }
            match region.state() {
                RegionState::Large { .. } => stats.large_regions += 1,
                RegionState::LargeTail { .. } => stats.large_tail_regions += 1,
                RegionState::Allocated {
                    tlab_owner: Some(_),
                    ..
                } => stats.tlab_regions += 1,
                _ => {}
            }
            stats.bytes_allocated += region.bytes_allocated();
            stats.objects_allocated += region.objects_allocated();
        }
        stats
    }

    // ========================================================================
    // Large objects
    // ========================================================================

    /// Free a large object and every region it spans
    ///
    /// # Arguments
    /// * `addr` - Start of the object, the head region's begin
    /// * `bytes_allocated` - Bytes reported when it was allocated
    ///
    /// # Returns
    /// * `Ok(())` - Every spanned region is Free
    /// * `Err(RgcError::InvalidArgument)` - Address not a region begin in the space
    /// * `Err(RgcError::InvalidState)` - The span is not one large object
    pub fn free_large(&self, addr: usize, bytes_allocated: usize) -> Result<()> {
        let region_size = self.config.region_size;
        if !self.contains(addr) || !Alignment::is_aligned(addr, region_size) {
            return Err(RgcError::InvalidArgument(format!(
                "{:#x} is not a region begin inside {}",
                addr, self.config.name
            )));
        }
        if bytes_allocated == 0 {
            return Err(RgcError::InvalidArgument(
                "bytes_allocated must be > 0".to_string(),
            ));
        }

        let mut table = self.table.lock();
        let head = table.index_of(addr).ok_or_else(|| {
            RgcError::InvalidArgument(format!("{:#x} outside {}", addr, self.config.name))
        })?;
        let count = Alignment::blocks(bytes_allocated, region_size);
        if head + count > table.num_regions() {
            return Err(RgcError::InvalidArgument(format!(
                "{} bytes at {:#x} run past the end of {}",
                bytes_allocated, addr, self.config.name
            )));
        }

        for index in head..head + count {
            let region = table.region(index);
            let valid = if index == head {
                matches!(region.state(), RegionState::Large { tail_count, .. } if tail_count == count - 1)
            } else {
                region.is_large_tail()
            };
            if !valid {
                return Err(RgcError::InvalidState {
                    expected: if index == head {
                        format!("Large head with {} tails", count - 1)
                    } else {
                        "LargeTail".to_string()
                    },
                    actual: region.to_string(),
                });
            }
        }

        for index in head..head + count {
            let begin = table.region(index).begin();
            table.clear_region(index);
            self.live_bitmap.clear_range(begin, begin + region_size);
            self.release_pages(begin, region_size);
        }

        let next = head + count;
        if next < table.num_regions() && table.region(next).is_large_tail() {
            table.fatal(&format!(
                "region {} is a large tail after freeing {} bytes at {:#x}",
                next, bytes_allocated, addr
            ));
        }
        drop(table);

        self.logger.log(SpaceEvent::LargeObjectFreed {
            address: addr,
            regions: count,
        });
        Ok(())
    }

    // ========================================================================
    // Whole space
    // ========================================================================

    /// Return every region to Free and reset the allocation cursors
    ///
    /// Every TLAB must have been revoked first: a thread still holding one
    /// would keep bumping into a released region.
    ///
    /// # Returns
    /// * `Err(RgcError::InvalidState)` - A region is still checked out as a
    ///   TLAB; nothing was cleared
    pub fn clear(&self) -> Result<()> {
        let regions = {
            let mut table = self.table.lock();
            if let Some(region) = table.regions().iter().find(|r| r.tlab_owner().is_some()) {
                return Err(RgcError::InvalidState {
                    expected: "no outstanding TLAB".to_string(),
                    actual: region.to_string(),
                });
            }
            self.current_cursor.seal();
            self.evac_cursor.seal();
            table.clear_all();
            self.live_bitmap.clear_all();
            self.release_pages(self.mapping.begin(), self.mapping.capacity());
            table.num_regions()
        };
        self.logger.log(SpaceEvent::SpaceCleared { regions });
        Ok(())
    }

    /// Append why an allocation of `failed_bytes` failed
    ///
    /// Reports the largest allocation that could still succeed: the room
    /// left in the current region and, while the evacuation reserve is not
    /// touched, the longest run of Free regions.
    pub fn log_fragmentation_alloc_failure(
        &self,
        out: &mut dyn fmt::Write,
        failed_bytes: usize,
    ) -> fmt::Result {
        let max_contiguous = {
            let mut table = self.table.lock();
            self.sync_cursor_tops(&mut table);

            let mut max_contiguous = table
                .current_region()
                .map(|i| table.region(i).end() - table.region(i).top())
                .unwrap_or(0);
            if table.num_non_free_regions() * 2 < table.num_regions() {
                max_contiguous =
                    max_contiguous.max(table.largest_free_run() * self.config.region_size);
            }
            max_contiguous
        };
        log::debug!(
            "{}: allocation of {} bytes failed, largest contiguous {} bytes",
            self.config.name,
            failed_bytes,
            max_contiguous
        );
        write!(
            out,
            "; failed due to fragmentation (largest possible contiguous allocation {} bytes)",
            max_contiguous
        )
    }

    /// Write the space name and bounds
    pub fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(
            out,
            "{} {:#x}-{:#x}",
            self.config.name,
            self.mapping.begin(),
            self.mapping.end()
        )
    }

    /// Write one line per region
    pub fn dump_regions(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let mut table = self.table.lock();
        self.sync_cursor_tops(&mut table);
        table.dump_regions(out)
    }

    /// Write one line per non-free region
    pub fn dump_non_free_regions(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let mut table = self.table.lock();
        self.sync_cursor_tops(&mut table);
        table.dump_non_free_regions(out)
    }

    /// Check the structural invariants of the region table
    pub fn verify(&self) -> std::result::Result<(), String> {
        let mut table = self.table.lock();
        self.sync_cursor_tops(&mut table);
        table.verify()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Check if address is inside the space
    pub fn contains(&self, addr: usize) -> bool {
        self.mapping.contains(addr)
    }

    /// Index of the region containing `addr`
    pub fn region_index_of(&self, addr: usize) -> Option<usize> {
        if !self.contains(addr) {
            return None;
        }
        Some((addr - self.mapping.begin()) / self.config.region_size)
    }

    pub fn is_in_from_space(&self, addr: usize) -> bool {
        self.region_type_of(addr) == Some(RegionType::FromSpace)
    }

    pub fn is_in_unevac_from_space(&self, addr: usize) -> bool {
        self.region_type_of(addr) == Some(RegionType::UnevacFromSpace)
    }

    pub fn is_in_to_space(&self, addr: usize) -> bool {
        self.region_type_of(addr) == Some(RegionType::ToSpace)
    }

    /// Space type of the region containing `addr`, `None` if Free or outside
    pub fn region_type_of(&self, addr: usize) -> Option<RegionType> {
        let index = self.region_index_of(addr)?;
        self.table.lock().region(index).space()
    }

    /// Copy of one region's bookkeeping
    pub fn region_snapshot(&self, index: usize) -> Option<Region> {
        let mut table = self.table.lock();
        if index >= table.num_regions() {
            return None;
        }
        self.sync_cursor_tops(&mut table);
        Some(table.region(index).clone())
    }

    // ========================================================================
    // Liveness feed
    // ========================================================================

    /// Store the mark phase's live-byte measurement for a region
    pub fn record_live_bytes(&self, index: usize, bytes: usize) -> Result<()> {
        let mut table = self.table.lock();
        if index >= table.num_regions() {
            return Err(RgcError::InvalidArgument(format!(
                "region index {} out of range ({} regions)",
                index,
                table.num_regions()
            )));
        }
        let region = table.region_mut(index);
        if region.is_free() {
            return Err(RgcError::InvalidState {
                expected: "non-free region".to_string(),
                actual: region.to_string(),
            });
        }
        region.record_live_bytes(bytes);
        Ok(())
    }

    /// Add live bytes to the region containing `addr`
    pub fn add_live_bytes(&self, addr: usize, bytes: usize) -> Result<()> {
        let index = self.region_index_of(addr).ok_or_else(|| {
            RgcError::InvalidArgument(format!("{:#x} outside {}", addr, self.config.name))
        })?;
        let mut table = self.table.lock();
        let region = table.region_mut(index);
        if region.is_free() {
            return Err(RgcError::InvalidState {
                expected: "non-free region".to_string(),
                actual: region.to_string(),
            });
        }
        region.add_live_bytes(bytes);
        Ok(())
    }

    /// Live bitmap of the whole space
    pub fn live_bitmap(&self) -> &LiveBitmap {
        &self.live_bitmap
    }

    /// Visit every marked object start in non-free regions, in address order
    ///
    /// The region lock is released before the visitor runs.
    pub fn walk_live_objects<F: FnMut(usize)>(&self, mut visitor: F) {
        let ranges: Vec<(usize, usize)> = {
            let mut table = self.table.lock();
            self.sync_cursor_tops(&mut table);
            table
                .regions()
                .iter()
                .filter(|r| r.is_allocated() || r.is_large())
                .map(|r| (r.begin(), r.top()))
                .collect()
        };
        for (begin, end) in ranges {
            self.live_bitmap.visit_marked_range(begin, end, &mut visitor);
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Retire a cursor and write its final top back into its region
    pub(crate) fn seal_cursor(&self, table: &mut RegionTable, cursor: &RegionCursor) {
        if let Some((index, offset)) = cursor.seal() {
            let top = table.region(index).begin() + offset;
            table.region_mut(index).set_top(top);
        }
    }

    /// Bring the tops of cursor-published regions up to date
    pub(crate) fn sync_cursor_tops(&self, table: &mut RegionTable) {
        for cursor in [&self.current_cursor, &self.evac_cursor] {
            if let Some((index, offset)) = cursor.peek() {
                let top = table.region(index).begin() + offset;
                table.region_mut(index).set_top(top);
            }
        }
    }

    pub(crate) fn release_pages(&self, begin: usize, len: usize) {
        if !self.config.zero_released_regions {
            return;
        }
        if let Err(e) = self.mapping.release(begin, len) {
            log::warn!("{}: failed to release {:#x}+{}: {}", self.config.name, begin, len, e);
        }
    }
}

impl fmt::Debug for RegionSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionSpace")
            .field("name", &self.config.name)
            .field("begin", &format_args!("{:#x}", self.mapping.begin()))
            .field("limit", &format_args!("{:#x}", self.mapping.end()))
            .field("num_regions", &self.num_regions())
            .finish()
    }
}
