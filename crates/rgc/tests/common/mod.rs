//! Test Utilities for the RGC Integration Suite
//!
//! Fixtures build small spaces with a private, quiet event logger so tests
//! can inspect the events a space emitted without touching the global one.

#![allow(dead_code)]

use rgc::logging::{EventLogger, LogLevel, LoggerConfig};
use rgc::{Allocation, RegionSpace, RegionState, RegionType, SpaceConfig, SpaceEvent};
use std::sync::Arc;

/// Region size used by every fixture (256KiB)
pub const REGION: usize = 256 * 1024;

/// Default alignment for allocations (8 bytes)
pub const ALIGNMENT: usize = 8;

/// Test fixture for region space operations
pub struct SpaceFixture {
    pub space: RegionSpace,
    pub logger: Arc<EventLogger>,
}

impl SpaceFixture {
    /// 8 regions of 256KiB
    pub fn small() -> Self {
        Self::with_regions(8)
    }

    pub fn with_regions(num_regions: usize) -> Self {
        Self::with_config(SpaceConfig {
            name: "test space".to_string(),
            capacity: num_regions * REGION,
            region_size: REGION,
            ..Default::default()
        })
    }

    pub fn with_config(config: SpaceConfig) -> Self {
        let logger = Arc::new(EventLogger::new(LoggerConfig {
            level: LogLevel::Trace,
            console: false,
            max_events: 4096,
            ..Default::default()
        }));
        let space = RegionSpace::create_with_logger(config, Arc::clone(&logger))
            .expect("space creation should succeed with a valid config");
        Self { space, logger }
    }

    /// Address of the first byte of region `index`
    pub fn region_begin(&self, index: usize) -> usize {
        self.space.begin() + index * REGION
    }

    /// Allocate or fail the test
    pub fn alloc(&self, size: usize) -> Allocation {
        self.space
            .alloc(size, ALIGNMENT)
            .expect("allocation should succeed")
    }

    /// Fill `count` whole regions through the shared cursor
    pub fn fill_regions(&self, count: usize) -> Vec<Allocation> {
        (0..count).map(|_| self.alloc(REGION)).collect()
    }

    /// Allocate a survivor through the evacuation path or fail the test
    ///
    /// Survivor regions are never newly allocated, so the mark phase's
    /// measurement decides their fate.
    pub fn survivor(&self, size: usize) -> Allocation {
        self.space
            .alloc_for_evacuation(size, ALIGNMENT)
            .expect("evacuation allocation should succeed")
    }

    /// Fill `count` whole regions through the evacuation cursor
    pub fn fill_survivor_regions(&self, count: usize) -> Vec<Allocation> {
        (0..count).map(|_| self.survivor(REGION)).collect()
    }

    pub fn state(&self, index: usize) -> RegionState {
        self.snapshot(index).state()
    }

    pub fn space_type(&self, index: usize) -> Option<RegionType> {
        self.snapshot(index).space()
    }

    pub fn snapshot(&self, index: usize) -> rgc::Region {
        self.space
            .region_snapshot(index)
            .expect("region index should be in range")
    }

    pub fn events(&self) -> Vec<SpaceEvent> {
        self.logger.events()
    }

    /// Run a full collection boundary with no survivors copied
    pub fn collect(&self, force: bool) -> (rgc::EvacuationPlan, rgc::ReclaimSummary) {
        let plan = self.space.set_from_space(None, force);
        assert_no_to_space(&self.space);
        let summary = self.space.clear_from_space();
        assert_no_from_space(&self.space);
        (plan, summary)
    }
}

/// Every non-free region is FromSpace or UnevacFromSpace
pub fn assert_no_to_space(space: &RegionSpace) {
    for index in 0..space.num_regions() {
        let region = space.region_snapshot(index).unwrap();
        assert_ne!(
            region.space(),
            Some(RegionType::ToSpace),
            "region {} still in to-space after planning: {}",
            index,
            region
        );
    }
}

/// No region is left in FromSpace
pub fn assert_no_from_space(space: &RegionSpace) {
    for index in 0..space.num_regions() {
        let region = space.region_snapshot(index).unwrap();
        assert!(
            !region.is_in_from_space(),
            "region {} still in from-space after reclamation: {}",
            index,
            region
        );
    }
}

/// Region table invariants hold
pub fn assert_verified(space: &RegionSpace) {
    if let Err(message) = space.verify() {
        let mut dump = String::new();
        space.dump_regions(&mut dump).unwrap();
        panic!("{}\n{}", message, dump);
    }
}

/// The counter matches a recount of non-free regions
pub fn assert_counter_consistent(space: &RegionSpace) {
    let recount = (0..space.num_regions())
        .filter(|&i| !space.region_snapshot(i).unwrap().is_free())
        .count();
    assert_eq!(space.num_non_free_regions(), recount);
}

/// Allocations are pairwise disjoint
pub fn assert_disjoint(allocations: &[Allocation]) {
    let mut ranges: Vec<(usize, usize)> = allocations
        .iter()
        .map(|a| (a.addr, a.addr + a.bytes_allocated))
        .collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(
            pair[0].1 <= pair[1].0,
            "overlapping allocations {:#x}-{:#x} and {:#x}-{:#x}",
            pair[0].0,
            pair[0].1,
            pair[1].0,
            pair[1].1
        );
    }
}
