//! Stats Module - Region Space Monitoring
//!
//! Collects region space statistics for:
//! - Collection pacing
//! - Production monitoring
//! - Debugging fragmentation
//!
//! Metrics:
//! - Region counts per state and space type
//! - Bytes and objects allocated
//! - Per-epoch planning and reclamation cost

pub mod cycle;
pub mod timer;

pub use cycle::{AggregatedStats, CycleStats, CycleStatsCollector};
pub use timer::PhaseTimer;

use serde::Serialize;

/// SpaceStats - point-in-time snapshot of a region space
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpaceStats {
    /// Space name
    pub name: String,
    /// Total capacity in bytes
    pub capacity: usize,
    /// Size of one region
    pub region_size: usize,
    /// Number of regions
    pub num_regions: usize,
    /// Regions not Free
    pub num_non_free_regions: usize,
    /// Non-free regions per space type
    pub to_space_regions: usize,
    pub from_space_regions: usize,
    pub unevac_from_space_regions: usize,
    /// Regions holding multi-region objects
    pub large_regions: usize,
    pub large_tail_regions: usize,
    /// Regions checked out as TLABs
    pub tlab_regions: usize,
    /// Bytes handed out in non-free regions
    pub bytes_allocated: usize,
    /// Objects recorded in non-free regions
    pub objects_allocated: usize,
    /// Current epoch
    pub epoch: u64,
}

impl SpaceStats {
    /// Regions available for allocation
    pub fn free_regions(&self) -> usize {
        self.num_regions - self.num_non_free_regions
    }

    /// Fraction of regions in use (0.0 - 1.0)
    pub fn region_utilization(&self) -> f64 {
        if self.num_regions == 0 {
            0.0
        } else {
            self.num_non_free_regions as f64 / self.num_regions as f64
        }
    }

    /// Render as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
