//! Evacuation Planner - Epoch Boundaries of a Copying Collection
//!
//! Two passes over the region table bracket every collection:
//!
//! ```text
//!  mark (external) ──▶ set_from_space ──▶ copy (external) ──▶ clear_from_space
//!                      │                                      │
//!                      ├─ ToSpace ─▶ FromSpace (evacuate)     ├─ FromSpace ─▶ Free
//!                      └─ ToSpace ─▶ UnevacFromSpace (keep)   └─ UnevacFromSpace ─▶ ToSpace
//! ```
//!
//! Both passes walk the table in index order under the region lock and run
//! to completion. A large object's head decides for its whole chain; tails
//! never get a decision of their own.

use crate::barrier::ReadBarrierTable;
use crate::heap::bitmap::LiveBitmap;
use crate::heap::region::{RegionState, RegionType};
use crate::heap::table::RegionTable;
use crate::util::Alignment;
use serde::Serialize;

/// Outcome of `set_from_space`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvacuationPlan {
    /// Epoch the plan opened
    pub epoch: u64,
    /// Regions moved to from-space
    pub evacuated_regions: usize,
    /// Regions kept in place as unevacuated from-space
    pub retained_regions: usize,
    /// Bytes allocated in the evacuated regions
    pub evacuated_bytes: usize,
    /// Every region was evacuated regardless of liveness
    pub forced: bool,
}

/// Outcome of `clear_from_space`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimSummary {
    /// Epoch being closed
    pub epoch: u64,
    /// From-space regions returned to Free
    pub freed_regions: usize,
    /// Bytes that were allocated in the freed regions
    pub freed_bytes: usize,
    /// Unevacuated regions promoted back to to-space
    pub promoted_regions: usize,
    /// Promoted regions whose live bitmap was cleared as fully live
    pub bitmap_cleared_regions: usize,
}

/// Split the non-free regions into evacuated and retained sets
///
/// The caller has already sealed the allocation cursors, so every `top` is
/// exact. Advances the epoch and drops the current/evacuation selection.
///
/// # Arguments
/// * `table` - Locked region table
/// * `rb_table` - Optional read-barrier table, set everywhere but Free regions
/// * `force_evacuate_all` - Evacuate every non-free region
/// * `threshold` - Live percent below which a region is evacuated
pub(crate) fn plan_evacuation(
    table: &mut RegionTable,
    rb_table: Option<&dyn ReadBarrierTable>,
    force_evacuate_all: bool,
    threshold: usize,
) -> EvacuationPlan {
    let epoch = table.advance_time();
    let region_size = table.region_size();
    let num_regions = table.num_regions();

    if let Some(rb_table) = rb_table {
        rb_table.set_all();
    }

    let mut plan = EvacuationPlan {
        epoch,
        forced: force_evacuate_all,
        ..Default::default()
    };

    let mut i = 0;
    while i < num_regions {
        let region = table.region(i);
        let state = region.state();

        let tail_count = match state {
            RegionState::Free => {
                if let Some(rb_table) = rb_table {
                    rb_table.clear_range(region.begin(), region.end());
                }
                i += 1;
                continue;
            }
            RegionState::LargeTail { .. } => {
                table.fatal(&format!("large tail region {} without a head", i))
            }
            RegionState::Large { tail_count, .. } => {
                let expected =
                    Alignment::align_up(region.bytes_allocated(), region_size) / region_size - 1;
                if expected != tail_count {
                    table.fatal(&format!(
                        "large region {} records {} tails, its size needs {}",
                        i, tail_count, expected
                    ));
                }
                expected
            }
            RegionState::Allocated { .. } => 0,
        };

        if region.space() != Some(RegionType::ToSpace) {
            table.fatal(&format!(
                "region {} is {:?} at the start of epoch {}",
                i,
                region.space(),
                epoch
            ));
        }

        let evacuate = force_evacuate_all || region.should_be_evacuated(threshold, region_size);
        let bytes = region.bytes_allocated();

        for j in i..=i + tail_count {
            if j > i && (j >= num_regions || !table.region(j).is_large_tail()) {
                table.fatal(&format!(
                    "expected large tail {} of the object at region {}",
                    j, i
                ));
            }
            let result = if evacuate {
                table.region_mut(j).set_as_from_space()
            } else {
                table.region_mut(j).set_as_unevac_from_space()
            };
            table.check(result);
        }

        if evacuate {
            plan.evacuated_regions += tail_count + 1;
            plan.evacuated_bytes += bytes;
        } else {
            plan.retained_regions += tail_count + 1;
        }
        i += tail_count + 1;
    }

    table.set_current_region(None);
    table.set_evac_region(None);
    plan
}

/// Reclaim from-space and promote unevacuated regions
///
/// Contiguous runs of fully-live unevacuated regions get their live bitmap
/// cleared with one ranged call.
///
/// # Arguments
/// * `table` - Locked region table
/// * `bitmap` - Live bitmap of the space
/// * `release` - Called with `(begin, len)` of every freed region
pub(crate) fn reclaim_from_space<F>(
    table: &mut RegionTable,
    bitmap: &LiveBitmap,
    mut release: F,
) -> ReclaimSummary
where
    F: FnMut(usize, usize),
{
    let num_regions = table.num_regions();
    let mut summary = ReclaimSummary {
        epoch: table.time(),
        ..Default::default()
    };

    let mut i = 0;
    while i < num_regions {
        let region = table.region(i);

        if region.is_in_from_space() {
            let (begin, len) = (region.begin(), region.len());
            summary.freed_regions += 1;
            summary.freed_bytes += region.bytes_allocated();
            table.clear_region(i);
            release(begin, len);
            i += 1;
            continue;
        }

        if !region.is_in_unevac_from_space() {
            i += 1;
            continue;
        }

        let full_run = table.regions()[i..]
            .iter()
            .take_while(|r| r.is_in_unevac_from_space() && r.is_fully_live())
            .count();

        if full_run > 0 {
            let begin = table.region(i).begin();
            let end = table.region(i + full_run - 1).end();
            bitmap.clear_range(begin, end);
            summary.bitmap_cleared_regions += full_run;
        }

        let promoted = full_run.max(1);
        for j in i..i + promoted {
            let result = table.region_mut(j).set_unevac_from_space_as_to_space();
            table.check(result);
        }
        summary.promoted_regions += promoted;
        i += promoted;
    }

    table.set_evac_region(None);
    summary
}
