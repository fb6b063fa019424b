//! Cycle Statistics - Per-Epoch Planning and Reclamation Metrics
//!
//! One record per collection epoch: how long `set_from_space` and
//! `clear_from_space` held the region lock and what they did to the regions.

use crate::heap::evacuation::{EvacuationPlan, ReclaimSummary};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Cycle Statistics - metrics for one collection epoch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    /// Epoch started by `set_from_space`
    pub epoch: u64,

    /// Phase timings (nanoseconds)
    pub plan_ns: u64,
    pub reclaim_ns: u64,

    /// Planning outcome
    pub evacuated_regions: usize,
    pub retained_regions: usize,
    pub evacuated_bytes: usize,
    pub forced: bool,

    /// Reclamation outcome
    pub freed_regions: usize,
    pub freed_bytes: usize,
    pub promoted_regions: usize,
    pub bitmap_cleared_regions: usize,

    /// `clear_from_space` ran for this epoch
    pub completed: bool,
}

impl CycleStats {
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            ..Default::default()
        }
    }

    /// Time spent holding the region lock in both phases
    pub fn total_ns(&self) -> u64 {
        self.plan_ns + self.reclaim_ns
    }
}

/// Cycle Statistics Collector - aggregates statistics across all epochs
pub struct CycleStatsCollector {
    /// Epoch between planning and reclamation
    current_cycle: RwLock<Option<CycleStats>>,

    /// Completed epochs (last N)
    history: RwLock<VecDeque<CycleStats>>,
    max_history: usize,

    /// Aggregated statistics
    total_cycles: AtomicU64,
    total_plan_ns: AtomicU64,
    total_reclaim_ns: AtomicU64,
    total_freed_bytes: AtomicUsize,
    total_evacuated_bytes: AtomicUsize,
    peak_lock_hold_ns: AtomicU64,
}

impl CycleStatsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            current_cycle: RwLock::new(None),
            history: RwLock::new(VecDeque::with_capacity(max_history)),
            max_history,
            total_cycles: AtomicU64::new(0),
            total_plan_ns: AtomicU64::new(0),
            total_reclaim_ns: AtomicU64::new(0),
            total_freed_bytes: AtomicUsize::new(0),
            total_evacuated_bytes: AtomicUsize::new(0),
            peak_lock_hold_ns: AtomicU64::new(0),
        }
    }

    /// Open a cycle from the result of `set_from_space`
    ///
    /// A cycle left open by a previous plan without reclamation is archived
    /// as incomplete.
    pub fn record_plan(&self, plan: &EvacuationPlan, elapsed: Duration) {
        let mut stats = CycleStats::new(plan.epoch);
        stats.plan_ns = elapsed.as_nanos() as u64;
        stats.evacuated_regions = plan.evacuated_regions;
        stats.retained_regions = plan.retained_regions;
        stats.evacuated_bytes = plan.evacuated_bytes;
        stats.forced = plan.forced;

        self.total_plan_ns.fetch_add(stats.plan_ns, Ordering::Relaxed);
        self.total_evacuated_bytes
            .fetch_add(plan.evacuated_bytes, Ordering::Relaxed);
        self.peak_lock_hold_ns
            .fetch_max(stats.plan_ns, Ordering::Relaxed);

        if let Some(abandoned) = self.current_cycle.write().replace(stats) {
            self.archive(abandoned);
        }
    }

    /// Close the open cycle with the result of `clear_from_space`
    pub fn record_reclaim(&self, summary: &ReclaimSummary, elapsed: Duration) {
        let reclaim_ns = elapsed.as_nanos() as u64;
        self.total_reclaim_ns.fetch_add(reclaim_ns, Ordering::Relaxed);
        self.total_freed_bytes
            .fetch_add(summary.freed_bytes, Ordering::Relaxed);
        self.peak_lock_hold_ns.fetch_max(reclaim_ns, Ordering::Relaxed);

        let mut stats = self
            .current_cycle
            .write()
            .take()
            .unwrap_or_else(|| CycleStats::new(summary.epoch));
        stats.reclaim_ns = reclaim_ns;
        stats.freed_regions = summary.freed_regions;
        stats.freed_bytes = summary.freed_bytes;
        stats.promoted_regions = summary.promoted_regions;
        stats.bitmap_cleared_regions = summary.bitmap_cleared_regions;
        stats.completed = true;
        self.archive(stats);
    }

    fn archive(&self, stats: CycleStats) {
        self.total_cycles.fetch_add(1, Ordering::Relaxed);
        let mut history = self.history.write();
        if self.max_history == 0 {
            return;
        }
        while history.len() >= self.max_history {
            history.pop_front();
        }
        history.push_back(stats);
    }

    /// Get current cycle stats (between planning and reclamation)
    pub fn current_cycle(&self) -> Option<CycleStats> {
        self.current_cycle.read().clone()
    }

    /// Get aggregated statistics
    pub fn get_aggregated(&self) -> AggregatedStats {
        let cycles = self.total_cycles.load(Ordering::Relaxed);
        let plan = self.total_plan_ns.load(Ordering::Relaxed);
        let reclaim = self.total_reclaim_ns.load(Ordering::Relaxed);
        AggregatedStats {
            total_cycles: cycles,
            total_plan_ns: plan,
            total_reclaim_ns: reclaim,
            total_freed_bytes: self.total_freed_bytes.load(Ordering::Relaxed),
            total_evacuated_bytes: self.total_evacuated_bytes.load(Ordering::Relaxed),
            avg_cycle_ns: if cycles > 0 {
                (plan + reclaim) / cycles
            } else {
                0
            },
            peak_lock_hold_ns: self.peak_lock_hold_ns.load(Ordering::Relaxed),
        }
    }

    /// Get history of recent cycles, oldest first
    pub fn get_history(&self) -> Vec<CycleStats> {
        self.history.read().iter().cloned().collect()
    }

    /// Reset all statistics
    pub fn reset(&self) {
        *self.current_cycle.write() = None;
        self.history.write().clear();
        self.total_cycles.store(0, Ordering::Relaxed);
        self.total_plan_ns.store(0, Ordering::Relaxed);
        self.total_reclaim_ns.store(0, Ordering::Relaxed);
        self.total_freed_bytes.store(0, Ordering::Relaxed);
        self.total_evacuated_bytes.store(0, Ordering::Relaxed);
        self.peak_lock_hold_ns.store(0, Ordering::Relaxed);
    }
}

impl Default for CycleStatsCollector {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Aggregated statistics across all cycles
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedStats {
    pub total_cycles: u64,
    pub total_plan_ns: u64,
    pub total_reclaim_ns: u64,
    pub total_freed_bytes: usize,
    pub total_evacuated_bytes: usize,
    pub avg_cycle_ns: u64,
    pub peak_lock_hold_ns: u64,
}

impl AggregatedStats {
    /// Get peak lock hold time in milliseconds
    pub fn peak_lock_hold_ms(&self) -> f64 {
        self.peak_lock_hold_ns as f64 / 1_000_000.0
    }
}
