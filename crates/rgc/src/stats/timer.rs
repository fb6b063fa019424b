//! Phase Timer - Timing Utilities
//!
//! Times planning and reclamation so per-cycle statistics can report how
//! long the region lock was held.

use std::time::{Duration, Instant};

/// PhaseTimer - timer for one collection phase
pub struct PhaseTimer {
    start: Instant,
}

impl PhaseTimer {
    /// Start timing
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get elapsed nanoseconds
    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed().as_nanos() as u64
    }

    /// Get elapsed microseconds
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed().as_micros() as u64
    }
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::start()
    }
}
