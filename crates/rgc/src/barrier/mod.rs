//! Barrier Module - Read-Barrier Trap Table
//!
//! A concurrent copying collector may use a trap table so the mutator's read
//! barrier only takes its slow path for references into regions that can
//! hold from-space objects. The region space does not implement the barrier
//! itself; it only keeps the table in step with region transitions:
//!
//! 1. `set_from_space` sets every entry, then clears the entries of Free
//!    regions (no from-space object can live there)
//! 2. After the collection the collector clears the table entirely
//!
//! Any type implementing [`ReadBarrierTable`] can be passed in.

pub mod trap_table;

pub use trap_table::RegionTrapTable;

/// Read-barrier trap table notified of region transitions
pub trait ReadBarrierTable: Send + Sync {
    /// Set every entry
    fn set_all(&self);

    /// Clear the entries covering `[begin, end)`
    fn clear_range(&self, begin: usize, end: usize);

    /// Check that no entry is set
    fn is_all_cleared(&self) -> bool;
}
