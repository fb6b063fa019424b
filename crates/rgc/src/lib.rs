//! # RGC - Region Space for an Evacuating Collector
//!
//! RGC manages a contiguous heap split into fixed-size regions for a copying
//! (evacuating) garbage collector. It hands out memory to mutator threads and
//! to the collector's copying phase, and at each collection boundary decides
//! which regions are evacuated and which are kept in place.
//!
//! ## Overview
//!
//! - **Region-Based Space**: one mapping, equal regions, one lock for the table
//! - **Lock-Free Bump Allocation**: current and evacuation regions are
//!   published through atomic cursors
//! - **Thread-Local Allocation Buffers (TLAB)**: a mutator thread owns a whole
//!   region and allocates without any shared state
//! - **Large Objects**: objects above one region occupy a run of contiguous
//!   regions, freed as a unit
//! - **Evacuation Planning**: live-percent threshold per region, with
//!   whole-chain decisions for large objects
//! - **Evacuation Reserve**: mutators never take more than half the regions
//!
//! ## Quick Start
//!
//! ```rust
//! use rgc::{RegionSpace, SpaceConfig};
//!
//! fn main() -> Result<(), rgc::RgcError> {
//!     let space = RegionSpace::create(SpaceConfig {
//!         capacity: 8 * 256 * 1024,
//!         ..Default::default()
//!     })?;
//!
//!     // Mutator allocation
//!     let obj = space.alloc(64, 8)?;
//!
//!     // Mark phase reports liveness, then the collector plans the epoch
//!     space.live_bitmap().set(obj.addr);
//!     space.record_live_bytes(0, obj.bytes_allocated)?;
//!     let plan = space.set_from_space(None, false);
//!
//!     // ... copy survivors with `alloc_for_evacuation` ...
//!
//!     let summary = space.clear_from_space();
//!     assert_eq!(plan.epoch, summary.epoch);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Mutator Threads                      │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐               │
//! │  │  TLAB    │  │  TLAB    │  │  alloc   │               │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘               │
//! │       │             │             │ (cursor CAS)        │
//! └───────┼─────────────┼─────────────┼─────────────────────┘
//!         ▼             ▼             ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     RegionSpace                         │
//! │   Free ─▶ Allocated / Large+Tails (ToSpace)             │
//! │                  │ set_from_space                       │
//! │                  ▼                                      │
//! │        FromSpace          UnevacFromSpace               │
//! │            │ clear_from_space     │                     │
//! │            ▼                      ▼                     │
//! │          Free                  ToSpace                  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Collection Boundaries
//!
//! 1. **Revoke TLABs**: `revoke_all_thread_local_buffers`
//! 2. **Mark**: the collector feeds `record_live_bytes` and the live bitmap
//! 3. **Plan**: `set_from_space` advances the epoch and flips every non-free
//!    region to FromSpace or UnevacFromSpace
//! 4. **Copy**: survivors go to `alloc_for_evacuation`
//! 5. **Reclaim**: `clear_from_space` frees FromSpace, promotes the rest
//!
//! ## Thread Safety
//!
//! - `RegionSpace` is `Send + Sync`
//! - Shared allocation is a CAS on the cursor; a new region needs the lock
//! - TLAB allocation touches only the owning thread's buffer
//! - Lock order: registry locks, region lock, thread TLAB lock
//!
//! ## Modules
//!
//! - [`allocator`]: Allocation paths (cursor, TLAB, large objects)
//! - [`barrier`]: Read-barrier trap table kept in step with planning
//! - [`config`]: Space configuration and validation
//! - [`error`]: Error types for all RGC operations
//! - [`heap`]: Regions, region table, evacuation planning, the space itself
//! - [`logging`]: Structured space events
//! - [`runtime`]: Mutator thread registry
//! - [`stats`]: Space and per-epoch statistics
//! - [`util`]: Utility functions and helpers

// Core modules
pub mod config;
pub mod error;

// Memory management
pub mod allocator;
pub mod heap;

// Collector integration
pub mod barrier;
pub mod runtime;

// Monitoring
pub mod logging;
pub mod stats;

// Utilities
pub mod util;

// Re-export main types for convenience
pub use allocator::Allocation;
pub use barrier::{ReadBarrierTable, RegionTrapTable};
pub use config::SpaceConfig;
pub use error::{Result, RgcError};
pub use heap::{EvacuationPlan, ReclaimSummary, Region, RegionSpace, RegionState, RegionType};
pub use logging::SpaceEvent;
pub use runtime::{MutatorId, MutatorThread, ThreadRegistry};
pub use stats::SpaceStats;

/// RGC version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create a region space with configuration from the environment
///
/// Reads `RGC_*` variables (see [`SpaceConfig::from_env`]).
///
/// # Examples
///
/// ```rust
/// let space = rgc::init()?;
/// assert!(space.num_regions() > 0);
/// # Ok::<(), rgc::RgcError>(())
/// ```
pub fn init() -> Result<RegionSpace> {
    RegionSpace::create(SpaceConfig::from_env())
}

/// Create a region space with the given configuration
pub fn init_with_config(config: SpaceConfig) -> Result<RegionSpace> {
    RegionSpace::create(config)
}
