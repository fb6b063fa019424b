//! Error Module - RGC Error Types
//!
//! Defines the error types returned by region space operations.
//!
//! # Error Categories
//!
//! ## Allocation Errors
//! - `OutOfMemory` - No region (or no room in the current region) for the request.
//!   Always recoverable: the caller triggers a collection and retries.
//!
//! ## Construction Errors
//! - `HeapInitialization` - The space could not be created
//! - `VirtualMemoryError` - The OS refused the backing mapping
//! - `Configuration` - `SpaceConfig` failed validation
//!
//! ## Caller Errors
//! - `InvalidArgument` - Zero size, bad alignment, address outside the space
//! - `InvalidState` - Operation not legal for the region's current state
//!
//! Invariant violations inside the region table are not represented here.
//! They are fatal: the table is dumped to the log and the process panics
//! (see [`crate::heap::table::RegionTable::fatal`]).

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all RGC operations
///
/// # Examples
///
/// ```rust
/// use rgc::error::RgcError;
///
/// fn handle_error(err: RgcError) {
///     match err {
///         RgcError::OutOfMemory { requested, available } => {
///             eprintln!("OOM: requested {}, available {}", requested, available);
///         }
///         _ => eprintln!("Other error: {}", err),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum RgcError {
    /// Out of memory - no region could satisfy the request
    ///
    /// **When returned:** the current region is full and no Free region may be
    /// handed out (none left, or the evacuation reserve would be breached).
    ///
    /// **Recovery strategy:** trigger a collection and retry.
    #[error("Out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },

    /// Space construction failed
    ///
    /// **Recovery strategy:** cannot recover, the space is never created.
    #[error("Heap initialization failed: {0}")]
    HeapInitialization(String),

    /// Virtual memory error
    ///
    /// **When returned:** the anonymous mapping backing the space failed.
    #[error("Virtual memory error: {0}")]
    VirtualMemoryError(String),

    /// Configuration error
    ///
    /// **Example scenarios:**
    /// - Capacity not a multiple of the region size
    /// - Region size not a power of two
    /// - Evacuation threshold above 100
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid argument
    ///
    /// **Example scenarios:**
    /// - Zero-byte allocation
    /// - Alignment not a power of two
    /// - Address outside the space
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid state
    ///
    /// **When returned:** a caller-visible operation was attempted on a
    /// region in the wrong state (e.g. freeing a large object at an address
    /// whose region is not a large head).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl RgcError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RgcError::OutOfMemory { .. })
    }

    /// Check if this error indicates a bug in the caller or in RGC
    pub fn is_bug(&self) -> bool {
        matches!(self, RgcError::InvalidState { .. })
    }

    pub(crate) fn out_of_memory(requested: usize, available: usize) -> Self {
        RgcError::OutOfMemory {
            requested,
            available,
        }
    }
}

impl From<ConfigError> for RgcError {
    fn from(err: ConfigError) -> Self {
        RgcError::Configuration(err.to_string())
    }
}

/// Result type alias for RGC operations
pub type Result<T> = std::result::Result<T, RgcError>;
