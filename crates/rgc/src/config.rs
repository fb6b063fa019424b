//! Configuration Module - Region Space Parameters
//!
//! Manages all configuration parameters for a region space.
//! The region size and evacuation threshold trade pause time against
//! copying work; the capacity fixes the number of regions for the
//! lifetime of the space.

use crate::heap::page;

/// Configuration for a [`RegionSpace`](crate::heap::RegionSpace)
///
/// # Examples
///
/// ```rust
/// use rgc::SpaceConfig;
///
/// // Use default configuration
/// let config = SpaceConfig::default();
///
/// // Small space for a test harness
/// let config = SpaceConfig {
///     capacity: 8 * 256 * 1024,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SpaceConfig {
    /// Name of the space, used in dumps and log lines
    ///
    /// Default: "region space"
    pub name: String,

    /// Total capacity in bytes
    ///
    /// Must be an exact multiple of `region_size`.
    /// Default: 64MB
    pub capacity: usize,

    /// Size of one region in bytes
    ///
    /// Must be a power of two and a multiple of the system page size.
    /// Objects larger than one region span several contiguous regions.
    ///
    /// Default: 256KB
    pub region_size: usize,

    /// Minimum object alignment in bytes
    ///
    /// Also the granule of the live bitmap (one bit per `alignment` bytes).
    /// Default: 8
    pub alignment: usize,

    /// Live-percent threshold below which a region is evacuated
    ///
    /// A non-large region whose live bytes are less than this percent of
    /// its allocated bytes (rounded up to a region) is copied out.
    ///
    /// Recommended values:
    /// - Aggressive compaction: 90
    /// - Balanced: 75
    /// - Minimal copying: 25-50
    ///
    /// Default: 75
    pub evacuate_live_percent_threshold: usize,

    /// Zero and release the pages of regions reclaimed by a collection
    ///
    /// Reclaimed regions are handed out again for bump allocation, which
    /// expects zeroed memory.
    /// Default: true
    pub zero_released_regions: bool,

    /// Enable verbose logging of collection boundaries
    ///
    /// Default: false
    pub verbose: bool,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        SpaceConfig {
            name: "region space".to_string(),
            capacity: 64 * MB,
            region_size: DEFAULT_REGION_SIZE,
            alignment: DEFAULT_ALIGNMENT,
            evacuate_live_percent_threshold: DEFAULT_EVACUATE_LIVE_PERCENT_THRESHOLD,
            zero_released_regions: true,
            verbose: false,
        }
    }
}

impl SpaceConfig {
    /// Number of regions this configuration produces
    pub fn num_regions(&self) -> usize {
        self.capacity / self.region_size
    }

    /// Validate configuration
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rgc::SpaceConfig;
    ///
    /// let config = SpaceConfig {
    ///     capacity: 1000,  // Not a multiple of the region size
    ///     ..Default::default()
    /// };
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Region size validation
        if !self.region_size.is_power_of_two() {
            return Err(ConfigError::InvalidRegionSize(format!(
                "region_size ({}) must be a power of two",
                self.region_size
            )));
        }

        if !page::is_page_aligned(self.region_size) {
            return Err(ConfigError::InvalidRegionSize(format!(
                "region_size ({}) must be a multiple of the page size ({})",
                self.region_size,
                page::get_page_size()
            )));
        }

        // The fast-path cursor packs an in-region offset into 32 bits.
        if self.region_size > MAX_REGION_SIZE {
            return Err(ConfigError::InvalidRegionSize(format!(
                "region_size ({}) must not exceed {}",
                self.region_size, MAX_REGION_SIZE
            )));
        }

        // Capacity validation
        if self.capacity == 0 {
            return Err(ConfigError::InvalidCapacity(
                "capacity must be > 0".to_string(),
            ));
        }

        if self.capacity % self.region_size != 0 {
            return Err(ConfigError::InvalidCapacity(format!(
                "capacity ({}) must be a multiple of region_size ({})",
                self.capacity, self.region_size
            )));
        }

        if self.num_regions() > MAX_REGIONS {
            return Err(ConfigError::InvalidCapacity(format!(
                "capacity yields {} regions, at most {} are supported",
                self.num_regions(),
                MAX_REGIONS
            )));
        }

        // Alignment validation
        if !self.alignment.is_power_of_two() || self.alignment < DEFAULT_ALIGNMENT {
            return Err(ConfigError::InvalidAlignment(format!(
                "alignment ({}) must be a power of two >= {}",
                self.alignment, DEFAULT_ALIGNMENT
            )));
        }

        if self.alignment > self.region_size {
            return Err(ConfigError::InvalidAlignment(
                "alignment cannot exceed region_size".to_string(),
            ));
        }

        // Threshold validation
        if self.evacuate_live_percent_threshold > 100 {
            return Err(ConfigError::InvalidThreshold(format!(
                "evacuate_live_percent_threshold ({}) must be <= 100",
                self.evacuate_live_percent_threshold
            )));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - RGC_CAPACITY
    /// - RGC_REGION_SIZE
    /// - RGC_EVACUATE_THRESHOLD
    /// - RGC_VERBOSE
    ///
    /// # Examples
    ///
    /// ```bash
    /// export RGC_CAPACITY=268435456   # 256MB
    /// export RGC_EVACUATE_THRESHOLD=50
    /// export RGC_VERBOSE=1
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RGC_CAPACITY") {
            if let Ok(size) = val.parse::<usize>() {
                config.capacity = size;
            }
        }

        if let Ok(val) = std::env::var("RGC_REGION_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.region_size = size;
            }
        }

        if let Ok(val) = std::env::var("RGC_EVACUATE_THRESHOLD") {
            if let Ok(percent) = val.parse::<usize>() {
                config.evacuate_live_percent_threshold = percent;
            }
        }

        if let Ok(val) = std::env::var("RGC_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    #[error("Invalid region size: {0}")]
    InvalidRegionSize(String),

    #[error("Invalid alignment: {0}")]
    InvalidAlignment(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),
}

// ============================================================================
// CONSTANTS
// ============================================================================

pub const KB: usize = 1024;
pub const MB: usize = 1024 * 1024;

/// Default region size: 256KB
pub const DEFAULT_REGION_SIZE: usize = 256 * KB;

/// Default object alignment: 8 bytes
pub const DEFAULT_ALIGNMENT: usize = 8;

/// Default evacuation threshold: regions under 75% live are evacuated
pub const DEFAULT_EVACUATE_LIVE_PERCENT_THRESHOLD: usize = 75;

/// Largest supported region (in-region offsets must fit in 32 bits)
pub const MAX_REGION_SIZE: usize = 1 << 31;

/// Largest supported region count (region indices must fit in 32 bits)
pub const MAX_REGIONS: usize = (u32::MAX - 1) as usize;
