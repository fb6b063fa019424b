//! Alignment Utilities
//!
//! Helper functions for memory alignment.
//! All alignments passed here must be powers of two.

/// Alignment - utility for alignment operations
pub struct Alignment;

impl Alignment {
    /// Align value up to boundary
    ///
    /// # Examples
    /// ```
    /// use rgc::util::Alignment;
    ///
    /// assert_eq!(Alignment::align_up(100, 8), 104);
    /// assert_eq!(Alignment::align_up(64, 8), 64);
    /// ```
    pub fn align_up(value: usize, alignment: usize) -> usize {
        (value + alignment - 1) & !(alignment - 1)
    }

    /// Align value up, returning `None` on overflow
    pub fn checked_align_up(value: usize, alignment: usize) -> Option<usize> {
        value
            .checked_add(alignment - 1)
            .map(|v| v & !(alignment - 1))
    }

    /// Check if value is aligned
    pub fn is_aligned(value: usize, alignment: usize) -> bool {
        value & (alignment - 1) == 0
    }

    /// Number of `unit`-sized blocks needed to cover `value` bytes
    pub fn blocks(value: usize, unit: usize) -> usize {
        value.div_ceil(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(Alignment::align_up(1, 8), 8);
        assert_eq!(Alignment::align_up(0, 8), 0);
        assert!(Alignment::is_aligned(4096, 4096));
        assert!(!Alignment::is_aligned(4100, 4096));
    }

    #[test]
    fn test_checked_align_up_overflow() {
        assert_eq!(Alignment::checked_align_up(usize::MAX, 8), None);
        assert_eq!(Alignment::checked_align_up(9, 8), Some(16));
    }

    #[test]
    fn test_blocks() {
        assert_eq!(Alignment::blocks(1, 256), 1);
        assert_eq!(Alignment::blocks(256, 256), 1);
        assert_eq!(Alignment::blocks(257, 256), 2);
        assert_eq!(Alignment::blocks(0, 256), 0);
    }
}
