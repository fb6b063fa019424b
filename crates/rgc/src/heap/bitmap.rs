//! Live Bitmap - Object Start Addresses Across the Whole Space
//!
//! One bit per `granularity` bytes (the object alignment) covering every
//! region of the space. The external mark phase sets the bit of each live
//! object's start address; the region space clears whole region runs at once
//! when it promotes fully-live regions back to to-space.
//!
//! Bitmap Structure:
//! ```text
//! Space: 8 regions x 256KB = 2MB
//! Granularity: 8 bytes per bit
//! Bitmap size: 2MB / 8 = 262,144 bits = 4,096 words
//!
//! Object at begin + 0x1040:
//! - Bit index: 0x1040 / 8 = 520
//! - Word index: 520 / 64 = 8
//! - Bit offset: 520 % 64 = 8
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// LiveBitmap - bitmap of object start addresses for a contiguous space
pub struct LiveBitmap {
    /// Raw bitmap data, 64 granules per word
    bits: Box<[AtomicU64]>,

    /// First covered address
    base_address: usize,

    /// Covered bytes
    capacity: usize,

    /// Bytes per bit
    granularity: usize,
}

impl LiveBitmap {
    /// Create a cleared bitmap covering `[base_address, base_address + capacity)`
    ///
    /// # Arguments
    /// * `base_address` - First covered address
    /// * `capacity` - Covered bytes
    /// * `granularity` - Bytes per bit, a power of two
    pub fn new(base_address: usize, capacity: usize, granularity: usize) -> Self {
        debug_assert!(granularity.is_power_of_two());
        let bit_count = capacity.div_ceil(granularity);
        let word_count = bit_count.div_ceil(64);

        let bits = (0..word_count).map(|_| AtomicU64::new(0)).collect();

        Self {
            bits,
            base_address,
            capacity,
            granularity,
        }
    }

    /// Check if address is covered by the bitmap
    pub fn covers(&self, address: usize) -> bool {
        address >= self.base_address && address < self.base_address + self.capacity
    }

    /// Set the bit for `address`, returning whether it was already set
    ///
    /// Addresses outside the covered range are ignored.
    pub fn set(&self, address: usize) -> bool {
        if !self.covers(address) {
            return false;
        }
        let (word, mask) = self.word_and_mask(self.bit_index(address));
        // Relaxed: ordering against object contents is the marker's concern
        self.bits[word].fetch_or(mask, Ordering::Relaxed) & mask != 0
    }

    /// Check the bit for `address`
    pub fn test(&self, address: usize) -> bool {
        if !self.covers(address) {
            return false;
        }
        let (word, mask) = self.word_and_mask(self.bit_index(address));
        self.bits[word].load(Ordering::Relaxed) & mask != 0
    }

    /// Clear the bit for `address`
    pub fn clear(&self, address: usize) {
        if !self.covers(address) {
            return;
        }
        let (word, mask) = self.word_and_mask(self.bit_index(address));
        self.bits[word].fetch_and(!mask, Ordering::Relaxed);
    }

    /// Clear every bit for addresses in `[begin, end)`
    ///
    /// Whole words are cleared with a single store; only the partial words
    /// at either end need a read-modify-write.
    pub fn clear_range(&self, begin: usize, end: usize) {
        let begin = begin.max(self.base_address);
        let end = end.min(self.base_address + self.capacity);
        if begin >= end {
            return;
        }

        let first_bit = (begin - self.base_address).div_ceil(self.granularity);
        let last_bit = (end - self.base_address).div_ceil(self.granularity);
        if first_bit >= last_bit {
            return;
        }
        let first_word = first_bit / 64;
        let last_word = last_bit / 64;

        if first_word == last_word {
            let mask = Self::bits_between(first_bit % 64, last_bit % 64);
            self.bits[first_word].fetch_and(!mask, Ordering::Relaxed);
            return;
        }

        if first_bit % 64 != 0 {
            let mask = Self::bits_between(first_bit % 64, 64);
            self.bits[first_word].fetch_and(!mask, Ordering::Relaxed);
        } else {
            self.bits[first_word].store(0, Ordering::Relaxed);
        }

        for word in &self.bits[first_word + 1..last_word] {
            word.store(0, Ordering::Relaxed);
        }

        if last_bit % 64 != 0 {
            let mask = Self::bits_between(0, last_bit % 64);
            self.bits[last_word].fetch_and(!mask, Ordering::Relaxed);
        }
    }

    /// Clear all bits
    pub fn clear_all(&self) {
        for word in self.bits.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Visit every set address in `[begin, end)` in ascending order
    pub fn visit_marked_range<F: FnMut(usize)>(&self, begin: usize, end: usize, mut visitor: F) {
        let begin = begin.max(self.base_address);
        let end = end.min(self.base_address + self.capacity);
        if begin >= end {
            return;
        }

        let first_bit = (begin - self.base_address).div_ceil(self.granularity);
        let last_bit = (end - self.base_address).div_ceil(self.granularity);

        let mut word_index = first_bit / 64;
        while word_index * 64 < last_bit {
            let mut word = self.bits[word_index].load(Ordering::Relaxed);
            while word != 0 {
                let bit = word_index * 64 + word.trailing_zeros() as usize;
                word &= word - 1;
                if bit < first_bit {
                    continue;
                }
                if bit >= last_bit {
                    return;
                }
                visitor(self.base_address + bit * self.granularity);
            }
            word_index += 1;
        }
    }

    /// Count set bits in `[begin, end)`
    pub fn count_marked_range(&self, begin: usize, end: usize) -> usize {
        let mut count = 0;
        self.visit_marked_range(begin, end, |_| count += 1);
        count
    }

    /// Check that no bit is set
    pub fn is_clear(&self) -> bool {
        self.bits.iter().all(|w| w.load(Ordering::Relaxed) == 0)
    }

    /// Bytes per bit
    pub fn granularity(&self) -> usize {
        self.granularity
    }

    /// Bitmap size in bytes
    pub fn size_bytes(&self) -> usize {
        self.bits.len() * 8
    }

    fn bit_index(&self, address: usize) -> usize {
        (address - self.base_address) / self.granularity
    }

    fn word_and_mask(&self, bit: usize) -> (usize, u64) {
        (bit / 64, 1u64 << (bit % 64))
    }

    /// Mask of bits `[from, to)` within one word, `to <= 64`
    fn bits_between(from: usize, to: usize) -> u64 {
        let upper = if to == 64 { u64::MAX } else { (1u64 << to) - 1 };
        let lower = (1u64 << from) - 1;
        upper & !lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 0x4000_0000;

    #[test]
    fn test_set_and_test() {
        let bitmap = LiveBitmap::new(BASE, 1 << 20, 8);

        assert!(!bitmap.set(BASE));
        assert!(bitmap.set(BASE));
        assert!(!bitmap.set(BASE + 8));

        assert!(bitmap.test(BASE));
        assert!(bitmap.test(BASE + 8));
        assert!(!bitmap.test(BASE + 16));
    }

    #[test]
    fn test_out_of_range_ignored() {
        let bitmap = LiveBitmap::new(BASE, 4096, 8);

        assert!(!bitmap.set(BASE - 8));
        assert!(!bitmap.set(BASE + 4096));
        assert!(!bitmap.test(BASE + 4096));
        assert!(bitmap.is_clear());
    }

    #[test]
    fn test_clear_range_partial_words() {
        let bitmap = LiveBitmap::new(BASE, 1 << 16, 8);
        for i in 0..1024 {
            bitmap.set(BASE + i * 8);
        }

        // Clear granules 3..700, spanning partial first and last words
        bitmap.clear_range(BASE + 3 * 8, BASE + 700 * 8);

        assert!(bitmap.test(BASE));
        assert!(bitmap.test(BASE + 2 * 8));
        assert!(!bitmap.test(BASE + 3 * 8));
        assert!(!bitmap.test(BASE + 699 * 8));
        assert!(bitmap.test(BASE + 700 * 8));
        assert_eq!(bitmap.count_marked_range(BASE, BASE + (1 << 16)), 1024 - 697);
    }

    #[test]
    fn test_clear_range_within_one_word() {
        let bitmap = LiveBitmap::new(BASE, 4096, 8);
        for i in 0..10 {
            bitmap.set(BASE + i * 8);
        }

        bitmap.clear_range(BASE + 16, BASE + 40);

        let marked: Vec<usize> = {
            let mut v = Vec::new();
            bitmap.visit_marked_range(BASE, BASE + 4096, |a| v.push((a - BASE) / 8));
            v
        };
        assert_eq!(marked, vec![0, 1, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_visit_marked_range_bounds() {
        let bitmap = LiveBitmap::new(BASE, 1 << 16, 8);
        bitmap.set(BASE + 64);
        bitmap.set(BASE + 1024);
        bitmap.set(BASE + 4096);

        let mut seen = Vec::new();
        bitmap.visit_marked_range(BASE + 65, BASE + 4096, |a| seen.push(a));

        assert_eq!(seen, vec![BASE + 1024]);
    }

    #[test]
    fn test_clear_all() {
        let bitmap = LiveBitmap::new(BASE, 1 << 16, 8);
        bitmap.set(BASE);
        bitmap.set(BASE + 8000);

        bitmap.clear_all();

        assert!(bitmap.is_clear());
    }
}
