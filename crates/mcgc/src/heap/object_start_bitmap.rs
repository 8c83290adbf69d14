//! Object Start Bitmap - Locating headers from interior addresses
//!
//! One bit per allocation granule (16 bytes) of a page. A set bit marks the
//! address of an object or free-block header. Conservative tracing finds
//! the header of an interior pointer by scanning backwards for the nearest
//! set bit.
//!
//! ```text
//! Page: 128KB, granularity 16 bytes
//! Bits: 128KB / 16 = 8192 bits = 128 words
//!
//! header at base + 0x40  -> bit 4
//! interior pointer base + 0x58 -> bit 5, nearest set bit below: 4
//! ```

use crate::util::constants::ALLOCATION_GRANULARITY;
use crate::util::Address;
use std::sync::atomic::{AtomicU64, Ordering};

/// Header-start bitmap for one page
pub struct ObjectStartBitmap {
    base: Address,
    bits: Box<[AtomicU64]>,
}

impl ObjectStartBitmap {
    /// Bitmap covering `size` bytes starting at `base`
    pub fn new(base: Address, size: usize) -> Self {
        let bit_count = size.div_ceil(ALLOCATION_GRANULARITY);
        let word_count = bit_count.div_ceil(64);
        let bits = (0..word_count).map(|_| AtomicU64::new(0)).collect();
        Self { base, bits }
    }

    #[inline]
    fn indices(&self, address: Address) -> (usize, u32) {
        debug_assert!(address >= self.base);
        let bit = (address - self.base) / ALLOCATION_GRANULARITY;
        (bit / 64, (bit % 64) as u32)
    }

    /// Record a header at `address`
    #[inline]
    pub fn set(&self, address: Address) {
        let (word, bit) = self.indices(address);
        if let Some(cell) = self.bits.get(word) {
            cell.fetch_or(1 << bit, Ordering::Release);
        }
    }

    /// Forget a header at `address`
    #[inline]
    pub fn clear(&self, address: Address) {
        let (word, bit) = self.indices(address);
        if let Some(cell) = self.bits.get(word) {
            cell.fetch_and(!(1 << bit), Ordering::Release);
        }
    }

    #[inline]
    pub fn is_set(&self, address: Address) -> bool {
        if address < self.base {
            return false;
        }
        let (word, bit) = self.indices(address);
        self.bits
            .get(word)
            .is_some_and(|cell| cell.load(Ordering::Acquire) & (1 << bit) != 0)
    }

    /// Header address of the object containing `address`, if any header
    /// starts at or below it
    pub fn find_header(&self, address: Address) -> Option<Address> {
        if address < self.base {
            return None;
        }
        let (mut word, bit) = self.indices(address);
        if word >= self.bits.len() {
            return None;
        }

        // Keep bits at or below `bit` in the first word.
        let mask = if bit == 63 { u64::MAX } else { (1u64 << (bit + 1)) - 1 };
        let mut value = self.bits[word].load(Ordering::Acquire) & mask;
        loop {
            if value != 0 {
                let highest = 63 - value.leading_zeros() as usize;
                return Some(self.base + (word * 64 + highest) * ALLOCATION_GRANULARITY);
            }
            if word == 0 {
                return None;
            }
            word -= 1;
            value = self.bits[word].load(Ordering::Acquire);
        }
    }

    /// Clear all bits for headers in `[start, end)`
    pub fn clear_range(&self, start: Address, end: Address) {
        let mut address = start;
        while address < end {
            let (word, bit) = self.indices(address);
            if bit == 0 && address + 64 * ALLOCATION_GRANULARITY <= end {
                if let Some(cell) = self.bits.get(word) {
                    cell.store(0, Ordering::Release);
                }
                address += 64 * ALLOCATION_GRANULARITY;
            } else {
                self.clear(address);
                address += ALLOCATION_GRANULARITY;
            }
        }
    }

    pub fn clear_all(&self) {
        for word in self.bits.iter() {
            word.store(0, Ordering::Release);
        }
    }

    /// Number of recorded headers
    pub fn count(&self) -> usize {
        self.bits
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Address = 0x10_0000;

    #[test]
    fn test_find_header_for_interior_pointer() {
        let bitmap = ObjectStartBitmap::new(BASE, 4096);
        bitmap.set(BASE + 0x40);
        bitmap.set(BASE + 0x80);

        assert_eq!(bitmap.find_header(BASE + 0x58), Some(BASE + 0x40));
        assert_eq!(bitmap.find_header(BASE + 0x80), Some(BASE + 0x80));
        assert_eq!(bitmap.find_header(BASE + 0x20), None);
    }

    #[test]
    fn test_find_header_across_words() {
        let bitmap = ObjectStartBitmap::new(BASE, 64 * 1024);
        bitmap.set(BASE + 16);
        let far = BASE + 200 * ALLOCATION_GRANULARITY + 8;
        assert_eq!(bitmap.find_header(far), Some(BASE + 16));
    }

    #[test]
    fn test_clear_range() {
        let bitmap = ObjectStartBitmap::new(BASE, 64 * 1024);
        for i in 0..300 {
            bitmap.set(BASE + i * ALLOCATION_GRANULARITY);
        }
        bitmap.clear_range(BASE + 16, BASE + 290 * ALLOCATION_GRANULARITY);
        assert!(bitmap.is_set(BASE));
        assert!(!bitmap.is_set(BASE + 16));
        assert!(!bitmap.is_set(BASE + 289 * ALLOCATION_GRANULARITY));
        assert!(bitmap.is_set(BASE + 290 * ALLOCATION_GRANULARITY));
        assert_eq!(bitmap.count(), 11);
    }
}
