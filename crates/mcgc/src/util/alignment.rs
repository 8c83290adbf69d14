//! Alignment Utilities
//!
//! Helper functions for memory alignment. Every alignment passed here must
//! be a power of two.

/// Alignment - utility for alignment operations
pub struct Alignment;

impl Alignment {
    /// Align value up to boundary
    ///
    /// # Examples
    /// ```
    /// use mcgc::util::Alignment;
    /// assert_eq!(Alignment::align_up(100, 16), 112);
    /// assert_eq!(Alignment::align_up(64, 16), 64);
    /// ```
    pub fn align_up(value: usize, alignment: usize) -> usize {
        debug_assert!(alignment.is_power_of_two());
        (value + alignment - 1) & !(alignment - 1)
    }

    /// Align value up, returning None on overflow
    pub fn checked_align_up(value: usize, alignment: usize) -> Option<usize> {
        debug_assert!(alignment.is_power_of_two());
        value
            .checked_add(alignment - 1)
            .map(|v| v & !(alignment - 1))
    }

    /// Align value down to boundary
    pub fn align_down(value: usize, alignment: usize) -> usize {
        debug_assert!(alignment.is_power_of_two());
        value & !(alignment - 1)
    }

    /// Check if value is aligned
    pub fn is_aligned(value: usize, alignment: usize) -> bool {
        value & (alignment - 1) == 0
    }
}
