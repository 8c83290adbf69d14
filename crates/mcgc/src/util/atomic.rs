//! Atomic Utilities
//!
//! Helper functions for atomic operations and for word-sized accesses to
//! heap slots that may race with marking threads.

use super::Address;
use std::sync::atomic::{AtomicUsize, Ordering};

/// AtomicUtils - utility for atomic operations
pub struct AtomicUtils;

impl AtomicUtils {
    /// Atomic fetch-add with saturation
    ///
    /// Does not overflow, saturates at max value. Returns the previous value.
    pub fn saturating_add(atomic: &AtomicUsize, value: usize) -> usize {
        let mut current = atomic.load(Ordering::Relaxed);

        loop {
            let new_value = current.saturating_add(value);

            match atomic.compare_exchange_weak(
                current,
                new_value,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomic fetch-sub with saturation at zero. Returns the previous value.
    pub fn saturating_sub(atomic: &AtomicUsize, value: usize) -> usize {
        let mut current = atomic.load(Ordering::Relaxed);

        loop {
            let new_value = current.saturating_sub(value);

            match atomic.compare_exchange_weak(
                current,
                new_value,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(actual) => current = actual,
            }
        }
    }

    /// Relaxed load of a word-aligned slot
    ///
    /// # Safety
    /// `slot` must be a valid, word-aligned address for the whole call.
    #[inline]
    pub unsafe fn load_word(slot: Address) -> usize {
        (*(slot as *const AtomicUsize)).load(Ordering::Relaxed)
    }

    /// Relaxed store to a word-aligned slot
    ///
    /// # Safety
    /// `slot` must be a valid, writable, word-aligned address.
    #[inline]
    pub unsafe fn store_word(slot: Address, value: usize) {
        (*(slot as *const AtomicUsize)).store(value, Ordering::Relaxed)
    }
}
