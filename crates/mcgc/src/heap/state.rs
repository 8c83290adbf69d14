//! Heap State - Phase flags and scope counters shared by all components
//!
//! Barriers read the phase flags on every write; RAII scopes bump the
//! counters. Everything is atomic so the record can be shared through an
//! `Arc` between mutator threads and the collector.

use crate::util::AtomicUtils;
use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

bitflags! {
    /// Collector phase as seen by write barriers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PhaseFlags: u32 {
        /// Full-heap marking is in progress
        const MARKING = 1 << 0;
        /// Evacuation candidates were selected for this cycle
        const COMPACTING = 1 << 1;
        /// The heap runs young-generation collections
        const GENERATIONAL = 1 << 2;
        /// Every barrier is disabled by configuration
        const BARRIERS_DISABLED = 1 << 3;
        /// This heap owns the shared space
        const SHARED_SPACE_OWNER = 1 << 4;
        /// A young-generation collection is in progress
        const MINOR_COLLECTION = 1 << 5;
    }
}

/// Shared heap-state record
#[derive(Debug, Default)]
pub struct HeapState {
    phase: AtomicU32,
    disallow_gc: AtomicUsize,
    no_finalizers: AtomicUsize,
    no_allocation: AtomicUsize,
}

impl HeapState {
    pub fn new(initial: PhaseFlags) -> Self {
        Self {
            phase: AtomicU32::new(initial.bits()),
            ..Self::default()
        }
    }

    #[inline]
    pub fn phase(&self) -> PhaseFlags {
        PhaseFlags::from_bits_truncate(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, flags: PhaseFlags) {
        self.phase.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_phase(&self, flags: PhaseFlags) {
        self.phase.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    #[inline]
    pub fn is_marking(&self) -> bool {
        self.phase().contains(PhaseFlags::MARKING)
    }

    // === Scope Counters ===

    pub fn is_gc_allowed(&self) -> bool {
        self.disallow_gc.load(Ordering::Acquire) == 0
    }

    pub fn are_finalizers_allowed(&self) -> bool {
        self.no_finalizers.load(Ordering::Acquire) == 0
    }

    pub fn is_allocation_allowed(&self) -> bool {
        self.no_allocation.load(Ordering::Acquire) == 0
    }

    pub(crate) fn enter_disallow_gc(&self) {
        AtomicUtils::saturating_add(&self.disallow_gc, 1);
    }

    pub(crate) fn leave_disallow_gc(&self) {
        AtomicUtils::saturating_sub(&self.disallow_gc, 1);
    }

    pub(crate) fn enter_no_finalizers(&self) {
        AtomicUtils::saturating_add(&self.no_finalizers, 1);
    }

    pub(crate) fn leave_no_finalizers(&self) {
        AtomicUtils::saturating_sub(&self.no_finalizers, 1);
    }

    pub(crate) fn enter_no_allocation(&self) {
        AtomicUtils::saturating_add(&self.no_allocation, 1);
    }

    pub(crate) fn leave_no_allocation(&self) {
        AtomicUtils::saturating_sub(&self.no_allocation, 1);
    }
}
