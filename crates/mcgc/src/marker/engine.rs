//! Marking Engine - Atomic and non-atomic mark-bit access
//!
//! Both engines honour the same contract. The atomic engine is safe from
//! any thread while marking threads run; the non-atomic engine uses plain
//! read-modify-write sequences and is only sound when a single thread
//! marks. The collector configures one engine per heap, and any cycle that
//! lets mutators run before the closure completes falls back to the atomic
//! engine: their write barriers mark alongside the collecting thread.

use crate::config::GcConfig;
use crate::heap::Space;
use crate::object::ObjectHeader;
use std::sync::atomic::Ordering;

/// Mark-bit operations shared by both engines
pub trait MarkingState {
    /// Transition the mark bit from clear to set
    ///
    /// # Returns
    /// `true` if this call performed the transition
    fn try_mark(&self, header: &ObjectHeader) -> bool;

    fn is_marked(&self, header: &ObjectHeader) -> bool;

    #[inline]
    fn is_unmarked(&self, header: &ObjectHeader) -> bool {
        !self.is_marked(header)
    }

    /// `try_mark` plus adding the object's size to `space` exactly once
    #[inline]
    fn try_mark_and_account_live_bytes(&self, header: &ObjectHeader, space: &Space) -> bool {
        if !self.try_mark(header) {
            return false;
        }
        space
            .live_bytes_counter()
            .fetch_add(header.size(), Ordering::Relaxed);
        true
    }
}

/// Engine for concurrent and parallel marking
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicMarkingState;

impl MarkingState for AtomicMarkingState {
    #[inline]
    fn try_mark(&self, header: &ObjectHeader) -> bool {
        header.try_mark_atomic()
    }

    #[inline]
    fn is_marked(&self, header: &ObjectHeader) -> bool {
        header.is_marked_atomic()
    }
}

/// Engine for single-threaded phases
#[derive(Debug, Clone, Copy, Default)]
pub struct NonAtomicMarkingState;

impl MarkingState for NonAtomicMarkingState {
    #[inline]
    fn try_mark(&self, header: &ObjectHeader) -> bool {
        header.try_mark_non_atomic()
    }

    #[inline]
    fn is_marked(&self, header: &ObjectHeader) -> bool {
        header.is_marked_non_atomic()
    }
}

/// The engine selected for a heap
#[derive(Debug, Clone, Copy)]
pub enum MarkingEngine {
    Atomic(AtomicMarkingState),
    NonAtomic(NonAtomicMarkingState),
}

impl MarkingEngine {
    /// Atomic iff marking threads may run alongside mutators
    pub fn for_config(config: &GcConfig) -> Self {
        if config.concurrent_marking {
            MarkingEngine::Atomic(AtomicMarkingState)
        } else {
            MarkingEngine::NonAtomic(NonAtomicMarkingState)
        }
    }

    /// Engine for one cycle
    ///
    /// Incremental and concurrent cycles run barriers on mutator threads
    /// between steps, so only a single-pause cycle keeps a non-atomic engine.
    pub fn for_cycle(self, single_pause: bool) -> Self {
        if single_pause {
            self
        } else {
            MarkingEngine::Atomic(AtomicMarkingState)
        }
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, MarkingEngine::Atomic(_))
    }
}

impl MarkingState for MarkingEngine {
    #[inline]
    fn try_mark(&self, header: &ObjectHeader) -> bool {
        match self {
            MarkingEngine::Atomic(engine) => engine.try_mark(header),
            MarkingEngine::NonAtomic(engine) => engine.try_mark(header),
        }
    }

    #[inline]
    fn is_marked(&self, header: &ObjectHeader) -> bool {
        match self {
            MarkingEngine::Atomic(engine) => engine.is_marked(header),
            MarkingEngine::NonAtomic(engine) => engine.is_marked(header),
        }
    }
}
