//! Scoped guards over the heap-state counters
//!
//! Each guard bumps a saturating counter on construction and decrements it
//! on drop, so early returns and unwinding release it as well. Guards nest.

use crate::heap::HeapState;
use std::sync::Arc;

/// Forbids collections while held
///
/// `GarbageCollector::collect` returns `CollectionDisallowed`, and an
/// allocation failure is reported without the collect-and-retry step.
#[must_use = "the scope ends when the guard is dropped"]
pub struct DisallowGcScope {
    state: Arc<HeapState>,
}

impl DisallowGcScope {
    pub fn new(state: Arc<HeapState>) -> Self {
        state.enter_disallow_gc();
        Self { state }
    }
}

impl Drop for DisallowGcScope {
    fn drop(&mut self) {
        self.state.leave_disallow_gc();
    }
}

/// Forbids finalizing marking while held
#[must_use = "the scope ends when the guard is dropped"]
pub struct NoFinalizerScope {
    state: Arc<HeapState>,
}

impl NoFinalizerScope {
    pub fn new(state: Arc<HeapState>) -> Self {
        state.enter_no_finalizers();
        Self { state }
    }
}

impl Drop for NoFinalizerScope {
    fn drop(&mut self) {
        self.state.leave_no_finalizers();
    }
}

/// Forbids allocation while held; active while prefinalizers run
#[must_use = "the scope ends when the guard is dropped"]
pub(crate) struct NoAllocationScope<'s> {
    state: &'s HeapState,
}

impl<'s> NoAllocationScope<'s> {
    pub(crate) fn new(state: &'s HeapState) -> Self {
        state.enter_no_allocation();
        Self { state }
    }
}

impl Drop for NoAllocationScope<'_> {
    fn drop(&mut self) {
        self.state.leave_no_allocation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_nest() {
        let state = Arc::new(HeapState::default());
        {
            let _outer = DisallowGcScope::new(state.clone());
            {
                let _inner = DisallowGcScope::new(state.clone());
                assert!(!state.is_gc_allowed());
            }
            assert!(!state.is_gc_allowed());
        }
        assert!(state.is_gc_allowed());
    }

    #[test]
    fn test_scope_released_on_unwind() {
        let state = Arc::new(HeapState::default());
        let cloned = state.clone();
        let result = std::panic::catch_unwind(move || {
            let _scope = NoFinalizerScope::new(cloned);
            panic!("unwind through the scope");
        });
        assert!(result.is_err());
        assert!(state.are_finalizers_allowed());
    }

    #[test]
    fn test_no_allocation_scope() {
        let state = HeapState::default();
        {
            let _scope = NoAllocationScope::new(&state);
            assert!(!state.is_allocation_allowed());
        }
        assert!(state.is_allocation_allowed());
    }
}
