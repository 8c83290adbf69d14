//! Range barrier for bulk writes into arrays
//!
//! After a contiguous block of elements has been written (copy, fill,
//! move), every reference inside the block goes through the regular
//! classification. Elements are either single reference words or inline
//! structs whose slots are reported by the element's trace callback.

use super::{WriteBarrier, WriteBarrierKind};
use crate::heap::PhaseFlags;
use crate::object::{TraceCallback, Visitor};
use crate::util::{Address, AtomicUtils};

struct RangeVisitor<'a> {
    barrier: &'a WriteBarrier,
    phase: PhaseFlags,
    fired: usize,
}

impl Visitor for RangeVisitor<'_> {
    fn visit_slot(&mut self, slot: Address) {
        // SAFETY: slots are reported inside the caller's element range.
        let value = unsafe { AtomicUtils::load_word(slot) };
        let decision = self.barrier.classify(slot, value, self.phase);
        if decision.kind != WriteBarrierKind::None {
            self.fired += 1;
        }
        self.barrier.execute(&decision);
    }
}

impl WriteBarrier {
    /// Run the barrier over `count` elements of `element_size` bytes
    ///
    /// Only marking needs range barriers; outside marking this returns
    /// immediately unless the heap is generational.
    ///
    /// # Returns
    /// Number of slots for which a barrier fired
    pub fn dijkstra_range(
        &self,
        first: Address,
        element_size: usize,
        count: usize,
        element_trace: Option<TraceCallback>,
        phase: PhaseFlags,
    ) -> usize {
        if phase.contains(PhaseFlags::BARRIERS_DISABLED)
            || !phase.intersects(PhaseFlags::MARKING | PhaseFlags::GENERATIONAL)
        {
            return 0;
        }
        debug_assert!(element_trace.is_some() || element_size == crate::util::constants::WORD_SIZE);

        let mut visitor = RangeVisitor {
            barrier: self,
            phase,
            fired: 0,
        };
        for index in 0..count {
            let element = first + index * element_size;
            match element_trace {
                Some(trace) => trace(element, &mut visitor),
                None => visitor.visit_slot(element),
            }
        }
        log::trace!(
            "range barrier over {} elements at {:#x}: {} fired",
            count,
            first,
            visitor.fired
        );
        visitor.fired
    }
}
