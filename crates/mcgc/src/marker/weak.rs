//! Weak Slots - References that do not keep their target alive
//!
//! Trace callbacks report weak slots through `Visitor::visit_weak_slot`.
//! Marking does not follow them; the slot is queued here instead. Once the
//! transitive closure is complete, every queued slot whose target stayed
//! white is cleared to zero. Slots whose target survived are recorded for
//! evacuation exactly like strong slots, so they follow moved objects.
//!
//! Processing runs inside the final pause, before prefinalizers, so a
//! prefinalizer never observes a weak slot naming a dead object.
//!
//! Stores into weak slots still run the write barrier: a target written
//! while marking survives the current cycle and is cleared by the next.

use super::engine::MarkingState;
use super::visitor::MarkingContext;
use crate::relocate::record::record_slot;
use crate::util::constants::MIN_VALID_POINTER;
use crate::util::{Address, AtomicUtils};
use crossbeam::queue::SegQueue;

/// Weak slots discovered during marking
///
/// Any marking thread may push; only the collector pops, after marking.
#[derive(Default)]
pub struct WeakSlotWorklist {
    slots: SegQueue<Address>,
}

impl WeakSlotWorklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, slot: Address) {
        self.slots.push(slot);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&self) {
        while self.slots.pop().is_some() {}
    }
}

/// What `process_weak_slots` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeaknessStats {
    pub retained: usize,
    pub cleared: usize,
}

/// Clear weak slots whose target was not marked
///
/// Must run after the transitive closure and before sweeping. In a minor
/// cycle, targets on old pages are outside the collection and kept.
pub fn process_weak_slots(context: &MarkingContext) -> WeaknessStats {
    let heap = context.heap();
    let shared_space_owner = heap.config().is_shared_space_owner;
    let mut stats = WeaknessStats::default();

    while let Some(slot) = context.worklists().weak_slots().slots.pop() {
        // SAFETY: weak slots are reported by trace callbacks of marked
        // objects, which are not swept before this pass.
        let value = unsafe { AtomicUtils::load_word(slot) };
        if value < MIN_VALID_POINTER {
            continue;
        }
        let Some(target) = heap.page_of(value) else {
            continue;
        };
        let Some(header) = target.header_for_payload(value) else {
            continue;
        };

        if !context.in_scope(&target) || context.engine().is_marked(header) {
            if context.is_compacting() {
                if let Some(slot_page) = heap.page_of(slot) {
                    record_slot(&slot_page, slot, &target, shared_space_owner);
                }
            }
            stats.retained += 1;
        } else {
            // SAFETY: see above; the slot is a word of a live object.
            unsafe { AtomicUtils::store_word(slot, 0) };
            stats.cleared += 1;
        }
    }

    if stats.cleared > 0 {
        log::debug!(
            "weak slots: {} cleared, {} retained",
            stats.cleared,
            stats.retained
        );
    }
    stats
}
