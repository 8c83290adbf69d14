//! Barrier Module - Write barrier classification and execution
//!
//! Every pointer store into the heap runs a write barrier. The barrier
//! first classifies the write from the collector phase and the flags of
//! the two pages involved, then performs at most a worklist push and a
//! few remembered-set insertions. It never allocates and never blocks.
//!
//! Decision table, first match wins:
//!
//! | # | condition                                        | kind                    |
//! |---|--------------------------------------------------|-------------------------|
//! | 1 | not marking, not old-to-young                    | `None`                  |
//! | 2 | marking, value unmarked                          | `Forward` (Dijkstra)    |
//! | 3 | marking, retreating write into a marked host     | `Backward` (Steele)     |
//! | 4 | old slot page, young value page                  | `GenerationalPrecise`   |
//! | - | (rule 4 when the exact slot is unknown)          | `GenerationalImprecise` |
//!
//! While marking with evacuation candidates selected, the decision also
//! carries the remembered-set entry for the slot (see `relocate::record`).

pub mod range;

use crate::heap::{Heap, PageFlags, PageId, PhaseFlags, RememberedSetType};
use crate::marker::{MarkingEngine, MarkingState, MarkingWorklists};
use crate::object::ObjectHeader;
use crate::relocate::record::{slot_kind, SlotRecord};
use crate::util::constants::MIN_VALID_POINTER;
use crate::util::{Address, AtomicUtils};
use std::sync::Arc;

/// Barrier kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteBarrierKind {
    None,
    /// Mark and push the value
    Forward,
    /// Re-push the host for rescanning
    Backward,
    /// Record the slot offset in `OldToNew`
    GenerationalPrecise,
    /// Record the host's base offset in `OldToNewObjects`
    GenerationalImprecise,
}

/// How the mutator performs the write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WriteHint {
    #[default]
    Normal,
    /// The write may reorder the host behind the marker's scan position,
    /// e.g. filling a backing store that the marker already visited
    Retreating,
}

/// Page-level inputs of a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarrierInputs {
    pub phase: PhaseFlags,
    pub slot_page: PageFlags,
    pub value_page: PageFlags,
    pub value_marked: bool,
    pub host_marked: bool,
    pub hint: WriteHint,
    pub shared_space_owner: bool,
}

/// Pure classification of one write
///
/// Same inputs, same result. Returns the barrier kind and the
/// remembered-set action for evacuation.
pub fn classify_flags(inputs: &BarrierInputs) -> (WriteBarrierKind, SlotRecord) {
    let phase = inputs.phase;
    if phase.contains(PhaseFlags::BARRIERS_DISABLED) {
        return (WriteBarrierKind::None, SlotRecord::Skipped);
    }

    let marking = phase.contains(PhaseFlags::MARKING);
    let old_to_young = phase.contains(PhaseFlags::GENERATIONAL)
        && !inputs.slot_page.contains(PageFlags::YOUNG)
        && inputs.value_page.contains(PageFlags::YOUNG);

    if !marking && !old_to_young {
        return (WriteBarrierKind::None, SlotRecord::Skipped);
    }

    let record = if marking && phase.contains(PhaseFlags::COMPACTING) {
        slot_kind(inputs.slot_page, inputs.value_page, inputs.shared_space_owner)
    } else {
        SlotRecord::Skipped
    };

    let kind = if marking && !inputs.value_marked {
        WriteBarrierKind::Forward
    } else if marking && inputs.hint == WriteHint::Retreating && inputs.host_marked {
        WriteBarrierKind::Backward
    } else if old_to_young {
        WriteBarrierKind::GenerationalPrecise
    } else {
        WriteBarrierKind::None
    };
    (kind, record)
}

/// Page and object metadata attached to a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BarrierParams {
    pub slot_page: Option<PageId>,
    pub slot_offset: u32,
    /// Header of the object holding the slot, 0 if unknown
    pub host: Address,
    pub value_page: Option<PageId>,
    /// Header of the value object, 0 if the value is not a heap object
    pub value: Address,
    pub record: Option<SlotRecord>,
}

/// Result of classifying one write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBarrierDecision {
    pub kind: WriteBarrierKind,
    pub params: BarrierParams,
}

impl WriteBarrierDecision {
    pub const NONE: WriteBarrierDecision = WriteBarrierDecision {
        kind: WriteBarrierKind::None,
        params: BarrierParams {
            slot_page: None,
            slot_offset: 0,
            host: 0,
            value_page: None,
            value: 0,
            record: None,
        },
    };

    /// Nothing to do for this write
    pub fn is_noop(&self) -> bool {
        self.kind == WriteBarrierKind::None
            && !matches!(
                self.params.record,
                Some(SlotRecord::Recorded(_)) | Some(SlotRecord::PinnedTarget)
            )
    }
}

/// Write barrier bound to one heap
pub struct WriteBarrier {
    heap: Arc<Heap>,
    engine: MarkingEngine,
    worklists: Arc<MarkingWorklists>,
}

impl WriteBarrier {
    pub fn new(heap: Arc<Heap>, engine: MarkingEngine, worklists: Arc<MarkingWorklists>) -> Self {
        Self {
            heap,
            engine,
            worklists,
        }
    }

    /// Classify a store of `value` into `slot`
    pub fn classify(&self, slot: Address, value: Address, phase: PhaseFlags) -> WriteBarrierDecision {
        self.classify_with(slot, value, phase, WriteHint::Normal)
    }

    pub fn classify_with(
        &self,
        slot: Address,
        value: Address,
        phase: PhaseFlags,
        hint: WriteHint,
    ) -> WriteBarrierDecision {
        if phase.contains(PhaseFlags::BARRIERS_DISABLED) || value < MIN_VALID_POINTER {
            return WriteBarrierDecision::NONE;
        }
        let (Some(slot_page), Some(value_page)) = (self.heap.page_of(slot), self.heap.page_of(value))
        else {
            return WriteBarrierDecision::NONE;
        };
        let Some(value_header) = value_page.header_for_payload(value) else {
            return WriteBarrierDecision::NONE;
        };
        let host = slot_page.find_header(slot).filter(|host| !host.is_free());

        let inputs = BarrierInputs {
            phase,
            slot_page: slot_page.flags(),
            value_page: value_page.flags(),
            value_marked: self.engine.is_marked(value_header),
            host_marked: host.is_some_and(|host| self.engine.is_marked(host)),
            hint,
            shared_space_owner: self.heap.config().is_shared_space_owner,
        };
        let (kind, record) = classify_flags(&inputs);

        WriteBarrierDecision {
            kind,
            params: BarrierParams {
                slot_page: Some(slot_page.id()),
                slot_offset: slot_page.offset_of(slot),
                host: host.map_or(0, ObjectHeader::address),
                value_page: Some(value_page.id()),
                value: value_header.address(),
                record: Some(record),
            },
        }
    }

    /// Classify a write somewhere inside the object at `host` payload
    ///
    /// Used when the exact slot is unknown. During marking the host is
    /// rescanned as a whole; otherwise an old-to-young write records the
    /// host's base offset.
    pub fn classify_imprecise(&self, host: Address, value: Address, phase: PhaseFlags) -> WriteBarrierDecision {
        if phase.contains(PhaseFlags::BARRIERS_DISABLED) || value < MIN_VALID_POINTER {
            return WriteBarrierDecision::NONE;
        }
        let (Some(host_page), Some(value_page)) = (self.heap.page_of(host), self.heap.page_of(value))
        else {
            return WriteBarrierDecision::NONE;
        };
        let Some(host_header) = host_page.header_for_payload(host) else {
            return WriteBarrierDecision::NONE;
        };

        let marking = phase.contains(PhaseFlags::MARKING);
        let old_to_young = phase.contains(PhaseFlags::GENERATIONAL)
            && !host_page.is_young()
            && value_page.is_young();
        let kind = if marking && self.engine.is_marked(host_header) {
            WriteBarrierKind::Backward
        } else if !marking && old_to_young {
            WriteBarrierKind::GenerationalImprecise
        } else {
            WriteBarrierKind::None
        };

        WriteBarrierDecision {
            kind,
            params: BarrierParams {
                slot_page: Some(host_page.id()),
                slot_offset: host_page.offset_of(host_header.address()),
                host: host_header.address(),
                value_page: Some(value_page.id()),
                value: value_page
                    .header_for_payload(value)
                    .map_or(0, ObjectHeader::address),
                record: None,
            },
        }
    }

    /// Perform the side effects of `decision`
    pub fn execute(&self, decision: &WriteBarrierDecision) {
        let params = &decision.params;
        match decision.kind {
            WriteBarrierKind::None => {}
            WriteBarrierKind::Forward => self.mark_value(params),
            WriteBarrierKind::Backward => {
                if params.host != 0 {
                    self.worklists.push_retrace(params.host);
                }
            }
            WriteBarrierKind::GenerationalPrecise => {
                if let Some(page) = params.slot_page.and_then(|id| self.heap.page(id)) {
                    page.remembered_set(RememberedSetType::OldToNew)
                        .insert(params.slot_offset);
                }
            }
            WriteBarrierKind::GenerationalImprecise => {
                if let Some(page) = params.slot_page.and_then(|id| self.heap.page(id)) {
                    page.remembered_set(RememberedSetType::OldToNewObjects)
                        .insert(params.slot_offset);
                }
            }
        }

        match params.record {
            Some(SlotRecord::Recorded(kind)) => {
                if let Some(page) = params.slot_page.and_then(|id| self.heap.page(id)) {
                    page.remembered_set(kind).insert(params.slot_offset);
                }
            }
            Some(SlotRecord::PinnedTarget) => {
                if let Some(page) = params.value_page.and_then(|id| self.heap.page(id)) {
                    page.set_flag(PageFlags::PINNED);
                }
            }
            _ => {}
        }
    }

    fn mark_value(&self, params: &BarrierParams) {
        if params.value == 0 {
            return;
        }
        let Some(page) = params.value_page.and_then(|id| self.heap.page(id)) else {
            return;
        };
        // SAFETY: `value` was resolved through the page's object-start
        // bitmap during classification.
        let header = unsafe { ObjectHeader::from_address(params.value) };
        let space = self.heap.space(page.space());
        if self.engine.try_mark_and_account_live_bytes(header, space) {
            self.worklists.push_shared(params.value);
        }
    }

    /// Store `value` into `slot` and run the barrier
    ///
    /// # Safety
    /// `slot` must be a word-aligned field of a live heap object (or other
    /// writable memory).
    pub unsafe fn write(&self, slot: Address, value: Address, hint: WriteHint) -> WriteBarrierDecision {
        AtomicUtils::store_word(slot, value);
        let phase = self.heap.state().phase();
        let decision = self.classify_with(slot, value, phase, hint);
        self.execute(&decision);
        decision
    }
}
