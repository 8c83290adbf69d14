//! Marking Visitor - Precise tracing of object fields
//!
//! `MarkingContext` holds everything one marking cycle needs and is shared
//! by the collecting thread, the marking threads and the write barrier.
//! Each thread drives it through its own `LocalWorklist`.

use super::engine::{MarkingEngine, MarkingState};
use super::worklist::{LocalWorklist, MarkingWorklists};
use crate::heap::{Heap, Page};
use crate::object::{ObjectHeader, TraceDescriptor, Visitor};
use crate::relocate::record::record_slot;
use crate::util::constants::{MIN_VALID_POINTER, WORD_SIZE};
use crate::util::{Address, AtomicUtils};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// State shared by everyone marking during one cycle
pub struct MarkingContext {
    heap: Arc<Heap>,
    engine: MarkingEngine,
    worklists: Arc<MarkingWorklists>,
    minor: bool,
    compacting: bool,
    shared_space_owner: bool,
    marked_objects: AtomicUsize,
    scanned_objects: AtomicUsize,
}

impl MarkingContext {
    pub fn new(
        heap: Arc<Heap>,
        engine: MarkingEngine,
        worklists: Arc<MarkingWorklists>,
        minor: bool,
        compacting: bool,
    ) -> Self {
        let shared_space_owner = heap.config().is_shared_space_owner;
        Self {
            heap,
            engine,
            worklists,
            minor,
            compacting,
            shared_space_owner,
            marked_objects: AtomicUsize::new(0),
            scanned_objects: AtomicUsize::new(0),
        }
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    pub fn engine(&self) -> &MarkingEngine {
        &self.engine
    }

    pub fn worklists(&self) -> &Arc<MarkingWorklists> {
        &self.worklists
    }

    /// Only YOUNG pages are marked in a minor cycle
    pub fn is_minor(&self) -> bool {
        self.minor
    }

    pub fn is_compacting(&self) -> bool {
        self.compacting
    }

    pub fn marked_objects(&self) -> usize {
        self.marked_objects.load(Ordering::Relaxed)
    }

    pub fn scanned_objects(&self) -> usize {
        self.scanned_objects.load(Ordering::Relaxed)
    }

    /// Whether `page` takes part in this cycle
    #[inline]
    pub(crate) fn in_scope(&self, page: &Page) -> bool {
        !self.minor || page.is_young()
    }

    /// Mark and push the object `header` on `page`
    #[inline]
    pub(crate) fn try_mark_and_push(
        &self,
        page: &Page,
        header: &ObjectHeader,
        local: &mut LocalWorklist,
    ) -> bool {
        let space = self.heap.space(page.space());
        if !self.engine.try_mark_and_account_live_bytes(header, space) {
            return false;
        }
        self.marked_objects.fetch_add(1, Ordering::Relaxed);
        local.push(header.address());
        true
    }

    /// Mark the object whose payload starts at `payload`
    ///
    /// Values outside the heap, free blocks and, in a minor cycle, objects
    /// on old pages are ignored.
    pub fn mark_payload(&self, payload: Address, local: &mut LocalWorklist) -> bool {
        if payload < MIN_VALID_POINTER {
            return false;
        }
        let Some(page) = self.heap.page_of(payload) else {
            return false;
        };
        if !self.in_scope(&page) {
            return false;
        }
        match page.header_for_payload(payload) {
            Some(header) => self.try_mark_and_push(&page, header, local),
            None => false,
        }
    }

    /// Visit one reference slot of a live object
    pub fn visit_slot(&self, slot: Address, local: &mut LocalWorklist) {
        // SAFETY: trace callbacks report word-aligned slots inside their
        // object's payload.
        let value = unsafe { AtomicUtils::load_word(slot) };
        if value < MIN_VALID_POINTER {
            return;
        }
        let Some(target) = self.heap.page_of(value) else {
            return;
        };
        if self.compacting {
            if let Some(slot_page) = self.heap.page_of(slot) {
                record_slot(&slot_page, slot, &target, self.shared_space_owner);
            }
        }
        if !self.in_scope(&target) {
            return;
        }
        if let Some(header) = target.header_for_payload(value) {
            self.try_mark_and_push(&target, header, local);
        }
    }

    /// Queue a weak slot of a live object; its target is not marked
    pub fn visit_weak_slot(&self, slot: Address) {
        self.worklists.weak_slots().push(slot);
    }

    /// Scan a grey object
    pub fn trace(&self, header: &ObjectHeader, local: &mut LocalWorklist) {
        self.scanned_objects.fetch_add(1, Ordering::Relaxed);
        if header.is_in_construction() {
            self.trace_in_construction(header, local);
            return;
        }
        let Some(info) = self.heap.gc_infos().get(header.gc_info_index()) else {
            debug_assert!(false, "marked object without GcInfo at {:#x}", header.address());
            return;
        };
        let descriptor = TraceDescriptor {
            base_object_payload: header.payload(),
            callback: info.trace,
        };
        descriptor.trace(&mut MarkingVisitor {
            context: self,
            local,
        });
    }

    /// Fields of an object under construction may hold garbage; only
    /// non-zero words that resolve to heap objects are followed.
    fn trace_in_construction(&self, header: &ObjectHeader, local: &mut LocalWorklist) {
        let mut word = header.payload();
        while word < header.end() {
            // SAFETY: inside the payload of a live object.
            let value = unsafe { AtomicUtils::load_word(word) };
            if value != 0 {
                self.trace_conservatively_if_needed(value, local);
            }
            word += WORD_SIZE;
        }
    }

    /// Drain `local` (and whatever it can steal)
    ///
    /// # Returns
    /// Number of objects scanned; below `budget` means the worklists ran dry
    pub fn process(&self, local: &mut LocalWorklist, budget: Option<usize>) -> usize {
        let mut processed = 0;
        while budget.map_or(true, |budget| processed < budget) {
            let Some(address) = local.pop() else {
                break;
            };
            // SAFETY: only headers of marked objects are pushed, and pages
            // are not released while marking.
            let header = unsafe { ObjectHeader::from_address(address) };
            self.trace(header, local);
            processed += 1;
        }
        processed
    }
}

/// `Visitor` handed to trace callbacks during marking
pub struct MarkingVisitor<'a> {
    context: &'a MarkingContext,
    local: &'a mut LocalWorklist,
}

impl<'a> MarkingVisitor<'a> {
    pub fn new(context: &'a MarkingContext, local: &'a mut LocalWorklist) -> Self {
        Self { context, local }
    }
}

impl Visitor for MarkingVisitor<'_> {
    #[inline]
    fn visit_slot(&mut self, slot: Address) {
        self.context.visit_slot(slot, self.local);
    }

    #[inline]
    fn visit_weak_slot(&mut self, slot: Address) {
        self.context.visit_weak_slot(slot);
    }
}
