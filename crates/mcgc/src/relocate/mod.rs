//! Relocate Module - Evacuation of fragmented pages
//!
//! Compaction in a full cycle proceeds in four steps:
//!
//! 1. **Selection** (cycle start) - pages of compactable spaces whose live
//!    ratio after the previous sweep fell below the threshold, plus pages
//!    flagged by the embedder, become evacuation candidates and stop
//!    serving allocations.
//! 2. **Recording** (marking) - slots pointing into candidates are
//!    recorded in the remembered sets of the pages holding them.
//! 3. **Copying** (stop-the-world) - live objects move to other pages of
//!    the same space; a forwarding table maps old to new payloads.
//! 4. **Fix-up** - roots, recorded slots, the fields of moved objects and
//!    of objects left behind are rewritten; fully evacuated pages are
//!    released.
//!
//! Pages referenced conservatively are pinned and skipped. When no
//! destination can be reserved, copying stops and the rest of the page is
//! swept in place.

pub mod copy;
pub mod forwarding;
pub mod record;

pub use copy::PageEvacuation;
pub use forwarding::{FixupVisitor, ForwardingTable};
pub use record::{record_slot, SlotRecord};

use crate::error::Result;
use crate::heap::{Heap, Page, PageFlags, RememberedSetType};
use crate::object::{ObjectHeader, TraceDescriptor, Visitor};
use std::sync::Arc;

/// Summary of one evacuation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvacuationStats {
    pub candidates: usize,
    pub pinned_pages: usize,
    pub evacuated_pages: usize,
    pub aborted_pages: usize,
    pub moved_objects: usize,
    pub moved_bytes: usize,
    /// Dead bytes on pages released without sweeping
    pub freed_bytes: usize,
    pub updated_slots: usize,
    pub dropped_slots: usize,
}

/// Choose this cycle's evacuation candidates
///
/// Explicitly flagged pages are kept; automatic selection fills up to
/// `max_evacuation_candidates` with the sparsest pages.
pub(crate) fn select_candidates(heap: &Heap) -> Vec<Arc<Page>> {
    let config = heap.config();
    let shared_owner = config.is_shared_space_owner;
    let eligible = |page: &Page| {
        !page.is_large()
            && !page.has_flag(PageFlags::PINNED)
            && (shared_owner || !page.has_flag(PageFlags::SHARED))
            && heap.space(page.space()).is_compactable()
    };

    let mut candidates: Vec<Arc<Page>> = heap
        .evacuation_candidates()
        .into_iter()
        .filter(|page| eligible(page))
        .collect();

    if config.compaction {
        let mut sparse: Vec<Arc<Page>> = heap
            .all_pages()
            .into_iter()
            .filter(|page| {
                eligible(page)
                    && !page.is_evacuation_candidate()
                    && page.live_bytes() > 0
                    && page.live_ratio() < config.evacuation_threshold
            })
            .collect();
        sparse.sort_by(|a, b| a.live_ratio().total_cmp(&b.live_ratio()));
        let room = config.max_evacuation_candidates.saturating_sub(candidates.len());
        candidates.extend(sparse.into_iter().take(room));
    }

    for page in &candidates {
        page.set_flag(PageFlags::EVACUATION_CANDIDATE);
        heap.withdraw_from_allocation(page);
    }
    if !candidates.is_empty() {
        log::debug!("selected {} evacuation candidates", candidates.len());
    }
    candidates
}

/// Copies live objects out of candidates and fixes pointers into them
pub(crate) struct Evacuator<'h> {
    heap: &'h Heap,
    table: ForwardingTable,
    stats: EvacuationStats,
}

impl<'h> Evacuator<'h> {
    pub(crate) fn new(heap: &'h Heap) -> Self {
        Self {
            heap,
            table: ForwardingTable::new(),
            stats: EvacuationStats::default(),
        }
    }

    /// Copy, then fix up everything the heap itself owns
    ///
    /// Roots and other embedder-held addresses are rewritten by the caller
    /// through the returned table before the pages are released.
    pub(crate) fn evacuate(mut self) -> (ForwardingTable, EvacuationStats, Vec<Arc<Page>>) {
        let mut candidates = self.heap.evacuation_candidates();
        self.stats.candidates = candidates.len();

        candidates.retain(|page| {
            if page.has_flag(PageFlags::PINNED) {
                page.clear_flag(PageFlags::EVACUATION_CANDIDATE);
                self.stats.pinned_pages += 1;
                log::warn!("{:?} is pinned and stays in place", page.id());
                false
            } else {
                true
            }
        });

        let mut partial = Vec::new();
        let mut complete = Vec::new();
        for page in candidates {
            let outcome = copy::evacuate_page(self.heap, &page, &mut self.table);
            self.stats.moved_objects += outcome.moved_objects;
            self.stats.moved_bytes += outcome.moved_bytes;
            if outcome.aborted {
                self.stats.aborted_pages += 1;
            }
            if outcome.is_complete() {
                self.stats.freed_bytes += outcome.dead_bytes;
                complete.push(page);
            } else {
                partial.push(page);
            }
        }

        // Partially evacuated pages are swept like any other page.
        for page in &partial {
            page.clear_flag(PageFlags::EVACUATION_CANDIDATE);
        }

        self.fix_remembered_slots();
        self.fix_moved_objects();
        for page in &partial {
            self.fix_objects_on(page);
        }

        self.stats.evacuated_pages = complete.len();
        (self.table, self.stats, complete)
    }

    /// Replay the evacuation remembered sets of every surviving page
    fn fix_remembered_slots(&mut self) {
        for page in self.heap.all_pages() {
            if page.is_evacuation_candidate() {
                continue;
            }
            for kind in RememberedSetType::EVACUATION {
                let set = page.remembered_set(kind);
                if set.is_empty() {
                    continue;
                }
                let mut fixup = FixupVisitor::new(&self.table);
                let mut dropped = 0;
                set.retain(|offset| {
                    let slot = page.address_at(offset);
                    let live = page
                        .find_header(slot)
                        .is_some_and(|host| !host.is_free() && host.is_marked_atomic());
                    if live {
                        fixup.visit_slot(slot);
                    } else {
                        dropped += 1;
                    }
                    live
                });
                self.stats.updated_slots += fixup.updated();
                self.stats.dropped_slots += dropped;
            }
        }
    }

    /// Moved objects may point at each other
    fn fix_moved_objects(&mut self) {
        let heap = self.heap;
        let moved: Vec<_> = self.table.iter().map(|(_, new)| new).collect();
        for payload in moved {
            if let Some(header) = heap.header_of(payload) {
                self.fix_object(header);
            }
        }
    }

    fn fix_objects_on(&mut self, page: &Page) {
        for header in page.headers() {
            if !header.is_free() && header.is_marked_atomic() && !header.is_in_construction() {
                self.fix_object(header);
            }
        }
    }

    fn fix_object(&mut self, header: &ObjectHeader) {
        let Some(info) = self.heap.gc_infos().get(header.gc_info_index()) else {
            return;
        };
        let mut fixup = FixupVisitor::new(&self.table);
        TraceDescriptor {
            base_object_payload: header.payload(),
            callback: info.trace,
        }
        .trace(&mut fixup);
        self.stats.updated_slots += fixup.updated();
    }
}

/// Release fully evacuated pages and forget cycle-scoped metadata
pub(crate) fn finish_evacuation(heap: &Heap, evacuated: Vec<Arc<Page>>) -> Result<()> {
    for page in evacuated {
        heap.release_evacuated_page(&page)?;
    }
    heap.clear_remembered_sets(&RememberedSetType::EVACUATION);
    heap.clear_flag_on_all_pages(PageFlags::EVACUATION_CANDIDATE | PageFlags::PINNED);
    Ok(())
}
