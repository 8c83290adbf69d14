//! Object Copying - Moving live objects out of a candidate page
//!
//! Copies are made stop-the-world after marking. Each live object gets a
//! destination block from its own space; the header is copied together
//! with the payload, so the copy is already marked and survives the
//! sweep. The original is unmarked so the sweep reclaims it if the page
//! ends up only partially evacuated.

use super::forwarding::ForwardingTable;
use crate::heap::{Heap, Page};
use crate::object::ObjectHeader;

/// Outcome of evacuating one page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageEvacuation {
    pub moved_objects: usize,
    pub moved_bytes: usize,
    /// Bytes of unmarked objects on the page
    pub dead_bytes: usize,
    /// Live objects left in place
    pub remaining_objects: usize,
    /// Copying stopped because no destination could be reserved
    pub aborted: bool,
}

impl PageEvacuation {
    /// The page holds no live object anymore
    pub fn is_complete(&self) -> bool {
        self.remaining_objects == 0
    }
}

/// Copy every marked, fully constructed object off `page`
///
/// Objects still under construction stay in place: the embedder holds a
/// raw pointer to them.
pub(crate) fn evacuate_page(heap: &Heap, page: &Page, table: &mut ForwardingTable) -> PageEvacuation {
    let mut result = PageEvacuation::default();
    let space = heap.space(page.space());

    for header in page.headers() {
        if header.is_free() {
            continue;
        }
        if !header.is_marked_atomic() {
            result.dead_bytes += header.size();
            continue;
        }
        if result.aborted || header.is_in_construction() {
            result.remaining_objects += 1;
            continue;
        }

        let size = header.size();
        let destination = match heap.reserve(space, size) {
            Ok(destination) => destination,
            Err(err) => {
                log::warn!(
                    "evacuation of {:?} stopped after {} objects: {}",
                    page.id(),
                    result.moved_objects,
                    err
                );
                result.aborted = true;
                result.remaining_objects += 1;
                continue;
            }
        };
        debug_assert!(!page.contains(destination));

        // SAFETY: `destination` is a fresh block of `size` bytes outside
        // `page`; the source is a live object of the same size.
        let copy = unsafe {
            std::ptr::copy_nonoverlapping(header.address() as *const u8, destination as *mut u8, size);
            ObjectHeader::from_address(destination)
        };
        debug_assert!(copy.is_marked_atomic());

        table.insert(header.payload(), copy.payload(), size);
        header.unmark();
        result.moved_objects += 1;
        result.moved_bytes += size;
    }

    log::trace!(
        "evacuated {:?}: {} objects ({} bytes) moved, {} left",
        page.id(),
        result.moved_objects,
        result.moved_bytes,
        result.remaining_objects
    );
    result
}
