//! Conservative Tracing - Ambiguous roots and interior pointers
//!
//! Words from the stack (or from objects still under construction) might
//! be pointers. Each word is validated against the heap: it must lie on a
//! mapped page, inside an object found through the object-start bitmap,
//! and that object must not be a free block. Interior pointers count.
//!
//! An object found this way cannot be moved because the word that named
//! it cannot be rewritten, so its page is pinned.

use super::visitor::MarkingContext;
use super::worklist::LocalWorklist;
use crate::heap::PageFlags;
use crate::util::constants::MIN_VALID_POINTER;
use crate::util::Address;

impl MarkingContext {
    /// Mark the object containing `raw`, if any
    ///
    /// # Returns
    /// `true` if `raw` resolved to an object
    pub fn trace_conservatively_if_needed(&self, raw: Address, local: &mut LocalWorklist) -> bool {
        if raw < MIN_VALID_POINTER {
            return false;
        }
        let Some(page) = self.heap().page_of(raw) else {
            return false;
        };
        let Some(header) = page.find_header(raw) else {
            return false;
        };
        if header.is_free() {
            return false;
        }

        if page.is_evacuation_candidate() && !page.has_flag(PageFlags::PINNED) {
            log::debug!("pinning {:?}: conservative reference {:#x}", page.id(), raw);
        }
        page.set_flag(PageFlags::PINNED);

        if self.in_scope(&page) {
            self.try_mark_and_push(&page, header, local);
        }
        true
    }
}
