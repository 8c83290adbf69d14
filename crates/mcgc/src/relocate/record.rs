//! Slot Recording - Remembered-set entries for evacuation
//!
//! When a slot points into an evacuation candidate, its offset is recorded
//! in the remembered set of the page holding the slot so the pointer can
//! be rewritten after the target moves.
//!
//! | slot page        | target page                  | action             |
//! |------------------|------------------------------|--------------------|
//! | candidate        | any                          | skip (host moves)  |
//! | trusted          | executable candidate         | `TrustedToCode`    |
//! | trusted          | trusted candidate            | `TrustedToTrusted` |
//! | trusted          | other candidate              | skip               |
//! | untrusted        | trusted/executable candidate | pin target page    |
//! | untrusted        | other candidate              | `OldToOld`         |
//!
//! Targets on SHARED pages are only tracked by the shared-space owner;
//! client heaps never evacuate shared pages.

use crate::heap::{Page, PageFlags, RememberedSetType};
use crate::util::Address;

/// What `record_slot` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRecord {
    Skipped,
    Recorded(RememberedSetType),
    /// The target page cannot be tracked from this slot and was pinned
    PinnedTarget,
}

/// Remembered set a slot belongs in, without side effects
pub fn slot_kind(slot_page: PageFlags, target_page: PageFlags, shared_space_owner: bool) -> SlotRecord {
    if !target_page.contains(PageFlags::EVACUATION_CANDIDATE)
        || slot_page.contains(PageFlags::EVACUATION_CANDIDATE)
    {
        return SlotRecord::Skipped;
    }
    if target_page.contains(PageFlags::SHARED) && !shared_space_owner {
        return SlotRecord::Skipped;
    }

    let target_protected = target_page.intersects(PageFlags::TRUSTED | PageFlags::EXECUTABLE);
    if slot_page.contains(PageFlags::TRUSTED) {
        if target_page.contains(PageFlags::EXECUTABLE) {
            SlotRecord::Recorded(RememberedSetType::TrustedToCode)
        } else if target_page.contains(PageFlags::TRUSTED) {
            SlotRecord::Recorded(RememberedSetType::TrustedToTrusted)
        } else {
            SlotRecord::Skipped
        }
    } else if target_protected {
        SlotRecord::PinnedTarget
    } else {
        SlotRecord::Recorded(RememberedSetType::OldToOld)
    }
}

/// Record `slot` (inside `slot_page`) if its target lives on a candidate
pub fn record_slot(
    slot_page: &Page,
    slot: Address,
    target_page: &Page,
    shared_space_owner: bool,
) -> SlotRecord {
    let outcome = slot_kind(slot_page.flags(), target_page.flags(), shared_space_owner);
    match outcome {
        SlotRecord::Recorded(kind) => {
            slot_page.remembered_set(kind).insert(slot_page.offset_of(slot));
        }
        SlotRecord::PinnedTarget => {
            if !target_page.has_flag(PageFlags::PINNED) {
                log::debug!(
                    "pinning {:?}: referenced from untrusted {:?}",
                    target_page.id(),
                    slot_page.id()
                );
            }
            target_page.set_flag(PageFlags::PINNED);
        }
        SlotRecord::Skipped => {}
    }
    outcome
}
