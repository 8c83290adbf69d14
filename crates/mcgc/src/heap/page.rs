//! Page - Unit of memory obtained from the platform provider
//!
//! A page is a contiguous range handed out by `PageAllocator::allocate`.
//! Normal pages hold many objects laid out back to back from the page base;
//! large pages hold exactly one object. Page metadata lives off-page in
//! this struct so the whole mapped range is usable for objects.
//!
//! ```text
//! base                                allocated_end            end
//! │ hdr|obj │ hdr|obj │ free │ hdr|obj │    (never used yet)     │
//! └──────────────── iterated ─────────┘
//! ```
//!
//! # Thread Safety
//!
//! Flags, counters, the object-start bitmap and the remembered sets are
//! atomic. `allocated_end` only moves under the owning space's lock.

use super::object_start_bitmap::ObjectStartBitmap;
use super::remembered_set::{PageRememberedSets, RememberedSetType, SlotSet};
use super::space::SpaceId;
use crate::object::ObjectHeader;
use crate::platform::ProtectionKey;
use crate::util::constants::ALLOCATION_GRANULARITY;
use crate::util::Address;
use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

bitflags! {
    /// Page properties consulted by barriers and the collector
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        const EXECUTABLE = 1 << 0;
        const TRUSTED = 1 << 1;
        const EVACUATION_CANDIDATE = 1 << 2;
        const YOUNG = 1 << 3;
        const LARGE = 1 << 4;
        const SHARED = 1 << 5;
        /// Referenced conservatively during the current cycle
        const PINNED = 1 << 6;
    }
}

/// Index of a page in the heap's page table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub(crate) u32);

impl PageId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Page metadata
pub struct Page {
    id: PageId,
    space: SpaceId,
    base: Address,
    size: usize,
    allocated_end: AtomicUsize,
    flags: AtomicU32,
    live_bytes: AtomicUsize,
    object_starts: ObjectStartBitmap,
    remembered: PageRememberedSets,
    protection_key: Option<ProtectionKey>,
}

impl Page {
    pub(crate) fn new(
        id: PageId,
        space: SpaceId,
        base: Address,
        size: usize,
        flags: PageFlags,
        protection_key: Option<ProtectionKey>,
    ) -> Self {
        Self {
            id,
            space,
            base,
            size,
            allocated_end: AtomicUsize::new(base),
            flags: AtomicU32::new(flags.bits()),
            live_bytes: AtomicUsize::new(0),
            object_starts: ObjectStartBitmap::new(base, size),
            remembered: PageRememberedSets::new(size),
            protection_key,
        }
    }

    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    #[inline]
    pub fn space(&self) -> SpaceId {
        self.space
    }

    #[inline]
    pub fn base(&self) -> Address {
        self.base
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn end(&self) -> Address {
        self.base + self.size
    }

    #[inline]
    pub fn contains(&self, address: Address) -> bool {
        address >= self.base && address < self.end()
    }

    pub fn protection_key(&self) -> Option<ProtectionKey> {
        self.protection_key
    }

    // === Flags ===

    #[inline]
    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub fn has_flag(&self, flag: PageFlags) -> bool {
        self.flags().contains(flag)
    }

    pub(crate) fn set_flag(&self, flag: PageFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_flag(&self, flag: PageFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
    }

    #[inline]
    pub fn is_young(&self) -> bool {
        self.has_flag(PageFlags::YOUNG)
    }

    #[inline]
    pub fn is_large(&self) -> bool {
        self.has_flag(PageFlags::LARGE)
    }

    #[inline]
    pub fn is_evacuation_candidate(&self) -> bool {
        self.has_flag(PageFlags::EVACUATION_CANDIDATE)
    }

    // === Allocation Area ===

    #[inline]
    pub fn allocated_end(&self) -> Address {
        self.allocated_end.load(Ordering::Acquire)
    }

    pub(crate) fn set_allocated_end(&self, end: Address) {
        debug_assert!(end >= self.base && end <= self.end());
        self.allocated_end.store(end, Ordering::Release);
    }

    /// Bytes between the base and the high-water mark
    pub fn used_bytes(&self) -> usize {
        self.allocated_end() - self.base
    }

    // === Liveness ===

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn set_live_bytes(&self, bytes: usize) {
        self.live_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Fraction of the page occupied by objects that survived the last sweep
    pub fn live_ratio(&self) -> f64 {
        self.live_bytes() as f64 / self.size as f64
    }

    // === Object Starts ===

    pub(crate) fn object_starts(&self) -> &ObjectStartBitmap {
        &self.object_starts
    }

    /// Header of the live object or free block whose range holds `address`
    ///
    /// Returns None for addresses outside the allocated area.
    pub fn find_header(&self, address: Address) -> Option<&ObjectHeader> {
        if !self.contains(address) || address >= self.allocated_end() {
            return None;
        }
        let header_address = self.object_starts.find_header(address)?;
        // SAFETY: a set bit always denotes a header written under the
        // space lock, and the page memory lives as long as `self`.
        let header = unsafe { ObjectHeader::from_address(header_address) };
        (address < header.end()).then_some(header)
    }

    /// Header of the object whose payload starts exactly at `payload`
    ///
    /// The bitmap answers per granule, so addresses inside a granule are
    /// rejected before it is consulted.
    pub fn header_for_payload(&self, payload: Address) -> Option<&ObjectHeader> {
        let header_address = payload.checked_sub(crate::object::HEADER_SIZE)?;
        if !self.contains(header_address)
            || (header_address - self.base) % ALLOCATION_GRANULARITY != 0
            || !self.object_starts.is_set(header_address)
        {
            return None;
        }
        // SAFETY: see `find_header`.
        let header = unsafe { ObjectHeader::from_address(header_address) };
        (!header.is_free()).then_some(header)
    }

    /// Every header between the base and the allocated end
    pub fn headers(&self) -> PageHeaders<'_> {
        PageHeaders {
            page: self,
            cursor: self.base,
            end: self.allocated_end(),
        }
    }

    // === Remembered Sets ===

    #[inline]
    pub fn remembered_set(&self, kind: RememberedSetType) -> &SlotSet {
        self.remembered.get(kind)
    }

    /// Byte offset of `address` from the page base
    #[inline]
    pub fn offset_of(&self, address: Address) -> u32 {
        debug_assert!(self.contains(address));
        (address - self.base) as u32
    }

    #[inline]
    pub fn address_at(&self, offset: u32) -> Address {
        self.base + offset as usize
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("space", &self.space)
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &self.size)
            .field("flags", &self.flags())
            .field("live_bytes", &self.live_bytes())
            .finish()
    }
}

/// Linear walk over the headers of one page
pub struct PageHeaders<'p> {
    page: &'p Page,
    cursor: Address,
    end: Address,
}

impl<'p> Iterator for PageHeaders<'p> {
    type Item = &'p ObjectHeader;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        debug_assert!(self.page.object_starts.is_set(self.cursor));
        // SAFETY: headers tile [base, allocated_end) without gaps.
        let header = unsafe { ObjectHeader::from_address(self.cursor) };
        debug_assert!(header.size() > 0, "zero-sized header at {:#x}", self.cursor);
        self.cursor += header.size().max(crate::object::HEADER_SIZE);
        Some(header)
    }
}
