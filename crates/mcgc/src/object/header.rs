//! Object Header - Metadata preceding every managed object
//!
//! Header Layout (16 bytes, 16-byte aligned):
//! ┌─────────────────────────────────────────┐
//! │  size (u32)     - allocation size incl. │
//! │                   header                │
//! ├─────────────────────────────────────────┤
//! │  gc_info (u32)  - GcInfo index, 0=free  │
//! ├─────────────────────────────────────────┤
//! │  state (AtomicU32)                      │
//! │  - Bit 0: in construction               │
//! ├─────────────────────────────────────────┤
//! │  mark (AtomicU8) │ reserved (3 bytes)   │
//! └─────────────────────────────────────────┘
//!
//! The mark bit has a byte of its own. The non-atomic engine writes it
//! with a plain store, which must never overwrite the construction bit
//! published by a mutator.
//!
//! The payload starts `HEADER_SIZE` bytes after the header, so the header
//! of a payload pointer is found by a fixed negative offset.

use crate::util::Address;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Size of object header in bytes
pub const HEADER_SIZE: usize = 16;

/// GcInfo index reserved for free blocks
pub const FREE_GC_INFO_INDEX: u32 = 0;

const MARKED: u8 = 1;
const IN_CONSTRUCTION_BIT: u32 = 1 << 0;

/// Object Header
#[repr(C, align(16))]
pub struct ObjectHeader {
    size: u32,
    gc_info: u32,
    state: AtomicU32,
    mark: AtomicU8,
    _reserved: [u8; 3],
}

const _: () = assert!(std::mem::size_of::<ObjectHeader>() == HEADER_SIZE);

impl ObjectHeader {
    /// Write a header for a freshly allocated object
    ///
    /// The object starts unmarked and in construction.
    ///
    /// # Safety
    /// `at` must be 16-byte aligned and point to `size` writable bytes that
    /// no other thread is reading.
    pub unsafe fn write_object<'a>(at: Address, size: usize, gc_info: u32) -> &'a ObjectHeader {
        debug_assert!(size >= HEADER_SIZE && size <= u32::MAX as usize);
        debug_assert_ne!(gc_info, FREE_GC_INFO_INDEX);
        let header = at as *mut ObjectHeader;
        header.write(ObjectHeader {
            size: size as u32,
            gc_info,
            state: AtomicU32::new(IN_CONSTRUCTION_BIT),
            mark: AtomicU8::new(0),
            _reserved: [0; 3],
        });
        &*header
    }

    /// Write a free-block header covering `size` bytes
    ///
    /// # Safety
    /// Same as `write_object`.
    pub unsafe fn write_free(at: Address, size: usize) {
        debug_assert!(size >= HEADER_SIZE && size <= u32::MAX as usize);
        (at as *mut ObjectHeader).write(ObjectHeader {
            size: size as u32,
            gc_info: FREE_GC_INFO_INDEX,
            state: AtomicU32::new(0),
            mark: AtomicU8::new(0),
            _reserved: [0; 3],
        });
    }

    /// Header at a header address
    ///
    /// # Safety
    /// `address` must point to a header written by this module that stays
    /// alive for `'a`.
    #[inline]
    pub unsafe fn from_address<'a>(address: Address) -> &'a ObjectHeader {
        &*(address as *const ObjectHeader)
    }

    /// Header of a payload pointer
    ///
    /// # Safety
    /// `payload` must be the payload address of a live heap object.
    #[inline]
    pub unsafe fn from_payload<'a>(payload: Address) -> &'a ObjectHeader {
        Self::from_address(payload - HEADER_SIZE)
    }

    #[inline]
    pub fn address(&self) -> Address {
        self as *const ObjectHeader as Address
    }

    #[inline]
    pub fn payload(&self) -> Address {
        self.address() + HEADER_SIZE
    }

    /// Allocation size including the header
    #[inline]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    #[inline]
    pub fn payload_size(&self) -> usize {
        self.size() - HEADER_SIZE
    }

    /// First address past the object
    #[inline]
    pub fn end(&self) -> Address {
        self.address() + self.size()
    }

    #[inline]
    pub fn gc_info_index(&self) -> u32 {
        self.gc_info
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.gc_info == FREE_GC_INFO_INDEX
    }

    /// True if `address` lies inside the payload
    #[inline]
    pub fn contains_payload_address(&self, address: Address) -> bool {
        address >= self.payload() && address < self.end()
    }

    // === Mark Bit Operations ===

    /// Set the mark bit atomically; true if this call set it
    #[inline]
    pub fn try_mark_atomic(&self) -> bool {
        self.mark.swap(MARKED, Ordering::AcqRel) == 0
    }

    #[inline]
    pub fn is_marked_atomic(&self) -> bool {
        self.mark.load(Ordering::Acquire) != 0
    }

    /// Set the mark bit without a read-modify-write
    ///
    /// Only valid while no other thread marks. Mutators may still touch
    /// the construction bit; it lives in a different byte.
    #[inline]
    pub fn try_mark_non_atomic(&self) -> bool {
        if self.mark.load(Ordering::Relaxed) != 0 {
            return false;
        }
        self.mark.store(MARKED, Ordering::Relaxed);
        true
    }

    #[inline]
    pub fn is_marked_non_atomic(&self) -> bool {
        self.mark.load(Ordering::Relaxed) != 0
    }

    /// Clear the mark bit; used by the sweeper
    #[inline]
    pub fn unmark(&self) {
        self.mark.store(0, Ordering::Release);
    }

    // === Construction State ===

    #[inline]
    pub fn is_in_construction(&self) -> bool {
        self.state.load(Ordering::Acquire) & IN_CONSTRUCTION_BIT != 0
    }

    /// Publish the object as fully initialized
    #[inline]
    pub fn mark_fully_constructed(&self) {
        self.state.fetch_and(!IN_CONSTRUCTION_BIT, Ordering::Release);
    }
}

impl std::fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHeader")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("size", &self.size)
            .field("gc_info", &self.gc_info)
            .field("marked", &self.is_marked_atomic())
            .field("in_construction", &self.is_in_construction())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct Backing([u8; 64]);

    #[test]
    fn test_header_layout() {
        assert_eq!(std::mem::size_of::<ObjectHeader>(), HEADER_SIZE);
        assert_eq!(std::mem::align_of::<ObjectHeader>(), 16);
    }

    #[test]
    fn test_mark_once() {
        let mut backing = Backing([0; 64]);
        let at = backing.0.as_mut_ptr() as Address;
        let header = unsafe { ObjectHeader::write_object(at, 64, 1) };

        assert!(!header.is_marked_atomic());
        assert!(header.try_mark_atomic());
        assert!(!header.try_mark_atomic());
        assert!(!header.try_mark_non_atomic());
        header.unmark();
        assert!(header.try_mark_non_atomic());
        assert!(header.is_marked_non_atomic());
    }

    #[test]
    fn test_construction_and_payload_geometry() {
        let mut backing = Backing([0; 64]);
        let at = backing.0.as_mut_ptr() as Address;
        let header = unsafe { ObjectHeader::write_object(at, 48, 7) };

        assert!(header.is_in_construction());
        header.mark_fully_constructed();
        assert!(!header.is_in_construction());

        assert_eq!(header.payload(), at + HEADER_SIZE);
        assert_eq!(header.payload_size(), 32);
        assert!(header.contains_payload_address(at + 20));
        assert!(!header.contains_payload_address(at + 48));
        let same = unsafe { ObjectHeader::from_payload(header.payload()) };
        assert_eq!(same.gc_info_index(), 7);
    }

    /// **Bug this finds:** A plain mark store undoing a concurrent
    /// `mark_fully_constructed`, leaving the object in construction forever
    #[test]
    fn test_non_atomic_mark_keeps_construction_update() {
        for _ in 0..200 {
            let mut backing = Backing([0; 64]);
            let at = backing.0.as_mut_ptr() as Address;
            let header = unsafe { ObjectHeader::write_object(at, 64, 1) };
            let start = std::sync::Barrier::new(2);

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    start.wait();
                    header.mark_fully_constructed();
                });
                scope.spawn(|| {
                    start.wait();
                    header.try_mark_non_atomic();
                });
            });

            assert!(!header.is_in_construction(), "construction update lost");
            assert!(header.is_marked_non_atomic());
        }
    }

    #[test]
    fn test_free_header() {
        let mut backing = Backing([0; 64]);
        let at = backing.0.as_mut_ptr() as Address;
        unsafe { ObjectHeader::write_free(at, 64) };
        let header = unsafe { ObjectHeader::from_address(at) };
        assert!(header.is_free());
        assert_eq!(header.size(), 64);
    }
}
