//! Typed allocators over a `Zone`

use super::Zone;
use crate::error::Result;
use std::cell::Cell;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

/// Allocator that never reuses memory
///
/// `deallocate` is a no-op; memory comes back when the zone is dropped.
pub struct ZoneAllocator<'z, T> {
    zone: &'z Zone,
    _marker: PhantomData<T>,
}

impl<'z, T> ZoneAllocator<'z, T> {
    pub fn new(zone: &'z Zone) -> Self {
        Self {
            zone,
            _marker: PhantomData,
        }
    }

    pub fn zone(&self) -> &'z Zone {
        self.zone
    }

    /// Allocate room for `count` values of `T`
    pub fn allocate(&self, count: usize) -> Result<NonNull<T>> {
        let bytes = size_of::<T>().checked_mul(count).ok_or_else(|| {
            crate::McgcError::InvalidArgument(format!("zone allocation of {} elements", count))
        })?;
        if bytes == 0 {
            return Ok(NonNull::dangling());
        }
        Ok(self.zone.allocate(bytes, align_of::<T>())?.cast())
    }

    pub fn deallocate(&self, _ptr: NonNull<T>, _count: usize) {}
}

#[repr(C)]
struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
    size: usize,
}

/// Allocator with a monotone free list of released blocks
///
/// Only the head block is ever inspected: allocation of `n` elements reuses
/// it when its recorded capacity is at least `n`, and a released block is
/// pushed only when it is at least as large as the current head. Smaller
/// blocks, and blocks too small to hold the list node, are abandoned until
/// the zone goes away.
pub struct RecyclingZoneAllocator<'z, T> {
    inner: ZoneAllocator<'z, T>,
    free_list: Cell<Option<NonNull<FreeBlock>>>,
}

impl<'z, T> RecyclingZoneAllocator<'z, T> {
    pub fn new(zone: &'z Zone) -> Self {
        Self {
            inner: ZoneAllocator::new(zone),
            free_list: Cell::new(None),
        }
    }

    pub fn allocate(&self, count: usize) -> Result<NonNull<T>> {
        if let Some(head) = self.free_list.get() {
            // SAFETY: every node on the list was written by `deallocate`
            // into a block owned by this allocator's zone.
            let block = unsafe { head.as_ref() };
            if block.size >= count {
                self.free_list.set(block.next);
                return Ok(head.cast());
            }
        }
        self.inner.allocate(count)
    }

    pub fn deallocate(&self, ptr: NonNull<T>, count: usize) {
        if count.saturating_mul(size_of::<T>()) < size_of::<FreeBlock>()
            || ptr.as_ptr() as usize % align_of::<FreeBlock>() != 0
        {
            return;
        }

        let head = self.free_list.get();
        // SAFETY: see `allocate`.
        if let Some(current) = head {
            if count < unsafe { current.as_ref() }.size {
                return;
            }
        }

        let node = ptr.cast::<FreeBlock>();
        // SAFETY: the block is at least `size_of::<FreeBlock>()` bytes,
        // suitably aligned, and no longer used by the caller.
        unsafe {
            node.as_ptr().write(FreeBlock {
                next: head,
                size: count,
            })
        };
        self.free_list.set(Some(node));
    }

    /// Recorded capacity of the head block, if any
    pub fn free_head_capacity(&self) -> Option<usize> {
        // SAFETY: see `allocate`.
        self.free_list.get().map(|head| unsafe { head.as_ref() }.size)
    }

    pub fn zone(&self) -> &'z Zone {
        self.inner.zone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_allocator_never_reuses() {
        let zone = Zone::new("test");
        let alloc = ZoneAllocator::<u64>::new(&zone);
        let a = alloc.allocate(4).unwrap();
        alloc.deallocate(a, 4);
        let b = alloc.allocate(4).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_recycling_reuses_head_block() {
        let zone = Zone::new("test");
        let alloc = RecyclingZoneAllocator::<u64>::new(&zone);
        let a = alloc.allocate(8).unwrap();
        let mark = zone.high_water_mark();

        alloc.deallocate(a, 8);
        let b = alloc.allocate(8).unwrap();

        assert_eq!(a, b);
        assert_eq!(zone.high_water_mark(), mark);
    }

    #[test]
    fn test_free_list_is_monotone() {
        let zone = Zone::new("test");
        let alloc = RecyclingZoneAllocator::<u64>::new(&zone);
        let big = alloc.allocate(16).unwrap();
        let small = alloc.allocate(4).unwrap();

        alloc.deallocate(big, 16);
        alloc.deallocate(small, 4);

        assert_eq!(alloc.free_head_capacity(), Some(16));
    }

    #[test]
    fn test_tiny_blocks_are_abandoned() {
        let zone = Zone::new("test");
        let alloc = RecyclingZoneAllocator::<u8>::new(&zone);
        let tiny = alloc.allocate(2).unwrap();
        alloc.deallocate(tiny, 2);
        assert_eq!(alloc.free_head_capacity(), None);
    }

    #[test]
    fn test_request_larger_than_head_goes_to_zone() {
        let zone = Zone::new("test");
        let alloc = RecyclingZoneAllocator::<u64>::new(&zone);
        let a = alloc.allocate(4).unwrap();
        alloc.deallocate(a, 4);
        let b = alloc.allocate(32).unwrap();
        assert_ne!(a, b);
        assert_eq!(alloc.free_head_capacity(), Some(4));
    }
}
