//! Growable vector backed by a recycling zone allocator

use super::RecyclingZoneAllocator;
use crate::error::Result;
use std::ptr::NonNull;

/// Vector of `Copy` values living in a zone
///
/// Growth releases the old buffer to the allocator's free list, so a
/// sequence of vectors built and dropped within one collection cycle keeps
/// reusing the same memory.
pub struct ZoneVec<'a, 'z, T: Copy> {
    alloc: &'a RecyclingZoneAllocator<'z, T>,
    ptr: NonNull<T>,
    len: usize,
    capacity: usize,
}

impl<'a, 'z, T: Copy> ZoneVec<'a, 'z, T> {
    pub fn new(alloc: &'a RecyclingZoneAllocator<'z, T>) -> Self {
        Self {
            alloc,
            ptr: NonNull::dangling(),
            len: 0,
            capacity: 0,
        }
    }

    pub fn push(&mut self, value: T) -> Result<()> {
        if self.len == self.capacity {
            self.grow()?;
        }
        // SAFETY: len < capacity after grow.
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
        Ok(())
    }

    fn grow(&mut self) -> Result<()> {
        let capacity = (self.capacity * 2).max(4);
        let fresh = self.alloc.allocate(capacity)?;
        if self.capacity > 0 {
            // SAFETY: both buffers hold at least `len` elements and are distinct.
            unsafe {
                std::ptr::copy_nonoverlapping(self.ptr.as_ptr(), fresh.as_ptr(), self.len);
            }
            self.alloc.deallocate(self.ptr, self.capacity);
        }
        self.ptr = fresh;
        self.capacity = capacity;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        // SAFETY: index < old len.
        Some(unsafe { self.ptr.as_ptr().add(self.len).read() })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[T] {
        if self.capacity == 0 {
            return &[];
        }
        // SAFETY: the first `len` elements are initialized.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }
}

impl<T: Copy> Drop for ZoneVec<'_, '_, T> {
    fn drop(&mut self) {
        if self.capacity > 0 {
            self.alloc.deallocate(self.ptr, self.capacity);
        }
    }
}
