//! Free List - Size-bucketed list of reusable blocks
//!
//! Bucket `i` holds blocks with `2^i <= size < 2^(i+1)`. Allocation looks
//! first in the bucket of the request and scans it for a fit, then takes
//! any block from a larger bucket.

use crate::util::Address;

const BUCKETS: usize = usize::BITS as usize;

/// Free block entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    pub address: Address,
    pub size: usize,
}

/// Per-space free list
#[derive(Debug)]
pub struct FreeList {
    buckets: Vec<Vec<FreeBlock>>,
    free_bytes: usize,
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeList {
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); BUCKETS],
            free_bytes: 0,
        }
    }

    #[inline]
    fn bucket_of(size: usize) -> usize {
        debug_assert!(size > 0);
        (usize::BITS - 1 - size.leading_zeros()) as usize
    }

    pub fn add(&mut self, address: Address, size: usize) {
        self.buckets[Self::bucket_of(size)].push(FreeBlock { address, size });
        self.free_bytes += size;
    }

    /// Remove and return a block of at least `size` bytes
    pub fn allocate(&mut self, size: usize) -> Option<FreeBlock> {
        let first = Self::bucket_of(size);

        let bucket = &mut self.buckets[first];
        if let Some(pos) = bucket.iter().position(|b| b.size >= size) {
            let block = bucket.swap_remove(pos);
            self.free_bytes -= block.size;
            return Some(block);
        }

        for bucket in self.buckets[first + 1..].iter_mut() {
            if let Some(block) = bucket.pop() {
                self.free_bytes -= block.size;
                return Some(block);
            }
        }
        None
    }

    /// Drop all blocks inside `[start, end)`
    pub fn remove_range(&mut self, start: Address, end: Address) {
        for bucket in self.buckets.iter_mut() {
            bucket.retain(|b| {
                let inside = b.address >= start && b.address < end;
                if inside {
                    self.free_bytes -= b.size;
                }
                !inside
            });
        }
    }

    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
        self.free_bytes = 0;
    }

    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.free_bytes == 0
    }

    pub fn block_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}
