//! Sweeper - Rebuild free lists from mark bits
//!
//! Runs stop-the-world after marking and evacuation. Every swept page is
//! walked linearly: marked objects are unmarked and counted, and maximal
//! runs of dead objects and free blocks are coalesced into one free block.
//! Pages without survivors go back to the platform.

use super::page::Page;
use super::space::{Space, SpaceInner};
use super::Heap;
use crate::error::Result;
use crate::object::ObjectHeader;
use crate::stats::ScopedTimer;
use crate::util::Address;
use std::sync::Arc;

/// Which pages a sweep visits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SweepMode {
    /// Every page; free lists are rebuilt from scratch
    Full,
    /// Only YOUNG pages; old pages keep their free blocks
    Young,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SweepResult {
    pub live_bytes: usize,
    pub freed_bytes: usize,
    pub released_pages: usize,
}

pub(crate) struct PageSweep {
    live_bytes: usize,
    freed_bytes: usize,
    free_blocks: Vec<(Address, usize)>,
}

impl Heap {
    pub(crate) fn sweep(&self, mode: SweepMode) -> Result<SweepResult> {
        let _timer = ScopedTimer::new("sweep", |name, duration| {
            log::trace!("{} ({:?}) took {:?}", name, mode, duration);
        });
        let mut result = SweepResult::default();
        for space in self.spaces() {
            self.sweep_space(space, mode, &mut result)?;
        }
        log::debug!(
            "sweep ({:?}): {} live, {} freed, {} pages released",
            mode,
            result.live_bytes,
            result.freed_bytes,
            result.released_pages
        );
        Ok(result)
    }

    fn sweep_space(&self, space: &Space, mode: SweepMode, result: &mut SweepResult) -> Result<()> {
        let mut guard = space.inner.lock();
        let inner: &mut SpaceInner = &mut guard;
        self.close_lab(inner);

        if mode == SweepMode::Full {
            inner.free_list.clear();
        }

        let pages = std::mem::take(&mut inner.pages);
        let mut kept = Vec::with_capacity(pages.len());
        let mut released = Vec::new();

        for page in pages {
            if mode == SweepMode::Young && !page.is_young() {
                kept.push(page);
                continue;
            }
            inner.free_list.remove_range(page.base(), page.end());

            let swept = if page.is_large() {
                Self::sweep_large_page(&page)
            } else {
                Self::sweep_page(&page)
            };
            page.set_live_bytes(swept.live_bytes);
            result.live_bytes += swept.live_bytes;
            result.freed_bytes += swept.freed_bytes;

            if swept.live_bytes == 0 {
                released.push(page);
                continue;
            }
            for (address, size) in swept.free_blocks {
                inner.free_list.add(address, size);
            }
            kept.push(page);
        }
        inner.pages = kept;
        drop(guard);

        result.released_pages += released.len();
        for page in released {
            self.release_page(&page)?;
        }
        Ok(())
    }

    fn sweep_large_page(page: &Arc<Page>) -> PageSweep {
        // SAFETY: a large page starts with its only header.
        let header = unsafe { ObjectHeader::from_address(page.base()) };
        let size = header.size();
        if !header.is_free() && header.is_marked_atomic() {
            header.unmark();
            PageSweep {
                live_bytes: size,
                freed_bytes: 0,
                free_blocks: Vec::new(),
            }
        } else {
            PageSweep {
                live_bytes: 0,
                freed_bytes: size,
                free_blocks: Vec::new(),
            }
        }
    }

    /// Sweep one normal page whose LAB has been closed
    fn sweep_page(page: &Page) -> PageSweep {
        let mut swept = PageSweep {
            live_bytes: 0,
            freed_bytes: 0,
            free_blocks: Vec::new(),
        };
        let end = page.allocated_end();
        let mut run_start: Option<Address> = None;
        let mut cursor = page.base();

        while cursor < end {
            // SAFETY: headers tile [base, allocated_end).
            let header = unsafe { ObjectHeader::from_address(cursor) };
            let size = header.size();
            if !header.is_free() && header.is_marked_atomic() {
                if let Some(start) = run_start.take() {
                    Self::close_run(page, start, cursor, &mut swept);
                }
                header.unmark();
                swept.live_bytes += size;
            } else {
                if !header.is_free() {
                    swept.freed_bytes += size;
                }
                run_start.get_or_insert(cursor);
            }
            cursor += size;
        }
        if let Some(start) = run_start {
            Self::close_run(page, start, end, &mut swept);
        }
        swept
    }

    fn close_run(page: &Page, start: Address, stop: Address, swept: &mut PageSweep) {
        let starts = page.object_starts();
        starts.clear_range(start, stop);
        starts.set(start);
        // SAFETY: [start, stop) holds only dead objects and free blocks.
        unsafe { ObjectHeader::write_free(start, stop - start) };
        swept.free_blocks.push((start, stop - start));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::heap::HeapState;
    use crate::object::{trace_nothing, GcInfo};
    use crate::platform::OsPageAllocator;

    fn heap() -> (Heap, crate::object::GcInfoIndex) {
        let heap = Heap::new(
            Arc::new(GcConfig::default()),
            Arc::new(OsPageAllocator::new()),
            Arc::new(HeapState::default()),
        )
        .unwrap();
        let leaf = heap.register_gc_info(GcInfo::new("Leaf", trace_nothing)).unwrap();
        (heap, leaf)
    }

    #[test]
    fn test_dead_neighbours_coalesce() {
        let (heap, leaf) = heap();
        let objects: Vec<_> = (0..6)
            .map(|_| heap.allocate_object(16, 8, leaf).unwrap())
            .collect();
        objects[0].try_mark_atomic();
        objects[4].try_mark_atomic();

        let result = heap.sweep(SweepMode::Full).unwrap();
        assert_eq!(result.live_bytes, 64);
        assert_eq!(result.freed_bytes, 4 * 32);

        assert!(!objects[0].is_marked_atomic(), "survivors are unmarked");
        let page = heap.page_of(objects[0].payload()).unwrap();
        let free = page.find_header(objects[2].payload()).unwrap();
        assert!(free.is_free());
        assert_eq!(free.address(), objects[1].address());
        assert_eq!(free.size(), 3 * 32);
    }

    #[test]
    fn test_empty_pages_are_released() {
        let (heap, leaf) = heap();
        heap.allocate_object(16, 8, leaf).unwrap();
        heap.allocate_object(100 * 1024, 8, leaf).unwrap();
        assert_eq!(heap.page_count(), 2);

        let result = heap.sweep(SweepMode::Full).unwrap();
        assert_eq!(result.released_pages, 2);
        assert_eq!(heap.page_count(), 0);
        assert_eq!(heap.committed_bytes(), 0);
    }

    #[test]
    fn test_young_sweep_leaves_old_pages() {
        let (heap, leaf) = heap();
        let old = heap.allocate_object(16, 8, leaf).unwrap();
        old.try_mark_atomic();
        heap.sweep(SweepMode::Full).unwrap();
        heap.promote_young_pages();

        let garbage = heap.allocate_object(16, 8, leaf).unwrap();
        let garbage_page = heap.page_of(garbage.payload()).unwrap();
        assert!(!garbage_page.is_young(), "reused free block on an old page");

        let result = heap.sweep(SweepMode::Young).unwrap();
        assert_eq!(result.freed_bytes, 0);
        assert!(heap.header_of(garbage.payload()).is_some());
    }

    #[test]
    fn test_swept_memory_is_reused() {
        let (heap, leaf) = heap();
        let keep = heap.allocate_object(16, 8, leaf).unwrap();
        let dead = heap.allocate_object(16, 8, leaf).unwrap().address();
        keep.try_mark_atomic();
        heap.sweep(SweepMode::Full).unwrap();

        let again = heap.allocate_object(16, 8, leaf).unwrap();
        assert_eq!(again.address(), dead);
    }
}
