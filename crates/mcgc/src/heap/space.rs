//! Space - Pages of one size class
//!
//! Each space owns its pages, a linear allocation buffer (LAB) over the
//! page currently being filled, and a free list rebuilt by the sweeper.
//!
//! ```text
//! Space (Normal, <= 64 bytes)
//! ├── pages: [P3, P7, P9]
//! ├── lab:   P9 [top .. limit)
//! └── free:  {P3: 2 blocks, P7: 5 blocks}
//! ```

use super::free_list::FreeList;
use super::page::{Page, PageFlags};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Index of a space in the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceId(pub(crate) u16);

impl SpaceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a space holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    /// Objects up to `max_object_size` bytes (header included)
    Normal { max_object_size: usize },
    /// One object per page
    Large,
    /// Embedder-defined space addressed by index
    Custom { index: usize },
}

/// Bump region over the tail of the current page
#[derive(Default)]
pub(crate) struct LinearAllocationBuffer {
    pub(crate) page: Option<Arc<Page>>,
    pub(crate) top: usize,
    pub(crate) limit: usize,
}

impl LinearAllocationBuffer {
    pub(crate) fn remaining(&self) -> usize {
        self.limit - self.top
    }
}

pub(crate) struct SpaceInner {
    pub(crate) pages: Vec<Arc<Page>>,
    pub(crate) lab: LinearAllocationBuffer,
    pub(crate) free_list: FreeList,
}

/// A space of the heap
pub struct Space {
    id: SpaceId,
    kind: SpaceKind,
    page_flags: PageFlags,
    compactable: bool,
    pub(crate) inner: Mutex<SpaceInner>,
    live_bytes: AtomicUsize,
}

impl Space {
    pub(crate) fn new(id: SpaceId, kind: SpaceKind, page_flags: PageFlags, compactable: bool) -> Self {
        Self {
            id,
            kind,
            page_flags,
            compactable,
            inner: Mutex::new(SpaceInner {
                pages: Vec::new(),
                lab: LinearAllocationBuffer::default(),
                free_list: FreeList::new(),
            }),
            live_bytes: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    /// Flags every page of this space starts with
    pub fn page_flags(&self) -> PageFlags {
        self.page_flags
    }

    pub fn is_compactable(&self) -> bool {
        self.compactable
    }

    pub fn is_large(&self) -> bool {
        matches!(self.kind, SpaceKind::Large)
    }

    /// Bytes marked live in this space during the current or last cycle
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn live_bytes_counter(&self) -> &AtomicUsize {
        &self.live_bytes
    }

    pub(crate) fn reset_live_bytes(&self) {
        self.live_bytes.store(0, Ordering::Relaxed);
    }

    pub fn page_count(&self) -> usize {
        self.inner.lock().pages.len()
    }

    /// Snapshot of the pages currently owned
    pub fn pages(&self) -> Vec<Arc<Page>> {
        self.inner.lock().pages.clone()
    }

    pub fn free_bytes(&self) -> usize {
        self.inner.lock().free_list.free_bytes()
    }
}

impl std::fmt::Debug for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("compactable", &self.compactable)
            .field("live_bytes", &self.live_bytes())
            .finish()
    }
}
