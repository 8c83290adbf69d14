//! Heap Module - Space Manager
//!
//! The heap owns every space and every page. Allocation picks a space by
//! size, bump-allocates in the space's current page, falls back to the
//! space's free list, and finally maps a new page through the platform
//! provider.
//!
//! ```text
//! ┌──────────────────────────── Heap ─────────────────────────────┐
//! │ Normal(<=32) Normal(<=64) ... Normal(regular)  Large  Custom* │
//! │    │ pages       │ pages          │ pages        │ 1 obj/page │
//! │    ▼             ▼                ▼              ▼            │
//! │ ┌────────────── PageTable (PageId -> Page) ────────────────┐  │
//! │ │  address index: base -> PageId  (interior pointer lookup)│  │
//! │ └──────────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Objects are named two ways:
//! - raw payload addresses, the fast path used by marking and barriers
//! - `ObjectHandle {space, page, offset}`, a checked arena index
//!
//! # Thread Safety
//!
//! Allocation locks only the target space. The page table sits behind a
//! read-write lock that writers take only when pages come and go.
//! References returned by lookups stay valid until the next sweep.

pub mod free_list;
pub mod object_start_bitmap;
pub mod page;
pub mod remembered_set;
pub mod space;
pub mod state;
pub(crate) mod sweeper;

pub use page::{Page, PageFlags, PageId};
pub use remembered_set::{RememberedSetType, SlotSet};
pub use space::{Space, SpaceId, SpaceKind};
pub use state::{HeapState, PhaseFlags};

use crate::config::GcConfig;
use crate::error::{McgcError, Result};
use crate::object::{GcInfo, GcInfoIndex, GcInfoTable, ObjectHeader, HEADER_SIZE};
use crate::platform::{PageAllocator, Permission, ProtectionKey};
use crate::util::constants::ALLOCATION_GRANULARITY;
use crate::util::{Address, Alignment};
use parking_lot::RwLock;
use space::SpaceInner;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Checked arena index of an object
///
/// Handles stay meaningful across collections that do not move the object.
/// After compaction, re-derive handles from updated roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub space: SpaceId,
    pub page: PageId,
    pub offset: u32,
}

/// Heap statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes of mapped pages
    pub committed_bytes: usize,
    /// Pages currently mapped
    pub page_count: usize,
    /// Bytes marked live during the current or last cycle
    pub live_bytes: usize,
    /// Bytes allocated since the last completed cycle
    pub allocated_since_gc: usize,
    /// Bytes available on free lists
    pub free_list_bytes: usize,
}

#[derive(Default)]
struct PageTable {
    slots: Vec<Option<Arc<Page>>>,
    free_ids: Vec<u32>,
    by_address: BTreeMap<Address, PageId>,
}

impl PageTable {
    fn next_id(&mut self) -> PageId {
        match self.free_ids.pop() {
            Some(id) => PageId(id),
            None => {
                self.slots.push(None);
                PageId((self.slots.len() - 1) as u32)
            }
        }
    }

    fn insert(&mut self, page: Arc<Page>) {
        let index = page.id().index();
        self.by_address.insert(page.base(), page.id());
        self.slots[index] = Some(page);
    }

    fn remove(&mut self, id: PageId) -> Option<Arc<Page>> {
        let page = self.slots.get_mut(id.index())?.take()?;
        self.by_address.remove(&page.base());
        self.free_ids.push(id.0);
        Some(page)
    }

    fn get(&self, id: PageId) -> Option<&Arc<Page>> {
        self.slots.get(id.index())?.as_ref()
    }

    fn lookup(&self, address: Address) -> Option<&Arc<Page>> {
        let (_, id) = self.by_address.range(..=address).next_back()?;
        self.get(*id).filter(|page| page.contains(address))
    }
}

/// Space manager
pub struct Heap {
    config: Arc<GcConfig>,
    platform: Arc<dyn PageAllocator>,
    state: Arc<HeapState>,
    gc_infos: GcInfoTable,
    spaces: Vec<Space>,
    large_space: SpaceId,
    custom_base: usize,
    pages: RwLock<PageTable>,
    protection_key: Option<ProtectionKey>,
    allocated_since_gc: AtomicUsize,
    committed_bytes: AtomicUsize,
}

impl Heap {
    /// Create a heap with the spaces described by `config`
    ///
    /// No page is mapped until the first allocation.
    pub fn new(
        config: Arc<GcConfig>,
        platform: Arc<dyn PageAllocator>,
        state: Arc<HeapState>,
    ) -> Result<Self> {
        config.validate()?;

        let mut spaces = Vec::new();
        let mut push = |kind, flags, compactable| {
            let id = SpaceId(spaces.len() as u16);
            spaces.push(Space::new(id, kind, flags, compactable));
            id
        };

        for &max_object_size in &config.size_classes {
            push(SpaceKind::Normal { max_object_size }, PageFlags::empty(), config.compaction);
        }
        push(
            SpaceKind::Normal {
                max_object_size: config.large_object_threshold - 1,
            },
            PageFlags::empty(),
            config.compaction,
        );
        let large_space = push(SpaceKind::Large, PageFlags::empty(), false);

        let custom_base = large_space.index() + 1;
        for (index, custom) in config.custom_spaces.iter().enumerate() {
            let mut flags = PageFlags::empty();
            flags.set(PageFlags::TRUSTED, custom.trusted);
            flags.set(PageFlags::EXECUTABLE, custom.executable);
            flags.set(PageFlags::SHARED, custom.shared);
            push(
                SpaceKind::Custom { index },
                flags,
                config.compaction && custom.compactable,
            );
        }

        let protection_key = if config.protect_trusted_pages {
            platform.protection_keys().and_then(|keys| keys.allocate_key())
        } else {
            None
        };
        if config.protect_trusted_pages && protection_key.is_none() {
            log::warn!("trusted page protection requested but no protection key is available");
        }

        log::debug!(
            "heap created: {} spaces ({} custom), page size {}",
            spaces.len(),
            config.custom_spaces.len(),
            config.page_size
        );

        Ok(Self {
            config,
            platform,
            state,
            gc_infos: GcInfoTable::new(),
            spaces,
            large_space,
            custom_base,
            pages: RwLock::new(PageTable::default()),
            protection_key,
            allocated_since_gc: AtomicUsize::new(0),
            committed_bytes: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<HeapState> {
        &self.state
    }

    pub fn platform(&self) -> &Arc<dyn PageAllocator> {
        &self.platform
    }

    pub fn protection_key(&self) -> Option<ProtectionKey> {
        self.protection_key
    }

    // ========================================================================
    // TYPES
    // ========================================================================

    pub fn register_gc_info(&self, info: GcInfo) -> Result<GcInfoIndex> {
        self.gc_infos.register(info)
    }

    pub fn gc_infos(&self) -> &GcInfoTable {
        &self.gc_infos
    }

    // ========================================================================
    // SPACES
    // ========================================================================

    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    pub fn space(&self, id: SpaceId) -> &Space {
        &self.spaces[id.index()]
    }

    pub fn large_space(&self) -> SpaceId {
        self.large_space
    }

    /// Space of the custom space at `index`
    pub fn custom_space(&self, index: usize) -> Result<SpaceId> {
        let count = self.config.custom_spaces.len();
        if index >= count {
            return Err(McgcError::InvalidSpaceIndex { index, count });
        }
        Ok(SpaceId((self.custom_base + index) as u16))
    }

    /// Space that serves allocations of `total` bytes (header included)
    pub fn space_for_size(&self, total: usize) -> SpaceId {
        if total >= self.config.large_object_threshold {
            return self.large_space;
        }
        self.spaces[..self.large_space.index()]
            .iter()
            .find(|space| match space.kind() {
                SpaceKind::Normal { max_object_size } => total <= max_object_size,
                _ => false,
            })
            .map_or(self.large_space, Space::id)
    }

    // ========================================================================
    // ALLOCATION
    // ========================================================================

    /// Allocation size for a payload of `size` bytes, header included
    pub fn allocation_size(&self, size: usize, alignment: usize) -> Result<usize> {
        if !alignment.is_power_of_two() || alignment > ALLOCATION_GRANULARITY {
            return Err(McgcError::InvalidArgument(format!(
                "alignment {} unsupported (max {})",
                alignment, ALLOCATION_GRANULARITY
            )));
        }
        size.checked_add(HEADER_SIZE)
            .and_then(|s| Alignment::checked_align_up(s, ALLOCATION_GRANULARITY))
            .filter(|&total| total <= u32::MAX as usize)
            .ok_or_else(|| McgcError::InvalidArgument(format!("object size {} too large", size)))
    }

    /// Allocate an object of `size` payload bytes in the matching size class
    ///
    /// # Returns
    /// Header of a zeroed object that is still in construction. While
    /// marking is active the object is allocated black.
    pub fn allocate_object(
        &self,
        size: usize,
        alignment: usize,
        gc_info: GcInfoIndex,
    ) -> Result<&ObjectHeader> {
        let total = self.allocation_size(size, alignment)?;
        self.allocate_in(self.space_for_size(total), total, gc_info)
    }

    /// Allocate an object in the custom space at `index`
    pub fn allocate_in_custom_space(
        &self,
        index: usize,
        size: usize,
        alignment: usize,
        gc_info: GcInfoIndex,
    ) -> Result<&ObjectHeader> {
        let space = self.custom_space(index)?;
        let total = self.allocation_size(size, alignment)?;
        self.allocate_in(space, total, gc_info)
    }

    fn allocate_in(&self, space: SpaceId, total: usize, gc_info: GcInfoIndex) -> Result<&ObjectHeader> {
        if !self.state.is_allocation_allowed() {
            return Err(McgcError::AllocationDisallowed);
        }
        if !self.gc_infos.contains(gc_info) {
            return Err(McgcError::InvalidArgument(format!(
                "GcInfo index {} is not registered",
                gc_info.raw()
            )));
        }

        let space = self.space(space);
        let at = self.reserve(space, total)?;

        // SAFETY: `reserve` handed out `total` bytes that only this call
        // touches until the object is published.
        let header = unsafe {
            std::ptr::write_bytes((at + HEADER_SIZE) as *mut u8, 0, total - HEADER_SIZE);
            ObjectHeader::write_object(at, total, gc_info.raw())
        };

        if self.state.is_marking() && header.try_mark_atomic() {
            space.live_bytes_counter().fetch_add(total, Ordering::Relaxed);
        }
        self.allocated_since_gc.fetch_add(total, Ordering::Relaxed);
        Ok(header)
    }

    /// Reserve `total` bytes in `space`
    ///
    /// The block is covered by a free header and registered in the page's
    /// object-start bitmap, so linear page walks stay consistent until the
    /// caller writes the real header.
    pub(crate) fn reserve(&self, space: &Space, total: usize) -> Result<Address> {
        debug_assert!(Alignment::is_aligned(total, ALLOCATION_GRANULARITY));
        if total >= self.config.large_object_threshold || space.is_large() {
            return self.reserve_large(space, total);
        }

        let mut guard = space.inner.lock();
        let inner = &mut *guard;

        let (page, at) = match Self::bump(inner, total) {
            Some(found) => found,
            None => match self.take_free_block(inner, total) {
                Some(found) => found,
                None => {
                    self.close_lab(inner);
                    let size = self.config.page_size;
                    let page = self.create_page(space, size, size, PageFlags::empty())?;
                    inner.pages.push(page.clone());
                    inner.lab.top = page.base();
                    inner.lab.limit = page.end();
                    inner.lab.page = Some(page);
                    Self::bump(inner, total).ok_or(McgcError::OutOfMemory {
                        requested: total,
                        available: size,
                    })?
                }
            },
        };

        // SAFETY: [at, at + total) lies inside `page` and is owned by us.
        unsafe { ObjectHeader::write_free(at, total) };
        page.object_starts().set(at);
        Ok(at)
    }

    fn bump(inner: &mut SpaceInner, total: usize) -> Option<(Arc<Page>, Address)> {
        let lab = &mut inner.lab;
        let page = lab.page.as_ref()?;
        if lab.remaining() < total {
            return None;
        }
        let at = lab.top;
        lab.top += total;
        page.set_allocated_end(lab.top);
        Some((page.clone(), at))
    }

    fn take_free_block(&self, inner: &mut SpaceInner, total: usize) -> Option<(Arc<Page>, Address)> {
        let block = inner.free_list.allocate(total)?;
        let page = self.page_of(block.address)?;
        if block.size > total {
            let rest = block.address + total;
            // SAFETY: the remainder lies inside the free block just taken.
            unsafe { ObjectHeader::write_free(rest, block.size - total) };
            page.object_starts().set(rest);
            inner.free_list.add(rest, block.size - total);
        }
        Some((page, block.address))
    }

    /// Turn the unused tail of the current LAB into a free block
    pub(crate) fn close_lab(&self, inner: &mut SpaceInner) {
        let lab = std::mem::take(&mut inner.lab);
        if let Some(page) = lab.page {
            let rest = lab.limit - lab.top;
            if rest > 0 {
                // SAFETY: the tail of the LAB is unused page memory.
                unsafe { ObjectHeader::write_free(lab.top, rest) };
                page.object_starts().set(lab.top);
                page.set_allocated_end(lab.limit);
                inner.free_list.add(lab.top, rest);
            }
        }
    }

    fn reserve_large(&self, space: &Space, total: usize) -> Result<Address> {
        let os_page = self.platform.allocate_page_size();
        let size = Alignment::align_up(total, os_page);
        let page = self.create_page(space, size, os_page, PageFlags::LARGE)?;
        let at = page.base();
        // SAFETY: fresh page of at least `total` bytes.
        unsafe { ObjectHeader::write_free(at, total) };
        page.object_starts().set(at);
        page.set_allocated_end(at + total);
        space.inner.lock().pages.push(page);
        Ok(at)
    }

    fn create_page(
        &self,
        space: &Space,
        size: usize,
        alignment: usize,
        extra: PageFlags,
    ) -> Result<Arc<Page>> {
        let mut flags = space.page_flags() | extra;
        if self.config.generational {
            flags |= PageFlags::YOUNG;
        }
        let permission = if flags.contains(PageFlags::EXECUTABLE) {
            Permission::ReadWriteExecute
        } else {
            Permission::ReadWrite
        };

        let base = self.platform.allocate(None, size, alignment, permission)?;

        let key = self.protection_key.filter(|_| flags.contains(PageFlags::TRUSTED));
        if let (Some(key), Some(keys)) = (key, self.platform.protection_keys()) {
            if let Err(err) = keys.assign_key(base, size, key) {
                let _ = self.platform.free(base, size);
                return Err(err);
            }
        }

        let mut table = self.pages.write();
        let id = table.next_id();
        let page = Arc::new(Page::new(id, space.id(), base, size, flags, key));
        table.insert(page.clone());
        drop(table);

        self.committed_bytes.fetch_add(size, Ordering::Relaxed);
        log::trace!("mapped {:?} for space {:?} at {:#x}", id, space.id(), base);
        Ok(page)
    }

    /// Unmap a page that its space no longer references
    pub(crate) fn release_page(&self, page: &Page) -> Result<()> {
        self.pages.write().remove(page.id());
        self.committed_bytes.fetch_sub(page.size(), Ordering::Relaxed);
        log::trace!("releasing {:?} at {:#x}", page.id(), page.base());
        self.platform.free(page.base(), page.size())
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    pub fn page(&self, id: PageId) -> Option<Arc<Page>> {
        self.pages.read().get(id).cloned()
    }

    /// Page whose range contains `address`
    pub fn page_of(&self, address: Address) -> Option<Arc<Page>> {
        self.pages.read().lookup(address).cloned()
    }

    /// Header of the object whose payload starts at `payload`
    pub fn header_of(&self, payload: Address) -> Option<&ObjectHeader> {
        let page = self.page_of(payload)?;
        let header = page.header_for_payload(payload)?;
        // SAFETY: page memory outlives this borrow of the heap unless a
        // sweep releases it, which requires exclusive collector access.
        Some(unsafe { ObjectHeader::from_address(header.address()) })
    }

    pub fn contains(&self, address: Address) -> bool {
        self.page_of(address).is_some()
    }

    pub fn handle_of(&self, payload: Address) -> Option<ObjectHandle> {
        let page = self.page_of(payload)?;
        page.header_for_payload(payload)?;
        Some(ObjectHandle {
            space: page.space(),
            page: page.id(),
            offset: page.offset_of(payload),
        })
    }

    /// Payload address named by `handle`, if it still denotes an object
    pub fn resolve(&self, handle: ObjectHandle) -> Option<Address> {
        let page = self.page(handle.page)?;
        let offset = handle.offset as usize;
        if page.space() != handle.space
            || offset >= page.size()
            || offset % ALLOCATION_GRANULARITY != 0
        {
            return None;
        }
        let payload = page.address_at(handle.offset);
        page.header_for_payload(payload).map(|_| payload)
    }

    /// Snapshot of every mapped page
    pub fn all_pages(&self) -> Vec<Arc<Page>> {
        self.pages.read().slots.iter().flatten().cloned().collect()
    }

    /// Lazy walk over the headers of every space
    ///
    /// The walk snapshots the page list; call `restart` on the returned
    /// iterator to begin again. Must not run concurrently with sweeping.
    pub fn object_headers(&self, skip_free: bool) -> HeapObjects<'_> {
        let pages = self
            .spaces
            .iter()
            .flat_map(|space| space.pages())
            .collect();
        HeapObjects {
            _heap: self,
            pages,
            page_index: 0,
            cursor: None,
            skip_free,
        }
    }

    // ========================================================================
    // COLLECTOR SUPPORT
    // ========================================================================

    /// Mark a page for evacuation in the next cycle
    ///
    /// Only pages of compactable normal spaces qualify.
    pub fn flag_evacuation_candidate(&self, id: PageId) -> Result<()> {
        let page = self
            .page(id)
            .ok_or_else(|| McgcError::InvalidArgument(format!("unknown page {:?}", id)))?;
        if page.is_large() || !self.space(page.space()).is_compactable() {
            return Err(McgcError::InvalidArgument(format!(
                "{:?} is not in a compactable space",
                id
            )));
        }
        page.set_flag(PageFlags::EVACUATION_CANDIDATE);
        Ok(())
    }

    pub fn evacuation_candidates(&self) -> Vec<Arc<Page>> {
        self.all_pages()
            .into_iter()
            .filter(|page| page.is_evacuation_candidate())
            .collect()
    }

    /// Stop allocating into `page`: close its LAB and drop its free blocks
    pub(crate) fn withdraw_from_allocation(&self, page: &Page) {
        let mut guard = self.space(page.space()).inner.lock();
        let inner = &mut *guard;
        if inner.lab.page.as_ref().is_some_and(|lab| lab.id() == page.id()) {
            self.close_lab(inner);
        }
        inner.free_list.remove_range(page.base(), page.end());
    }

    /// Remove an evacuated page from its space and unmap it
    pub(crate) fn release_evacuated_page(&self, page: &Page) -> Result<()> {
        {
            let mut inner = self.space(page.space()).inner.lock();
            inner.pages.retain(|owned| owned.id() != page.id());
            inner.free_list.remove_range(page.base(), page.end());
        }
        self.release_page(page)
    }

    pub(crate) fn clear_flag_on_all_pages(&self, flag: PageFlags) {
        for page in self.all_pages() {
            page.clear_flag(flag);
        }
    }

    /// Close the LAB of every space so pages are fully tiled
    pub(crate) fn close_all_labs(&self) {
        for space in &self.spaces {
            let mut inner = space.inner.lock();
            self.close_lab(&mut inner);
        }
    }

    pub(crate) fn reset_live_bytes(&self) {
        for space in &self.spaces {
            space.reset_live_bytes();
        }
    }

    /// Recompute every space's live bytes from its swept pages
    pub(crate) fn refresh_live_bytes(&self) {
        for space in &self.spaces {
            let live = space.pages().iter().map(|page| page.live_bytes()).sum();
            space.live_bytes_counter().store(live, Ordering::Relaxed);
        }
    }

    pub(crate) fn clear_remembered_sets(&self, kinds: &[RememberedSetType]) {
        for page in self.all_pages() {
            for &kind in kinds {
                page.remembered_set(kind).clear();
            }
        }
    }

    /// Turn young pages old and drop the generational remembered sets
    pub(crate) fn promote_young_pages(&self) {
        for page in self.all_pages() {
            page.clear_flag(PageFlags::YOUNG);
            page.remembered_set(RememberedSetType::OldToNew).clear();
            page.remembered_set(RememberedSetType::OldToNewObjects).clear();
        }
    }

    pub(crate) fn reset_allocated_since_gc(&self) {
        self.allocated_since_gc.store(0, Ordering::Relaxed);
    }

    // ========================================================================
    // STATISTICS
    // ========================================================================

    /// Bytes marked live across all spaces
    pub fn live_bytes(&self) -> usize {
        self.spaces.iter().map(Space::live_bytes).sum()
    }

    pub fn committed_bytes(&self) -> usize {
        self.committed_bytes.load(Ordering::Relaxed)
    }

    pub fn page_count(&self) -> usize {
        self.pages.read().by_address.len()
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            committed_bytes: self.committed_bytes(),
            page_count: self.page_count(),
            live_bytes: self.live_bytes(),
            allocated_since_gc: self.allocated_since_gc.load(Ordering::Relaxed),
            free_list_bytes: self.spaces.iter().map(Space::free_bytes).sum(),
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let table = std::mem::take(self.pages.get_mut());
        for page in table.slots.into_iter().flatten() {
            if let Err(err) = self.platform.free(page.base(), page.size()) {
                log::warn!("failed to release {:?} on heap teardown: {}", page.id(), err);
            }
        }
    }
}

/// Lazy, restartable walk over heap headers
pub struct HeapObjects<'h> {
    _heap: &'h Heap,
    pages: Vec<Arc<Page>>,
    page_index: usize,
    cursor: Option<Address>,
    skip_free: bool,
}

impl HeapObjects<'_> {
    /// Start over from the first page of the snapshot
    pub fn restart(&mut self) {
        self.page_index = 0;
        self.cursor = None;
    }
}

impl<'h> Iterator for HeapObjects<'h> {
    type Item = &'h ObjectHeader;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let page = self.pages.get(self.page_index)?;
            let cursor = *self.cursor.get_or_insert(page.base());
            if cursor >= page.allocated_end() {
                self.page_index += 1;
                self.cursor = None;
                continue;
            }
            // SAFETY: headers tile [base, allocated_end) and the page is
            // kept alive by the snapshot for the iterator's lifetime.
            let header: &'h ObjectHeader = unsafe { ObjectHeader::from_address(cursor) };
            self.cursor = Some(cursor + header.size());
            if self.skip_free && header.is_free() {
                continue;
            }
            return Some(header);
        }
    }
}
