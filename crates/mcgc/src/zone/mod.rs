//! Zone Module - Arena Allocation for Collector Metadata
//!
//! A `Zone` hands out memory by bumping a pointer through a list of
//! segments. Nothing is returned to the system before the zone is reset or
//! dropped, so allocation is O(1) and bulk release is free.
//!
//! ```text
//! Zone
//! ├── Segment 0  [#### used #### | ... ]
//! ├── Segment 1  [######## used ######## ]
//! └── Segment 2  [## used ## |  free     ]  <- position .. limit
//! ```
//!
//! Typed allocators sit on top of a zone:
//! - `ZoneAllocator<T>` never reuses memory (`deallocate` is a no-op)
//! - `RecyclingZoneAllocator<T>` keeps a monotone free list of released
//!   blocks and reuses the head block when it is large enough
//!
//! # Thread Safety
//!
//! Zones are single-threaded. `Zone` is `!Sync` and the allocators borrow it.

pub mod allocator;
pub mod vec;

pub use allocator::{RecyclingZoneAllocator, ZoneAllocator};
pub use vec::ZoneVec;

use crate::error::{McgcError, Result};
use crate::util::Alignment;
use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::ptr::NonNull;

/// Smallest segment requested from the system allocator
pub const MIN_SEGMENT_SIZE: usize = 8 * 1024;

/// Largest segment used for ordinary growth; bigger requests get their own
pub const MAX_SEGMENT_SIZE: usize = 32 * 1024;

const SEGMENT_ALIGNMENT: usize = 16;

struct Segment {
    start: NonNull<u8>,
    layout: Layout,
}

#[derive(Default)]
struct ZoneState {
    segments: Vec<Segment>,
    position: usize,
    limit: usize,
    allocation_size: usize,
    segment_bytes: usize,
}

/// Bump-pointer arena
pub struct Zone {
    name: &'static str,
    max_bytes: Option<usize>,
    state: RefCell<ZoneState>,
    high_water_mark: std::cell::Cell<usize>,
}

impl Zone {
    /// Create an unbounded zone
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            max_bytes: None,
            state: RefCell::new(ZoneState::default()),
            high_water_mark: std::cell::Cell::new(0),
        }
    }

    /// Create a zone whose segments may not exceed `max_bytes` in total
    pub fn with_limit(name: &'static str, max_bytes: usize) -> Self {
        Self {
            name,
            max_bytes: Some(max_bytes),
            state: RefCell::new(ZoneState::default()),
            high_water_mark: std::cell::Cell::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Allocate `size` bytes aligned to `align`
    ///
    /// # Returns
    /// Pointer to uninitialized memory that lives until the zone is reset
    /// or dropped, or `OutOfMemory` if a new segment cannot be obtained.
    pub fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        if !align.is_power_of_two() || align > SEGMENT_ALIGNMENT {
            return Err(McgcError::InvalidArgument(format!(
                "zone alignment {} unsupported",
                align
            )));
        }

        let mut state = self.state.borrow_mut();
        let mut start = Alignment::align_up(state.position, align);
        if state.segments.is_empty() || start.checked_add(size).map_or(true, |e| e > state.limit) {
            self.new_segment(&mut state, size)?;
            start = Alignment::align_up(state.position, align);
        }

        let end = start + size;
        debug_assert!(end <= state.limit, "zone bump past reserved capacity");
        state.position = end;
        state.allocation_size += size;
        if state.allocation_size > self.high_water_mark.get() {
            self.high_water_mark.set(state.allocation_size);
        }

        NonNull::new(start as *mut u8).ok_or(McgcError::OutOfMemory {
            requested: size,
            available: 0,
        })
    }

    fn new_segment(&self, state: &mut ZoneState, size: usize) -> Result<()> {
        let previous = state
            .segments
            .last()
            .map_or(0, |segment| segment.layout.size());
        let needed = size + SEGMENT_ALIGNMENT;
        let grown = (previous * 2).clamp(MIN_SEGMENT_SIZE, MAX_SEGMENT_SIZE);
        let segment_size = Alignment::align_up(grown.max(needed), SEGMENT_ALIGNMENT);

        let available = self
            .max_bytes
            .map_or(usize::MAX, |max| max.saturating_sub(state.segment_bytes));
        if segment_size > available {
            log::debug!(
                "zone '{}' cannot grow: {} bytes requested, {} available",
                self.name,
                segment_size,
                available
            );
            return Err(McgcError::OutOfMemory {
                requested: size,
                available,
            });
        }

        let layout = Layout::from_size_align(segment_size, SEGMENT_ALIGNMENT)
            .map_err(|e| McgcError::InvalidArgument(e.to_string()))?;
        // SAFETY: layout has a non-zero size.
        let start = NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(
            McgcError::OutOfMemory {
                requested: segment_size,
                available: 0,
            },
        )?;

        state.position = start.as_ptr() as usize;
        state.limit = state.position + segment_size;
        state.segment_bytes += segment_size;
        state.segments.push(Segment { start, layout });
        Ok(())
    }

    /// Bytes handed out since creation or the last reset
    pub fn allocation_size(&self) -> usize {
        self.state.borrow().allocation_size
    }

    /// Bytes obtained from the system allocator
    pub fn segment_bytes_allocated(&self) -> usize {
        self.state.borrow().segment_bytes
    }

    /// Largest `allocation_size` ever observed
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark.get()
    }

    /// Release every segment; all outstanding pointers become dangling
    ///
    /// Takes `&mut self` so no allocator can still borrow the zone.
    pub fn reset(&mut self) {
        let state = self.state.get_mut();
        for segment in state.segments.drain(..) {
            // SAFETY: allocated in `new_segment` with exactly this layout.
            unsafe { alloc::dealloc(segment.start.as_ptr(), segment.layout) };
        }
        state.position = 0;
        state.limit = 0;
        state.allocation_size = 0;
        state.segment_bytes = 0;
    }
}

impl Drop for Zone {
    fn drop(&mut self) {
        self.reset();
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Zone")
            .field("name", &self.name)
            .field("segments", &state.segments.len())
            .field("allocation_size", &state.allocation_size)
            .field("high_water_mark", &self.high_water_mark.get())
            .finish()
    }
}
