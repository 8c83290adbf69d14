//! Root Set - Precise roots registered by the embedder
//!
//! Two kinds of roots exist:
//!
//! 1. **Persistent handles** - `Persistent` owns a cell holding a payload
//!    address. The cell is unregistered when the handle drops.
//! 2. **Raw slots** - a word in embedder memory registered with
//!    `RootSet::add_slot`. The embedder guarantees the word stays valid
//!    until `remove_slot`.
//!
//! Registration order is preserved so root marking is deterministic.
//! Compaction rewrites both kinds in place.
//!
//! Ambiguous (stack) roots are not registered here; the owning runtime
//! supplies them during root marking.

use crate::util::{Address, AtomicUtils};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Identifier of a registered root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootId(u64);

enum Root {
    Cell(Arc<AtomicUsize>),
    Slot(Address),
}

/// Registry of precise roots
#[derive(Default)]
pub struct RootSet {
    next_id: AtomicU64,
    roots: Mutex<IndexMap<RootId, Root>>,
}

impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> RootId {
        RootId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a persistent handle holding `payload`
    pub fn persistent(self: &Arc<Self>, payload: Address) -> Persistent {
        let cell = Arc::new(AtomicUsize::new(payload));
        let id = self.next_id();
        self.roots.lock().insert(id, Root::Cell(Arc::clone(&cell)));
        Persistent {
            id,
            cell,
            roots: Arc::downgrade(self),
        }
    }

    /// Register a word of embedder memory as a root
    ///
    /// # Safety
    /// `slot` must be a word-aligned, readable and writable address that
    /// stays valid until `remove_slot` is called with the returned id.
    pub unsafe fn add_slot(&self, slot: Address) -> RootId {
        let id = self.next_id();
        self.roots.lock().insert(id, Root::Slot(slot));
        id
    }

    pub fn remove_slot(&self, id: RootId) -> bool {
        self.roots.lock().shift_remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.roots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current value of every root, in registration order
    pub fn values(&self) -> Vec<Address> {
        self.roots
            .lock()
            .values()
            .map(|root| match root {
                Root::Cell(cell) => cell.load(Ordering::Acquire),
                // SAFETY: guaranteed by the `add_slot` contract.
                Root::Slot(slot) => unsafe { AtomicUtils::load_word(*slot) },
            })
            .collect()
    }

    /// Rewrite every root through `update`, which returns the new value
    /// or None to leave the root unchanged
    pub fn update(&self, mut update: impl FnMut(Address) -> Option<Address>) -> usize {
        let mut updated = 0;
        for root in self.roots.lock().values() {
            match root {
                Root::Cell(cell) => {
                    if let Some(new) = update(cell.load(Ordering::Acquire)) {
                        cell.store(new, Ordering::Release);
                        updated += 1;
                    }
                }
                Root::Slot(slot) => {
                    // SAFETY: guaranteed by the `add_slot` contract.
                    let old = unsafe { AtomicUtils::load_word(*slot) };
                    if let Some(new) = update(old) {
                        unsafe { AtomicUtils::store_word(*slot, new) };
                        updated += 1;
                    }
                }
            }
        }
        updated
    }
}

/// Owned precise root
///
/// Holds a payload address (or 0). Read the address again after every
/// collection: compaction may have moved the object.
pub struct Persistent {
    id: RootId,
    cell: Arc<AtomicUsize>,
    roots: Weak<RootSet>,
}

impl Persistent {
    pub fn id(&self) -> RootId {
        self.id
    }

    #[inline]
    pub fn get(&self) -> Address {
        self.cell.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, payload: Address) {
        self.cell.store(payload, Ordering::Release);
    }

    pub fn clear(&self) {
        self.set(0);
    }

    pub fn is_empty(&self) -> bool {
        self.get() == 0
    }
}

impl std::fmt::Debug for Persistent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistent")
            .field("id", &self.id)
            .field("payload", &format_args!("{:#x}", self.get()))
            .finish()
    }
}

impl Drop for Persistent {
    fn drop(&mut self) {
        if let Some(roots) = self.roots.upgrade() {
            roots.roots.lock().shift_remove(&self.id);
        }
    }
}
