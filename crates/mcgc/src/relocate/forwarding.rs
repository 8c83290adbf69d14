//! Forwarding Table - Old to new payload addresses
//!
//! Filled while objects are copied out of evacuation candidates and
//! consulted while pointers are fixed up. Lookups match payload addresses
//! exactly: slots never hold interior pointers, and objects referenced
//! through ambiguous (interior) words are pinned and never move.

use crate::object::Visitor;
use crate::util::{Address, AtomicUtils};
use indexmap::IndexMap;

/// Mapping from old payload to new payload
#[derive(Debug, Default)]
pub struct ForwardingTable {
    entries: IndexMap<Address, Address>,
    moved_bytes: usize,
}

impl ForwardingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the `size`-byte object at `old` now lives at `new`
    pub fn insert(&mut self, old: Address, new: Address, size: usize) {
        debug_assert_ne!(old, new);
        if self.entries.insert(old, new).is_none() {
            self.moved_bytes += size;
        }
    }

    #[inline]
    pub fn get(&self, old: Address) -> Option<Address> {
        self.entries.get(&old).copied()
    }

    /// New address of `address`, or `address` itself if it did not move
    #[inline]
    pub fn forward(&self, address: Address) -> Address {
        self.get(address).unwrap_or(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn moved_bytes(&self) -> usize {
        self.moved_bytes
    }

    /// Entries in copy order
    pub fn iter(&self) -> impl Iterator<Item = (Address, Address)> + '_ {
        self.entries.iter().map(|(&old, &new)| (old, new))
    }
}

/// Rewrites every visited slot that holds a moved address
pub struct FixupVisitor<'a> {
    table: &'a ForwardingTable,
    updated: usize,
}

impl<'a> FixupVisitor<'a> {
    pub fn new(table: &'a ForwardingTable) -> Self {
        Self { table, updated: 0 }
    }

    pub fn updated(&self) -> usize {
        self.updated
    }
}

impl Visitor for FixupVisitor<'_> {
    fn visit_slot(&mut self, slot: Address) {
        // SAFETY: slots are reported by trace callbacks of live objects or
        // come from remembered sets validated against live hosts.
        let value = unsafe { AtomicUtils::load_word(slot) };
        if let Some(new) = self.table.get(value) {
            unsafe { AtomicUtils::store_word(slot, new) };
            self.updated += 1;
        }
    }
}
