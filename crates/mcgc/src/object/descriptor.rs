//! Type descriptors and the visitor interface
//!
//! The collector knows nothing about object layouts. Embedders register a
//! `GcInfo` per managed type and store the returned index in each header;
//! marking then asks the trace callback to report the object's slots.

use crate::error::{McgcError, Result};
use crate::object::header::FREE_GC_INFO_INDEX;
use crate::util::Address;
use parking_lot::RwLock;

/// Reports every reference slot of the object at `payload`
pub type TraceCallback = fn(payload: Address, visitor: &mut dyn Visitor);

/// Receiver of the references an object holds
pub trait Visitor {
    /// A word-aligned slot that holds a payload address or zero
    fn visit_slot(&mut self, slot: Address);

    /// A slot that must not keep its target alive
    ///
    /// Marking clears it when the target dies. Visitors that only rewrite
    /// or inspect pointers treat it like any other slot.
    #[inline]
    fn visit_weak_slot(&mut self, slot: Address) {
        self.visit_slot(slot);
    }
}

/// Report slots at fixed payload offsets
#[inline]
pub fn visit_slots(payload: Address, offsets: &[usize], visitor: &mut dyn Visitor) {
    for &offset in offsets {
        visitor.visit_slot(payload + offset);
    }
}

/// Report weak slots at fixed payload offsets
#[inline]
pub fn visit_weak_slots(payload: Address, offsets: &[usize], visitor: &mut dyn Visitor) {
    for &offset in offsets {
        visitor.visit_weak_slot(payload + offset);
    }
}

/// Trace callback for objects without references
pub fn trace_nothing(_payload: Address, _visitor: &mut dyn Visitor) {}

/// Registered per-type metadata
#[derive(Clone, Copy)]
pub struct GcInfo {
    pub name: &'static str,
    pub trace: TraceCallback,
}

impl GcInfo {
    pub const fn new(name: &'static str, trace: TraceCallback) -> Self {
        Self { name, trace }
    }
}

impl std::fmt::Debug for GcInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcInfo").field("name", &self.name).finish()
    }
}

/// Index of a registered `GcInfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcInfoIndex(pub(crate) u32);

impl GcInfoIndex {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Per-object tracing entry point
#[derive(Clone, Copy)]
pub struct TraceDescriptor {
    pub base_object_payload: Address,
    pub callback: TraceCallback,
}

impl TraceDescriptor {
    #[inline]
    pub fn trace(&self, visitor: &mut dyn Visitor) {
        (self.callback)(self.base_object_payload, visitor)
    }
}

/// Table of registered types
///
/// Index 0 is reserved for free blocks.
#[derive(Default)]
pub struct GcInfoTable {
    entries: RwLock<Vec<GcInfo>>,
}

impl GcInfoTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, info: GcInfo) -> Result<GcInfoIndex> {
        let mut entries = self.entries.write();
        let index = u32::try_from(entries.len() + 1)
            .map_err(|_| McgcError::InvalidArgument("too many GcInfo registrations".into()))?;
        entries.push(info);
        log::trace!("registered GcInfo '{}' as {}", info.name, index);
        Ok(GcInfoIndex(index))
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<GcInfo> {
        if index == FREE_GC_INFO_INDEX {
            return None;
        }
        self.entries.read().get(index as usize - 1).copied()
    }

    pub fn contains(&self, index: GcInfoIndex) -> bool {
        self.get(index.0).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
