//! Prefinalizer Registry - Callbacks run on dying objects before sweeping
//!
//! A prefinalizer gets to look at its object while the rest of the heap is
//! still intact: after marking, before the sweep reclaims anything. The
//! callback decides with a `LivenessBroker` whether its object died; an
//! entry whose callback reports the object dead is dropped, others stay
//! registered for the next cycle.

use super::scopes::NoAllocationScope;
use super::OwningRuntime;
use crate::heap::Heap;
use crate::relocate::ForwardingTable;
use crate::util::Address;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Prefinalizer callback
///
/// Returns true when the object was dead and the prefinalizer ran, which
/// removes the entry.
pub type PrefinalizerCallback = fn(broker: &LivenessBroker<'_>, object: Address) -> bool;

/// Answers liveness queries during prefinalization
pub struct LivenessBroker<'h> {
    heap: &'h Heap,
    minor: bool,
}

impl<'h> LivenessBroker<'h> {
    pub(crate) fn new(heap: &'h Heap, minor: bool) -> Self {
        Self { heap, minor }
    }

    /// Whether `payload` survives the current cycle
    ///
    /// Addresses outside the heap are alive; so is every old object during
    /// a minor cycle.
    pub fn is_alive(&self, payload: Address) -> bool {
        let Some(page) = self.heap.page_of(payload) else {
            return true;
        };
        if self.minor && !page.is_young() {
            return true;
        }
        page.header_for_payload(payload)
            .is_some_and(|header| header.is_marked_atomic())
    }

    pub fn heap(&self) -> &Heap {
        self.heap
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PrefinalizerEntry {
    pub object: Address,
    pub callback: PrefinalizerCallback,
}

impl PartialEq for PrefinalizerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.object == other.object && self.callback as usize == other.callback as usize
    }
}

impl Eq for PrefinalizerEntry {}

/// Outcome of one prefinalization pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefinalizerStats {
    pub invoked: usize,
    pub removed: usize,
    pub deferred: usize,
}

/// Registered prefinalizers of one heap
pub struct PrefinalizerRegistry {
    runtime: Arc<dyn OwningRuntime>,
    entries: Mutex<Vec<PrefinalizerEntry>>,
    /// Registrations made while a pass runs
    deferred: Mutex<Vec<PrefinalizerEntry>>,
    invoking: AtomicBool,
}

impl PrefinalizerRegistry {
    pub fn new(runtime: Arc<dyn OwningRuntime>) -> Self {
        Self {
            runtime,
            entries: Mutex::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
            invoking: AtomicBool::new(false),
        }
    }

    /// Register a prefinalizer
    ///
    /// Silently ignored off the creation thread or for a duplicate entry.
    ///
    /// # Returns
    /// Whether the entry was added
    pub fn register(&self, entry: PrefinalizerEntry) -> bool {
        if !self.runtime.is_creation_thread() {
            log::warn!(
                "prefinalizer for {:#x} registered off the creation thread, ignored",
                entry.object
            );
            return false;
        }

        let mut entries = self.entries.lock();
        let mut deferred = self.deferred.lock();
        if entries.contains(&entry) || deferred.contains(&entry) {
            return false;
        }
        if self.invoking.load(Ordering::Acquire) {
            deferred.push(entry);
        } else {
            entries.push(entry);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len() + self.deferred.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_invoking(&self) -> bool {
        self.invoking.load(Ordering::Acquire)
    }

    /// Run every registered prefinalizer once, newest first
    ///
    /// Allocation is disallowed for the duration unless the heap is
    /// configured otherwise.
    pub fn invoke_all(&self, heap: &Heap, minor: bool) -> PrefinalizerStats {
        let snapshot = self.entries.lock().clone();
        let mut stats = PrefinalizerStats::default();
        if snapshot.is_empty() {
            return stats;
        }

        self.invoking.store(true, Ordering::Release);
        let _no_allocation = (!heap.config().allow_allocation_in_prefinalizers)
            .then(|| NoAllocationScope::new(heap.state()));
        let broker = LivenessBroker::new(heap, minor);

        let mut finished = Vec::new();
        for entry in snapshot.iter().rev() {
            stats.invoked += 1;
            if (entry.callback)(&broker, entry.object) {
                finished.push(*entry);
            }
        }
        drop(_no_allocation);

        {
            let mut entries = self.entries.lock();
            let mut deferred = self.deferred.lock();
            entries.retain(|entry| !finished.contains(entry));
            stats.deferred = deferred.len();
            entries.append(&mut deferred);
            self.invoking.store(false, Ordering::Release);
        }
        stats.removed = finished.len();

        log::debug!(
            "prefinalizers: {} invoked, {} removed, {} deferred",
            stats.invoked,
            stats.removed,
            stats.deferred
        );
        stats
    }

    /// Follow objects moved by compaction
    pub fn update_addresses(&self, table: &ForwardingTable) -> usize {
        let mut updated = 0;
        for entry in self.entries.lock().iter_mut() {
            if let Some(new) = table.get(entry.object) {
                entry.object = new;
                updated += 1;
            }
        }
        updated
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        self.deferred.lock().clear();
    }
}
