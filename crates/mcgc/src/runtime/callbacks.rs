//! GC Callback Registry - Prologue and epilogue hooks
//!
//! Embedders observe collections through callbacks invoked at the start
//! (prologue) and end (epilogue) of every cycle whose generation matches
//! the callback's filter. Callbacks run in registration order and may
//! register or remove other callbacks; such changes apply from the next
//! invocation on.

use super::safepoint::SafepointScope;
use crate::gc::GcGeneration;
use bitflags::bitflags;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

bitflags! {
    /// Generations a callback is interested in
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GcTypeFilter: u8 {
        const YOUNG = 1 << 0;
        const FULL = 1 << 1;
        const ALL = Self::YOUNG.bits() | Self::FULL.bits();
    }
}

impl GcTypeFilter {
    pub fn matches(self, generation: GcGeneration) -> bool {
        match generation {
            GcGeneration::Young => self.contains(GcTypeFilter::YOUNG),
            GcGeneration::Full => self.contains(GcTypeFilter::FULL),
        }
    }
}

pub type GcCallback = Arc<dyn Fn(GcGeneration) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Prologue,
    Epilogue,
}

struct Entry {
    hook: Hook,
    filter: GcTypeFilter,
    callback: GcCallback,
}

/// Ordered prologue/epilogue callbacks
#[derive(Default)]
pub struct GcCallbackRegistry {
    entries: Mutex<IndexMap<CallbackId, Entry>>,
    next_id: AtomicU64,
}

impl GcCallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_prologue(
        &self,
        filter: GcTypeFilter,
        callback: impl Fn(GcGeneration) + Send + Sync + 'static,
    ) -> CallbackId {
        self.add(Hook::Prologue, filter, Arc::new(callback))
    }

    pub fn add_epilogue(
        &self,
        filter: GcTypeFilter,
        callback: impl Fn(GcGeneration) + Send + Sync + 'static,
    ) -> CallbackId {
        self.add(Hook::Epilogue, filter, Arc::new(callback))
    }

    fn add(&self, hook: Hook, filter: GcTypeFilter, callback: GcCallback) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().insert(
            id,
            Entry {
                hook,
                filter,
                callback,
            },
        );
        id
    }

    /// Remove a callback, keeping the order of the others
    pub fn remove(&self, id: CallbackId) -> bool {
        self.entries.lock().shift_remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn invoke_prologue(&self, generation: GcGeneration) -> usize {
        self.invoke(Hook::Prologue, generation)
    }

    pub fn invoke_epilogue(&self, generation: GcGeneration) -> usize {
        self.invoke(Hook::Epilogue, generation)
    }

    fn invoke(&self, hook: Hook, generation: GcGeneration) -> usize {
        let selected: Vec<GcCallback> = self
            .entries
            .lock()
            .values()
            .filter(|entry| entry.hook == hook && entry.filter.matches(generation))
            .map(|entry| Arc::clone(&entry.callback))
            .collect();
        for callback in &selected {
            callback(generation);
        }
        selected.len()
    }
}

/// Callbacks that may only run while the world is stopped
///
/// Invocation requires a `SafepointScope`, so these callbacks can touch
/// mutator state without further synchronization.
#[derive(Default)]
pub struct SafepointGcCallbacks {
    inner: GcCallbackRegistry,
}

impl SafepointGcCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_prologue(
        &self,
        filter: GcTypeFilter,
        callback: impl Fn(GcGeneration) + Send + Sync + 'static,
    ) -> CallbackId {
        self.inner.add_prologue(filter, callback)
    }

    pub fn add_epilogue(
        &self,
        filter: GcTypeFilter,
        callback: impl Fn(GcGeneration) + Send + Sync + 'static,
    ) -> CallbackId {
        self.inner.add_epilogue(filter, callback)
    }

    pub fn remove(&self, id: CallbackId) -> bool {
        self.inner.remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn invoke_prologue(&self, _scope: &SafepointScope<'_>, generation: GcGeneration) -> usize {
        self.inner.invoke_prologue(generation)
    }

    pub fn invoke_epilogue(&self, _scope: &SafepointScope<'_>, generation: GcGeneration) -> usize {
        self.inner.invoke_epilogue(generation)
    }
}
