//! Runtime Module - Integration with the owning runtime
//!
//! The heap is embedded in a language runtime that it knows only through
//! the `OwningRuntime` trait:
//! - which thread created the heap
//! - where telemetry events go
//! - which ambiguous words (stack slots, registers) may hold pointers
//!
//! This module also hosts what the collector exposes back to the embedder:
//! - safepoints
//! - RAII scopes over the heap-state counters
//! - the prefinalizer registry
//! - GC prologue/epilogue callbacks

pub mod callbacks;
pub mod prefinalizer;
pub mod safepoint;
pub mod scopes;

pub use callbacks::{CallbackId, GcCallback, GcCallbackRegistry, GcTypeFilter, SafepointGcCallbacks};
pub use prefinalizer::{
    LivenessBroker, PrefinalizerCallback, PrefinalizerEntry, PrefinalizerRegistry,
    PrefinalizerStats,
};
pub use safepoint::{MutatorHandle, Safepoint, SafepointScope};
pub use scopes::{DisallowGcScope, NoFinalizerScope};

use crate::logging::{EventLog, GcEvent};
use crate::util::Address;
use std::thread::ThreadId;

/// The runtime that owns a heap
pub trait OwningRuntime: Send + Sync {
    /// Whether the calling thread created the heap
    fn is_creation_thread(&self) -> bool;

    /// Telemetry sink, called at phase boundaries
    fn record_event(&self, event: &GcEvent);

    /// Report every ambiguous word that may hold a heap pointer
    ///
    /// Called during root marking when conservative stack scanning is
    /// enabled.
    fn visit_ambiguous_roots(&self, _visitor: &mut dyn FnMut(Address)) {}
}

/// Runtime used when the embedder supplies none
///
/// Captures the constructing thread, forwards events to `log` and keeps
/// them in an `EventLog`. It reports no ambiguous roots.
pub struct DefaultRuntime {
    creation_thread: ThreadId,
    events: EventLog,
}

impl DefaultRuntime {
    pub fn new() -> Self {
        Self {
            creation_thread: std::thread::current().id(),
            events: EventLog::new(),
        }
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }
}

impl Default for DefaultRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl OwningRuntime for DefaultRuntime {
    fn is_creation_thread(&self) -> bool {
        std::thread::current().id() == self.creation_thread
    }

    fn record_event(&self, event: &GcEvent) {
        log::log!(event.level(), "{}", event);
        self.events.record(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_runtime_records_events() {
        let runtime = DefaultRuntime::new();
        assert!(runtime.is_creation_thread());
        runtime.record_event(&GcEvent::MarkingAborted { cycle: 1 });
        assert_eq!(runtime.events().len(), 1);

        let mut words = Vec::new();
        runtime.visit_ambiguous_roots(&mut |word| words.push(word));
        assert!(words.is_empty());
    }
}
