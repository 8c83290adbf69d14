//! Test Utilities for the MCGC Test Suite
//!
//! Provides a collector fixture with three registered types and a runtime
//! whose ambiguous roots the test controls.
//!
//! ============================================================================
//! Assertions here are exact. A live-byte count that is "close" is a bug.
//! ============================================================================

#![allow(dead_code)]

use mcgc::logging::{EventLog, GcEvent};
use mcgc::object::{
    trace_nothing, visit_slots, visit_weak_slots, GcInfo, GcInfoIndex, Visitor, HEADER_SIZE,
};
use mcgc::platform::OsPageAllocator;
use mcgc::{Address, GarbageCollector, GcConfig, OwningRuntime};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// Maximum test duration before timeout
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Node payload: `left`, `right`, `value`
pub const NODE_PAYLOAD: usize = 24;
pub const LEFT: usize = 0;
pub const RIGHT: usize = 8;
pub const VALUE: usize = 16;

/// Heap footprint of one node, header included
pub const NODE_SIZE: usize = 48;

fn trace_node(payload: Address, visitor: &mut dyn Visitor) {
    visit_slots(payload, &[LEFT, RIGHT], visitor);
}

/// Cache entry payload: one strong and one weak reference
pub const CACHE_PAYLOAD: usize = 16;
pub const STRONG: usize = 0;
pub const WEAK: usize = 8;

fn trace_cache_entry(payload: Address, visitor: &mut dyn Visitor) {
    visit_slots(payload, &[STRONG], visitor);
    visit_weak_slots(payload, &[WEAK], visitor);
}

/// Footprint of an object with `payload` bytes
pub fn object_size(payload: usize) -> usize {
    (payload + HEADER_SIZE).div_ceil(16) * 16
}

// ============================================================================
// SCRIPTED RUNTIME
// ============================================================================

/// Runtime whose ambiguous roots are set by the test
pub struct ScriptedRuntime {
    creation_thread: ThreadId,
    ambiguous: Mutex<Vec<Address>>,
    events: EventLog,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self {
            creation_thread: std::thread::current().id(),
            ambiguous: Mutex::new(Vec::new()),
            events: EventLog::new(),
        }
    }

    pub fn set_ambiguous_roots(&self, words: Vec<Address>) {
        *self.ambiguous.lock() = words;
    }

    pub fn events(&self) -> Vec<GcEvent> {
        self.events.events()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }
}

impl OwningRuntime for ScriptedRuntime {
    fn is_creation_thread(&self) -> bool {
        std::thread::current().id() == self.creation_thread
    }

    fn record_event(&self, event: &GcEvent) {
        self.events.record(event.clone());
    }

    fn visit_ambiguous_roots(&self, visitor: &mut dyn FnMut(Address)) {
        for &word in self.ambiguous.lock().iter() {
            visitor(word);
        }
    }
}

// ============================================================================
// GC FIXTURE
// ============================================================================

/// Collector plus the types every test allocates
pub struct GcFixture {
    pub gc: Arc<GarbageCollector>,
    pub runtime: Arc<ScriptedRuntime>,
    pub node: GcInfoIndex,
    pub leaf: GcInfoIndex,
    pub cache: GcInfoIndex,
}

impl GcFixture {
    /// Default configuration with sequential marking
    ///
    /// **Bug this finds:** Configuration validation bugs, initialization failures
    pub fn with_defaults() -> Self {
        Self::with_config(test_config())
    }

    /// **Bug this finds:** Config fields ignored by heap construction
    pub fn with_config(config: GcConfig) -> Self {
        let runtime = Arc::new(ScriptedRuntime::new());
        let gc = Arc::new(
            GarbageCollector::with_collaborators(
                config,
                Arc::new(OsPageAllocator::new()),
                runtime.clone(),
            )
            .expect("collector initialization should succeed with a valid config"),
        );
        let node = gc
            .register_gc_info(GcInfo::new("Node", trace_node))
            .expect("Node type registration");
        let leaf = gc
            .register_gc_info(GcInfo::new("Leaf", trace_nothing))
            .expect("Leaf type registration");
        let cache = gc
            .register_gc_info(GcInfo::new("CacheEntry", trace_cache_entry))
            .expect("CacheEntry type registration");
        Self {
            gc,
            runtime,
            node,
            leaf,
            cache,
        }
    }

    /// Allocate a fully constructed node holding `value`
    pub fn node(&self, value: u64) -> Address {
        let node = self
            .gc
            .allocate(NODE_PAYLOAD, self.node)
            .expect("node allocation");
        // SAFETY: VALUE is a non-reference word inside the payload.
        unsafe { ((node + VALUE) as *mut u64).write(value) };
        self.gc.finish_construction(node).expect("finish node");
        node
    }

    /// Allocate a fully constructed leaf of `payload` bytes
    pub fn leaf(&self, payload: usize) -> Address {
        let leaf = self.gc.allocate(payload, self.leaf).expect("leaf allocation");
        self.gc.finish_construction(leaf).expect("finish leaf");
        leaf
    }

    /// Allocate a fully constructed, empty cache entry
    pub fn cache_entry(&self) -> Address {
        let entry = self
            .gc
            .allocate(CACHE_PAYLOAD, self.cache)
            .expect("cache entry allocation");
        self.gc.finish_construction(entry).expect("finish cache entry");
        entry
    }

    /// `host.field = value` through the write barrier
    pub fn link(&self, host: Address, field: usize, value: Address) {
        self.gc.store(host, field, value).expect("store into node");
    }

    pub fn get(&self, host: Address, field: usize) -> Address {
        self.gc.load(host, field).expect("load from node")
    }

    pub fn value(&self, node: Address) -> u64 {
        // SAFETY: VALUE is a plain word inside a node payload.
        unsafe { ((node + VALUE) as *const u64).read() }
    }

    /// Singly linked list of `len` nodes through `LEFT`; returns the head
    pub fn chain(&self, len: u64) -> Address {
        let head = self.node(0);
        let mut tail = head;
        for value in 1..len {
            let next = self.node(value);
            self.link(tail, LEFT, next);
            tail = next;
        }
        head
    }

    /// Values along the `LEFT` chain starting at `head`
    pub fn walk(&self, head: Address) -> Vec<u64> {
        let mut values = Vec::new();
        let mut cursor = head;
        while cursor != 0 {
            values.push(self.value(cursor));
            cursor = self.get(cursor, LEFT);
        }
        values
    }

    /// Whether `payload` still names an allocated object
    pub fn is_allocated(&self, payload: Address) -> bool {
        self.gc
            .heap()
            .header_of(payload)
            .is_some_and(|header| !header.is_free())
    }
}

/// Deterministic configuration: no marking threads unless a test asks
pub fn test_config() -> GcConfig {
    GcConfig {
        concurrent_marking: false,
        conservative_stack_scanning: true,
        ..Default::default()
    }
}

// ============================================================================
// ASSERTION HELPERS
// ============================================================================

/// Assert that all addresses are unique
///
/// **Bug this finds:** Allocator handing out the same block twice
pub fn assert_all_addresses_unique(addresses: &[Address], context: &str) {
    let mut sorted = addresses.to_vec();
    sorted.sort_unstable();
    for pair in sorted.windows(2) {
        assert_ne!(pair[0], pair[1], "{}: duplicate address {:#x}", context, pair[0]);
    }
}

/// Assert that operation completed within timeout
///
/// **Bug this finds:** Deadlock at a safepoint, marking threads never stopping
pub fn assert_completed_within_timeout<F, R>(operation: F, timeout: Duration, context: &str) -> R
where
    F: FnOnce() -> R,
{
    let start = Instant::now();
    let result = operation();
    let elapsed = start.elapsed();
    assert!(
        elapsed <= timeout,
        "{}: took {:?}, limit {:?}",
        context,
        elapsed,
        timeout
    );
    result
}
