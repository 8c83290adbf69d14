//! GC Prefinalizer Tests - Callbacks on dying objects
//!
//! These tests verify that prefinalizers:
//! - Run once for a dead object, before its memory is reclaimed
//! - Stay registered while their object lives
//! - Run newest first, with allocation forbidden
//! - Registered during a pass, wait for the next cycle
//! - Can only be registered from the heap's creation thread
//!
//! Each test owns its statics; tests run in parallel.

mod common;

use common::{GcFixture, NODE_SIZE, VALUE};
use mcgc::object::GcInfoIndex;
use mcgc::runtime::LivenessBroker;
use mcgc::{Address, GarbageCollector, GcEvent, GcGeneration, McgcError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

// ============================================================================
// LIVENESS
// ============================================================================

static DEAD_RUNS: AtomicUsize = AtomicUsize::new(0);
static DEAD_VALUE: AtomicUsize = AtomicUsize::new(0);

fn on_dead(broker: &LivenessBroker<'_>, object: Address) -> bool {
    if broker.is_alive(object) {
        return false;
    }
    // SAFETY: the object is not swept until prefinalizers finish.
    let value = unsafe { ((object + VALUE) as *const u64).read() };
    DEAD_VALUE.store(value as usize, Ordering::SeqCst);
    DEAD_RUNS.fetch_add(1, Ordering::SeqCst);
    true
}

/// **Bug this finds:** Prefinalizer running after the sweep, or more than once
#[test]
fn test_prefinalizer_runs_once_for_dead_object() {
    // Arrange
    let fixture = GcFixture::with_defaults();
    let node = fixture.node(77);
    assert!(fixture.gc.register_prefinalizer(node, on_dead));

    // Act
    let summary = fixture.gc.collect(GcGeneration::Full).unwrap();
    fixture.gc.collect(GcGeneration::Full).unwrap();

    // Assert
    assert_eq!(DEAD_RUNS.load(Ordering::SeqCst), 1);
    assert_eq!(DEAD_VALUE.load(Ordering::SeqCst), 77, "object intact when invoked");
    assert_eq!(summary.prefinalizers_invoked, 1);
    assert_eq!(summary.freed_bytes, NODE_SIZE);
    assert!(fixture.gc.prefinalizers().is_empty());
    assert!(fixture.runtime.events().iter().any(|event| matches!(
        event,
        GcEvent::Prefinalizers {
            invoked: 1,
            removed: 1,
            ..
        }
    )));
}

static LIVE_CHECKS: AtomicUsize = AtomicUsize::new(0);

fn on_live(broker: &LivenessBroker<'_>, object: Address) -> bool {
    LIVE_CHECKS.fetch_add(1, Ordering::SeqCst);
    !broker.is_alive(object)
}

/// **Bug this finds:** Entries for live objects dropped after one cycle
#[test]
fn test_prefinalizer_kept_while_object_lives() {
    let fixture = GcFixture::with_defaults();
    let node = fixture.node(1);
    let root = fixture.gc.persistent(node);
    fixture.gc.register_prefinalizer(node, on_live);

    fixture.gc.collect(GcGeneration::Full).unwrap();
    fixture.gc.collect(GcGeneration::Full).unwrap();
    assert_eq!(fixture.gc.prefinalizers().len(), 1);

    drop(root);
    fixture.gc.collect(GcGeneration::Full).unwrap();
    assert_eq!(LIVE_CHECKS.load(Ordering::SeqCst), 3);
    assert!(fixture.gc.prefinalizers().is_empty());
}

static MINOR_CHECKS: AtomicUsize = AtomicUsize::new(0);

fn old_is_alive_in_minor(broker: &LivenessBroker<'_>, object: Address) -> bool {
    MINOR_CHECKS.fetch_add(1, Ordering::SeqCst);
    !broker.is_alive(object)
}

/// Old objects are not traced by a minor GC, so they count as alive
///
/// **Bug this finds:** Prefinalizers of old objects firing on every minor GC
#[test]
fn test_minor_gc_treats_old_objects_as_alive() {
    let fixture = GcFixture::with_defaults();
    let node = fixture.node(1);
    let root = fixture.gc.persistent(node);
    fixture.gc.collect(GcGeneration::Full).unwrap();
    fixture.gc.register_prefinalizer(node, old_is_alive_in_minor);
    drop(root);

    fixture.gc.collect(GcGeneration::Young).unwrap();

    assert_eq!(MINOR_CHECKS.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.gc.prefinalizers().len(), 1);
    assert!(fixture.is_allocated(node));
}

// ============================================================================
// ORDERING AND RESTRICTIONS
// ============================================================================

static ORDER: Mutex<Vec<u64>> = Mutex::new(Vec::new());

fn record_order(_broker: &LivenessBroker<'_>, object: Address) -> bool {
    // SAFETY: invoked before the sweep.
    let value = unsafe { ((object + VALUE) as *const u64).read() };
    ORDER.lock().push(value);
    true
}

/// **Bug this finds:** Registration order used instead of reverse order
#[test]
fn test_prefinalizers_run_newest_first() {
    let fixture = GcFixture::with_defaults();
    for value in 0..4 {
        let node = fixture.node(value);
        fixture.gc.register_prefinalizer(node, record_order);
    }

    fixture.gc.collect(GcGeneration::Full).unwrap();

    assert_eq!(*ORDER.lock(), vec![3, 2, 1, 0]);
}

static LEAF: Mutex<Option<GcInfoIndex>> = Mutex::new(None);
static ALLOCATION_RESULT: Mutex<Option<bool>> = Mutex::new(None);

fn try_allocate(broker: &LivenessBroker<'_>, _object: Address) -> bool {
    let leaf = LEAF.lock().expect("leaf type registered");
    let result = broker.heap().allocate_object(16, 16, leaf);
    *ALLOCATION_RESULT.lock() = Some(matches!(result, Err(McgcError::AllocationDisallowed)));
    true
}

/// **Bug this finds:** Prefinalizers allocating into a heap being swept
#[test]
fn test_allocation_forbidden_in_prefinalizer() {
    let fixture = GcFixture::with_defaults();
    *LEAF.lock() = Some(fixture.leaf);
    let node = fixture.node(1);
    fixture.gc.register_prefinalizer(node, try_allocate);

    fixture.gc.collect(GcGeneration::Full).unwrap();

    assert_eq!(*ALLOCATION_RESULT.lock(), Some(true));
    assert!(fixture.gc.heap_state().is_allocation_allowed(), "scope released");
}

static REGISTRAR: Mutex<Option<Arc<GarbageCollector>>> = Mutex::new(None);
static LATE_OBJECT: AtomicUsize = AtomicUsize::new(0);
static LATE_RUNS: AtomicUsize = AtomicUsize::new(0);

fn on_late(broker: &LivenessBroker<'_>, object: Address) -> bool {
    LATE_RUNS.fetch_add(1, Ordering::SeqCst);
    !broker.is_alive(object)
}

fn register_late(_broker: &LivenessBroker<'_>, _object: Address) -> bool {
    if let Some(gc) = REGISTRAR.lock().as_ref() {
        gc.register_prefinalizer(LATE_OBJECT.load(Ordering::SeqCst), on_late);
    }
    true
}

/// **Bug this finds:** Entries added mid-pass invoked in the same pass, or lost
#[test]
fn test_registration_during_pass_deferred_to_next_cycle() {
    // Arrange - the late object is rooted through the first cycle only
    let fixture = GcFixture::with_defaults();
    *REGISTRAR.lock() = Some(fixture.gc.clone());
    let late = fixture.node(2);
    let late_root = fixture.gc.persistent(late);
    LATE_OBJECT.store(late, Ordering::SeqCst);
    fixture.gc.register_prefinalizer(fixture.node(1), register_late);

    // Act
    let first = fixture.gc.collect(GcGeneration::Full).unwrap();
    let runs_after_first = LATE_RUNS.load(Ordering::SeqCst);
    let pending = fixture.gc.prefinalizers().len();
    drop(late_root);
    let second = fixture.gc.collect(GcGeneration::Full).unwrap();
    *REGISTRAR.lock() = None;

    // Assert
    assert_eq!(first.prefinalizers_invoked, 1);
    assert_eq!(runs_after_first, 0, "ran in the pass that registered it");
    assert_eq!(pending, 1);
    assert_eq!(second.prefinalizers_invoked, 1);
    assert_eq!(LATE_RUNS.load(Ordering::SeqCst), 1);
    assert!(fixture.gc.prefinalizers().is_empty());
    assert!(fixture.runtime.events().iter().any(|event| matches!(
        event,
        GcEvent::Prefinalizers {
            invoked: 1,
            removed: 1,
            ..
        }
    )));
}

fn never(_broker: &LivenessBroker<'_>, _object: Address) -> bool {
    false
}

/// **Bug this finds:** Registration races from foreign threads, duplicates
#[test]
fn test_registration_restricted_to_creation_thread() {
    let fixture = GcFixture::with_defaults();
    let node = fixture.node(1);

    assert!(fixture.gc.register_prefinalizer(node, never));
    assert!(!fixture.gc.register_prefinalizer(node, never), "duplicate");

    let gc = fixture.gc.clone();
    let other = fixture.node(2);
    let accepted = thread::spawn(move || gc.register_prefinalizer(other, never))
        .join()
        .unwrap();

    assert!(!accepted);
    assert_eq!(fixture.gc.prefinalizers().len(), 1);
}
