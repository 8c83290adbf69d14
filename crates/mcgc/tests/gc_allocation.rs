//! GC Allocation Tests - Strict Invariants for Object Allocation
//!
//! These tests verify that the allocator maintains critical invariants:
//! - Unique, granule-aligned addresses (ZERO tolerance for duplicates)
//! - Size classes, the regular space and the large space each serve their range
//! - An exhausted heap collects once and retries before failing
//! - Scopes that forbid collection or finalization are honored
//!
//! ============================================================================
//! EACH TEST FINDS SPECIFIC BUGS - DO NOT WEAKEN ASSERTIONS
//! ============================================================================

mod common;

use common::{assert_all_addresses_unique, object_size, test_config, GcFixture, NODE_PAYLOAD};
use mcgc::util::constants::ALLOCATION_GRANULARITY;
use mcgc::{GcConfig, GcEvent, GcGeneration, McgcError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn bounded_config(pages: usize) -> GcConfig {
    let config = test_config();
    GcConfig {
        max_heap_size: pages * config.page_size,
        compaction: false,
        ..config
    }
}

// ============================================================================
// BASIC ALLOCATION
// ============================================================================

/// **Bug this finds:** Overlapping objects, misaligned payloads
#[test]
fn test_addresses_unique_and_aligned() {
    // Arrange
    let fixture = GcFixture::with_defaults();
    let mut rng = StdRng::seed_from_u64(7);

    // Act - sizes spanning every size class and the regular space
    let addresses: Vec<_> = (0..2_000)
        .map(|_| fixture.leaf(rng.gen_range(0..4_096)))
        .collect();

    // Assert
    assert_all_addresses_unique(&addresses, "mixed-size allocation");
    for &address in &addresses {
        assert_eq!(address % ALLOCATION_GRANULARITY, 0, "{:#x} misaligned", address);
        assert!(fixture.is_allocated(address));
    }
}

/// **Bug this finds:** Stale data visible in a fresh object
#[test]
fn test_allocation_is_zeroed() {
    let fixture = GcFixture::with_defaults();
    let first = fixture.leaf(64);
    // SAFETY: 64-byte payload.
    unsafe { std::ptr::write_bytes(first as *mut u8, 0xAB, 64) };
    fixture.gc.collect(GcGeneration::Full).unwrap();

    let second = fixture.leaf(64);

    // SAFETY: 64-byte payload.
    let bytes = unsafe { std::slice::from_raw_parts(second as *const u8, 64) };
    assert!(bytes.iter().all(|&b| b == 0));
}

/// **Bug this finds:** Header size mismatch with the space's size class
#[test]
fn test_object_sizes_are_rounded_to_granules() {
    let fixture = GcFixture::with_defaults();

    let node = fixture.node(1);
    let odd = fixture.leaf(17);

    let heap = fixture.gc.heap();
    assert_eq!(heap.header_of(node).unwrap().size(), object_size(NODE_PAYLOAD));
    assert_eq!(heap.header_of(odd).unwrap().size(), 48);
}

/// **Bug this finds:** Objects over-aligned beyond what pages guarantee
#[test]
fn test_unsupported_alignment_rejected() {
    let fixture = GcFixture::with_defaults();
    let result = fixture
        .gc
        .allocate_with(32, 2 * ALLOCATION_GRANULARITY, fixture.leaf, None);
    assert!(matches!(result, Err(McgcError::InvalidArgument(_))));
}

/// A large object gets its own page, released when it dies
///
/// **Bug this finds:** Large pages leaked after their object is swept
#[test]
fn test_large_object_page_released() {
    // Arrange
    let fixture = GcFixture::with_defaults();
    let large = fixture.leaf(fixture.gc.config().page_size);
    let page = fixture.gc.heap().page_of(large).unwrap();
    assert!(page.size() > fixture.gc.config().page_size);
    let committed = fixture.gc.heap().committed_bytes();

    // Act
    let summary = fixture.gc.collect(GcGeneration::Full).unwrap();

    // Assert
    assert_eq!(summary.released_pages, 1);
    assert_eq!(fixture.gc.heap().page_count(), 0);
    assert!(fixture.gc.heap().committed_bytes() < committed);
}

/// **Bug this finds:** Custom space lookup reading past the configured list
#[test]
fn test_custom_space_index_out_of_range() {
    let fixture = GcFixture::with_defaults();
    let result = fixture.gc.allocate_in_custom_space(0, 32, fixture.leaf);
    assert!(matches!(
        result,
        Err(McgcError::InvalidSpaceIndex { index: 0, count: 0 })
    ));
}

// ============================================================================
// FIELD ACCESS VALIDATION
// ============================================================================

/// **Bug this finds:** Barriered stores writing outside the object
#[test]
fn test_store_validates_target() {
    let fixture = GcFixture::with_defaults();
    let node = fixture.node(1);
    let other = fixture.node(2);

    assert!(matches!(
        fixture.gc.store(node, 64, other),
        Err(McgcError::InvalidArgument(_))
    ));
    assert!(matches!(
        fixture.gc.store(node, 3, other),
        Err(McgcError::InvalidArgument(_))
    ));
    assert!(matches!(
        fixture.gc.store(0x1000, 0, other),
        Err(McgcError::InvalidArgument(_))
    ));
    assert!(matches!(
        fixture.gc.load(node + 8, 0),
        Err(McgcError::InvalidArgument(_))
    ));
}

/// Addresses inside the first granule of an object are not object starts
///
/// **Bug this finds:** Misaligned header dereference for a mid-granule pointer
#[test]
fn test_mid_granule_pointers_are_not_objects() {
    let fixture = GcFixture::with_defaults();
    let host = fixture.node(1);
    let other = fixture.node(2);
    let heap = fixture.gc.heap();

    assert!(matches!(
        fixture.gc.store(host + 8, 0, other),
        Err(McgcError::InvalidArgument(_))
    ));
    assert!(matches!(
        fixture.gc.record_write(host + 8, other),
        Err(McgcError::InvalidArgument(_))
    ));
    assert!(heap.header_of(host + 8).is_none());
    assert!(heap.handle_of(other + 8).is_none());

    // A mid-granule value is stored as plain data, no barrier
    let decision = fixture.gc.store(host, 0, other + 8).unwrap();
    assert!(decision.is_noop());
}

// ============================================================================
// HEAP EXHAUSTION
// ============================================================================

/// Garbage fills the bounded heap; allocation collects and keeps going
///
/// **Bug this finds:** OutOfMemory surfaced while a collection would free space
#[test]
fn test_allocation_failure_triggers_collection() {
    // Arrange - four pages, 2 MB of short-lived garbage
    let fixture = GcFixture::with_config(bounded_config(4));

    // Act
    for _ in 0..1_000 {
        fixture.leaf(2_048);
    }

    // Assert
    let summary = fixture.gc.stats().summary();
    assert!(summary.major_cycles >= 1, "no collection ran");
    assert_eq!(summary.allocation_failures, 0);
    assert!(fixture.gc.heap().committed_bytes() <= fixture.gc.config().max_heap_size);
}

/// Live data fills the bounded heap; the retry fails and is reported
///
/// **Bug this finds:** Infinite collect-retry loop, silent allocation failure
#[test]
fn test_out_of_memory_after_retry() {
    // Arrange
    let fixture = GcFixture::with_config(bounded_config(4));
    let mut roots = Vec::new();

    // Act
    let mut failure = None;
    for _ in 0..1_000 {
        match fixture.gc.allocate(2_048, fixture.leaf) {
            Ok(leaf) => {
                fixture.gc.finish_construction(leaf).unwrap();
                roots.push(fixture.gc.persistent(leaf));
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    // Assert
    assert!(matches!(failure, Some(McgcError::OutOfMemory { .. })));
    assert!(roots.len() > 100, "only {} objects fit", roots.len());
    assert_eq!(fixture.gc.stats().summary().allocation_failures, 1);
    assert!(fixture
        .runtime
        .events()
        .iter()
        .any(|event| matches!(event, GcEvent::AllocationFailure { size: 2_048, .. })));
    for root in &roots {
        assert!(fixture.is_allocated(root.get()), "live object lost in retry");
    }
}

// ============================================================================
// SCOPES
// ============================================================================

/// **Bug this finds:** DisallowGc scope ignored by explicit and implicit GCs
#[test]
fn test_disallow_gc_scope() {
    let fixture = GcFixture::with_config(bounded_config(2));

    {
        let _outer = fixture.gc.disallow_gc();
        let _inner = fixture.gc.disallow_gc();
        assert!(matches!(
            fixture.gc.collect(GcGeneration::Full),
            Err(McgcError::CollectionDisallowed)
        ));
        assert!(matches!(
            fixture.gc.start_incremental_marking(),
            Err(McgcError::CollectionDisallowed)
        ));

        let exhausted = (0..1_000)
            .map(|_| fixture.gc.allocate(2_048, fixture.leaf))
            .find_map(Result::err);
        assert!(matches!(exhausted, Some(McgcError::OutOfMemory { .. })));
        assert_eq!(fixture.gc.cycle_count(), 0, "collected inside the scope");
    }

    // Scopes released, the same allocation now collects and succeeds
    fixture.leaf(2_048);
    assert_eq!(fixture.gc.cycle_count(), 1);
}

/// **Bug this finds:** Marking finalized inside a NoFinalizer scope
#[test]
fn test_no_finalizer_scope_defers_finalization() {
    let fixture = GcFixture::with_defaults();
    fixture.gc.start_incremental_marking().unwrap();

    let scope = fixture.gc.no_finalizer();
    assert!(matches!(
        fixture.gc.finalize_incremental_marking(),
        Err(McgcError::FinalizationDisallowed)
    ));
    assert!(fixture.gc.is_marking(), "cycle must survive the refusal");
    drop(scope);

    fixture.gc.finalize_incremental_marking().unwrap();
    assert!(!fixture.gc.is_marking());
}

/// **Bug this finds:** Unfinished objects behind ambiguous roots swept
#[test]
fn test_in_construction_object_survives_without_root() {
    // Arrange - an object the embedder has not finished, referenced only
    // conservatively
    let fixture = GcFixture::with_defaults();
    let raw = fixture.gc.allocate(NODE_PAYLOAD, fixture.node).unwrap();
    fixture.runtime.set_ambiguous_roots(vec![raw]);

    // Act
    fixture.gc.collect(GcGeneration::Full).unwrap();

    // Assert
    assert!(fixture.is_allocated(raw));
    assert!(fixture.gc.heap().header_of(raw).unwrap().is_in_construction());
}
