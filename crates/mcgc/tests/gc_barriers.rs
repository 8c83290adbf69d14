//! GC Barrier Tests - Write barrier classification and effects
//!
//! These tests verify the write barrier:
//! - Classification is a pure function of its inputs
//! - Old-to-young stores land in the remembered set exactly once
//! - Stores during incremental marking never hide a live object
//! - Retreating and imprecise writes rescan or remember the host
//! - Stores into candidates are recorded for evacuation
//! - Range barriers cover every element
//!
//! ============================================================================
//! CRITICAL: A missed barrier is a use-after-free in the embedder
//! ============================================================================

mod common;

use common::{test_config, GcFixture, LEFT, NODE_PAYLOAD, NODE_SIZE, RIGHT};
use mcgc::barrier::{classify_flags, BarrierInputs, WriteBarrierKind, WriteHint};
use mcgc::heap::{PageFlags, PhaseFlags, RememberedSetType};
use mcgc::object::HEADER_SIZE;
use mcgc::relocate::SlotRecord;
use mcgc::{CustomSpaceConfig, GcConfig, GcEvent, GcGeneration};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn inputs(phase: PhaseFlags, slot_page: PageFlags, value_page: PageFlags) -> BarrierInputs {
    BarrierInputs {
        phase,
        slot_page,
        value_page,
        value_marked: false,
        host_marked: false,
        hint: WriteHint::Normal,
        shared_space_owner: false,
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Same inputs, same decision, across randomized inputs
///
/// **Bug this finds:** Classification reading hidden mutable state
#[test]
fn test_classification_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let phases = [
        PhaseFlags::empty(),
        PhaseFlags::MARKING,
        PhaseFlags::MARKING | PhaseFlags::COMPACTING,
        PhaseFlags::GENERATIONAL,
        PhaseFlags::GENERATIONAL | PhaseFlags::MARKING,
        PhaseFlags::BARRIERS_DISABLED,
    ];
    let pages = [
        PageFlags::empty(),
        PageFlags::YOUNG,
        PageFlags::EVACUATION_CANDIDATE,
        PageFlags::TRUSTED,
        PageFlags::EXECUTABLE | PageFlags::EVACUATION_CANDIDATE,
    ];

    for _ in 0..500 {
        let input = BarrierInputs {
            phase: phases[rng.gen_range(0..phases.len())],
            slot_page: pages[rng.gen_range(0..pages.len())],
            value_page: pages[rng.gen_range(0..pages.len())],
            value_marked: rng.gen(),
            host_marked: rng.gen(),
            hint: if rng.gen() {
                WriteHint::Retreating
            } else {
                WriteHint::Normal
            },
            shared_space_owner: rng.gen(),
        };
        assert_eq!(classify_flags(&input), classify_flags(&input), "{:?}", input);
    }
}

/// **Bug this finds:** Wrong precedence in the decision table
#[test]
fn test_decision_table() {
    let idle = inputs(PhaseFlags::empty(), PageFlags::empty(), PageFlags::empty());
    assert_eq!(classify_flags(&idle).0, WriteBarrierKind::None);

    let marking = inputs(PhaseFlags::MARKING, PageFlags::empty(), PageFlags::empty());
    assert_eq!(classify_flags(&marking).0, WriteBarrierKind::Forward);

    let retreating = BarrierInputs {
        value_marked: true,
        host_marked: true,
        hint: WriteHint::Retreating,
        ..marking
    };
    assert_eq!(classify_flags(&retreating).0, WriteBarrierKind::Backward);

    let old_to_young = inputs(PhaseFlags::GENERATIONAL, PageFlags::empty(), PageFlags::YOUNG);
    assert_eq!(
        classify_flags(&old_to_young).0,
        WriteBarrierKind::GenerationalPrecise
    );

    let young_to_young = inputs(PhaseFlags::GENERATIONAL, PageFlags::YOUNG, PageFlags::YOUNG);
    assert_eq!(classify_flags(&young_to_young).0, WriteBarrierKind::None);

    let disabled = inputs(
        PhaseFlags::BARRIERS_DISABLED | PhaseFlags::MARKING,
        PageFlags::empty(),
        PageFlags::empty(),
    );
    assert_eq!(classify_flags(&disabled).0, WriteBarrierKind::None);
}

/// **Bug this finds:** Untrusted slots recorded against trusted targets
#[test]
fn test_compaction_slot_records() {
    let phase = PhaseFlags::MARKING | PhaseFlags::COMPACTING;
    let plain = inputs(phase, PageFlags::empty(), PageFlags::EVACUATION_CANDIDATE);
    assert_eq!(
        classify_flags(&plain).1,
        SlotRecord::Recorded(RememberedSetType::OldToOld)
    );

    let to_trusted = inputs(
        phase,
        PageFlags::empty(),
        PageFlags::TRUSTED | PageFlags::EVACUATION_CANDIDATE,
    );
    assert_eq!(classify_flags(&to_trusted).1, SlotRecord::PinnedTarget);

    let to_code = inputs(
        phase,
        PageFlags::TRUSTED,
        PageFlags::EXECUTABLE | PageFlags::EVACUATION_CANDIDATE,
    );
    assert_eq!(
        classify_flags(&to_code).1,
        SlotRecord::Recorded(RememberedSetType::TrustedToCode)
    );

    let shared = inputs(
        phase,
        PageFlags::empty(),
        PageFlags::SHARED | PageFlags::EVACUATION_CANDIDATE,
    );
    assert_eq!(classify_flags(&shared).1, SlotRecord::Skipped);
}

// ============================================================================
// GENERATIONAL BARRIER
// ============================================================================

/// Storing the same old-to-young pointer repeatedly records one slot
///
/// **Bug this finds:** Remembered set growing per store instead of per slot
#[test]
fn test_old_to_young_store_records_slot_once() {
    // Arrange - promote the holder
    let fixture = GcFixture::with_defaults();
    let holder = fixture.node(1);
    let _root = fixture.gc.persistent(holder);
    fixture.gc.collect(GcGeneration::Full).unwrap();
    let young = fixture.leaf(100);

    // Act
    let decisions: Vec<_> = (0..3)
        .map(|_| fixture.gc.store(holder, LEFT, young).unwrap())
        .collect();

    // Assert
    assert!(decisions
        .iter()
        .all(|decision| decision.kind == WriteBarrierKind::GenerationalPrecise));
    let page = fixture.gc.heap().page_of(holder).unwrap();
    let set = page.remembered_set(RememberedSetType::OldToNew);
    assert_eq!(set.len(), 1);
    assert_eq!(set.offsets(), vec![page.offset_of(holder + LEFT)]);
}

/// A write whose slot is unknown remembers the whole host
///
/// **Bug this finds:** Imprecise writes lost, young objects behind them swept
#[test]
fn test_imprecise_old_to_young_write_remembers_host() {
    // Arrange - promote the holder, then write behind the barrier's back
    let fixture = GcFixture::with_defaults();
    let holder = fixture.node(1);
    let _root = fixture.gc.persistent(holder);
    fixture.gc.collect(GcGeneration::Full).unwrap();
    let young = fixture.leaf(100);
    // SAFETY: LEFT is a reference word of the node payload.
    unsafe { ((holder + LEFT) as *mut usize).write(young) };

    // Act
    let decision = fixture.gc.record_write(holder, young).unwrap();

    // Assert
    assert_eq!(decision.kind, WriteBarrierKind::GenerationalImprecise);
    let page = fixture.gc.heap().page_of(holder).unwrap();
    assert!(page.remembered_set(RememberedSetType::OldToNew).is_empty());
    assert_eq!(
        page.remembered_set(RememberedSetType::OldToNewObjects).offsets(),
        vec![page.offset_of(holder - HEADER_SIZE)]
    );

    // The host is a root of the next minor cycle
    fixture.gc.collect(GcGeneration::Young).unwrap();
    assert!(fixture.is_allocated(young));
    assert_eq!(fixture.get(holder, LEFT), young);
}

/// Promotion empties the old-to-new sets
///
/// **Bug this finds:** Stale remembered slots keeping garbage alive forever
#[test]
fn test_promotion_clears_remembered_sets() {
    let fixture = GcFixture::with_defaults();
    let holder = fixture.node(1);
    let _root = fixture.gc.persistent(holder);
    fixture.gc.collect(GcGeneration::Full).unwrap();
    fixture.link(holder, RIGHT, fixture.leaf(100));

    fixture.gc.collect(GcGeneration::Young).unwrap();

    let page = fixture.gc.heap().page_of(holder).unwrap();
    assert!(page.remembered_set(RememberedSetType::OldToNew).is_empty());
}

/// **Bug this finds:** Barrier work on stores that need none
#[test]
fn test_store_between_old_objects_is_noop() {
    let fixture = GcFixture::with_defaults();
    let a = fixture.node(1);
    let b = fixture.node(2);
    let _roots = (fixture.gc.persistent(a), fixture.gc.persistent(b));
    fixture.gc.collect(GcGeneration::Full).unwrap();

    let decision = fixture.gc.store(a, LEFT, b).unwrap();

    assert!(decision.is_noop());
}

// ============================================================================
// MARKING BARRIER
// ============================================================================

/// Moving the only reference into a scanned object during marking
///
/// **Bug this finds:** Lost object under incremental marking (the classic
/// tri-color violation)
#[test]
fn test_insertion_barrier_preserves_hidden_object() {
    // Arrange - a -> c -> b, only a is a root
    let fixture = GcFixture::with_defaults();
    let a = fixture.node(1);
    let c = fixture.node(3);
    let b = fixture.node(2);
    fixture.link(a, RIGHT, c);
    fixture.link(c, LEFT, b);
    let _root = fixture.gc.persistent(a);

    fixture.gc.start_incremental_marking().unwrap();
    let done = fixture.gc.incremental_step(Some(1)).unwrap();
    assert!(!done, "c is still grey after scanning a");

    // Act - move b behind the black a, then cut it from the grey c
    let decision = fixture.gc.store(a, LEFT, b).unwrap();
    fixture.gc.store(c, LEFT, 0).unwrap();
    let summary = fixture.gc.finalize_incremental_marking().unwrap();

    // Assert
    assert_eq!(decision.kind, WriteBarrierKind::Forward);
    assert_eq!(summary.live_bytes, 3 * NODE_SIZE);
    assert!(fixture.is_allocated(b));
    assert_eq!(fixture.get(a, LEFT), b);
}

/// Storing a still-white object while marking shades it
///
/// **Bug this finds:** Forward barrier classifying but not marking
#[test]
fn test_forward_barrier_marks_white_value() {
    let fixture = GcFixture::with_defaults();
    let a = fixture.node(1);
    let _root = fixture.gc.persistent(a);
    let b = fixture.node(2);

    fixture.gc.start_incremental_marking().unwrap();
    let decision = fixture.gc.store(a, RIGHT, b).unwrap();
    let summary = fixture.gc.finalize_incremental_marking().unwrap();

    assert_eq!(decision.kind, WriteBarrierKind::Forward);
    assert_eq!(summary.live_bytes, 2 * NODE_SIZE);
}

/// Moving a marked value behind the scan position of a black host
///
/// **Bug this finds:** Backward barrier classifying without re-greying the host
#[test]
fn test_retreating_store_rescans_black_host() {
    // Arrange - a -> b, both black after two steps
    let fixture = GcFixture::with_defaults();
    let a = fixture.node(1);
    let b = fixture.node(2);
    fixture.link(a, RIGHT, b);
    let _root = fixture.gc.persistent(a);

    fixture.gc.start_incremental_marking().unwrap();
    fixture.gc.incremental_step(Some(1)).unwrap();
    fixture.gc.incremental_step(Some(1)).unwrap();

    // Act
    let decision = fixture.gc.store_retreating(a, LEFT, b).unwrap();
    let summary = fixture.gc.finalize_incremental_marking().unwrap();

    // Assert - a is scanned twice: once as grey, once from the retrace segment
    assert_eq!(decision.kind, WriteBarrierKind::Backward);
    assert_eq!(decision.params.host, a - HEADER_SIZE);
    assert_eq!(summary.live_bytes, 2 * NODE_SIZE);
    assert!(fixture.runtime.events().iter().any(|event| matches!(
        event,
        GcEvent::MarkStats {
            marked_objects: 2,
            scanned_objects: 3,
            ..
        }
    )));
}

/// Store into a page that stays put, pointing into a candidate, mid-marking
///
/// **Bug this finds:** Slot recorded only by the marker, missed when the
/// mutator writes after the host was scanned
#[test]
fn test_store_during_marking_records_candidate_slot() {
    // Arrange - holder in a non-compactable custom space, target flagged
    let fixture = GcFixture::with_config(GcConfig {
        custom_spaces: vec![CustomSpaceConfig::default()],
        ..test_config()
    });
    let holder = fixture
        .gc
        .allocate_in_custom_space(0, NODE_PAYLOAD, fixture.node)
        .unwrap();
    fixture.gc.finish_construction(holder).unwrap();
    let _holder_root = fixture.gc.persistent(holder);
    let target = fixture.node(5);
    let target_root = fixture.gc.persistent(target);
    let candidate = fixture.gc.heap().page_of(target).unwrap();
    fixture
        .gc
        .heap()
        .flag_evacuation_candidate(candidate.id())
        .unwrap();

    fixture.gc.start_incremental_marking().unwrap();
    fixture.gc.incremental_step(None).unwrap();

    // Act
    let decision = fixture.gc.store(holder, LEFT, target).unwrap();

    // Assert
    assert_eq!(
        decision.params.record,
        Some(SlotRecord::Recorded(RememberedSetType::OldToOld))
    );
    let page = fixture.gc.heap().page_of(holder).unwrap();
    let set = page.remembered_set(RememberedSetType::OldToOld);
    assert_eq!(set.len(), 1);
    assert_eq!(set.offsets(), vec![page.offset_of(holder + LEFT)]);

    fixture.gc.finalize_incremental_marking().unwrap();
    let moved = fixture.get(holder, LEFT);
    assert_ne!(moved, target);
    assert_eq!(moved, target_root.get());
    assert_eq!(fixture.value(moved), 5);
}

/// Bulk writes into a backing store run the barrier per element
///
/// **Bug this finds:** Range barrier skipping elements or firing outside marking
#[test]
fn test_range_barrier_covers_every_element() {
    // Arrange - a root leaf used as a raw array of 4 reference words
    let fixture = GcFixture::with_config(GcConfig {
        generational: false,
        ..test_config()
    });
    let array = fixture.leaf(32);
    let _root = fixture.gc.persistent(array);
    let elements: Vec<_> = (0..4).map(|i| fixture.node(i)).collect();

    assert_eq!(fixture.gc.write_range(array, 8, 4, None), 0, "idle heap");

    fixture.gc.start_incremental_marking().unwrap();
    for (i, &element) in elements.iter().enumerate() {
        // SAFETY: four words inside the array payload.
        unsafe { ((array + i * 8) as *mut usize).write(element) };
    }

    // Act
    let fired = fixture.gc.write_range(array, 8, 4, None);
    let summary = fixture.gc.finalize_incremental_marking().unwrap();

    // Assert - the leaf type does not trace its words, only the barrier saw them
    assert_eq!(fired, 4);
    assert_eq!(
        summary.live_bytes,
        common::object_size(32) + 4 * NODE_SIZE
    );
}

/// **Bug this finds:** Barriers still firing on a heap configured without them
#[test]
fn test_disabled_barriers_never_fire() {
    let fixture = GcFixture::with_config(GcConfig {
        generational: false,
        disable_write_barriers: true,
        ..test_config()
    });
    let a = fixture.node(1);
    let b = fixture.node(2);
    let _root = fixture.gc.persistent(a);

    fixture.gc.start_incremental_marking().unwrap();
    let decision = fixture.gc.store(a, LEFT, b).unwrap();
    fixture.gc.finalize_incremental_marking().unwrap();

    assert!(decision.is_noop());
}
