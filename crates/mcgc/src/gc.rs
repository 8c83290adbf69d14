//! GC Core Module - Collection cycle management
//!
//! `GarbageCollector` owns the heap and drives the mark-compact cycle:
//!
//! ```text
//! Idle ─► RootMarking ─► TransitiveClosure ─► PrefinalizationAndRememberedSetFixup
//!  ▲                                                             │
//!  └──────────────────────── SweepOrEvacuate ◄───────────────────┘
//! ```
//!
//! A cycle runs in one of three marking modes:
//! - **Atomic** - everything inside one safepoint (`collect`)
//! - **Incremental** - roots at a safepoint, then bounded
//!   `incremental_step`s interleaved with the mutator, then a final
//!   safepoint (`finalize_incremental_marking`)
//! - **Concurrent** - like incremental, with `MarkingThreadPool` threads
//!   draining the worklists in the background
//!
//! Young-generation (minor) cycles are always atomic. They mark only YOUNG
//! pages, treat the old-to-new remembered sets as roots and promote the
//! survivors. Full cycles may evacuate fragmented pages.
//!
//! The thread that drives collections must not be attached to the
//! safepoint as a mutator.

use crate::barrier::{WriteBarrier, WriteBarrierDecision, WriteHint};
use crate::config::GcConfig;
use crate::error::{McgcError, Result};
use crate::heap::sweeper::{SweepMode, SweepResult};
use crate::heap::{Heap, HeapState, PageFlags, PhaseFlags, RememberedSetType};
use crate::logging::GcEvent;
use crate::marker::{
    process_weak_slots, AtomicMarkingState, LocalWorklist, MarkingContext, MarkingEngine,
    MarkingThreadPool, MarkingWorklists, Persistent, RootSet, WeaknessStats,
};
use crate::object::{GcInfo, GcInfoIndex, ObjectHeader, TraceCallback};
use crate::platform::{BoundedPageAllocator, OsPageAllocator, PageAllocator};
use crate::relocate::{self, EvacuationStats, Evacuator};
use crate::runtime::{
    DefaultRuntime, DisallowGcScope, GcCallbackRegistry, MutatorHandle, NoFinalizerScope,
    OwningRuntime, PrefinalizerCallback, PrefinalizerEntry, PrefinalizerRegistry,
    PrefinalizerStats, Safepoint, SafepointGcCallbacks, SafepointScope,
};
use crate::stats::{CycleSummary, GcStats, GcTimer};
use crate::util::constants::{ALLOCATION_GRANULARITY, WORD_SIZE};
use crate::util::{Address, AtomicUtils};
use crate::zone::{RecyclingZoneAllocator, Zone, ZoneVec};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Collector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    /// No cycle in progress
    Idle,
    /// Marking from roots
    RootMarking,
    /// Draining the worklists
    TransitiveClosure,
    /// Running prefinalizers; remembered sets are fixed up next
    PrefinalizationAndRememberedSetFixup,
    /// Evacuating candidates and sweeping
    SweepOrEvacuate,
}

impl fmt::Display for GcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Generation being collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcGeneration {
    /// Young pages only (minor GC)
    Young,
    /// The whole heap
    Full,
}

/// Reason for a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcReason {
    /// `collect` called by the embedder
    Explicit,
    /// An allocation could not be satisfied
    AllocationFailure,
    /// `start_incremental_marking`
    Incremental,
    /// `start_concurrent_marking`
    Concurrent,
}

/// How the transitive closure of a cycle is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkingMode {
    Atomic,
    Incremental,
    Concurrent,
}

/// One cycle in flight
struct Cycle {
    id: u64,
    generation: GcGeneration,
    mode: MarkingMode,
    context: Arc<MarkingContext>,
    local: LocalWorklist,
    pool: Option<MarkingThreadPool>,
    timer: GcTimer,
}

/// What the post-marking phases of one cycle did
struct Reclaimed {
    weakness: WeaknessStats,
    prefinalized: PrefinalizerStats,
    evacuation: EvacuationStats,
    swept: SweepResult,
}

struct CollectorState {
    state: GcState,
    cycle: Option<Cycle>,
}

/// Orchestrator of the whole heap
///
/// ## Thread Safety
///
/// Allocation, barriers and root updates may be called from any mutator
/// thread. Cycle operations serialize on an internal lock; stop-the-world
/// steps run inside a safepoint.
pub struct GarbageCollector {
    config: Arc<GcConfig>,
    state: Arc<HeapState>,
    heap: Arc<Heap>,
    engine: MarkingEngine,
    worklists: Arc<MarkingWorklists>,
    barrier: WriteBarrier,
    roots: Arc<RootSet>,
    runtime: Arc<dyn OwningRuntime>,
    prefinalizers: PrefinalizerRegistry,
    callbacks: GcCallbackRegistry,
    safepoint_callbacks: SafepointGcCallbacks,
    safepoint: Arc<Safepoint>,
    collector: Mutex<CollectorState>,
    cycle_count: AtomicU64,
    /// Set when a cycle was abandoned; the next collection is full
    needs_full: AtomicBool,
    stats: GcStats,
}

impl GarbageCollector {
    /// Create a collector backed by OS pages and the default runtime
    ///
    /// # Examples
    /// ```rust
    /// use mcgc::{GarbageCollector, GcConfig};
    ///
    /// let gc = GarbageCollector::new(GcConfig::default()).unwrap();
    /// assert_eq!(gc.cycle_count(), 0);
    /// ```
    pub fn new(config: GcConfig) -> Result<Self> {
        Self::with_collaborators(
            config,
            Arc::new(OsPageAllocator::new()),
            Arc::new(DefaultRuntime::new()),
        )
    }

    /// Create a collector with an embedder-supplied page provider and runtime
    ///
    /// `max_heap_size` is enforced on top of `platform`.
    pub fn with_collaborators(
        config: GcConfig,
        platform: Arc<dyn PageAllocator>,
        runtime: Arc<dyn OwningRuntime>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let mut phase = PhaseFlags::empty();
        if config.generational {
            phase |= PhaseFlags::GENERATIONAL;
        }
        if config.disable_write_barriers {
            phase |= PhaseFlags::BARRIERS_DISABLED;
        }
        if config.is_shared_space_owner {
            phase |= PhaseFlags::SHARED_SPACE_OWNER;
        }
        let state = Arc::new(HeapState::new(phase));

        let platform: Arc<dyn PageAllocator> =
            Arc::new(BoundedPageAllocator::new(platform, config.max_heap_size));
        let heap = Arc::new(Heap::new(config.clone(), platform, state.clone())?);
        let engine = MarkingEngine::for_config(&config);
        let worklists = Arc::new(MarkingWorklists::new());
        let barrier = WriteBarrier::new(
            heap.clone(),
            MarkingEngine::Atomic(AtomicMarkingState),
            worklists.clone(),
        );

        log::debug!(
            "collector created: {} spaces, {} marking engine, generational={}",
            heap.spaces().len(),
            if engine.is_atomic() { "atomic" } else { "non-atomic" },
            config.generational
        );

        Ok(Self {
            prefinalizers: PrefinalizerRegistry::new(runtime.clone()),
            config,
            state,
            heap,
            engine,
            worklists,
            barrier,
            roots: Arc::new(RootSet::new()),
            runtime,
            callbacks: GcCallbackRegistry::new(),
            safepoint_callbacks: SafepointGcCallbacks::new(),
            safepoint: Arc::new(Safepoint::new()),
            collector: Mutex::new(CollectorState {
                state: GcState::Idle,
                cycle: None,
            }),
            cycle_count: AtomicU64::new(0),
            needs_full: AtomicBool::new(false),
            stats: GcStats::new(),
        })
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    pub fn heap_state(&self) -> &Arc<HeapState> {
        &self.state
    }

    pub fn barrier(&self) -> &WriteBarrier {
        &self.barrier
    }

    pub fn roots(&self) -> &Arc<RootSet> {
        &self.roots
    }

    pub fn runtime(&self) -> &Arc<dyn OwningRuntime> {
        &self.runtime
    }

    pub fn callbacks(&self) -> &GcCallbackRegistry {
        &self.callbacks
    }

    pub fn safepoint_callbacks(&self) -> &SafepointGcCallbacks {
        &self.safepoint_callbacks
    }

    pub fn prefinalizers(&self) -> &PrefinalizerRegistry {
        &self.prefinalizers
    }

    pub fn safepoint(&self) -> &Arc<Safepoint> {
        &self.safepoint
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn state(&self) -> GcState {
        self.collector.lock().state
    }

    pub fn marking_mode(&self) -> Option<MarkingMode> {
        self.collector.lock().cycle.as_ref().map(|cycle| cycle.mode)
    }

    pub fn is_marking(&self) -> bool {
        self.state.is_marking()
    }

    /// Cycles started so far
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    /// Register the calling thread as a mutator that polls the safepoint
    pub fn attach_mutator(&self) -> MutatorHandle {
        self.safepoint.attach()
    }

    pub fn disallow_gc(&self) -> DisallowGcScope {
        DisallowGcScope::new(self.state.clone())
    }

    pub fn no_finalizer(&self) -> NoFinalizerScope {
        NoFinalizerScope::new(self.state.clone())
    }

    /// Diagnostic snapshot, in a stable key order
    pub fn diagnostics(&self) -> IndexMap<String, String> {
        let mut diagnostics = IndexMap::new();
        let heap = self.heap.stats();
        diagnostics.insert("state".to_string(), self.state().to_string());
        diagnostics.insert("phase".to_string(), format!("{:?}", self.state.phase()));
        diagnostics.insert("cycle_count".to_string(), self.cycle_count().to_string());
        diagnostics.insert(
            "committed_bytes".to_string(),
            heap.committed_bytes.to_string(),
        );
        diagnostics.insert("page_count".to_string(), heap.page_count.to_string());
        diagnostics.insert("live_bytes".to_string(), heap.live_bytes.to_string());
        diagnostics.insert(
            "allocated_since_gc".to_string(),
            heap.allocated_since_gc.to_string(),
        );
        diagnostics.insert("roots".to_string(), self.roots.len().to_string());
        diagnostics.insert(
            "prefinalizers".to_string(),
            self.prefinalizers.len().to_string(),
        );
        let pauses = self.stats.pause_histogram();
        diagnostics.insert(
            "pause_ns".to_string(),
            format!("p50={} p95={} p99={}", pauses.p50(), pauses.p95(), pauses.p99()),
        );
        diagnostics.insert(
            "needs_full_gc".to_string(),
            self.needs_full.load(Ordering::Relaxed).to_string(),
        );
        diagnostics
    }

    // ========================================================================
    // MUTATOR INTERFACE
    // ========================================================================

    pub fn register_gc_info(&self, info: GcInfo) -> Result<GcInfoIndex> {
        self.heap.register_gc_info(info)
    }

    /// Allocate a zeroed object of `size` payload bytes
    ///
    /// # Returns
    /// Payload address of an object still in construction; call
    /// `finish_construction` once its fields are initialized.
    pub fn allocate(&self, size: usize, gc_info: GcInfoIndex) -> Result<Address> {
        self.allocate_with(size, ALLOCATION_GRANULARITY, gc_info, None)
    }

    pub fn allocate_in_custom_space(
        &self,
        index: usize,
        size: usize,
        gc_info: GcInfoIndex,
    ) -> Result<Address> {
        self.allocate_with(size, ALLOCATION_GRANULARITY, gc_info, Some(index))
    }

    /// Allocate, collecting once and retrying if the heap is exhausted
    pub fn allocate_with(
        &self,
        size: usize,
        alignment: usize,
        gc_info: GcInfoIndex,
        custom_space: Option<usize>,
    ) -> Result<Address> {
        let attempt = || {
            match custom_space {
                Some(index) => self
                    .heap
                    .allocate_in_custom_space(index, size, alignment, gc_info),
                None => self.heap.allocate_object(size, alignment, gc_info),
            }
            .map(ObjectHeader::payload)
        };

        match attempt() {
            Err(err @ McgcError::OutOfMemory { .. }) => {
                if !self.state.is_gc_allowed() {
                    self.report_allocation_failure(size);
                    return Err(err);
                }
                log::debug!("allocation of {} bytes failed, collecting", size);
                if let Err(gc_err) = self.collect_with_reason(GcGeneration::Full, GcReason::AllocationFailure) {
                    log::warn!("collection after allocation failure failed: {}", gc_err);
                    self.report_allocation_failure(size);
                    return Err(err);
                }
                attempt().inspect_err(|err| {
                    if matches!(err, McgcError::OutOfMemory { .. }) {
                        self.report_allocation_failure(size);
                    }
                })
            }
            other => other,
        }
    }

    fn report_allocation_failure(&self, size: usize) {
        self.stats.record_allocation_failure();
        self.emit(GcEvent::AllocationFailure {
            size,
            committed_bytes: self.heap.committed_bytes(),
        });
    }

    /// Mark `object` as fully initialized
    pub fn finish_construction(&self, object: Address) -> Result<()> {
        self.object_header(object)?.mark_fully_constructed();
        Ok(())
    }

    /// Store `value` into the field at `offset` of `object` with a barrier
    pub fn store(&self, object: Address, offset: usize, value: Address) -> Result<WriteBarrierDecision> {
        let slot = self.field_slot(object, offset)?;
        // SAFETY: `field_slot` checked the slot lies inside the payload.
        Ok(unsafe { self.barrier.write(slot, value, WriteHint::Normal) })
    }

    /// Like `store`, for writes that may move a pointer backwards over
    /// already scanned fields
    pub fn store_retreating(
        &self,
        object: Address,
        offset: usize,
        value: Address,
    ) -> Result<WriteBarrierDecision> {
        let slot = self.field_slot(object, offset)?;
        // SAFETY: as in `store`.
        Ok(unsafe { self.barrier.write(slot, value, WriteHint::Retreating) })
    }

    /// Barrier for a store into `object` at a slot the caller cannot name
    ///
    /// `value` has already been written somewhere inside `object`. While
    /// marking, a marked `object` is rescanned as a whole; otherwise an
    /// old-to-young write records the object in `OldToNewObjects`.
    pub fn record_write(&self, object: Address, value: Address) -> Result<WriteBarrierDecision> {
        self.object_header(object)?;
        let decision = self
            .barrier
            .classify_imprecise(object, value, self.state.phase());
        self.barrier.execute(&decision);
        Ok(decision)
    }

    /// Read the field at `offset` of `object`
    pub fn load(&self, object: Address, offset: usize) -> Result<Address> {
        let slot = self.field_slot(object, offset)?;
        // SAFETY: as in `store`.
        Ok(unsafe { AtomicUtils::load_word(slot) })
    }

    /// Store into a raw slot with a barrier
    ///
    /// # Safety
    /// `slot` must be a word-aligned reference field of a live heap object.
    pub unsafe fn write_field(&self, slot: Address, value: Address) -> WriteBarrierDecision {
        self.barrier.write(slot, value, WriteHint::Normal)
    }

    /// Barrier for `count` elements written in bulk starting at `first`
    pub fn write_range(
        &self,
        first: Address,
        element_size: usize,
        count: usize,
        element_trace: Option<TraceCallback>,
    ) -> usize {
        self.barrier
            .dijkstra_range(first, element_size, count, element_trace, self.state.phase())
    }

    fn object_header(&self, object: Address) -> Result<&ObjectHeader> {
        self.heap
            .header_of(object)
            .filter(|header| !header.is_free())
            .ok_or_else(|| McgcError::InvalidArgument(format!("{:#x} is not a heap object", object)))
    }

    fn field_slot(&self, object: Address, offset: usize) -> Result<Address> {
        let header = self.object_header(object)?;
        if offset % WORD_SIZE != 0 || offset + WORD_SIZE > header.payload_size() {
            return Err(McgcError::InvalidArgument(format!(
                "offset {} outside the {}-byte payload of {:#x}",
                offset,
                header.payload_size(),
                object
            )));
        }
        Ok(object + offset)
    }

    /// Precise root holding `object`
    pub fn persistent(&self, object: Address) -> Persistent {
        self.roots.persistent(object)
    }

    /// Register a prefinalizer for `object`
    ///
    /// Ignored off the creation thread and for duplicates.
    pub fn register_prefinalizer(&self, object: Address, callback: PrefinalizerCallback) -> bool {
        self.prefinalizers
            .register(PrefinalizerEntry { object, callback })
    }

    // ========================================================================
    // ATOMIC COLLECTION
    // ========================================================================

    /// Run a complete stop-the-world cycle
    ///
    /// A young request becomes full when the heap is not generational or
    /// the previous cycle was abandoned. If an incremental cycle is in
    /// progress, it is finalized instead.
    pub fn collect(&self, generation: GcGeneration) -> Result<CycleSummary> {
        self.collect_with_reason(generation, GcReason::Explicit)
    }

    fn collect_with_reason(&self, generation: GcGeneration, reason: GcReason) -> Result<CycleSummary> {
        if !self.state.is_gc_allowed() {
            return Err(McgcError::CollectionDisallowed);
        }
        if self.collector.lock().cycle.is_some() {
            return self.finalize_incremental_marking();
        }

        let (id, generation, timer) = self.reserve_cycle(generation, reason)?;
        let summary = self.with_safepoint(|scope| {
            let mut cycle = self.prepare_cycle(scope, id, generation, MarkingMode::Atomic, timer)?;
            self.set_state(GcState::TransitiveClosure);
            self.drain(&mut cycle);
            self.complete_cycle(scope, cycle)
        })?;
        self.callbacks.invoke_epilogue(generation);
        Ok(summary)
    }

    // ========================================================================
    // INCREMENTAL AND CONCURRENT MARKING
    // ========================================================================

    /// Mark roots at a safepoint and leave the closure to `incremental_step`
    pub fn start_incremental_marking(&self) -> Result<()> {
        self.start_marking(MarkingMode::Incremental, GcReason::Incremental)
    }

    /// Mark roots at a safepoint and start background marking threads
    pub fn start_concurrent_marking(&self) -> Result<()> {
        if !self.config.concurrent_marking {
            return Err(McgcError::InvalidArgument(
                "concurrent marking is disabled by configuration".to_string(),
            ));
        }
        self.start_marking(MarkingMode::Concurrent, GcReason::Concurrent)
    }

    fn start_marking(&self, mode: MarkingMode, reason: GcReason) -> Result<()> {
        if !self.state.is_gc_allowed() {
            return Err(McgcError::CollectionDisallowed);
        }
        let (id, generation, timer) = self.reserve_cycle(GcGeneration::Full, reason)?;
        let mut cycle =
            self.with_safepoint(|scope| self.prepare_cycle(scope, id, generation, mode, timer))?;

        if mode == MarkingMode::Concurrent {
            cycle.local.publish();
            let threads = self.config.effective_marking_threads();
            match MarkingThreadPool::start(cycle.context.clone(), threads) {
                Ok(pool) => cycle.pool = Some(pool),
                Err(err) => {
                    self.with_safepoint(|_| self.discard_marking(Some(cycle)));
                    return Err(err);
                }
            }
        }

        let mut collector = self.collector.lock();
        collector.state = GcState::TransitiveClosure;
        collector.cycle = Some(cycle);
        log::debug!("cycle {}: {:?} marking started", id, mode);
        Ok(())
    }

    /// Process up to `budget` objects (or the configured default)
    ///
    /// # Returns
    /// `true` when the worklists ran dry; finalizing is then cheap
    pub fn incremental_step(&self, budget: Option<usize>) -> Result<bool> {
        let mut guard = self.collector.lock();
        let collector = &mut *guard;
        let Some(cycle) = collector.cycle.as_mut() else {
            return Err(McgcError::invalid_state(
                GcState::TransitiveClosure,
                collector.state,
            ));
        };
        let budget = budget.unwrap_or(self.config.incremental_step_budget).max(1);
        let processed = cycle.context.process(&mut cycle.local, Some(budget));
        log::trace!("cycle {}: incremental step scanned {}", cycle.id, processed);
        Ok(processed < budget && self.worklists.is_empty())
    }

    /// Finish marking at a safepoint and complete the cycle
    ///
    /// Roots are marked again: they may have changed while marking ran.
    pub fn finalize_incremental_marking(&self) -> Result<CycleSummary> {
        if !self.state.are_finalizers_allowed() {
            return Err(McgcError::FinalizationDisallowed);
        }
        let cycle = {
            let mut collector = self.collector.lock();
            match collector.cycle.take() {
                Some(cycle) => cycle,
                None => {
                    return Err(McgcError::invalid_state(
                        GcState::TransitiveClosure,
                        collector.state,
                    ))
                }
            }
        };
        let generation = cycle.generation;
        let summary = self.with_safepoint(|scope| self.finish_marking(scope, cycle))?;
        self.callbacks.invoke_epilogue(generation);
        Ok(summary)
    }

    fn finish_marking(&self, scope: &SafepointScope<'_>, mut cycle: Cycle) -> Result<CycleSummary> {
        if let Some(pool) = cycle.pool.take() {
            if let Err(err) = pool.stop() {
                self.discard_marking(Some(cycle));
                return Err(err);
            }
        }
        if let Err(err) = self.mark_roots(&cycle.context, &mut cycle.local) {
            self.discard_marking(Some(cycle));
            return Err(err);
        }
        self.drain(&mut cycle);
        self.complete_cycle(scope, cycle)
    }

    /// Abandon the cycle in progress
    ///
    /// Worklists and mark bits are discarded and the collector returns to
    /// Idle. The next collection is forced to be full.
    ///
    /// # Returns
    /// `false` if no cycle was in progress
    pub fn abort_incremental_marking(&self) -> Result<bool> {
        let Some(cycle) = self.collector.lock().cycle.take() else {
            return Ok(false);
        };
        let id = cycle.id;
        self.with_safepoint(|_| self.discard_marking(Some(cycle)));
        self.stats.record_aborted_marking();
        self.emit(GcEvent::MarkingAborted { cycle: id });
        log::warn!("cycle {}: incremental marking aborted", id);
        Ok(true)
    }

    // ========================================================================
    // CYCLE STEPS
    // ========================================================================

    fn with_safepoint<R>(&self, f: impl FnOnce(&SafepointScope<'_>) -> R) -> R {
        let timer = GcTimer::new();
        let scope = self.safepoint.enter();
        let result = f(&scope);
        drop(scope);
        self.stats.record_pause(timer.elapsed());
        result
    }

    fn set_state(&self, state: GcState) {
        self.collector.lock().state = state;
    }

    fn emit(&self, event: GcEvent) {
        self.runtime.record_event(&event);
    }

    fn phase_end(&self, cycle: u64, phase: &str, timer: GcTimer) {
        self.emit(GcEvent::PhaseEnd {
            cycle,
            phase: phase.to_string(),
            duration_ms: timer.elapsed_ms(),
        });
    }

    /// Move Idle -> RootMarking and run the prologue callbacks
    fn reserve_cycle(
        &self,
        requested: GcGeneration,
        reason: GcReason,
    ) -> Result<(u64, GcGeneration, GcTimer)> {
        {
            let mut collector = self.collector.lock();
            if collector.state != GcState::Idle {
                return Err(McgcError::invalid_state(GcState::Idle, collector.state));
            }
            collector.state = GcState::RootMarking;
        }

        let forced_full = self.needs_full.swap(false, Ordering::AcqRel);
        let generation = match requested {
            GcGeneration::Young if self.config.generational && !forced_full => GcGeneration::Young,
            _ => GcGeneration::Full,
        };
        let id = self.cycle_count.fetch_add(1, Ordering::Relaxed) + 1;

        self.emit(GcEvent::CycleStart {
            cycle: id,
            generation: format!("{:?}", generation),
            reason: format!("{:?}", reason),
        });
        self.callbacks.invoke_prologue(generation);
        Ok((id, generation, GcTimer::new()))
    }

    /// Set up marking and mark the roots; runs inside a safepoint
    fn prepare_cycle(
        &self,
        scope: &SafepointScope<'_>,
        id: u64,
        generation: GcGeneration,
        mode: MarkingMode,
        timer: GcTimer,
    ) -> Result<Cycle> {
        self.safepoint_callbacks.invoke_prologue(scope, generation);
        let phase_timer = GcTimer::new();
        self.heap.close_all_labs();

        let minor = generation == GcGeneration::Young;
        let mut compacting = false;
        if minor {
            self.state.set_phase(PhaseFlags::MINOR_COLLECTION);
        } else {
            self.heap
                .clear_remembered_sets(&RememberedSetType::EVACUATION);
            self.heap.reset_live_bytes();
            compacting = !relocate::select_candidates(&self.heap).is_empty();
            let mut phase = PhaseFlags::MARKING;
            if compacting {
                phase |= PhaseFlags::COMPACTING;
            }
            self.state.set_phase(phase);
        }

        let context = Arc::new(MarkingContext::new(
            self.heap.clone(),
            self.engine.for_cycle(mode == MarkingMode::Atomic),
            self.worklists.clone(),
            minor,
            compacting,
        ));
        let mut cycle = Cycle {
            id,
            generation,
            mode,
            context,
            local: self.worklists.local(),
            pool: None,
            timer,
        };

        if let Err(err) = self.mark_roots(&cycle.context, &mut cycle.local) {
            self.discard_marking(Some(cycle));
            return Err(err);
        }
        if minor {
            self.mark_remembered_roots(&cycle.context, &mut cycle.local);
        }
        self.phase_end(id, "RootMarking", phase_timer);
        Ok(cycle)
    }

    /// Precise roots, then ambiguous words from the runtime
    fn mark_roots(&self, context: &MarkingContext, local: &mut LocalWorklist) -> Result<usize> {
        let mut marked = 0;
        for value in self.roots.values() {
            if value != 0 && context.mark_payload(value, local) {
                marked += 1;
            }
        }

        if self.config.conservative_stack_scanning {
            let zone = Zone::new("ambiguous-roots");
            let alloc = RecyclingZoneAllocator::new(&zone);
            let mut words = ZoneVec::new(&alloc);
            let mut overflow = None;
            self.runtime.visit_ambiguous_roots(&mut |word| {
                if let Err(err) = words.push(word) {
                    overflow.get_or_insert(err);
                }
            });
            if let Some(err) = overflow {
                return Err(err);
            }
            for &word in words.iter() {
                if context.trace_conservatively_if_needed(word, local) {
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    /// Old-to-new remembered sets act as roots of a minor cycle
    fn mark_remembered_roots(&self, context: &MarkingContext, local: &mut LocalWorklist) -> usize {
        let mut visited = 0;
        for page in self.heap.all_pages() {
            if page.is_young() {
                continue;
            }
            for offset in page.remembered_set(RememberedSetType::OldToNew).offsets() {
                let slot = page.address_at(offset);
                if page.find_header(slot).is_some_and(|host| !host.is_free()) {
                    context.visit_slot(slot, local);
                    visited += 1;
                }
            }
            for offset in page
                .remembered_set(RememberedSetType::OldToNewObjects)
                .offsets()
            {
                if let Some(host) = page
                    .find_header(page.address_at(offset))
                    .filter(|host| !host.is_free())
                {
                    context.trace(host, local);
                    visited += 1;
                }
            }
        }
        log::trace!("minor roots: {} remembered entries", visited);
        visited
    }

    fn drain(&self, cycle: &mut Cycle) {
        let timer = GcTimer::new();
        loop {
            cycle.context.process(&mut cycle.local, None);
            if self.worklists.is_empty() {
                break;
            }
        }
        self.phase_end(cycle.id, "TransitiveClosure", timer);
    }

    /// Everything after marking; runs inside a safepoint
    fn complete_cycle(&self, scope: &SafepointScope<'_>, cycle: Cycle) -> Result<CycleSummary> {
        let outcome = self.reclaim(&cycle);
        self.end_cycle(scope, cycle, outcome)
    }

    fn reclaim(&self, cycle: &Cycle) -> Result<Reclaimed> {
        let minor = cycle.generation == GcGeneration::Young;
        let weakness = process_weak_slots(&cycle.context);
        self.state.clear_phase(PhaseFlags::MARKING);

        self.set_state(GcState::PrefinalizationAndRememberedSetFixup);
        let timer = GcTimer::new();
        let prefinalized = self.prefinalizers.invoke_all(&self.heap, minor);
        self.phase_end(cycle.id, "Prefinalization", timer);

        self.set_state(GcState::SweepOrEvacuate);
        let mut evacuation = EvacuationStats::default();
        if cycle.context.is_compacting() {
            let timer = GcTimer::new();
            let (table, stats, evacuated) = Evacuator::new(&self.heap).evacuate();
            let roots = self.roots.update(|value| table.get(value));
            let entries = self.prefinalizers.update_addresses(&table);
            log::debug!(
                "cycle {}: {} roots and {} prefinalizers follow {} moved objects",
                cycle.id,
                roots,
                entries,
                table.len()
            );
            relocate::finish_evacuation(&self.heap, evacuated)?;
            evacuation = stats;
            self.phase_end(cycle.id, "Evacuation", timer);
        }

        let timer = GcTimer::new();
        let mode = if minor { SweepMode::Young } else { SweepMode::Full };
        let swept = self.heap.sweep(mode)?;
        self.heap.refresh_live_bytes();
        self.phase_end(cycle.id, "Sweep", timer);

        Ok(Reclaimed {
            weakness,
            prefinalized,
            evacuation,
            swept,
        })
    }

    /// Reset cycle-scoped state whether or not reclaiming succeeded
    fn end_cycle(
        &self,
        scope: &SafepointScope<'_>,
        cycle: Cycle,
        outcome: Result<Reclaimed>,
    ) -> Result<CycleSummary> {
        let Cycle {
            id,
            generation,
            context,
            local,
            timer,
            ..
        } = cycle;
        drop(local);
        self.worklists.clear();

        if generation == GcGeneration::Full {
            self.heap.clear_flag_on_all_pages(
                PageFlags::EVACUATION_CANDIDATE | PageFlags::PINNED,
            );
        } else {
            self.heap.clear_flag_on_all_pages(PageFlags::PINNED);
        }
        if self.config.generational {
            self.heap.promote_young_pages();
        }
        self.heap.reset_allocated_since_gc();
        self.state.clear_phase(
            PhaseFlags::MARKING | PhaseFlags::COMPACTING | PhaseFlags::MINOR_COLLECTION,
        );
        self.safepoint_callbacks.invoke_epilogue(scope, generation);
        self.set_state(GcState::Idle);

        let Reclaimed {
            weakness,
            prefinalized,
            evacuation,
            swept,
        } = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("cycle {} failed: {}", id, err);
                self.needs_full.store(true, Ordering::Release);
                return Err(err);
            }
        };

        let summary = CycleSummary {
            cycle: id,
            generation: Some(generation),
            duration: timer.elapsed(),
            marked_objects: context.marked_objects(),
            live_bytes: self.heap.live_bytes(),
            freed_bytes: swept.freed_bytes + evacuation.freed_bytes,
            released_pages: swept.released_pages + evacuation.evacuated_pages,
            evacuated_pages: evacuation.evacuated_pages,
            moved_objects: evacuation.moved_objects,
            moved_bytes: evacuation.moved_bytes,
            prefinalizers_invoked: prefinalized.invoked,
            cleared_weak_slots: weakness.cleared,
        };

        self.emit(GcEvent::MarkStats {
            cycle: id,
            marked_objects: context.marked_objects(),
            scanned_objects: context.scanned_objects(),
        });
        self.emit(GcEvent::Prefinalizers {
            cycle: id,
            invoked: prefinalized.invoked,
            removed: prefinalized.removed,
        });
        if context.is_compacting() {
            self.emit(GcEvent::EvacuationStats {
                cycle: id,
                evacuated_pages: evacuation.evacuated_pages,
                aborted_pages: evacuation.aborted_pages,
                pinned_pages: evacuation.pinned_pages,
                moved_objects: evacuation.moved_objects,
                moved_bytes: evacuation.moved_bytes,
            });
        }
        self.emit(GcEvent::CycleEnd {
            cycle: id,
            duration_ms: summary.duration.as_secs_f64() * 1000.0,
            live_bytes: summary.live_bytes,
            freed_bytes: summary.freed_bytes,
            released_pages: summary.released_pages,
        });
        self.stats.record_cycle(summary.clone());
        Ok(summary)
    }

    /// Throw away marking progress; the caller holds the safepoint
    fn discard_marking(&self, cycle: Option<Cycle>) {
        if let Some(mut cycle) = cycle {
            if let Some(pool) = cycle.pool.take() {
                if let Err(err) = pool.stop() {
                    log::error!("cycle {}: {}", cycle.id, err);
                }
            }
        }
        self.worklists.clear();
        self.state.clear_phase(
            PhaseFlags::MARKING | PhaseFlags::COMPACTING | PhaseFlags::MINOR_COLLECTION,
        );
        for header in self.heap.object_headers(true) {
            header.unmark();
        }
        self.heap
            .clear_remembered_sets(&RememberedSetType::EVACUATION);
        self.heap
            .clear_flag_on_all_pages(PageFlags::EVACUATION_CANDIDATE | PageFlags::PINNED);
        self.needs_full.store(true, Ordering::Release);
        self.set_state(GcState::Idle);
    }
}
