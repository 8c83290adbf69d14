//! # MCGC - Tracing, Incremental and Concurrent Mark-Compact Heap
//!
//! MCGC is a garbage-collected heap for language runtimes. The embedder
//! describes its object layouts through trace callbacks; the heap finds
//! live objects by tracing from roots, reclaims the rest and compacts
//! fragmented pages.
//!
//! ## Overview
//!
//! - **Segregated spaces**: size-classed normal spaces, a large-object
//!   space and embedder-defined custom spaces, all built from pages
//! - **Tri-color marking**: atomic (stop-the-world), incremental and
//!   concurrent modes over sharded worklists
//! - **Write barriers**: Dijkstra insertion and retreating-wavefront
//!   barriers while marking, generational barriers feeding remembered sets
//! - **Evacuation**: sparse pages are copied out and every recorded slot is
//!   updated
//! - **Minor GC**: young pages collected on their own, using old-to-new
//!   remembered sets as roots
//! - **Prefinalizers**: callbacks that run before dead objects are swept
//! - **Weak slots**: cleared once their target dies, updated when it moves
//!
//! ## Quick Start
//!
//! ```rust
//! use mcgc::object::{trace_nothing, GcInfo};
//! use mcgc::{GarbageCollector, GcConfig, GcGeneration};
//!
//! fn main() -> Result<(), mcgc::McgcError> {
//!     let gc = GarbageCollector::new(GcConfig::default())?;
//!     let leaf = gc.register_gc_info(GcInfo::new("Leaf", trace_nothing))?;
//!
//!     let object = gc.allocate(64, leaf)?;
//!     gc.finish_construction(object)?;
//!     let root = gc.persistent(object);
//!
//!     let summary = gc.collect(GcGeneration::Full)?;
//!     assert!(summary.live_bytes >= 64);
//!     drop(root);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────── Mutator Threads ────────────────────────┐
//! │  allocate ──► Heap (spaces, pages, LABs)                        │
//! │  store    ──► WriteBarrier ──► worklists / remembered sets      │
//! │  poll     ──► Safepoint                                         │
//! └────────────────────────────────┬────────────────────────────────┘
//!                                  │
//! ┌──────────────────────── GarbageCollector ───────────────────────┐
//! │  RootMarking ─► TransitiveClosure ─► Prefinalization ─► Sweep   │
//! │       │               │                                  │      │
//! │   RootSet +      MarkingContext +                  Evacuator +  │
//! │   ambiguous      MarkingThreadPool                 Sweeper      │
//! │   roots                                                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Safety
//!
//! The heap hands out raw payload addresses. Embedders must:
//!
//! 1. Hold every pointer they keep outside the heap in a `Persistent` or
//!    report it as an ambiguous root
//! 2. Store pointers into heap objects through `store` or `write_field`
//! 3. Re-read roots after a cycle; evacuation moves objects
//! 4. Describe every reference slot in the type's trace callback
//!
//! ## Modules
//!
//! - [`barrier`]: Write barriers and the range barrier
//! - [`config`]: Heap configuration and validation
//! - [`error`]: Error types for all operations
//! - [`gc`]: Collection cycle management
//! - [`heap`]: Spaces, pages, remembered sets and sweeping
//! - [`logging`]: Structured GC events
//! - [`marker`]: Marking engines, worklists, roots and marking threads
//! - [`object`]: Object headers and type descriptors
//! - [`platform`]: Page provisioning
//! - [`relocate`]: Evacuation and slot fixup
//! - [`runtime`]: Embedder integration, safepoints, scopes, prefinalizers
//! - [`stats`]: Cycle statistics and pause histograms
//! - [`util`]: Alignment and atomic helpers
//! - [`zone`]: Scratch arenas for short-lived collector data

// Core GC modules
pub mod config;
pub mod error;
pub mod gc;

// Memory management subsystems
pub mod heap;
pub mod object;
pub mod platform;
pub mod zone;

// GC algorithm components
pub mod barrier;
pub mod marker;
pub mod relocate;

// Runtime and monitoring
pub mod logging;
pub mod runtime;
pub mod stats;

// Utilities
pub mod util;

// Re-export main types for convenience
pub use config::{CustomSpaceConfig, GcConfig};
pub use error::{McgcError, Result};
pub use gc::{GarbageCollector, GcGeneration, GcReason, GcState, MarkingMode};
pub use logging::GcEvent;
pub use runtime::{DefaultRuntime, OwningRuntime};
pub use stats::CycleSummary;
pub use util::Address;

/// MCGC version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create a collector with configuration read from `MCGC_*` variables
///
/// # Returns
///
/// - `Ok(GarbageCollector)` - Collector ready for allocation
/// - `Err(McgcError)` - Invalid environment configuration or page setup failure
pub fn init_from_env() -> Result<GarbageCollector> {
    GarbageCollector::new(GcConfig::from_env())
}
