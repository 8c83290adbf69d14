//! Marker Module - Tri-color marking
//!
//! Colors are encoded by the header mark bit plus worklist membership:
//!
//! - **White** - mark bit clear
//! - **Grey** - mark bit set, header address on a worklist
//! - **Black** - mark bit set, fields scanned
//!
//! An object turns grey only through a successful `try_mark`, so it is
//! pushed at most once per cycle. The backward barrier re-greys black
//! objects through the separate retrace segment. Weak slots are queued
//! rather than followed and cleared once the closure is complete.
//!
//! ```text
//! roots ──try_mark──► worklist ──pop/trace──► fields ──try_mark──► worklist
//!   ▲                    ▲                                            │
//!   │ ambiguous words    │ forward barrier / retrace                  │
//! conservative        mutators                                        ▼
//! visitor                                                   remembered sets
//! ```
//!
//! The transitive closure runs on the collecting thread (incremental
//! steps, stop-the-world) and on `MarkingThreadPool` threads (concurrent).

pub mod conservative;
pub mod engine;
pub mod gc_threads;
pub mod roots;
pub mod visitor;
pub mod weak;
pub mod worklist;

pub use engine::{AtomicMarkingState, MarkingEngine, MarkingState, NonAtomicMarkingState};
pub use gc_threads::MarkingThreadPool;
pub use roots::{Persistent, RootId, RootSet};
pub use visitor::{MarkingContext, MarkingVisitor};
pub use weak::{process_weak_slots, WeakSlotWorklist, WeaknessStats};
pub use worklist::{LocalWorklist, MarkingWorklists};
