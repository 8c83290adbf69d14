//! Object Module - Managed object model
//!
//! Every managed object is preceded by an `ObjectHeader`. The header names
//! a registered `GcInfo` whose trace callback enumerates the object's
//! reference slots for a `Visitor`.
//!
//! ```text
//!          header (16 bytes)            payload
//!   ┌────────┬──────────┬───────┬──────┬────────────────────┐
//!   │ size   │ gc info  │ state │ mark │ fields ...         │
//!   └────────┴──────────┴───────┴──────┴────────────────────┘
//!   ^ header address                  ^ payload = header + HEADER_SIZE
//! ```

pub mod descriptor;
pub mod header;

pub use descriptor::{
    trace_nothing, visit_slots, visit_weak_slots, GcInfo, GcInfoIndex, GcInfoTable, TraceCallback,
    TraceDescriptor, Visitor,
};
pub use header::{ObjectHeader, FREE_GC_INFO_INDEX, HEADER_SIZE};
