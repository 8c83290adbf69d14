//! GC Logging and Telemetry
//!
//! Diagnostics go through the `log` facade:
//! - ERROR: marking thread failures
//! - WARN: unusual conditions (pinned pages, partial evacuation, rejected
//!   registrations)
//! - DEBUG: cycles and phases
//! - TRACE: per-page and per-object operations
//!
//! Phase boundaries are additionally reported as structured `GcEvent`s to
//! the owning runtime. `EventLog` is a bounded in-memory sink for them with
//! wall-clock timestamps and JSON export.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Structured collector event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GcEvent {
    /// GC cycle started
    CycleStart {
        cycle: u64,
        generation: String,
        reason: String,
    },

    /// GC phase started
    PhaseStart { cycle: u64, phase: String },

    /// GC phase completed
    PhaseEnd {
        cycle: u64,
        phase: String,
        duration_ms: f64,
    },

    /// GC cycle completed
    CycleEnd {
        cycle: u64,
        duration_ms: f64,
        live_bytes: usize,
        freed_bytes: usize,
        released_pages: usize,
    },

    /// Marking statistics
    MarkStats {
        cycle: u64,
        marked_objects: usize,
        scanned_objects: usize,
    },

    /// Evacuation statistics
    EvacuationStats {
        cycle: u64,
        evacuated_pages: usize,
        aborted_pages: usize,
        pinned_pages: usize,
        moved_objects: usize,
        moved_bytes: usize,
    },

    /// Prefinalization pass
    Prefinalizers {
        cycle: u64,
        invoked: usize,
        removed: usize,
    },

    /// Incremental marking was abandoned
    MarkingAborted { cycle: u64 },

    /// Allocation failed even after a full collection
    AllocationFailure { size: usize, committed_bytes: usize },
}

impl GcEvent {
    /// Level at which the event is forwarded to `log`
    pub fn level(&self) -> log::Level {
        match self {
            GcEvent::AllocationFailure { .. } => log::Level::Error,
            GcEvent::MarkingAborted { .. } => log::Level::Warn,
            GcEvent::CycleStart { .. } | GcEvent::CycleEnd { .. } => log::Level::Debug,
            _ => log::Level::Trace,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for GcEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcEvent::CycleStart {
                cycle,
                generation,
                reason,
            } => write!(
                f,
                "[GC] Cycle {} started ({} generation, reason: {})",
                cycle, generation, reason
            ),
            GcEvent::PhaseStart { cycle, phase } => {
                write!(f, "[GC] Cycle {}: {} phase started", cycle, phase)
            }
            GcEvent::PhaseEnd {
                cycle,
                phase,
                duration_ms,
            } => write!(
                f,
                "[GC] Cycle {}: {} phase completed ({:.2}ms)",
                cycle, phase, duration_ms
            ),
            GcEvent::CycleEnd {
                cycle,
                duration_ms,
                live_bytes,
                freed_bytes,
                released_pages,
            } => write!(
                f,
                "[GC] Cycle {} completed ({:.2}ms, {} live, {} freed, {} pages released)",
                cycle, duration_ms, live_bytes, freed_bytes, released_pages
            ),
            GcEvent::MarkStats {
                cycle,
                marked_objects,
                scanned_objects,
            } => write!(
                f,
                "[GC] Cycle {}: marked {} objects, scanned {}",
                cycle, marked_objects, scanned_objects
            ),
            GcEvent::EvacuationStats {
                cycle,
                evacuated_pages,
                aborted_pages,
                pinned_pages,
                moved_objects,
                moved_bytes,
            } => write!(
                f,
                "[GC] Cycle {}: evacuated {} pages ({} aborted, {} pinned), moved {} objects ({} bytes)",
                cycle, evacuated_pages, aborted_pages, pinned_pages, moved_objects, moved_bytes
            ),
            GcEvent::Prefinalizers {
                cycle,
                invoked,
                removed,
            } => write!(
                f,
                "[GC] Cycle {}: {} prefinalizers invoked, {} removed",
                cycle, invoked, removed
            ),
            GcEvent::MarkingAborted { cycle } => {
                write!(f, "[GC] Cycle {}: incremental marking aborted", cycle)
            }
            GcEvent::AllocationFailure {
                size,
                committed_bytes,
            } => write!(
                f,
                "[GC] Allocation failure: {} bytes (committed: {})",
                size, committed_bytes
            ),
        }
    }
}

/// An event with the wall-clock time it was recorded at
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub timestamp: DateTime<Local>,
    pub event: GcEvent,
}

impl EventRecord {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "event": self.event.to_json(),
        })
    }
}

/// Bounded event sink
///
/// Keeps the most recent `capacity` events.
pub struct EventLog {
    capacity: usize,
    records: Mutex<VecDeque<EventRecord>>,
}

impl EventLog {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, event: GcEvent) {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(EventRecord {
            timestamp: Local::now(),
            event,
        });
    }

    /// Snapshot of the retained events, oldest first
    pub fn events(&self) -> Vec<GcEvent> {
        self.records.lock().iter().map(|r| r.event.clone()).collect()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// One JSON document per line
    pub fn to_json_lines(&self) -> String {
        let records = self.records.lock();
        let mut out = String::new();
        for record in records.iter() {
            out.push_str(&record.to_json().to_string());
            out.push('\n');
        }
        out
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let event = GcEvent::MarkingAborted { cycle: 7 };
        let json = event.to_json();
        assert_eq!(json["type"], "marking_aborted");
        assert_eq!(json["cycle"], 7);

        let back: GcEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_log_is_bounded() {
        let log = EventLog::with_capacity(2);
        for cycle in 0..3 {
            log.record(GcEvent::MarkingAborted { cycle });
        }
        assert_eq!(
            log.events(),
            vec![
                GcEvent::MarkingAborted { cycle: 1 },
                GcEvent::MarkingAborted { cycle: 2 }
            ]
        );
        assert_eq!(log.to_json_lines().lines().count(), 2);
    }

    #[test]
    fn test_display() {
        let event = GcEvent::PhaseStart {
            cycle: 3,
            phase: "RootMarking".to_string(),
        };
        assert_eq!(event.to_string(), "[GC] Cycle 3: RootMarking phase started");
    }
}
