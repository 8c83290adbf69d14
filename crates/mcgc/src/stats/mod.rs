//! Stats Module - Collector statistics
//!
//! Counters for cycles by generation, a pause-time histogram and a
//! summary of the most recent cycle.

pub mod histogram;
pub mod timer;

pub use histogram::Histogram;
pub use timer::{GcTimer, ScopedTimer};

use crate::gc::GcGeneration;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// What one completed cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    pub cycle: u64,
    pub generation: Option<GcGeneration>,
    pub duration: Duration,
    pub marked_objects: usize,
    pub live_bytes: usize,
    pub freed_bytes: usize,
    pub released_pages: usize,
    pub evacuated_pages: usize,
    pub moved_objects: usize,
    pub moved_bytes: usize,
    pub prefinalizers_invoked: usize,
    /// Weak slots zeroed because their target died
    pub cleared_weak_slots: usize,
}

/// Statistics collector
pub struct GcStats {
    total_cycles: AtomicU64,
    minor_cycles: AtomicU64,
    major_cycles: AtomicU64,
    aborted_markings: AtomicU64,
    allocation_failures: AtomicU64,
    freed_bytes: AtomicUsize,
    /// Pause times in nanoseconds
    pauses: Histogram,
    last_cycle: Mutex<Option<CycleSummary>>,
    start_time: Instant,
}

impl GcStats {
    pub fn new() -> Self {
        Self {
            total_cycles: AtomicU64::new(0),
            minor_cycles: AtomicU64::new(0),
            major_cycles: AtomicU64::new(0),
            aborted_markings: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
            freed_bytes: AtomicUsize::new(0),
            pauses: Histogram::new(),
            last_cycle: Mutex::new(None),
            start_time: Instant::now(),
        }
    }

    pub fn record_cycle(&self, summary: CycleSummary) {
        self.total_cycles.fetch_add(1, Ordering::Relaxed);
        match summary.generation {
            Some(GcGeneration::Young) => self.minor_cycles.fetch_add(1, Ordering::Relaxed),
            _ => self.major_cycles.fetch_add(1, Ordering::Relaxed),
        };
        self.freed_bytes
            .fetch_add(summary.freed_bytes, Ordering::Relaxed);
        *self.last_cycle.lock() = Some(summary);
    }

    /// Record one stop-the-world pause
    pub fn record_pause(&self, duration: Duration) {
        self.pauses.record(duration.as_nanos() as u64);
    }

    pub fn record_aborted_marking(&self) {
        self.aborted_markings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_allocation_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles.load(Ordering::Relaxed)
    }

    pub fn minor_cycles(&self) -> u64 {
        self.minor_cycles.load(Ordering::Relaxed)
    }

    pub fn major_cycles(&self) -> u64 {
        self.major_cycles.load(Ordering::Relaxed)
    }

    pub fn last_cycle(&self) -> Option<CycleSummary> {
        self.last_cycle.lock().clone()
    }

    pub fn pause_histogram(&self) -> &Histogram {
        &self.pauses
    }

    pub fn summary(&self) -> GcSummary {
        GcSummary {
            total_cycles: self.total_cycles(),
            minor_cycles: self.minor_cycles(),
            major_cycles: self.major_cycles(),
            aborted_markings: self.aborted_markings.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            freed_bytes: self.freed_bytes.load(Ordering::Relaxed),
            avg_pause_ms: self.pauses.mean() as f64 / 1_000_000.0,
            max_pause_ms: self.pauses.max() as f64 / 1_000_000.0,
            p99_pause_ms: self.pauses.p99() as f64 / 1_000_000.0,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn reset(&self) {
        self.total_cycles.store(0, Ordering::Relaxed);
        self.minor_cycles.store(0, Ordering::Relaxed);
        self.major_cycles.store(0, Ordering::Relaxed);
        self.aborted_markings.store(0, Ordering::Relaxed);
        self.allocation_failures.store(0, Ordering::Relaxed);
        self.freed_bytes.store(0, Ordering::Relaxed);
        self.pauses.clear();
        *self.last_cycle.lock() = None;
    }
}

impl Default for GcStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary statistics
#[derive(Debug, Clone, Default)]
pub struct GcSummary {
    pub total_cycles: u64,
    pub minor_cycles: u64,
    pub major_cycles: u64,
    pub aborted_markings: u64,
    pub allocation_failures: u64,
    /// Bytes reclaimed over all cycles
    pub freed_bytes: usize,
    pub avg_pause_ms: f64,
    pub max_pause_ms: f64,
    pub p99_pause_ms: f64,
    pub uptime_secs: u64,
}
