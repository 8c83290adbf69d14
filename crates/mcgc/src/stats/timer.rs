//! GC Timer - Timing Utilities

use std::time::{Duration, Instant};

/// Wall-clock timer for one collector operation
#[derive(Debug, Clone, Copy)]
pub struct GcTimer {
    start: Instant,
}

impl GcTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for GcTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Reports its lifetime to a callback when dropped
pub struct ScopedTimer<'a> {
    name: &'a str,
    start: Instant,
    callback: Box<dyn FnMut(&str, Duration) + 'a>,
}

impl<'a> ScopedTimer<'a> {
    pub fn new<F>(name: &'a str, callback: F) -> Self
    where
        F: FnMut(&str, Duration) + 'a,
    {
        Self {
            name,
            start: Instant::now(),
            callback: Box::new(callback),
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        (self.callback)(self.name, duration);
    }
}
