//! GC Threads - Background marking threads
//!
//! Each thread owns a `LocalWorklist` and repeatedly drains it, stealing
//! from the shared segments and its peers when it runs dry. Threads idle
//! with exponential backoff while mutators are still feeding the shared
//! segment through write barriers, and exit only when asked to stop.
//!
//! ## Termination
//!
//! Marking threads cannot decide on their own that marking is complete:
//! a barrier may push new work at any time. The collector stops the pool
//! at the safepoint that finalizes marking and drains the remainder on
//! its own thread.

use super::visitor::MarkingContext;
use crate::error::{McgcError, Result};
use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Objects scanned between checks of the stop flag
const BATCH: usize = 64;

/// Sleep once spinning and yielding stop paying off
const IDLE_SLEEP: Duration = Duration::from_micros(200);

/// Pool of concurrent marking threads for one cycle
pub struct MarkingThreadPool {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<usize>>,
}

impl MarkingThreadPool {
    /// Start `count` threads marking through `context`
    pub fn start(context: Arc<MarkingContext>, count: usize) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            stop: Arc::clone(&stop),
            handles: Vec::with_capacity(count),
        };

        for id in 0..count {
            let context = Arc::clone(&context);
            let stop = Arc::clone(&stop);
            let spawned = thread::Builder::new()
                .name(format!("mcgc-marker-{}", id))
                .spawn(move || Self::run(id, &context, &stop));
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(err) => {
                    let _ = pool.stop();
                    return Err(McgcError::MarkingFailed(format!(
                        "cannot spawn marking thread {}: {}",
                        id, err
                    )));
                }
            }
        }

        log::debug!("started {} marking threads", count);
        Ok(pool)
    }

    fn run(id: usize, context: &MarkingContext, stop: &AtomicBool) -> usize {
        let mut local = context.worklists().local();
        let backoff = Backoff::new();
        let mut total = 0;

        while !stop.load(Ordering::Acquire) {
            let processed = context.process(&mut local, Some(BATCH));
            total += processed;
            if processed > 0 {
                backoff.reset();
                continue;
            }
            if backoff.is_completed() {
                thread::sleep(IDLE_SLEEP);
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }

        log::trace!("marking thread {} scanned {} objects", id, total);
        total
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }

    /// Stop and join every thread
    ///
    /// # Returns
    /// Objects scanned by all threads, or `MarkingFailed` if one panicked
    pub fn stop(mut self) -> Result<usize> {
        self.stop.store(true, Ordering::Release);
        let mut total = 0;
        let mut failed = false;
        for handle in self.handles.drain(..) {
            match handle.join() {
                Ok(scanned) => total += scanned,
                Err(_) => failed = true,
            }
        }
        if failed {
            log::error!("a marking thread panicked");
            return Err(McgcError::MarkingFailed("marking thread panicked".into()));
        }
        Ok(total)
    }
}

impl Drop for MarkingThreadPool {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
