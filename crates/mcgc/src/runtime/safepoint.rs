//! Safepoint Management
//!
//! A safepoint is a point where mutator threads can be stopped so the
//! collector may mark roots and finish a cycle without racing them.
//!
//! ## Safepoint States
//!
//! ```text
//! SAFEPOINT_NONE (0) ─────┐
//!     │                   │
//!     ▼                   │
//! SAFEPOINT_REQUESTED (1) │
//!     │                   │
//!     ▼                   │
//! SAFEPOINT_REACHED (2) ──┘ (after release)
//! ```
//!
//! ## Protocol
//!
//! 1. Mutators `attach` once and `poll` at their own poll points
//! 2. The collector `enter`s: it requests the safepoint and waits until
//!    every attached thread is parked in `poll`
//! 3. The returned `SafepointScope` proves the world is stopped
//! 4. Dropping the scope releases the parked threads

use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Safepoint state constants
pub const SAFEPOINT_NONE: u8 = 0;
pub const SAFEPOINT_REQUESTED: u8 = 1;
pub const SAFEPOINT_REACHED: u8 = 2;

/// Coordination point between the collector and mutator threads
///
/// # Examples
///
/// ```rust
/// use mcgc::runtime::Safepoint;
/// use std::sync::Arc;
///
/// let safepoint = Arc::new(Safepoint::new());
/// {
///     // No thread is attached, so entering does not wait.
///     let scope = safepoint.enter();
///     assert!(safepoint.is_requested());
///     drop(scope);
/// }
/// assert!(!safepoint.is_requested());
/// ```
pub struct Safepoint {
    state: AtomicU8,
    attached: AtomicUsize,
    parked: AtomicUsize,
    /// Serializes collectors
    owner: Mutex<()>,
    epoch: Mutex<u64>,
    released: Condvar,
}

impl Safepoint {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SAFEPOINT_NONE),
            attached: AtomicUsize::new(0),
            parked: AtomicUsize::new(0),
            owner: Mutex::new(()),
            epoch: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    /// Register the calling thread as a mutator that polls
    pub fn attach(self: &Arc<Self>) -> MutatorHandle {
        self.attached.fetch_add(1, Ordering::AcqRel);
        MutatorHandle {
            safepoint: Arc::clone(self),
        }
    }

    /// Stop the world
    ///
    /// Blocks until every attached mutator is parked. The caller must not
    /// itself hold a `MutatorHandle` that it fails to poll.
    pub fn enter(&self) -> SafepointScope<'_> {
        let guard = self.owner.lock();
        self.state.store(SAFEPOINT_REQUESTED, Ordering::SeqCst);

        let backoff = Backoff::new();
        while self.parked.load(Ordering::Acquire) < self.attached.load(Ordering::Acquire) {
            if backoff.is_completed() {
                std::thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
        self.state.store(SAFEPOINT_REACHED, Ordering::Release);
        log::trace!(
            "safepoint reached with {} mutators parked",
            self.parked.load(Ordering::Relaxed)
        );

        SafepointScope {
            safepoint: self,
            _owner: guard,
        }
    }

    fn release(&self) {
        let mut epoch = self.epoch.lock();
        self.state.store(SAFEPOINT_NONE, Ordering::Release);
        *epoch += 1;
        self.released.notify_all();
    }

    /// Check if a safepoint has been requested
    #[inline]
    pub fn is_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) != SAFEPOINT_NONE
    }

    /// Current state constant (NONE, REQUESTED, or REACHED)
    pub fn get_state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub fn attached_threads(&self) -> usize {
        self.attached.load(Ordering::Acquire)
    }

    pub fn threads_at_safepoint(&self) -> usize {
        self.parked.load(Ordering::Acquire)
    }

    fn park(&self) {
        let mut epoch = self.epoch.lock();
        if !self.is_requested() {
            return;
        }
        let entered = *epoch;
        self.parked.fetch_add(1, Ordering::AcqRel);
        while *epoch == entered {
            self.released.wait(&mut epoch);
        }
        self.parked.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Default for Safepoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Attachment of one mutator thread
///
/// Detaches on drop.
pub struct MutatorHandle {
    safepoint: Arc<Safepoint>,
}

impl MutatorHandle {
    /// Park here if the collector asked for a safepoint
    #[inline]
    pub fn poll(&self) {
        if self.safepoint.is_requested() {
            self.safepoint.park();
        }
    }
}

impl Drop for MutatorHandle {
    fn drop(&mut self) {
        self.safepoint.attached.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Proof that all attached mutators are stopped
#[must_use = "the world restarts when the scope is dropped"]
pub struct SafepointScope<'a> {
    safepoint: &'a Safepoint,
    _owner: parking_lot::MutexGuard<'a, ()>,
}

impl SafepointScope<'_> {
    pub fn safepoint(&self) -> &Safepoint {
        self.safepoint
    }
}

impl Drop for SafepointScope<'_> {
    fn drop(&mut self) {
        self.safepoint.release();
    }
}
