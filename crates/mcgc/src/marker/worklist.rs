//! Marking Worklists - Sharded work-stealing queues
//!
//! Grey objects (marked, not yet scanned) wait here for scanning.
//!
//! ```text
//! ┌─────────────────────── MarkingWorklists ───────────────────────┐
//! │  shared: Injector      retrace: Injector      stealers: [..]   │
//! └────────────────────────────────────────────────────────────────┘
//!          ▲ publish / steal                    ▲ steal
//! ┌────────┴─────────┐   ┌──────────────────┐   │
//! │ LocalWorklist 0  │   │ LocalWorklist 1  │ ──┘
//! │ (Worker, LIFO)   │   │ (Worker, LIFO)   │
//! └──────────────────┘   └──────────────────┘
//! ```
//!
//! Entries are header addresses. An object is pushed only by the thread
//! whose `try_mark` succeeded, so it appears at most once while pending.
//! The retrace segment holds already-marked hosts re-greyed by the
//! backward barrier. Weak slots found while scanning wait in their own
//! list until the closure completes.

use super::weak::WeakSlotWorklist;
use crate::util::Address;
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared segments plus the stealers of every live local segment
#[derive(Default)]
pub struct MarkingWorklists {
    shared: Injector<Address>,
    retrace: Injector<Address>,
    weak: WeakSlotWorklist,
    stealers: Mutex<Vec<Stealer<Address>>>,
    pushed: AtomicUsize,
}

impl MarkingWorklists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a thread-local segment attached to these worklists
    pub fn local(self: &Arc<Self>) -> LocalWorklist {
        let worker = Worker::new_lifo();
        self.stealers.lock().push(worker.stealer());
        LocalWorklist {
            owner: Arc::clone(self),
            worker,
        }
    }

    /// Push a freshly marked object from a thread without a local segment
    pub fn push_shared(&self, header: Address) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.shared.push(header);
    }

    /// Queue an already-marked object for rescanning
    pub fn push_retrace(&self, header: Address) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.retrace.push(header);
    }

    /// Slots of weak references, processed after the closure
    pub fn weak_slots(&self) -> &WeakSlotWorklist {
        &self.weak
    }

    /// True when no segment holds work
    ///
    /// Pending weak slots are not marking work.
    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
            && self.retrace.is_empty()
            && self.stealers.lock().iter().all(Stealer::is_empty)
    }

    /// Total pushes since the last `clear`
    pub fn pushed(&self) -> usize {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Drop every pending entry
    ///
    /// Local segments still alive keep their own entries; callers clear
    /// only after all marking threads have stopped.
    pub fn clear(&self) {
        while !matches!(self.shared.steal(), Steal::Empty) {}
        while !matches!(self.retrace.steal(), Steal::Empty) {}
        self.weak.clear();
        let mut stealers = self.stealers.lock();
        for stealer in stealers.iter() {
            while !matches!(stealer.steal(), Steal::Empty) {}
        }
        stealers.clear();
        self.pushed.store(0, Ordering::Relaxed);
    }

    fn steal_into(&self, worker: &Worker<Address>) -> Option<Address> {
        loop {
            let steal = self
                .retrace
                .steal_batch_and_pop(worker)
                .or_else(|| self.shared.steal_batch_and_pop(worker))
                .or_else(|| {
                    self.stealers
                        .lock()
                        .iter()
                        .map(|stealer| stealer.steal_batch_and_pop(worker))
                        .collect()
                });
            match steal {
                Steal::Success(header) => return Some(header),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }
}

/// Thread-local segment
///
/// Remaining entries are published to the shared segment on drop.
pub struct LocalWorklist {
    owner: Arc<MarkingWorklists>,
    worker: Worker<Address>,
}

impl LocalWorklist {
    pub fn push(&mut self, header: Address) {
        self.owner.pushed.fetch_add(1, Ordering::Relaxed);
        self.worker.push(header);
    }

    /// Pop local work, then steal from the shared segments and peers
    pub fn pop(&mut self) -> Option<Address> {
        self.worker.pop().or_else(|| self.owner.steal_into(&self.worker))
    }

    pub fn is_local_empty(&self) -> bool {
        self.worker.is_empty()
    }

    /// Move every local entry to the shared segment
    pub fn publish(&mut self) {
        while let Some(header) = self.worker.pop() {
            self.owner.shared.push(header);
        }
    }

    pub fn worklists(&self) -> &Arc<MarkingWorklists> {
        &self.owner
    }
}

impl Drop for LocalWorklist {
    fn drop(&mut self) {
        self.publish();
    }
}
