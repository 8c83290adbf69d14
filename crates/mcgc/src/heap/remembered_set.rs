//! Remembered Sets - Per-page slot sets
//!
//! A remembered set stores byte offsets (relative to the page base) of
//! slots that must be revisited later:
//!
//! | Set                 | Recorded when                                    |
//! |---------------------|--------------------------------------------------|
//! | `OldToNew`          | old page slot written with a young value         |
//! | `OldToNewObjects`   | imprecise generational barrier (object base)     |
//! | `OldToOld`          | slot points into an evacuation candidate         |
//! | `TrustedToTrusted`  | trusted slot points into a trusted candidate     |
//! | `TrustedToCode`     | trusted slot points into an executable candidate |
//!
//! Storage is a word-granular bitmap allocated on first insertion.
//! Insertion is atomic so mutator barriers and marking threads can record
//! into the same page concurrently.

use crate::util::constants::WORD_SIZE;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Kind of remembered set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RememberedSetType {
    OldToNew,
    OldToNewObjects,
    OldToOld,
    TrustedToTrusted,
    TrustedToCode,
}

impl RememberedSetType {
    pub const ALL: [RememberedSetType; 5] = [
        RememberedSetType::OldToNew,
        RememberedSetType::OldToNewObjects,
        RememberedSetType::OldToOld,
        RememberedSetType::TrustedToTrusted,
        RememberedSetType::TrustedToCode,
    ];

    /// Sets replayed after evacuation
    pub const EVACUATION: [RememberedSetType; 3] = [
        RememberedSetType::OldToOld,
        RememberedSetType::TrustedToTrusted,
        RememberedSetType::TrustedToCode,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Set of word-aligned byte offsets within one page
pub struct SlotSet {
    page_size: usize,
    bits: OnceLock<Box<[AtomicU64]>>,
}

impl SlotSet {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            bits: OnceLock::new(),
        }
    }

    fn storage(&self) -> &[AtomicU64] {
        self.bits.get_or_init(|| {
            let words = (self.page_size / WORD_SIZE).div_ceil(64);
            (0..words).map(|_| AtomicU64::new(0)).collect()
        })
    }

    #[inline]
    fn indices(offset: u32) -> (usize, u32) {
        let bit = offset as usize / WORD_SIZE;
        (bit / 64, (bit % 64) as u32)
    }

    /// Insert `offset`; true if it was not present
    pub fn insert(&self, offset: u32) -> bool {
        debug_assert_eq!(offset as usize % WORD_SIZE, 0, "unaligned slot offset");
        debug_assert!((offset as usize) < self.page_size);
        let (word, bit) = Self::indices(offset);
        let previous = self.storage()[word].fetch_or(1 << bit, Ordering::AcqRel);
        previous & (1 << bit) == 0
    }

    pub fn contains(&self, offset: u32) -> bool {
        let Some(bits) = self.bits.get() else {
            return false;
        };
        let (word, bit) = Self::indices(offset);
        bits.get(word)
            .is_some_and(|w| w.load(Ordering::Acquire) & (1 << bit) != 0)
    }

    pub fn remove(&self, offset: u32) {
        if let Some(bits) = self.bits.get() {
            let (word, bit) = Self::indices(offset);
            if let Some(w) = bits.get(word) {
                w.fetch_and(!(1 << bit), Ordering::AcqRel);
            }
        }
    }

    pub fn clear(&self) {
        if let Some(bits) = self.bits.get() {
            for word in bits.iter() {
                word.store(0, Ordering::Release);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.bits.get().map_or(0, |bits| {
            bits.iter()
                .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
                .sum()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all offsets in ascending order
    pub fn offsets(&self) -> Vec<u32> {
        let mut out = Vec::new();
        if let Some(bits) = self.bits.get() {
            for (index, word) in bits.iter().enumerate() {
                let mut value = word.load(Ordering::Acquire);
                while value != 0 {
                    let bit = value.trailing_zeros() as usize;
                    out.push(((index * 64 + bit) * WORD_SIZE) as u32);
                    value &= value - 1;
                }
            }
        }
        out
    }

    /// Drop every offset for which `keep` returns false
    pub fn retain(&self, mut keep: impl FnMut(u32) -> bool) {
        for offset in self.offsets() {
            if !keep(offset) {
                self.remove(offset);
            }
        }
    }
}

/// All remembered sets of one page
pub struct PageRememberedSets {
    sets: [SlotSet; 5],
}

impl PageRememberedSets {
    pub fn new(page_size: usize) -> Self {
        Self {
            sets: std::array::from_fn(|_| SlotSet::new(page_size)),
        }
    }

    #[inline]
    pub fn get(&self, kind: RememberedSetType) -> &SlotSet {
        &self.sets[kind.index()]
    }

    pub fn clear_all(&self) {
        for set in &self.sets {
            set.clear();
        }
    }
}
