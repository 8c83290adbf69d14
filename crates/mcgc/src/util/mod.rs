//! Util Module - Shared Utilities
//!
//! Small helpers used throughout MCGC.

pub mod alignment;
pub mod atomic;

pub use alignment::Alignment;
pub use atomic::AtomicUtils;

/// Address of a byte in the managed heap or in runtime memory
pub type Address = usize;

/// Constants for MCGC
pub mod constants {
    /// Machine word size in bytes
    pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

    /// Granularity of every heap allocation, header included
    pub const ALLOCATION_GRANULARITY: usize = 16;

    /// Addresses below this are never treated as heap pointers
    pub const MIN_VALID_POINTER: usize = 0x1000;
}
