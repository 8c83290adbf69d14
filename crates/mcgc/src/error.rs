//! Error Module - MCGC Error Types
//!
//! Defines all error types used in MCGC.
//!
//! # Error Categories
//!
//! ## Memory Errors
//! - `OutOfMemory` - Arena, space or platform exhaustion
//! - `PlatformFailure` - Page provider refused a request
//!
//! ## Heap Addressing Errors
//! - `InvalidSpaceIndex` - Custom space index out of range
//! - `InvalidArgument` - Invalid function argument
//!
//! ## Collector Errors
//! - `InvalidState` - Collector state machine violation
//! - `CollectionDisallowed` - A `DisallowGcScope` is held
//! - `FinalizationDisallowed` - A `NoFinalizerScope` is held
//! - `AllocationDisallowed` - Allocation attempted inside a prefinalizer
//! - `MarkingFailed` - Marking thread failure
//!
//! ## Configuration Errors
//! - `Configuration` - Invalid configuration

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all MCGC operations
///
/// # Examples
///
/// ```rust
/// use mcgc::McgcError;
///
/// fn handle_error(err: McgcError) {
///     match err {
///         McgcError::OutOfMemory { requested, available } => {
///             eprintln!("OOM: requested {}, available {}", requested, available);
///         }
///         McgcError::InvalidSpaceIndex { index, count } => {
///             eprintln!("no custom space {} (have {})", index, count);
///         }
///         _ => {
///             eprintln!("Other error: {}", err);
///         }
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum McgcError {
    /// Out of memory
    ///
    /// **When returned:** A zone cannot grow, or the page provider cannot
    /// supply a page even after a full collection.
    ///
    /// **Recovery strategy:** Release roots and retry, or fail gracefully
    #[error("Out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },

    /// Custom space index out of range
    ///
    /// **When returned:** Allocation or lookup names a custom space that
    /// was not configured.
    #[error("Invalid space index {index}: heap has {count} custom spaces")]
    InvalidSpaceIndex { index: usize, count: usize },

    /// Platform page provider failure
    ///
    /// **When returned:** Permission change or release rejected by the OS
    #[error("Platform failure: {0}")]
    PlatformFailure(String),

    /// Configuration error
    ///
    /// **When returned:** `GcConfig::validate` rejected the configuration
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Invalid state
    ///
    /// **When returned:** Collector operation called in the wrong phase
    ///
    /// **Example scenario:** `incremental_step` while the collector is Idle
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Invalid argument
    ///
    /// **Example scenarios:**
    /// - Alignment larger than the allocation granularity
    /// - Object size that does not fit the header
    /// - Unregistered trace descriptor index
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Collection requested while a `DisallowGcScope` is held
    #[error("Garbage collection is disallowed in the current scope")]
    CollectionDisallowed,

    /// Finalization requested while a `NoFinalizerScope` is held
    #[error("Finalizers are disallowed in the current scope")]
    FinalizationDisallowed,

    /// Allocation attempted while prefinalizers are running
    #[error("Allocation is disallowed while prefinalizers run")]
    AllocationDisallowed,

    /// Marking phase failed
    ///
    /// **When returned:** A concurrent marking thread could not be spawned
    /// or panicked.
    #[error("Marking phase failed: {0}")]
    MarkingFailed(String),
}

impl McgcError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            McgcError::OutOfMemory { .. }
                | McgcError::CollectionDisallowed
                | McgcError::FinalizationDisallowed
        )
    }

    /// Check if this error indicates a bug in the caller or in MCGC
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            McgcError::InvalidState { .. } | McgcError::AllocationDisallowed
        )
    }

    pub(crate) fn invalid_state(expected: impl ToString, actual: impl ToString) -> Self {
        McgcError::InvalidState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result type alias for MCGC operations
pub type Result<T> = std::result::Result<T, McgcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let oom = McgcError::OutOfMemory {
            requested: 64,
            available: 0,
        };
        assert!(oom.is_recoverable());
        assert!(!oom.is_bug());

        let state = McgcError::invalid_state("Idle", "RootMarking");
        assert!(state.is_bug());
        assert!(!state.is_recoverable());
    }

    #[test]
    fn test_display_carries_context() {
        let err = McgcError::InvalidSpaceIndex { index: 3, count: 1 };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('1'));
    }
}
