//! Configuration Module - Heap and Collector Parameters
//!
//! Collects every tunable of the heap in one explicit record that is passed
//! to `GarbageCollector::new`. Nothing is read from process-global state
//! after construction.

/// Description of an embedder-defined space
///
/// Custom spaces are addressed by their index in `GcConfig::custom_spaces`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomSpaceConfig {
    /// Objects in this space may be moved by compaction
    pub compactable: bool,

    /// Pages of this space are flagged TRUSTED
    pub trusted: bool,

    /// Pages of this space are flagged EXECUTABLE and mapped RWX
    pub executable: bool,

    /// Pages of this space are flagged SHARED (owned by the shared heap)
    pub shared: bool,
}

/// Main configuration for the mark-compact heap
///
/// # Examples
///
/// ```rust
/// use mcgc::GcConfig;
///
/// let config = GcConfig {
///     concurrent_marking: false,
///     generational: false,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Size of a normal page in bytes
    ///
    /// Must be a power of two and a multiple of the OS page size.
    /// Default: 128KB
    pub page_size: usize,

    /// Upper bounds of the size-class spaces, ascending
    ///
    /// Sizes include the object header. Objects larger than the last class
    /// and below `large_object_threshold` go to the regular space.
    /// Default: [32, 64, 128, 256]
    pub size_classes: Vec<usize>,

    /// Allocations at or above this size get a dedicated large page
    ///
    /// Default: page_size / 2
    pub large_object_threshold: usize,

    /// Embedder-defined spaces, addressed by index
    pub custom_spaces: Vec<CustomSpaceConfig>,

    /// Hard limit on committed page bytes
    ///
    /// Allocation fails with `OutOfMemory` once pages would exceed this,
    /// after one full collection has been attempted.
    /// Default: 512MB
    pub max_heap_size: usize,

    /// Run the transitive closure on background marking threads
    ///
    /// Selects the atomic marking engine. When false, stop-the-world cycles
    /// mark with the non-atomic engine on the collecting thread; incremental
    /// cycles still mark atomically because mutator barriers run between
    /// steps.
    /// Default: true
    pub concurrent_marking: bool,

    /// Number of concurrent marking threads
    ///
    /// If None, auto-detects: min(4, num_cpus / 2), at least 1.
    pub marking_threads: Option<usize>,

    /// Objects processed per `incremental_step` when no budget is given
    ///
    /// Default: 512
    pub incremental_step_budget: usize,

    /// Enable young-generation (minor) collections and the generational barrier
    ///
    /// Default: true
    pub generational: bool,

    /// Enable evacuation of fragmented pages
    ///
    /// Default: true
    pub compaction: bool,

    /// Pages whose live ratio after the previous cycle is below this value
    /// become evacuation candidates
    ///
    /// Default: 0.5
    pub evacuation_threshold: f64,

    /// Upper bound on automatically selected candidates per cycle
    ///
    /// Default: 16
    pub max_evacuation_candidates: usize,

    /// Permit allocation from inside prefinalizer callbacks
    ///
    /// Default: false
    pub allow_allocation_in_prefinalizers: bool,

    /// Turn every write barrier into `NoBarrier`
    ///
    /// Only sound for stop-the-world, non-generational configurations.
    /// Default: false
    pub disable_write_barriers: bool,

    /// Ask the owning runtime for ambiguous stack words during root marking
    ///
    /// Default: true
    pub conservative_stack_scanning: bool,

    /// This heap owns the shared space
    ///
    /// Client heaps do not record slots that target SHARED pages.
    /// Default: false
    pub is_shared_space_owner: bool,

    /// Guard TRUSTED pages with a protection key when the platform offers one
    ///
    /// Default: false
    pub protect_trusted_pages: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        let page_size = 128 * KB;
        Self {
            page_size,
            size_classes: vec![32, 64, 128, 256],
            large_object_threshold: page_size / 2,
            custom_spaces: Vec::new(),
            max_heap_size: 512 * MB,
            concurrent_marking: true,
            marking_threads: None,
            incremental_step_budget: 512,
            generational: true,
            compaction: true,
            evacuation_threshold: 0.5,
            max_evacuation_candidates: 16,
            allow_allocation_in_prefinalizers: false,
            disable_write_barriers: false,
            conservative_stack_scanning: true,
            is_shared_space_owner: false,
            protect_trusted_pages: false,
        }
    }
}

impl GcConfig {
    /// Validate configuration
    ///
    /// # Returns
    /// `Ok(())` if the configuration is usable, the first violation otherwise
    pub fn validate(&self) -> Result<(), ConfigError> {
        let os_page = page_size::get();

        if !self.page_size.is_power_of_two() || self.page_size < 16 * KB {
            return Err(ConfigError::InvalidPageSize(format!(
                "page_size must be a power of two >= 16KB, got {}",
                self.page_size
            )));
        }

        if self.page_size % os_page != 0 {
            return Err(ConfigError::InvalidPageSize(format!(
                "page_size {} is not a multiple of the OS page size {}",
                self.page_size, os_page
            )));
        }

        if self.size_classes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::InvalidSizeClasses(
                "size_classes must be strictly ascending".to_string(),
            ));
        }

        if self.size_classes.iter().any(|&c| c < 32 || c % 16 != 0) {
            return Err(ConfigError::InvalidSizeClasses(
                "size classes must be multiples of 16 and at least 32".to_string(),
            ));
        }

        if self.large_object_threshold > self.page_size
            || self
                .size_classes
                .last()
                .is_some_and(|&c| c >= self.large_object_threshold)
        {
            return Err(ConfigError::InvalidThreshold(
                "large_object_threshold must exceed every size class and fit a page".to_string(),
            ));
        }

        if self.max_heap_size < self.page_size {
            return Err(ConfigError::InvalidHeapSize(
                "max_heap_size must hold at least one page".to_string(),
            ));
        }

        if self.marking_threads == Some(0) {
            return Err(ConfigError::InvalidMarkingThreads(
                "marking_threads must be > 0 when set".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.evacuation_threshold) {
            return Err(ConfigError::InvalidThreshold(
                "evacuation_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.incremental_step_budget == 0 {
            return Err(ConfigError::InvalidThreshold(
                "incremental_step_budget must be > 0".to_string(),
            ));
        }

        if self.disable_write_barriers && (self.generational || self.concurrent_marking) {
            return Err(ConfigError::Inconsistent(
                "write barriers can only be disabled for non-generational, non-concurrent heaps"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables keep their default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MCGC_MAX_HEAP") {
            if let Ok(size) = val.parse::<usize>() {
                config.max_heap_size = size;
            }
        }

        if let Ok(val) = std::env::var("MCGC_PAGE_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.page_size = size;
                config.large_object_threshold = size / 2;
            }
        }

        if let Ok(val) = std::env::var("MCGC_MARKING_THREADS") {
            if let Ok(threads) = val.parse::<usize>() {
                config.marking_threads = Some(threads);
            }
        }

        if let Ok(val) = std::env::var("MCGC_CONCURRENT_MARKING") {
            config.concurrent_marking = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("MCGC_GENERATIONAL") {
            config.generational = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("MCGC_COMPACTION") {
            config.compaction = parse_flag(&val);
        }

        config
    }

    /// Marking threads that will actually be started
    pub fn effective_marking_threads(&self) -> usize {
        if !self.concurrent_marking {
            return 0;
        }
        self.marking_threads
            .unwrap_or_else(|| (num_cpus::get() / 2).clamp(1, 4))
    }
}

fn parse_flag(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid page size: {0}")]
    InvalidPageSize(String),

    #[error("Invalid size classes: {0}")]
    InvalidSizeClasses(String),

    #[error("Invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Invalid marking threads: {0}")]
    InvalidMarkingThreads(String),

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

// ============================================================================
// CONSTANTS
// ============================================================================

pub(crate) const KB: usize = 1024;
pub(crate) const MB: usize = 1024 * 1024;
