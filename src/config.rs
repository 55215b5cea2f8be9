//! Unified configuration for the SECL engine.
//!
//! This module provides configuration control over expression compilation,
//! batch evaluation and the standard-definition scanner.

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

/// Capability that enables Luhn checksum validation of scanner matches.
pub const CAPABILITY_LUHN_CHECKSUM: &str = "validate_luhn_checksum";

/// Default settings applied while compiling expressions.
///
/// # Examples
///
/// ```rust
/// use secl_engine::CompileOptions;
///
/// let options = CompileOptions::default();
/// assert!(!options.case_insensitive);
///
/// let folded = CompileOptions::case_insensitive();
/// assert!(folded.case_insensitive);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Compare string scalars and glob patterns without regard to case.
    ///
    /// Regex literals are never affected; use `(?i)` inside the regex instead.
    ///
    /// **Default**: false
    pub case_insensitive: bool,
}

impl CompileOptions {
    pub fn case_insensitive() -> Self {
        Self {
            case_insensitive: true,
        }
    }
}

/// Configuration for parallel batch evaluation.
///
/// Batches smaller than `min_batch_size_for_parallelism` are always
/// evaluated on the calling thread.
///
/// | Batch Size | Parallel | Use Case |
/// |------------|----------|----------|
/// | < threshold | No | Interactive, per-event hooks |
/// | ≥ threshold | Yes | Replay, bulk back-testing |
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Size of the dedicated rayon pool used for large batches.
    pub num_threads: usize,
    /// Enable parallel processing of events within batches.
    pub enable_event_parallelism: bool,
    /// Minimum batch size to enable parallel processing.
    pub min_batch_size_for_parallelism: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
            enable_event_parallelism: true,
            min_batch_size_for_parallelism: 100,
        }
    }
}

impl ParallelConfig {
    /// Whether a batch of `len` events should be split across threads.
    pub fn should_parallelize(&self, len: usize) -> bool {
        self.enable_event_parallelism
            && self.num_threads > 1
            && len >= self.min_batch_size_for_parallelism
    }

    /// Build the pool batches are split across, `None` when batches always
    /// stay on the calling thread.
    ///
    /// A pool that cannot be built falls back to the global rayon pool.
    pub fn build_thread_pool(&self) -> Option<Arc<ThreadPool>> {
        if !self.enable_event_parallelism || self.num_threads <= 1 {
            return None;
        }
        match ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .thread_name(|idx| format!("secl-eval-{idx}"))
            .build()
        {
            Ok(pool) => Some(Arc::new(pool)),
            Err(error) => {
                warn!(%error, num_threads = self.num_threads, "using global rayon pool");
                None
            }
        }
    }
}

/// Scanner configuration.
///
/// The set of capabilities decides which variant of a standard definition
/// is selected: the highest version whose required capabilities are all
/// listed here.
///
/// # Examples
///
/// ```rust
/// use secl_engine::config::{ScannerConfig, CAPABILITY_LUHN_CHECKSUM};
///
/// let config = ScannerConfig::default();
/// assert!(config.supports(CAPABILITY_LUHN_CHECKSUM));
/// assert!(!config.supports("unsupported"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Capabilities supported by this engine.
    ///
    /// **Default**: `validate_luhn_checksum`
    pub capabilities: BTreeSet<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            capabilities: [CAPABILITY_LUHN_CHECKSUM.to_string()].into_iter().collect(),
        }
    }
}

impl ScannerConfig {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn supports_all<S: AsRef<str>>(&self, capabilities: &[S]) -> bool {
        capabilities.iter().all(|c| self.supports(c.as_ref()))
    }

    /// A scanner configuration supporting no optional capability.
    pub fn without_capabilities() -> Self {
        Self {
            capabilities: BTreeSet::new(),
        }
    }
}

/// Top-level engine configuration.
///
/// # Example
/// ```rust
/// use secl_engine::config::EngineConfig;
///
/// let config = EngineConfig::new()
///     .with_case_insensitive(true)
///     .with_min_batch_size_for_parallelism(500);
/// assert!(config.compile.case_insensitive);
/// assert_eq!(config.parallel.min_batch_size_for_parallelism, 500);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Compilation defaults
    pub compile: CompileOptions,
    /// Batch evaluation configuration
    pub parallel: ParallelConfig,
    /// Standard definition scanner configuration
    pub scanner: ScannerConfig,
}

impl EngineConfig {
    /// Create a new engine configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a YAML document. Missing keys keep their defaults.
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Create a configuration that never splits batches across threads.
    pub fn single_threaded() -> Self {
        Self {
            parallel: ParallelConfig {
                num_threads: 1,
                enable_event_parallelism: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_case_insensitive(mut self, enable: bool) -> Self {
        self.compile.case_insensitive = enable;
        self
    }

    pub fn with_event_parallelism(mut self, enable: bool) -> Self {
        self.parallel.enable_event_parallelism = enable;
        self
    }

    pub fn with_min_batch_size_for_parallelism(mut self, min_size: usize) -> Self {
        self.parallel.min_batch_size_for_parallelism = min_size;
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.scanner.capabilities.insert(capability.into());
        self
    }
}
