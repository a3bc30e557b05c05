//! Crawl configuration and the durable output layout.
//!
//! [`CrawlConfig`] gathers every tunable of a crawl run with the defaults the
//! scraper has always used. [`OutputLayout`] turns the configured output root
//! into the fixed directory structure that outlives a run:
//!
//! ```text
//! <root>/metadata/content_hashes/{doc_name}_hashes.json
//! <root>/scrape_states/{doc_name}_{version}_state.json
//! <root>/link_integrity/{doc_name}/{version}/link_integrity_report.json
//! <root>/docs/{doc_name}/{version}/<url path>
//! <root>/crawl_history.db
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Default number of concurrent crawl workers.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Upper bound on concurrent crawl workers.
pub const MAX_WORKERS: usize = 64;

/// Default maximum number of fetch attempts per page.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default chunk size for chunked diffs (bytes).
pub const DEFAULT_DIFF_CHUNK_SIZE: usize = 1000;

/// Default bound on canonical-URL redirections followed per validation.
pub const DEFAULT_MAX_CANONICAL_HOPS: usize = 5;

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Worker count outside `1..=MAX_WORKERS`.
    #[error("invalid max_workers {0}: must be between 1 and {MAX_WORKERS}")]
    InvalidWorkers(usize),

    /// Rate limiter bounds are inconsistent.
    #[error("invalid rate limiter bounds: min {min:?}, initial {initial:?}, max {max:?}")]
    InvalidDelayBounds {
        /// Configured minimum delay.
        min: Duration,
        /// Configured initial delay.
        initial: Duration,
        /// Configured maximum delay.
        max: Duration,
    },

    /// Backoff factor must be greater than 1.
    #[error("invalid backoff factor {0}: must be greater than 1.0")]
    InvalidBackoffFactor(f64),

    /// Chunk size of zero would never terminate chunking.
    #[error("diff chunk size must be positive")]
    InvalidChunkSize,

    /// Retry count of zero would never attempt a fetch.
    #[error("max_retries must be at least 1")]
    InvalidRetries,
}

/// Tunables for a crawl run.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Root directory for every durable artifact.
    pub output_root: PathBuf,
    /// Size of the worker pool.
    pub max_workers: usize,
    /// Starting delay between fetches.
    pub initial_delay: Duration,
    /// Lower bound for the adaptive delay.
    pub min_delay: Duration,
    /// Upper bound for the adaptive delay.
    pub max_delay: Duration,
    /// Multiplicative factor for delay adjustments.
    pub backoff_factor: f64,
    /// Fetch attempts before giving up on a page.
    pub max_retries: u32,
    /// Base sleep between retry attempts.
    pub retry_initial_delay: Duration,
    /// Cap on a single retry sleep.
    pub retry_max_delay: Duration,
    /// Failures before the circuit breaker opens.
    pub breaker_max_failures: u32,
    /// Cooldown before an open breaker allows a trial call.
    pub breaker_reset_timeout: Duration,
    /// How long an idle worker waits on an empty frontier before exiting.
    pub dequeue_timeout: Duration,
    /// Wall-clock interval between crash-recovery snapshots.
    pub snapshot_interval: Duration,
    /// Timeout applied to every HTTP request.
    pub http_timeout: Duration,
    /// Chunk size for chunked diffs.
    pub diff_chunk_size: usize,
    /// Bound on canonical-URL redirections per validation.
    pub max_canonical_hops: usize,
    /// Concurrent HEAD requests during link integrity checks.
    pub integrity_concurrency: usize,
    /// Seed the frontier from `sitemap.xml`.
    pub use_sitemap: bool,
    /// Keep crawl history in memory instead of `crawl_history.db`.
    pub in_memory_history: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("mirror"),
            max_workers: DEFAULT_MAX_WORKERS,
            initial_delay: Duration::from_secs(1),
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_factor: 1.5,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            breaker_max_failures: 5,
            breaker_reset_timeout: Duration::from_secs(60),
            dequeue_timeout: Duration::from_secs(1),
            snapshot_interval: Duration::from_secs(300),
            http_timeout: Duration::from_secs(10),
            diff_chunk_size: DEFAULT_DIFF_CHUNK_SIZE,
            max_canonical_hops: DEFAULT_MAX_CANONICAL_HOPS,
            integrity_concurrency: 8,
            use_sitemap: true,
            in_memory_history: false,
        }
    }
}

impl CrawlConfig {
    /// Creates a configuration with defaults rooted at `output_root`.
    #[must_use]
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            ..Self::default()
        }
    }

    /// Checks value ranges and cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_WORKERS).contains(&self.max_workers) {
            return Err(ConfigError::InvalidWorkers(self.max_workers));
        }
        if self.min_delay > self.max_delay || self.initial_delay > self.max_delay {
            return Err(ConfigError::InvalidDelayBounds {
                min: self.min_delay,
                initial: self.initial_delay,
                max: self.max_delay,
            });
        }
        if self.backoff_factor.is_nan() || self.backoff_factor <= 1.0 {
            return Err(ConfigError::InvalidBackoffFactor(self.backoff_factor));
        }
        if self.diff_chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidRetries);
        }
        Ok(())
    }

    /// Output layout derived from `output_root`.
    #[must_use]
    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(&self.output_root)
    }
}

/// Paths of every durable artifact under an output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The output root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one `{doc_name}_hashes.json` per document.
    #[must_use]
    pub fn content_hash_dir(&self) -> PathBuf {
        self.root.join("metadata").join("content_hashes")
    }

    /// Hash file for a document.
    #[must_use]
    pub fn content_hash_file(&self, doc_name: &str) -> PathBuf {
        self.content_hash_dir()
            .join(format!("{doc_name}_hashes.json"))
    }

    /// Crash-recovery snapshot for a document version.
    #[must_use]
    pub fn scrape_state_file(&self, doc_name: &str, version: &str) -> PathBuf {
        self.root
            .join("scrape_states")
            .join(format!("{doc_name}_{version}_state.json"))
    }

    /// Aggregate link-integrity report for a document version.
    #[must_use]
    pub fn link_integrity_report(&self, doc_name: &str, version: &str) -> PathBuf {
        self.root
            .join("link_integrity")
            .join(doc_name)
            .join(version)
            .join("link_integrity_report.json")
    }

    /// Root directory for mirrored page bodies of a document version.
    #[must_use]
    pub fn version_dir(&self, doc_name: &str, version: &str) -> PathBuf {
        self.root.join("docs").join(doc_name).join(version)
    }

    /// Sqlite database holding crawl history.
    #[must_use]
    pub fn history_db(&self) -> PathBuf {
        self.root.join("crawl_history.db")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CrawlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.max_delay, Duration::from_secs(5));
        assert_eq!(config.retry_max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = CrawlConfig {
            max_workers: 0,
            ..CrawlConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidWorkers(0)));
    }

    #[test]
    fn test_validate_rejects_min_above_max() {
        let config = CrawlConfig {
            min_delay: Duration::from_secs(10),
            ..CrawlConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDelayBounds { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_non_growing_backoff() {
        let config = CrawlConfig {
            backoff_factor: 1.0,
            ..CrawlConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBackoffFactor(1.0))
        );
    }

    #[test]
    fn test_layout_matches_documented_paths() {
        let layout = OutputLayout::new("/data");
        assert_eq!(
            layout.content_hash_file("pandas"),
            PathBuf::from("/data/metadata/content_hashes/pandas_hashes.json")
        );
        assert_eq!(
            layout.scrape_state_file("pandas", "2.1"),
            PathBuf::from("/data/scrape_states/pandas_2.1_state.json")
        );
        assert_eq!(
            layout.link_integrity_report("pandas", "2.1"),
            PathBuf::from("/data/link_integrity/pandas/2.1/link_integrity_report.json")
        );
        assert_eq!(
            layout.version_dir("pandas", "2.1"),
            PathBuf::from("/data/docs/pandas/2.1")
        );
    }
}
