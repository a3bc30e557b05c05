//! Crawl-level error taxonomy.
//!
//! Every failure that can surface from processing a single URL is folded into
//! [`CrawlError`]. The enum is closed: callers decide logging level and
//! recovery by matching on [`CrawlError::category`] instead of inspecting
//! concrete source types.
//!
//! # Propagation
//!
//! Per-URL failures are caught at the single-page boundary in
//! [`crate::crawl`], logged through [`log_crawl_error`], and trigger a
//! rate-limiter backoff. Only failures escaping
//! [`crate::crawl::start_scraping_from`] itself (an unreachable seed, an
//! unreadable output root) end a run.

use std::fmt;

use thiserror::Error;
use tracing::{error, warn};

/// Errors produced while crawling, fetching and persisting pages.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Fetch / HEAD failure: connection refused, DNS, non-success status.
    #[error("network error for {url}: {message}")]
    Network {
        /// The URL being requested.
        url: String,
        /// Human-readable failure detail.
        message: String,
        /// HTTP status when the server answered.
        status: Option<u16>,
    },

    /// The request or page readiness wait exceeded its timeout.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Malformed URL or unparsable content.
    #[error("failed to parse {input}: {reason}")]
    Parsing {
        /// The offending input (URL string, file name, ...).
        input: String,
        /// Why parsing failed.
        reason: String,
    },

    /// Durable storage failed (hash files, snapshots, page files, sqlite).
    #[error("persistence error during {operation}: {message}")]
    Database {
        /// The storage operation that failed.
        operation: String,
        /// Underlying failure detail.
        message: String,
    },

    /// The circuit breaker is open; the wrapped fetch was not invoked.
    #[error("circuit open after {failures} failures; refusing to fetch {url}")]
    CircuitOpen {
        /// The URL that was refused.
        url: String,
        /// Failure count recorded by the breaker.
        failures: u32,
    },

    /// Every retry attempt failed with a retryable error.
    #[error("retries exhausted for {operation} after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Name of the wrapped operation.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Display form of the final failure.
        last_error: String,
    },

    /// Stored content changed underneath the crawl (advisory).
    #[error("content for {url} changed unexpectedly (stored {old_hash}, found {new_hash})")]
    ContentChanged {
        /// The affected URL.
        url: String,
        /// Hash the store expected.
        old_hash: String,
        /// Hash actually observed.
        new_hash: String,
    },
}

/// Coarse classification of [`CrawlError`] used by the logging sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-level failure.
    Network,
    /// Timeout.
    Timeout,
    /// URL or content parsing failure.
    Parsing,
    /// Persistence failure.
    Database,
    /// Circuit breaker refused the call.
    CircuitOpen,
    /// Retry budget spent.
    RetryExhausted,
    /// Advisory concurrent mutation.
    ContentChanged,
}

impl ErrorCategory {
    /// Stable label used as a structured log field.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Parsing => "parsing",
            Self::Database => "database",
            Self::CircuitOpen => "circuit_open",
            Self::RetryExhausted => "retry_exhausted",
            Self::ContentChanged => "content_changed",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CrawlError {
    /// Creates a network error without an HTTP status.
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Creates a network error for a non-success HTTP status.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::Network {
            url: url.into(),
            message: format!("HTTP {status}"),
            status: Some(status),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a parsing error.
    pub fn parsing(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parsing {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Creates a persistence error.
    pub fn database(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Creates an advisory content-changed error.
    pub fn content_changed(
        url: impl Into<String>,
        old_hash: impl Into<String>,
        new_hash: impl Into<String>,
    ) -> Self {
        Self::ContentChanged {
            url: url.into(),
            old_hash: old_hash.into(),
            new_hash: new_hash.into(),
        }
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } => ErrorCategory::Network,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Parsing { .. } => ErrorCategory::Parsing,
            Self::Database { .. } => ErrorCategory::Database,
            Self::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            Self::RetryExhausted { .. } => ErrorCategory::RetryExhausted,
            Self::ContentChanged { .. } => ErrorCategory::ContentChanged,
        }
    }

    /// Whether this failure says something about the health of the target
    /// host, and should therefore count toward tripping the circuit breaker.
    ///
    /// Client errors (4xx other than 408/429) describe the requested page,
    /// not the server, and are excluded.
    #[must_use]
    pub fn indicates_unhealthy_target(&self) -> bool {
        match self {
            Self::Network {
                status: Some(status),
                ..
            } => !(400..500).contains(status) || *status == 408 || *status == 429,
            Self::Network { status: None, .. }
            | Self::Timeout { .. }
            | Self::RetryExhausted { .. } => true,
            Self::Parsing { .. }
            | Self::Database { .. }
            | Self::CircuitOpen { .. }
            | Self::ContentChanged { .. } => false,
        }
    }
}

/// Logging sink for per-URL failures.
///
/// Advisory content changes and circuit-open skips are logged at `warn`;
/// everything else is an `error`. The category is always attached as a
/// structured field.
pub fn log_crawl_error(url: &str, err: &CrawlError) {
    let category = err.category();
    match category {
        ErrorCategory::ContentChanged => {
            warn!(url = %url, category = %category, error = %err, "advisory content change");
        }
        ErrorCategory::CircuitOpen => {
            warn!(url = %url, category = %category, error = %err, "circuit open, skipping page");
        }
        _ => {
            error!(url = %url, category = %category, error = %err, "failed to process page");
        }
    }
}
