//! Bounded retry with per-failure-kind exponential backoff.
//!
//! # Overview
//!
//! Every failure of the wrapped operation is classified into a
//! [`FailureKind`]:
//! - [`FailureKind::Network`] - connection / 5xx / 429 failures, multiplier 2
//! - [`FailureKind::Timeout`] - request timeouts, multiplier 1.5
//! - [`FailureKind::Driver`] - transport breakage mid-response, multiplier 3
//! - [`FailureKind::Fatal`] - anything else; returned immediately
//!
//! After the `n`-th failure (1-indexed) the controller sleeps
//!
//! ```text
//! delay = max(min(initial_delay * multiplier^n, max_delay), retry_after)
//! ```
//!
//! with `retry_after` itself capped at `max_delay`. Once `max_retries`
//! attempts have failed the controller gives up with
//! [`CrawlError::RetryExhausted`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use docmirror_core::fetch::{FailureKind, RetryController};
//!
//! let retry = RetryController::new(5, Duration::from_secs(1), Duration::from_secs(60));
//! assert_eq!(
//!     retry.delay_for(FailureKind::Network, 1, None),
//!     Some(Duration::from_secs(2))
//! );
//! assert_eq!(retry.delay_for(FailureKind::Fatal, 1, None), None);
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::CrawlConfig;
use crate::error::CrawlError;

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network-level failure.
    Network,
    /// Timeout.
    Timeout,
    /// Transport / driver failure.
    Driver,
    /// Not retryable.
    Fatal,
}

impl FailureKind {
    /// Backoff multiplier, or `None` for fatal failures.
    #[must_use]
    pub fn multiplier(self) -> Option<f64> {
        match self {
            Self::Network => Some(2.0),
            Self::Timeout => Some(1.5),
            Self::Driver => Some(3.0),
            Self::Fatal => None,
        }
    }
}

/// Errors the retry controller can classify.
pub trait Retryable {
    /// How this failure should be retried.
    fn failure_kind(&self) -> FailureKind;

    /// Minimum wait requested by the server, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Bounded exponential-backoff retry wrapper.
#[derive(Debug, Clone)]
pub struct RetryController {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryController {
    /// Creates a controller allowing `max_retries` attempts in total.
    #[must_use]
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            initial_delay,
            max_delay,
        }
    }

    /// Creates a controller from the crawl configuration.
    #[must_use]
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self::new(
            config.max_retries,
            config.retry_initial_delay,
            config.retry_max_delay,
        )
    }

    /// Maximum number of attempts.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Sleep before the next attempt after `failures` failures, or `None` if
    /// the failure is fatal or the budget is spent.
    #[must_use]
    pub fn delay_for(
        &self,
        kind: FailureKind,
        failures: u32,
        retry_after: Option<Duration>,
    ) -> Option<Duration> {
        let multiplier = kind.multiplier()?;
        if failures >= self.max_retries {
            return None;
        }
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * multiplier.powi(exponent);
        let backoff = if scaled.is_finite() {
            Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
        } else {
            self.max_delay
        };
        let floor = retry_after.map_or(Duration::ZERO, |d| d.min(self.max_delay));
        Some(backoff.max(floor))
    }

    /// Runs `op` until it succeeds, fails fatally, or exhausts the budget.
    ///
    /// # Errors
    ///
    /// Fatal failures are returned converted into [`CrawlError`]; exhausting
    /// the budget returns [`CrawlError::RetryExhausted`] naming `operation`.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, CrawlError>
    where
        E: Retryable + Display + Into<CrawlError>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut failures = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let kind = err.failure_kind();
                    if kind == FailureKind::Fatal {
                        debug!(operation, error = %err, "non-retryable failure");
                        return Err(err.into());
                    }
                    failures += 1;
                    let Some(delay) = self.delay_for(kind, failures, err.retry_after()) else {
                        warn!(operation, attempts = failures, error = %err, "retries exhausted");
                        return Err(CrawlError::RetryExhausted {
                            operation: operation.to_string(),
                            attempts: failures,
                            last_error: err.to_string(),
                        });
                    };
                    warn!(
                        operation,
                        attempt = failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
