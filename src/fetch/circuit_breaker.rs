//! Circuit breaker guarding the page-fetch path.
//!
//! # States
//!
//! - `Closed`: calls pass through; failures that indicate an unhealthy target
//!   increment a counter, and reaching `max_failures` opens the circuit
//! - `Open`: calls fail fast with [`CrawlError::CircuitOpen`] until
//!   `reset_timeout` has elapsed since the last failure
//! - `HalfOpen`: exactly one trial call is let through; success closes the
//!   circuit and resets the counter, failure reopens it
//!
//! A trial call that is cancelled before finishing releases its slot, so the
//! next caller gets to run the trial instead.
//!
//! Client errors (404 and friends) are returned to the caller without being
//! counted, see [`CrawlError::indicates_unhealthy_target`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CrawlConfig;
use crate::error::CrawlError;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are refused.
    Open,
    /// A single trial call is allowed.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

/// Holds the half-open trial slot; dropping it frees the slot even when the
/// trial future is cancelled mid-flight.
struct TrialSlot<'a>(&'a AtomicBool);

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Trip / half-open / reset state machine shared by all workers.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    trial_in_flight: AtomicBool,
    max_failures: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    /// Creates a closed breaker with zero failures.
    #[must_use]
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
            trial_in_flight: AtomicBool::new(false),
            max_failures: max_failures.max(1),
            reset_timeout,
        }
    }

    /// Creates a breaker from the crawl configuration.
    #[must_use]
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self::new(config.breaker_max_failures, config.breaker_reset_timeout)
    }

    /// Current state, promoting `Open` to `HalfOpen` once the cooldown has
    /// elapsed.
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        self.promote_if_cooled(&mut inner);
        inner.state
    }

    /// Recorded failure count.
    pub async fn failures(&self) -> u32 {
        self.inner.lock().await.failures
    }

    /// Runs `op` under the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::CircuitOpen`] without invoking `op` while the
    /// circuit is open (or a half-open trial is already running); otherwise
    /// returns whatever `op` returns.
    pub async fn call<T, F, Fut>(&self, url: &str, op: F) -> Result<T, CrawlError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CrawlError>>,
    {
        let trial = {
            let mut inner = self.inner.lock().await;
            self.promote_if_cooled(&mut inner);
            match inner.state {
                CircuitState::Closed => None,
                CircuitState::HalfOpen
                    if self
                        .trial_in_flight
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok() =>
                {
                    Some(TrialSlot(&self.trial_in_flight))
                }
                CircuitState::Open | CircuitState::HalfOpen => {
                    return Err(CrawlError::CircuitOpen {
                        url: url.to_string(),
                        failures: inner.failures,
                    });
                }
            }
        };

        let result = op().await;
        let is_trial = trial.is_some();

        let mut inner = self.inner.lock().await;
        match &result {
            Ok(_) if is_trial => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                info!(url, "circuit closed after successful trial");
            }
            Ok(_) => {}
            Err(err) if err.indicates_unhealthy_target() => {
                inner.failures += 1;
                inner.last_failure = Some(Instant::now());
                if is_trial || inner.failures >= self.max_failures {
                    if inner.state != CircuitState::Open {
                        warn!(url, failures = inner.failures, "circuit opened");
                    }
                    inner.state = CircuitState::Open;
                }
            }
            Err(_) if is_trial => {
                // The trial reached the target; treat it as healthy.
                inner.state = CircuitState::Closed;
                inner.failures = 0;
            }
            Err(_) => {}
        }
        drop(inner);
        drop(trial);
        result
    }

    fn promote_if_cooled(&self, inner: &mut BreakerState) {
        if inner.state == CircuitState::Open
            && inner
                .last_failure
                .is_none_or(|at| at.elapsed() >= self.reset_timeout)
        {
            inner.state = CircuitState::HalfOpen;
            info!("circuit half-open, allowing a trial call");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn failing() -> Result<(), CrawlError> {
        Err(CrawlError::http_status("https://x.com/", 503))
    }

    async fn trip(breaker: &CircuitBreaker, times: u32) {
        for _ in 0..times {
            let _ = breaker.call("https://x.com/", || async { failing() }).await;
        }
    }

    #[tokio::test]
    async fn test_starts_closed_with_zero_failures() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.failures().await, 0);
    }

    #[tokio::test]
    async fn test_opens_after_max_failures_and_fails_fast() {
        tokio::time::pause();
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        trip(&breaker, 3).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = breaker
            .call("https://x.com/a/", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CrawlError::CircuitOpen { failures: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_success_closes_and_resets() {
        tokio::time::pause();
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        trip(&breaker, 2).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        let result = breaker.call("https://x.com/", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.failures().await, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        tokio::time::pause();
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        trip(&breaker, 2).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        trip(&breaker, 1).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_cancelled_trial_frees_the_slot() {
        tokio::time::pause();
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        trip(&breaker, 2).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let stalled = tokio::time::timeout(
            Duration::from_secs(5),
            breaker.call("https://x.com/", || std::future::pending::<Result<(), CrawlError>>()),
        )
        .await;
        assert!(stalled.is_err());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        let result = breaker.call("https://x.com/", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_second_caller_refused_while_trial_runs() {
        tokio::time::pause();
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));
        trip(&breaker, 1).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let trial = tokio::spawn({
            let breaker = Arc::clone(&breaker);
            async move {
                breaker
                    .call("https://x.com/", || async move {
                        let _ = released.await;
                        Ok(())
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;

        let refused = breaker.call("https://x.com/b/", || async { Ok(()) }).await;
        assert!(matches!(refused, Err(CrawlError::CircuitOpen { .. })));

        release.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_client_errors_do_not_trip() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        for _ in 0..5 {
            let _ = breaker
                .call("https://x.com/missing/", || async {
                    Err::<(), _>(CrawlError::http_status("https://x.com/missing/", 404))
                })
                .await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.failures().await, 0);
    }

    #[tokio::test]
    async fn test_success_while_closed_keeps_failure_count() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        trip(&breaker, 2).await;
        let _ = breaker.call("https://x.com/", || async { Ok(()) }).await;
        assert_eq!(breaker.failures().await, 2);
    }
}
