//! Adaptive rate limiting for crawl fetches.
//!
//! This module provides the [`AdaptiveRateLimiter`], a single delay shared by
//! every worker of a crawl run, plus [`parse_retry_after`] for servers that
//! ask for an explicit pause.
//!
//! # Overview
//!
//! One crawl run targets one base domain, so a single scalar delay governs
//! all fetches:
//! - [`AdaptiveRateLimiter::wait`] suspends the caller for the current delay
//! - [`AdaptiveRateLimiter::update`] feeds a response latency into a sliding
//!   window of the last 10 observations; a mean above 1s multiplies the delay
//!   by the backoff factor, a mean below 0.5s divides it
//! - [`AdaptiveRateLimiter::backoff`] multiplies the delay by twice the
//!   backoff factor after a failure
//!
//! The delay always stays within `[min_delay, max_delay]`.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use docmirror_core::fetch::AdaptiveRateLimiter;
//!
//! # async fn example() {
//! let limiter = AdaptiveRateLimiter::new(
//!     Duration::from_secs(1),
//!     Duration::from_millis(500),
//!     Duration::from_secs(5),
//!     1.5,
//! );
//! limiter.wait().await;
//! limiter.update(Duration::from_millis(200)).await;
//! limiter.backoff().await;
//! assert!(limiter.current_delay().await >= Duration::from_secs(1));
//! # }
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::CrawlConfig;

/// Number of latency samples kept in the sliding window.
const LATENCY_WINDOW: usize = 10;

/// Mean latency above which the delay grows.
const SLOW_RESPONSE: Duration = Duration::from_secs(1);

/// Mean latency below which the delay shrinks.
const FAST_RESPONSE: Duration = Duration::from_millis(500);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct LimiterState {
    current_delay: Duration,
    recent: VecDeque<Duration>,
    /// When the most recently booked wait ends.
    next_release: Option<Instant>,
}

/// Shared adaptive delay controller.
///
/// A single mutex guards the delay and the latency window. `wait` books its
/// release time under the lock and sleeps after releasing it, so concurrent
/// workers are still released one delay apart while `update` and `backoff`
/// never queue behind a sleeper.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    state: Mutex<LimiterState>,
    min_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
}

impl AdaptiveRateLimiter {
    /// Creates a limiter starting at `initial_delay`, clamped into
    /// `[min_delay, max_delay]`.
    #[must_use]
    pub fn new(
        initial_delay: Duration,
        min_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                current_delay: initial_delay.clamp(min_delay, max_delay.max(min_delay)),
                recent: VecDeque::with_capacity(LATENCY_WINDOW),
                next_release: None,
            }),
            min_delay,
            max_delay,
            backoff_factor,
        }
    }

    /// Creates a limiter from the crawl configuration.
    #[must_use]
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self::new(
            config.initial_delay,
            config.min_delay,
            config.max_delay,
            config.backoff_factor,
        )
    }

    /// Sleeps for the current delay before permitting a fetch.
    #[instrument(level = "debug", skip(self))]
    pub async fn wait(&self) {
        let release = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let start = state.next_release.map_or(now, |at| at.max(now));
            let release = start + state.current_delay;
            state.next_release = Some(release);
            debug!(
                delay_ms = millis(state.current_delay),
                queued_ms = millis(start - now),
                "rate limiter wait"
            );
            release
        };
        tokio::time::sleep_until(release).await;
    }

    /// Records a response latency and adapts the delay.
    pub async fn update(&self, latency: Duration) {
        let mut state = self.state.lock().await;
        if state.recent.len() == LATENCY_WINDOW {
            state.recent.pop_front();
        }
        state.recent.push_back(latency);

        let total: Duration = state.recent.iter().sum();
        let samples = u32::try_from(state.recent.len()).unwrap_or(u32::MAX);
        let mean = total / samples.max(1);

        let old = state.current_delay;
        if mean > SLOW_RESPONSE {
            state.current_delay = old.mul_f64(self.backoff_factor).min(self.max_delay);
        } else if mean < FAST_RESPONSE && old > self.min_delay {
            state.current_delay = old.div_f64(self.backoff_factor).max(self.min_delay);
        }

        if state.current_delay != old {
            info!(
                mean_ms = millis(mean),
                from_ms = millis(old),
                to_ms = millis(state.current_delay),
                "adjusted crawl delay"
            );
        }
    }

    /// Grows the delay after a failure, independent of the latency window.
    pub async fn backoff(&self) {
        let mut state = self.state.lock().await;
        let old = state.current_delay;
        state.current_delay = old
            .mul_f64(self.backoff_factor * 2.0)
            .min(self.max_delay);
        warn!(
            from_ms = millis(old),
            to_ms = millis(state.current_delay),
            "backing off crawl delay"
        );
    }

    /// The delay the next `wait` will sleep for.
    pub async fn current_delay(&self) -> Duration {
        self.state.lock().await.current_delay
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Parses a Retry-After header value.
///
/// Accepts both delta-seconds (`"120"`) and HTTP-date forms. Values above one
/// hour are capped; dates in the past yield zero.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        if let Ok(duration) = datetime.duration_since(now) {
            Some(duration.min(MAX_RETRY_AFTER))
        } else {
            debug!(header_value, "Retry-After date is in the past, returning zero");
            Some(Duration::ZERO)
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    fn limiter() -> AdaptiveRateLimiter {
        AdaptiveRateLimiter::new(
            Duration::from_secs(1),
            Duration::from_millis(500),
            Duration::from_secs(5),
            1.5,
        )
    }

    // ==================== Wait Tests ====================

    #[tokio::test]
    async fn test_wait_sleeps_current_delay() {
        tokio::time::pause();
        let limiter = limiter();
        let start = Instant::now();

        limiter.wait().await;

        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test]
    async fn test_concurrent_waits_are_serialized() {
        tokio::time::pause();
        let limiter = std::sync::Arc::new(limiter());
        let start = Instant::now();

        let a = tokio::spawn({
            let limiter = std::sync::Arc::clone(&limiter);
            async move { limiter.wait().await }
        });
        let b = tokio::spawn({
            let limiter = std::sync::Arc::clone(&limiter);
            async move { limiter.wait().await }
        });
        a.await.unwrap();
        b.await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_update_not_blocked_by_sleeping_waiter() {
        tokio::time::pause();
        let limiter = std::sync::Arc::new(limiter());

        let sleeper = tokio::spawn({
            let limiter = std::sync::Arc::clone(&limiter);
            async move { limiter.wait().await }
        });
        tokio::task::yield_now().await;

        let start = Instant::now();
        limiter.backoff().await;
        limiter.update(Duration::from_millis(700)).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.current_delay().await, Duration::from_secs(3));

        sleeper.await.unwrap();
    }

    // ==================== Update Tests ====================

    #[tokio::test]
    async fn test_slow_responses_increase_delay_up_to_max() {
        let limiter = limiter();
        let mut previous = limiter.current_delay().await;
        for _ in 0..10 {
            limiter.update(Duration::from_millis(1500)).await;
            let current = limiter.current_delay().await;
            assert!(current >= previous);
            previous = current;
        }
        assert!(previous > Duration::from_secs(1));
        assert_eq!(previous, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_fast_responses_decrease_delay_to_min() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.update(Duration::from_millis(100)).await;
        }
        assert_eq!(limiter.current_delay().await, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_moderate_responses_leave_delay_unchanged() {
        let limiter = limiter();
        limiter.update(Duration::from_millis(700)).await;
        assert_eq!(limiter.current_delay().await, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_window_forgets_old_samples() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.update(Duration::from_millis(100)).await;
        }
        // Ten slow samples fully replace the fast ones.
        for _ in 0..10 {
            limiter.update(Duration::from_secs(3)).await;
        }
        assert_eq!(limiter.current_delay().await, Duration::from_secs(5));
    }

    // ==================== Backoff Tests ====================

    #[tokio::test]
    async fn test_backoff_at_least_doubles() {
        let limiter = limiter();
        let before = limiter.current_delay().await;
        limiter.backoff().await;
        let after = limiter.current_delay().await;
        assert!(after >= before * 2);
        assert_eq!(after, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_backoff_capped_at_max() {
        let limiter = limiter();
        for _ in 0..5 {
            limiter.backoff().await;
        }
        assert_eq!(limiter.current_delay().await, Duration::from_secs(5));
    }

    // ==================== parse_retry_after Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_caps_and_rejects() {
        assert_eq!(parse_retry_after("999999"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_parse_retry_after_past_date_is_zero() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }
}
