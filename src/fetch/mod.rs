//! Fetch control loop: HTTP client, rate limiting, circuit breaking, retries.
//!
//! Every page fetch of a crawl run goes through the same stack:
//!
//! ```text
//! AdaptiveRateLimiter::wait
//!   -> CircuitBreaker::call
//!        -> RetryController::run
//!             -> PageFetcher::fetch
//! ```
//!
//! Retries happen inside a single breaker-guarded call, so a page whose
//! retries are exhausted counts as one breaker failure.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use docmirror_core::fetch::{CircuitBreaker, HttpClient, PageFetcher, RetryController};
//!
//! # async fn example() -> Result<(), docmirror_core::CrawlError> {
//! let client = HttpClient::new(Duration::from_secs(10));
//! let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
//! let retry = RetryController::new(5, Duration::from_secs(1), Duration::from_secs(60));
//!
//! let url = "https://docs.example.com/";
//! let page = breaker
//!     .call(url, || retry.run("fetch_page", || client.fetch(url)))
//!     .await?;
//! println!("{} bytes", page.body.len());
//! # Ok(())
//! # }
//! ```

mod circuit_breaker;
mod client;
mod error;
pub mod headers;
mod page;
pub mod rate_limiter;
mod retry;
mod sitemap;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{FetchedPage, HeadOutcome, HttpClient, MAX_REDIRECTS};
pub use error::FetchError;
pub use page::PageFetcher;
pub use rate_limiter::{AdaptiveRateLimiter, parse_retry_after};
pub use retry::{FailureKind, RetryController, Retryable};
pub use sitemap::{MAX_SITEMAP_DEPTH, SitemapDocument, discover_sitemap_urls, parse_sitemap};
