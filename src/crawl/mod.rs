//! Priority frontier, worker pool and the single-page routine.
//!
//! # Overview
//!
//! A crawl run shares one [`Frontier`], one [`VisitedSet`], one rate
//! limiter, one circuit breaker and one hash store between a fixed-size pool
//! of workers. Each worker loop:
//!
//! 1. pops the highest-priority URL, exiting after `dequeue_timeout` of
//!    empty frontier
//! 2. normalizes it and atomically marks it visited, dropping duplicates
//! 3. runs the single-page routine: scope check, rate-limiter wait, HEAD
//!    validator short-circuit, breaker + retry guarded fetch, in-page
//!    canonical, hash comparison, diff-or-full save, link extraction and
//!    prioritization, link integrity checks
//!
//! Per-page failures are logged with their category and back the rate
//! limiter off; they never end the run. The supervisor replaces finished
//! workers while the frontier has work, writes a crash-recovery snapshot
//! every `snapshot_interval`, and finishes once the frontier is empty with
//! no worker in flight.
//!
//! # Example
//!
//! ```no_run
//! use docmirror_core::CrawlConfig;
//! use docmirror_core::crawl::start_scraping_from;
//!
//! # async fn example() -> Result<(), docmirror_core::CrawlError> {
//! let config = CrawlConfig::new("mirror");
//! let summary = start_scraping_from("https://docs.example.com/2.1/", "example", "2.1", config).await?;
//! println!("{} pages changed", summary.pages_changed);
//! # Ok(())
//! # }
//! ```

mod frontier;
mod links;
mod page;
mod priority;
mod scheduler;

pub use frontier::{Frontier, FrontierItem, VisitedSet};
pub use links::{PageLinks, canonical_link, extract_links, is_pagination_text};
pub use page::{PageOutcome, SkipReason};
pub use priority::{
    BASE_PRIORITY, PAGINATION_BOOST, PriorityFactors, RELEVANCE_KEYWORDS, calculate_priority,
    depth_score, freshness_score, frequency_score, keyword_relevance,
};
pub use scheduler::{CrawlSummary, Crawler, scope_path, start_scraping_from};
