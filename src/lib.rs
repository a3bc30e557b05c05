//! Docmirror Core Library
//!
//! This library provides the core functionality for the docmirror tool,
//! which keeps a local, versioned mirror of a documentation site up to date
//! while staying polite to the server it crawls.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`canonical`] - URL normalization and canonical-URL resolution
//! - [`config`] - Crawl tunables and the durable output layout
//! - [`crawl`] - Priority frontier, worker pool and single-page routine
//! - [`db`] - Database connection and schema management
//! - [`diff`] - Line-level Myers diff and chunked diff documents
//! - [`error`] - Categorized crawl errors and the logging sink
//! - [`fetch`] - HTTP client, rate limiter, circuit breaker, retries, sitemaps
//! - [`integrity`] - Link integrity checks and reports
//! - [`store`] - Content hash store, content files, crawl history, snapshots

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod canonical;
pub mod config;
pub mod crawl;
pub mod db;
pub mod diff;
pub mod error;
pub mod fetch;
pub mod integrity;
pub mod store;

// Re-export commonly used types
pub use canonical::{NormalizedUrl, UrlCanonicalizer, normalize};
pub use config::{
    ConfigError, CrawlConfig, DEFAULT_MAX_RETRIES, DEFAULT_MAX_WORKERS, MAX_WORKERS, OutputLayout,
};
pub use crawl::{CrawlSummary, Crawler, start_scraping_from};
pub use db::{Database, DbError};
pub use error::{CrawlError, ErrorCategory, log_crawl_error};
pub use fetch::{AdaptiveRateLimiter, CircuitBreaker, HttpClient, RetryController};
pub use store::{CrawlHistory, VersionedContentHashStore};
