//! Page fetcher seam.
//!
//! The crawl core only needs "give me the rendered HTML for this URL".
//! [`PageFetcher`] is that contract; [`HttpClient`] satisfies it with a plain
//! GET, and a browser-rendering fetcher can be plugged in instead.

use async_trait::async_trait;

use super::client::{FetchedPage, HttpClient};
use super::error::FetchError;

/// Fetches the full content of a page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches `url`.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] classified for the retry controller.
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.get_page(url).await
    }
}
