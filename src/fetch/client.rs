//! HTTP client wrapper for crawl requests.
//!
//! This module provides the [`HttpClient`] struct used for page GETs,
//! sitemap downloads and HEAD probes. Every request carries browser-like
//! headers with a rotating User-Agent and a fixed timeout.

use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client, redirect};
use tracing::{debug, instrument};
use url::Url;

use super::error::FetchError;
use super::headers::crawl_headers;
use super::rate_limiter::parse_retry_after;

/// Redirect hops followed by [`HttpClient::head_follow`] before giving up.
pub const MAX_REDIRECTS: usize = 10;

/// A successfully fetched page body.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub url: String,
    /// HTTP status.
    pub status: u16,
    /// `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// Decoded body.
    pub body: String,
    /// Time from request start to full body.
    pub latency: Duration,
}

/// Result of a HEAD request with a recorded redirect chain.
#[derive(Debug, Clone)]
pub struct HeadOutcome {
    /// Status of the final response.
    pub status: u16,
    /// URL of the final response.
    pub final_url: String,
    /// URLs that answered with a redirect, in order.
    pub redirect_chain: Vec<String>,
    /// Headers of the final response.
    pub headers: HeaderMap,
}

impl HeadOutcome {
    /// Whether at least one redirect was followed.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        !self.redirect_chain.is_empty()
    }

    /// A header of the final response as a string.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `Content-Type` of the final response.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

/// HTTP client for crawl traffic.
///
/// Create once per run and share; connections are pooled.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    no_redirect: Client,
}

impl HttpClient {
    /// Creates a client whose requests time out after `timeout`.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        let no_redirect = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self {
            client,
            no_redirect,
        }
    }

    /// GETs `url`, following redirects, and returns the decoded body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Status`] for non-success statuses (with any
    /// `Retry-After` parsed), or a network / timeout / transport error.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .headers(crawl_headers())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                retry_after,
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        debug!(status = status.as_u16(), bytes = body.len(), "fetched page");
        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
            latency: started.elapsed(),
        })
    }

    /// Issues HEAD requests, following up to [`MAX_REDIRECTS`] redirects by
    /// hand so the chain can be reported.
    ///
    /// Any final status is returned as `Ok`; only transport failures and
    /// redirect loops are errors.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] if a request fails or the chain is too long.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn head_follow(&self, url: &str) -> Result<HeadOutcome, FetchError> {
        let mut current = Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        let mut chain = Vec::new();

        loop {
            let response = self
                .no_redirect
                .head(current.as_str())
                .headers(crawl_headers())
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(url, &e))?;

            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| current.join(loc).ok());

            match location {
                Some(next) if status.is_redirection() => {
                    chain.push(current.to_string());
                    if chain.len() > MAX_REDIRECTS {
                        return Err(FetchError::Driver {
                            url: url.to_string(),
                            message: format!("more than {MAX_REDIRECTS} redirects"),
                        });
                    }
                    current = next;
                }
                _ => {
                    return Ok(HeadOutcome {
                        status: status.as_u16(),
                        final_url: current.to_string(),
                        redirect_chain: chain,
                        headers: response.headers().clone(),
                    });
                }
            }
        }
    }
}
