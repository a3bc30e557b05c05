//! Error types for the fetch layer.

use std::time::Duration;

use thiserror::Error;

use super::retry::{FailureKind, Retryable};
use crate::error::CrawlError;

/// Errors raised by page fetches and HEAD probes.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection refused, DNS failure, TLS failure and similar.
    #[error("network error fetching {url}: {message}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// Underlying error detail.
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    Status {
        /// The URL being fetched.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Parsed `Retry-After`, when the server sent one.
        retry_after: Option<Duration>,
    },

    /// The request timed out.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The transport broke mid-response (body read, decoding, redirect loop).
    #[error("transport error fetching {url}: {message}")]
    Driver {
        /// The URL being fetched.
        url: String,
        /// Underlying error detail.
        message: String,
    },

    /// The URL cannot be requested at all.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
    },
}

impl FetchError {
    /// Classifies a reqwest error for `url`.
    #[must_use]
    pub fn from_reqwest(url: &str, error: &reqwest::Error) -> Self {
        let url = url.to_string();
        if error.is_timeout() {
            Self::Timeout { url }
        } else if error.is_body() || error.is_decode() || error.is_redirect() {
            Self::Driver {
                url,
                message: error.to_string(),
            }
        } else if error.is_builder() {
            Self::InvalidUrl { url }
        } else {
            Self::Network {
                url,
                message: error.to_string(),
            }
        }
    }

    /// The URL this error concerns.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Network { url, .. }
            | Self::Status { url, .. }
            | Self::Timeout { url }
            | Self::Driver { url, .. }
            | Self::InvalidUrl { url } => url,
        }
    }
}

impl Retryable for FetchError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } => FailureKind::Network,
            Self::Status { status, .. } => {
                if *status >= 500 || *status == 408 || *status == 429 {
                    FailureKind::Network
                } else {
                    FailureKind::Fatal
                }
            }
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Driver { .. } => FailureKind::Driver,
            Self::InvalidUrl { .. } => FailureKind::Fatal,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<FetchError> for CrawlError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network { url, message } | FetchError::Driver { url, message } => {
                CrawlError::network(url, message)
            }
            FetchError::Status { url, status, .. } => CrawlError::http_status(url, status),
            FetchError::Timeout { url } => CrawlError::timeout(url),
            FetchError::InvalidUrl { url } => CrawlError::parsing(url, "invalid URL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let status = |status| FetchError::Status {
            url: "u".into(),
            status,
            retry_after: None,
        };
        assert_eq!(status(503).failure_kind(), FailureKind::Network);
        assert_eq!(status(429).failure_kind(), FailureKind::Network);
        assert_eq!(status(404).failure_kind(), FailureKind::Fatal);
        assert_eq!(status(403).failure_kind(), FailureKind::Fatal);
    }

    #[test]
    fn test_timeout_and_driver_classification() {
        let timeout = FetchError::Timeout { url: "u".into() };
        let driver = FetchError::Driver {
            url: "u".into(),
            message: "body".into(),
        };
        assert_eq!(timeout.failure_kind(), FailureKind::Timeout);
        assert_eq!(driver.failure_kind(), FailureKind::Driver);
    }

    #[test]
    fn test_into_crawl_error_keeps_status() {
        let err: CrawlError = FetchError::Status {
            url: "https://x.com/a/".into(),
            status: 404,
            retry_after: None,
        }
        .into();
        assert!(matches!(
            err,
            CrawlError::Network {
                status: Some(404),
                ..
            }
        ));
        assert!(!err.indicates_unhealthy_target());
    }
}
