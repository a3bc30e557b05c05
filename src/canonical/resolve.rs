//! Network-aware canonicalization: shortener expansion and link validation.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};
use url::Url;

use super::normalize::{NormalizedUrl, authority, normalize};
use crate::config::DEFAULT_MAX_CANONICAL_HOPS;
use crate::error::CrawlError;
use crate::fetch::HttpClient;

/// Hosts whose links are expanded through a HEAD request before
/// normalization.
pub const SHORTENER_DOMAINS: &[&str] = &["bit.ly", "tinyurl.com", "t.co", "goo.gl"];

/// One `<target>; params` entry of an HTTP `Link` header.
#[allow(clippy::expect_used)]
static LINK_HEADER_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^>]*)>\s*;([^,]*)").expect("link header regex is valid"));

#[allow(clippy::expect_used)]
static REL_CANONICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\brel\s*=\s*"?canonical"?"#).expect("rel regex is valid")
});

/// Extracts the `rel=canonical` target from a `Link` header value.
#[must_use]
pub fn canonical_from_link_header(value: &str) -> Option<String> {
    LINK_HEADER_ENTRY
        .captures_iter(value)
        .find(|caps| REL_CANONICAL.is_match(&caps[2]))
        .map(|caps| caps[1].trim().to_string())
}

/// Canonicalizes URLs, resolving shorteners and declared canonical URLs over
/// the network.
#[derive(Debug, Clone)]
pub struct UrlCanonicalizer {
    client: HttpClient,
    max_canonical_hops: usize,
}

impl UrlCanonicalizer {
    /// Creates a canonicalizer using `client` for HEAD requests.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            max_canonical_hops: DEFAULT_MAX_CANONICAL_HOPS,
        }
    }

    /// Overrides the bound on canonical-URL redirections per validation.
    #[must_use]
    pub fn with_max_canonical_hops(mut self, hops: usize) -> Self {
        self.max_canonical_hops = hops;
        self
    }

    /// Normalizes `raw`, first expanding it if it points at a URL shortener.
    ///
    /// Shortener expansion failures fall back to the unexpanded URL.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Parsing`] if the URL cannot be normalized.
    #[instrument(level = "debug", skip(self), fields(url = %raw))]
    pub async fn canonicalize(&self, raw: &str) -> Result<NormalizedUrl, CrawlError> {
        let absolute = if raw.trim_start().starts_with("//") {
            format!("http:{}", raw.trim_start())
        } else {
            raw.to_string()
        };
        let expanded = self.expand_shortened(&absolute).await;
        normalize(&expanded)
    }

    async fn expand_shortened(&self, url: &str) -> String {
        let is_shortener = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .is_some_and(|host| SHORTENER_DOMAINS.contains(&host.as_str()));
        if !is_shortener {
            return url.to_string();
        }
        match self.client.head_follow(url).await {
            Ok(outcome) => {
                debug!(from = %url, to = %outcome.final_url, "expanded shortened URL");
                outcome.final_url
            }
            Err(e) => {
                let err: CrawlError = e.into();
                warn!(url = %url, error = %err, "failed to expand shortened URL, keeping original");
                url.to_string()
            }
        }
    }

    /// Whether `url` belongs to the crawl: http(s), on `base_domain`
    /// (`host[:port]`), and under `start_path`.
    ///
    /// When the URL answers a HEAD request with a `Link: <...>; rel=canonical`
    /// header pointing elsewhere, the canonical target is validated instead.
    /// At most `max_canonical_hops` such redirections are followed; hitting
    /// the bound is logged and the last URL's own checks decide. A failed
    /// canonical lookup keeps the original URL.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn is_valid_link(&self, url: &str, base_domain: &str, start_path: &str) -> bool {
        let mut current = url.to_string();
        for hop in 0..=self.max_canonical_hops {
            if !passes_scope(&current, base_domain, start_path) {
                return false;
            }
            if hop == self.max_canonical_hops {
                warn!(
                    url = %url,
                    hops = hop,
                    "canonical chain too long, accepting last URL"
                );
                return true;
            }
            match self.declared_canonical(&current).await {
                Some(canonical) if canonical != current => {
                    debug!(from = %current, to = %canonical, "following declared canonical");
                    current = canonical;
                }
                _ => return true,
            }
        }
        true
    }

    async fn declared_canonical(&self, url: &str) -> Option<String> {
        let outcome = match self.client.head_follow(url).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(url = %url, error = %e, "canonical lookup failed, keeping original");
                return None;
            }
        };
        let target = canonical_from_link_header(outcome.header("link")?)?;
        let absolute = Url::parse(url).ok()?.join(&target).ok()?;
        normalize(absolute.as_str()).ok().map(NormalizedUrl::into_string)
    }
}

/// Scheme, host and path-prefix checks of [`UrlCanonicalizer::is_valid_link`].
#[must_use]
pub fn passes_scope(url: &str, base_domain: &str, start_path: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    matches!(parsed.scheme(), "http" | "https")
        && authority(&parsed).eq_ignore_ascii_case(base_domain)
        && parsed.path().starts_with(start_path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn canonicalizer() -> UrlCanonicalizer {
        UrlCanonicalizer::new(HttpClient::new(Duration::from_secs(5)))
    }

    // ==================== Link Header Tests ====================

    #[test]
    fn test_canonical_from_link_header() {
        assert_eq!(
            canonical_from_link_header(
                r#"<https://x.com/style.css>; rel="preload", <https://x.com/a/>; rel="canonical""#
            ),
            Some("https://x.com/a/".into())
        );
        assert_eq!(canonical_from_link_header("<https://x.com/>; rel=next"), None);
    }

    // ==================== Scope Tests ====================

    #[test]
    fn test_passes_scope() {
        assert!(passes_scope("https://docs.x.com/v2/a/", "docs.x.com", "/v2/"));
        assert!(!passes_scope("https://docs.x.com/v1/a/", "docs.x.com", "/v2/"));
        assert!(!passes_scope("https://other.com/v2/a/", "docs.x.com", "/v2/"));
        assert!(!passes_scope("ftp://docs.x.com/v2/a/", "docs.x.com", "/v2/"));
        assert!(passes_scope("http://127.0.0.1:9000/a/", "127.0.0.1:9000", "/"));
    }

    // ==================== Network Tests ====================

    #[tokio::test]
    async fn test_canonicalize_plain_url_skips_network() {
        let canon = canonicalizer();
        let url = canon.canonicalize("HTTP://Example.com/a/../b").await.unwrap();
        assert_eq!(url.as_str(), "http://example.com/b/");
    }

    #[tokio::test]
    async fn test_is_valid_link_follows_declared_canonical_out_of_scope() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/docs/alias/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", "<https://elsewhere.com/page/>; rel=\"canonical\""),
            )
            .mount(&server)
            .await;

        let uri = server.uri();
        let base = authority(&Url::parse(&uri).unwrap());
        let valid = canonicalizer()
            .is_valid_link(&format!("{uri}/docs/alias/"), &base, "/docs/")
            .await;
        assert!(!valid);
    }

    #[tokio::test]
    async fn test_is_valid_link_accepts_self_canonical() {
        let server = MockServer::start().await;
        let uri = server.uri();
        Mock::given(method("HEAD"))
            .and(path("/docs/a/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", format!("<{uri}/docs/a/>; rel=canonical").as_str()),
            )
            .mount(&server)
            .await;

        let base = authority(&Url::parse(&uri).unwrap());
        assert!(
            canonicalizer()
                .is_valid_link(&format!("{uri}/docs/a/"), &base, "/docs/")
                .await
        );
    }

    #[tokio::test]
    async fn test_is_valid_link_bounds_canonical_cycle() {
        let server = MockServer::start().await;
        let uri = server.uri();
        Mock::given(method("HEAD"))
            .and(path("/docs/a/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", format!("<{uri}/docs/b/>; rel=canonical").as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/docs/b/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", format!("<{uri}/docs/a/>; rel=canonical").as_str()),
            )
            .mount(&server)
            .await;

        let base = authority(&Url::parse(&uri).unwrap());
        let canon = canonicalizer().with_max_canonical_hops(3);
        assert!(canon.is_valid_link(&format!("{uri}/docs/a/"), &base, "/docs/").await);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn test_is_valid_link_lookup_failure_keeps_original() {
        let base = "127.0.0.1:1";
        assert!(
            canonicalizer()
                .is_valid_link("http://127.0.0.1:1/docs/a/", base, "/docs/")
                .await
        );
    }
}
