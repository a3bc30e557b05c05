//! Per-link integrity checks.

use std::sync::{Arc, LazyLock};

use futures_util::stream::{self, StreamExt};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, instrument};
use url::Url;

use crate::canonical::authority;
use crate::fetch::{AdaptiveRateLimiter, HttpClient};
use crate::store::LinkIntegrityRow;

#[allow(clippy::expect_used)]
static ANCHOR_TARGETS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[id], a[name]").expect("static anchor selector is valid"));

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// Outcome of checking one link.
///
/// A failed request carries only `url`, `is_internal` and `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkIntegrityResult {
    /// The checked link, fragment included.
    pub url: String,
    /// Final HTTP status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// URL after redirects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    /// Whether the link redirected.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_redirect: bool,
    /// `Content-Type` of the final response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Whether the link is on the crawled host.
    pub is_internal: bool,
    /// Whether the fragment resolved, for internal links with one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_exists: Option<bool>,
    /// Every hop of a redirected link, ending with the final URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_chain: Option<Vec<String>>,
    /// Request failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LinkIntegrityResult {
    /// Whether the final status is an error status.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.status_code.is_some_and(|status| status >= 400)
    }

    /// Whether an internal link's fragment was checked and missing.
    #[must_use]
    pub fn is_missing_anchor(&self) -> bool {
        self.is_internal && self.anchor_exists == Some(false)
    }
}

impl From<&LinkIntegrityResult> for LinkIntegrityRow {
    fn from(result: &LinkIntegrityResult) -> Self {
        Self {
            url: result.url.clone(),
            status_code: result.status_code,
            is_redirect: result.is_redirect,
            final_url: result.final_url.clone(),
            content_type: result.content_type.clone(),
            is_internal: result.is_internal,
            anchor_exists: result.anchor_exists,
            error: result.error.clone(),
        }
    }
}

/// Whether `html` has an element with `id == fragment` or an `<a>` with
/// `name == fragment`.
#[must_use]
pub fn anchor_exists(html: &str, fragment: &str) -> bool {
    let document = Html::parse_document(html);
    document.select(&ANCHOR_TARGETS).any(|element| {
        let value = element.value();
        value.id() == Some(fragment)
            || (value.name() == "a" && value.attr("name") == Some(fragment))
    })
}

/// Checks links of the crawled site with HEAD requests.
///
/// Clones share one pool of `concurrency` request permits, so any number of
/// batches running at once never exceed it together. Requests to the crawled
/// host also wait on the crawl's rate limiter when one is attached.
#[derive(Debug, Clone)]
pub struct LinkIntegrityChecker {
    client: HttpClient,
    base_authority: String,
    concurrency: usize,
    permits: Arc<Semaphore>,
    rate_limiter: Option<Arc<AdaptiveRateLimiter>>,
}

impl LinkIntegrityChecker {
    /// Creates a checker; links on `base_authority` (`host[:port]`) count as
    /// internal.
    #[must_use]
    pub fn new(client: HttpClient, base_authority: impl Into<String>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            client,
            base_authority: base_authority.into(),
            concurrency,
            permits: Arc::new(Semaphore::new(concurrency)),
            rate_limiter: None,
        }
    }

    /// Paces requests to the crawled host with `limiter`.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<AdaptiveRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    async fn pace(&self, is_internal: bool) {
        if let (true, Some(limiter)) = (is_internal, &self.rate_limiter) {
            limiter.wait().await;
        }
    }

    /// Checks one link. Never fails; request errors are recorded in the
    /// result.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn check(&self, url: &str) -> LinkIntegrityResult {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                return LinkIntegrityResult {
                    url: url.to_string(),
                    error: Some(e.to_string()),
                    ..LinkIntegrityResult::default()
                };
            }
        };
        let is_internal = authority(&parsed) == self.base_authority;
        let fragment = parsed
            .fragment()
            .filter(|f| !f.is_empty())
            .map(|f| urlencoding::decode(f).map_or_else(|_| f.to_string(), |d| d.into_owned()));
        let mut target = parsed.clone();
        target.set_fragment(None);

        // The semaphore is never closed.
        let Ok(_permit) = self.permits.acquire().await else {
            return LinkIntegrityResult {
                url: url.to_string(),
                is_internal,
                error: Some("link checker shut down".to_string()),
                ..LinkIntegrityResult::default()
            };
        };
        self.pace(is_internal).await;

        let outcome = match self.client.head_follow(target.as_str()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(error = %e, "link check failed");
                return LinkIntegrityResult {
                    url: url.to_string(),
                    is_internal,
                    error: Some(e.to_string()),
                    ..LinkIntegrityResult::default()
                };
            }
        };

        let is_redirect = outcome.is_redirect();
        let redirect_chain = is_redirect.then(|| {
            let mut chain = outcome.redirect_chain.clone();
            chain.push(outcome.final_url.clone());
            chain
        });

        let anchor = match fragment {
            Some(fragment) if is_internal && outcome.status < 400 => {
                self.pace(true).await;
                Some(self.anchor_on_page(&outcome.final_url, &fragment).await)
            }
            _ => None,
        };

        LinkIntegrityResult {
            url: url.to_string(),
            status_code: Some(outcome.status),
            final_url: Some(outcome.final_url.clone()),
            is_redirect,
            content_type: outcome.content_type().map(str::to_string),
            is_internal,
            anchor_exists: anchor,
            redirect_chain,
            error: None,
        }
    }

    async fn anchor_on_page(&self, page_url: &str, fragment: &str) -> bool {
        match self.client.get_page(page_url).await {
            Ok(page) => anchor_exists(&page.body, fragment),
            Err(e) => {
                debug!(url = %page_url, error = %e, "anchor target fetch failed");
                false
            }
        }
    }

    /// Checks every link with bounded concurrency. Result order is not the
    /// input order.
    pub async fn check_all<I>(&self, links: I) -> Vec<LinkIntegrityResult>
    where
        I: IntoIterator<Item = String>,
    {
        stream::iter(links)
            .map(|link| async move { self.check(&link).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}
