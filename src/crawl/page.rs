//! The single-page routine: fetch, compare, store, follow links.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use url::Url;

use super::links::{PageLinks, canonical_link, extract_links};
use super::scheduler::CrawlRun;
use crate::canonical::{normalize, passes_scope};
use crate::diff::optimized_diff;
use crate::error::{CrawlError, ErrorCategory, log_crawl_error};
use crate::store::{PageRef, sha256_hex};

/// Response headers compared by the HEAD short-circuit.
const VALIDATOR_HEADERS: [&str; 3] = ["last-modified", "etag", "content-length"];

const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// Why a dispatched page was not fully processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Outside the crawl's host or path prefix, directly or via its
    /// declared canonical URL.
    OutOfScope,
    /// HEAD validators match the ones stored after the last fetch.
    HeadersUnchanged,
    /// The page declares a canonical URL that was already processed.
    CanonicalVisited,
}

/// Result of processing one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Content was new or changed and has been stored.
    Changed,
    /// Content matched the hash store.
    Unchanged,
    /// The page was not processed.
    Skipped(SkipReason),
}

impl CrawlRun {
    /// Processes one already-dispatched page.
    ///
    /// The seed page bypasses the scope and header checks and always has its
    /// links followed, so a rerun over an unchanged site still reaches every
    /// page.
    #[instrument(skip(self), fields(doc = %self.doc_name, version = %self.version))]
    pub(super) async fn process_page(
        self: &Arc<Self>,
        url: &str,
        is_seed: bool,
    ) -> Result<PageOutcome, CrawlError> {
        if !is_seed
            && !self
                .canonicalizer
                .is_valid_link(url, &self.base_domain, &self.start_path)
                .await
        {
            return Ok(PageOutcome::Skipped(SkipReason::OutOfScope));
        }

        self.rate_limiter.wait().await;

        let validators = self.head_validators(url).await;
        if !is_seed && self.headers_unchanged(url, validators.as_ref()).await? {
            debug!(url, "headers unchanged, skipping fetch");
            return Ok(PageOutcome::Skipped(SkipReason::HeadersUnchanged));
        }

        let fetcher = &self.fetcher;
        let page = self
            .breaker
            .call(url, || self.retry.run("fetch_page", || fetcher.fetch(url)))
            .await?;
        self.stats.increment_fetched();
        self.rate_limiter.update(page.latency).await;

        let base = Url::parse(&page.url)
            .or_else(|_| Url::parse(url))
            .map_err(|e| CrawlError::parsing(url, e.to_string()))?;

        let mut url = url.to_string();
        if let Some(declared) = canonical_link(&page.body, &base).and_then(|c| normalize(&c).ok())
        {
            if declared.as_str() != url {
                if !passes_scope(declared.as_str(), &self.base_domain, &self.start_path) {
                    if !is_seed {
                        info!(url = %url, canonical = %declared, "canonical URL out of scope, skipping");
                        return Ok(PageOutcome::Skipped(SkipReason::OutOfScope));
                    }
                    debug!(url = %url, canonical = %declared, "ignoring out-of-scope canonical on seed");
                } else if self.visited.insert(declared.as_str()) {
                    info!(url = %url, canonical = %declared, "continuing under canonical URL");
                    url = declared.into_string();
                } else {
                    info!(url = %url, canonical = %declared, "canonical URL already visited, skipping");
                    return Ok(PageOutcome::Skipped(SkipReason::CanonicalVisited));
                }
            }
        }

        let page_ref = PageRef {
            doc_name: &self.doc_name,
            version: &self.version,
            url: &url,
            content_type: page.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE),
        };

        let seen_before = self
            .hash_store
            .get_hash_info(&self.doc_name, &self.version, &url)
            .await
            .is_some();
        let changed = self
            .hash_store
            .content_changed(&self.doc_name, &self.version, &url, &page.body)
            .await?;

        if changed {
            info!(url = %url, "content changed, updating");
            self.store_body(page_ref, &page.body, seen_before).await?;
            self.history
                .record_update(&url, &sha256_hex(page.body.as_bytes()))
                .await?;
            let links = extract_links(&page.body, &base);
            self.follow_links(&links).await;
            self.check_integrity(&links).await;
        } else {
            debug!(url = %url, "content unchanged");
            if is_seed {
                self.follow_links(&extract_links(&page.body, &base)).await;
            }
        }

        if let Some(validators) = validators {
            self.history.store_headers(&url, &validators).await?;
        }
        self.history.save_progress(&url).await?;

        Ok(if changed {
            PageOutcome::Changed
        } else {
            PageOutcome::Unchanged
        })
    }

    /// Validator headers from a HEAD request, `None` when the request fails
    /// or reports no validators.
    async fn head_validators(&self, url: &str) -> Option<BTreeMap<String, String>> {
        let outcome = match self.client.head_follow(url).await {
            Ok(outcome) if outcome.status < 400 => outcome,
            Ok(outcome) => {
                debug!(url, status = outcome.status, "HEAD not usable for validators");
                return None;
            }
            Err(e) => {
                debug!(url, error = %e, "HEAD failed, assuming changed");
                return None;
            }
        };
        let validators: BTreeMap<String, String> = VALIDATOR_HEADERS
            .iter()
            .filter_map(|name| {
                outcome
                    .header(name)
                    .map(|value| ((*name).to_string(), value.to_string()))
            })
            .collect();
        (!validators.is_empty()).then_some(validators)
    }

    async fn headers_unchanged(
        &self,
        url: &str,
        validators: Option<&BTreeMap<String, String>>,
    ) -> Result<bool, CrawlError> {
        let Some(current) = validators else {
            return Ok(false);
        };
        let stored = self.history.stored_headers(url).await?;
        Ok(stored.as_ref() == Some(current))
    }

    /// Writes the new body, as a diff against the stored copy when there is
    /// one. A failed partial update falls back to a full write.
    async fn store_body(
        &self,
        page: PageRef<'_>,
        body: &str,
        seen_before: bool,
    ) -> Result<(), CrawlError> {
        let stored = if seen_before {
            self.content.read(page).await.unwrap_or_else(|e| {
                warn!(url = page.url, error = %e, "cannot read stored copy");
                None
            })
        } else {
            None
        };

        if let Some(old) = stored {
            let diff = optimized_diff(
                &old,
                body,
                &self.doc_name,
                &self.version,
                self.config.diff_chunk_size,
            );
            match self.content.apply_diff(page, &diff).await {
                Ok(_) => return Ok(()),
                Err(e) if e.category() == ErrorCategory::ContentChanged => {
                    log_crawl_error(page.url, &e);
                }
                Err(e) => {
                    warn!(url = page.url, error = %e, "partial update failed, writing full content");
                }
            }
        }
        self.content.write_full(page, body).await?;
        Ok(())
    }

    /// Queues every in-scope link not yet dispatched.
    async fn follow_links(&self, links: &PageLinks) {
        let mut queued = BTreeSet::new();
        for link in &links.links {
            if let Some(url) = self.enqueue(link, links.is_pagination(link)).await {
                queued.insert(url);
            }
        }
        debug!(found = links.links.len(), queued = queued.len(), "followed links");
    }

    /// Hands links not yet checked in this run to a background batch, so the
    /// worker goes back to the frontier straight away.
    async fn check_integrity(self: &Arc<Self>, links: &PageLinks) {
        let fresh: Vec<String> = links
            .links
            .iter()
            .filter(|link| self.checked_links.insert((*link).clone()))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return;
        }

        let run = Arc::clone(self);
        self.integrity_tasks
            .lock()
            .await
            .spawn(async move { run.record_integrity(fresh).await });
    }

    async fn record_integrity(&self, fresh: Vec<String>) {
        let results = self.checker.check_all(fresh).await;
        for result in &results {
            if let Err(e) = self.history.save_link_integrity(&result.into()).await {
                warn!(url = %result.url, error = %e, "failed to save link integrity row");
            }
        }
        self.integrity_results.lock().await.extend(results);
    }
}
