//! Crawl run setup, worker pool and finalization.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashSet;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::frontier::{Frontier, FrontierItem, VisitedSet};
use super::page::PageOutcome;
use super::priority::calculate_priority;
use crate::canonical::{NormalizedUrl, UrlCanonicalizer, authority, normalize, passes_scope};
use crate::config::CrawlConfig;
use crate::db::Database;
use crate::error::{CrawlError, log_crawl_error};
use crate::fetch::{
    AdaptiveRateLimiter, CircuitBreaker, HttpClient, PageFetcher, RetryController,
    discover_sitemap_urls,
};
use crate::integrity::{LinkIntegrityChecker, LinkIntegrityReport, LinkIntegrityResult};
use crate::store::{
    ContentStore, CrawlHistory, CrawlSnapshot, FsContentStore, VersionedContentHashStore,
};

/// How often the supervisor wakes to check for snapshots and idle slots.
const SUPERVISOR_TICK: Duration = Duration::from_millis(250);

/// Outcome counts of a crawl run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    /// Pages whose body was fetched.
    pub pages_fetched: usize,
    /// Fetched pages whose content changed (or was new).
    pub pages_changed: usize,
    /// Fetched pages whose content matched the hash store.
    pub pages_unchanged: usize,
    /// Pages that failed with a per-URL error.
    pub pages_failed: usize,
    /// Pages skipped before or after fetching (scope, headers, canonical).
    pub pages_skipped: usize,
    /// Links checked for integrity.
    pub links_checked: usize,
    /// Whether the run resumed from a crash-recovery snapshot.
    pub resumed: bool,
}

#[derive(Debug, Default)]
pub(super) struct CrawlStats {
    fetched: AtomicUsize,
    changed: AtomicUsize,
    unchanged: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl CrawlStats {
    pub(super) fn increment_fetched(&self) {
        self.fetched.fetch_add(1, Ordering::SeqCst);
    }

    fn record(&self, outcome: &Result<PageOutcome, CrawlError>) {
        let counter = match outcome {
            Ok(PageOutcome::Changed) => &self.changed,
            Ok(PageOutcome::Unchanged) => &self.unchanged,
            Ok(PageOutcome::Skipped(_)) => &self.skipped,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn summary(&self, links_checked: usize, resumed: bool) -> CrawlSummary {
        CrawlSummary {
            pages_fetched: self.fetched.load(Ordering::SeqCst),
            pages_changed: self.changed.load(Ordering::SeqCst),
            pages_unchanged: self.unchanged.load(Ordering::SeqCst),
            pages_failed: self.failed.load(Ordering::SeqCst),
            pages_skipped: self.skipped.load(Ordering::SeqCst),
            links_checked,
            resumed,
        }
    }
}

/// Everything one crawl run shares between its workers.
pub(super) struct CrawlRun {
    pub(super) doc_name: String,
    pub(super) version: String,
    pub(super) base_domain: String,
    pub(super) start_path: String,
    pub(super) config: CrawlConfig,
    pub(super) frontier: Frontier,
    pub(super) visited: VisitedSet,
    pub(super) rate_limiter: Arc<AdaptiveRateLimiter>,
    pub(super) breaker: CircuitBreaker,
    pub(super) retry: RetryController,
    pub(super) hash_store: VersionedContentHashStore,
    pub(super) history: CrawlHistory,
    pub(super) content: Arc<dyn ContentStore>,
    pub(super) fetcher: Arc<dyn PageFetcher>,
    pub(super) client: HttpClient,
    pub(super) canonicalizer: UrlCanonicalizer,
    pub(super) checker: LinkIntegrityChecker,
    pub(super) checked_links: DashSet<String>,
    pub(super) integrity_results: Mutex<Vec<LinkIntegrityResult>>,
    /// Link integrity batches still running; drained before the report.
    pub(super) integrity_tasks: Mutex<JoinSet<()>>,
    pub(super) stats: CrawlStats,
    snapshot_path: PathBuf,
    last_save: Mutex<Instant>,
}

/// The path prefix a crawl is confined to: the seed path up to and
/// including its last `/`.
#[must_use]
pub fn scope_path(seed_path: &str) -> String {
    match seed_path.rfind('/') {
        Some(index) => seed_path[..=index].to_string(),
        None => "/".to_string(),
    }
}

/// Runs crawls with a given configuration.
///
/// Pages are fetched through [`HttpClient`] unless another
/// [`PageFetcher`] (a browser-rendering one, say) is supplied.
pub struct Crawler {
    config: CrawlConfig,
    client: HttpClient,
    fetcher: Arc<dyn PageFetcher>,
    content: Option<Arc<dyn ContentStore>>,
}

impl Crawler {
    /// Creates a crawler that fetches pages with a plain HTTP GET.
    #[must_use]
    pub fn new(config: CrawlConfig) -> Self {
        let client = HttpClient::new(config.http_timeout);
        Self {
            fetcher: Arc::new(client.clone()),
            client,
            config,
            content: None,
        }
    }

    /// Replaces the page fetcher.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replaces the filesystem content store.
    #[must_use]
    pub fn with_content_store(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = Some(content);
        self
    }

    /// Crawls `seed` into `doc_name`/`version`.
    ///
    /// With a crash-recovery snapshot on disk the run resumes from it;
    /// otherwise the seed page is processed first and the sitemap (if
    /// enabled) seeds the frontier. A cleanly finished run writes the link
    /// integrity report and removes its snapshot.
    ///
    /// # Errors
    ///
    /// Fails if the configuration or seed URL is invalid, durable state
    /// cannot be opened or written, or the seed page cannot be processed.
    /// Failures of any other page are logged and counted, never returned.
    #[instrument(skip(self), fields(seed = %seed))]
    pub async fn run(
        &self,
        seed: &str,
        doc_name: &str,
        version: &str,
    ) -> Result<CrawlSummary, CrawlError> {
        self.config
            .validate()
            .map_err(|e| CrawlError::parsing("crawl configuration", e.to_string()))?;

        let seed_url = normalize(seed)?;
        let parsed = seed_url.to_url()?;
        let base_domain = authority(&parsed);
        let start_path = scope_path(parsed.path());
        info!(
            doc_name,
            version,
            base_domain = %base_domain,
            start_path = %start_path,
            "starting crawl"
        );

        let layout = self.config.layout();
        let hash_store = VersionedContentHashStore::open(layout.content_hash_dir()).await?;
        let history = if self.config.in_memory_history {
            CrawlHistory::in_memory().await?
        } else {
            tokio::fs::create_dir_all(layout.root())
                .await
                .map_err(|e| CrawlError::database("create output root", e))?;
            let db = Database::new(&layout.history_db()).await?;
            CrawlHistory::new(db)
        };
        let content = self
            .content
            .clone()
            .unwrap_or_else(|| Arc::new(FsContentStore::new(layout.root())));

        let rate_limiter = Arc::new(AdaptiveRateLimiter::from_config(&self.config));
        let run = Arc::new(CrawlRun {
            doc_name: doc_name.to_string(),
            version: version.to_string(),
            checker: LinkIntegrityChecker::new(
                self.client.clone(),
                base_domain.clone(),
                self.config.integrity_concurrency,
            )
            .with_rate_limiter(Arc::clone(&rate_limiter)),
            base_domain,
            start_path,
            frontier: Frontier::new(),
            visited: VisitedSet::new(),
            rate_limiter,
            breaker: CircuitBreaker::from_config(&self.config),
            retry: RetryController::from_config(&self.config),
            hash_store,
            history,
            content,
            fetcher: Arc::clone(&self.fetcher),
            client: self.client.clone(),
            canonicalizer: UrlCanonicalizer::new(self.client.clone())
                .with_max_canonical_hops(self.config.max_canonical_hops),
            checked_links: DashSet::new(),
            integrity_results: Mutex::new(Vec::new()),
            integrity_tasks: Mutex::new(JoinSet::new()),
            stats: CrawlStats::default(),
            snapshot_path: layout.scrape_state_file(doc_name, version),
            last_save: Mutex::new(Instant::now()),
            config: self.config.clone(),
        });

        let resumed = match CrawlSnapshot::load(&run.snapshot_path).await? {
            Some(snapshot) => {
                run.restore(snapshot).await;
                true
            }
            None => {
                run.seed(&seed_url).await?;
                false
            }
        };

        run.drive().await;
        let summary = run.finish(resumed).await?;
        info!(
            fetched = summary.pages_fetched,
            changed = summary.pages_changed,
            unchanged = summary.pages_unchanged,
            failed = summary.pages_failed,
            skipped = summary.pages_skipped,
            links_checked = summary.links_checked,
            resumed = summary.resumed,
            "crawl complete"
        );
        Ok(summary)
    }
}

/// Crawls `seed` with `config`, fetching pages over plain HTTP.
///
/// # Errors
///
/// See [`Crawler::run`].
pub async fn start_scraping_from(
    seed: &str,
    doc_name: &str,
    version: &str,
    config: CrawlConfig,
) -> Result<CrawlSummary, CrawlError> {
    Crawler::new(config).run(seed, doc_name, version).await
}

impl CrawlRun {
    async fn restore(&self, snapshot: CrawlSnapshot) {
        info!(
            queued = snapshot.queue.len(),
            visited = snapshot.visited.len(),
            "resuming from snapshot"
        );
        for url in &snapshot.visited {
            self.visited.insert(url);
        }
        for (priority, url) in snapshot.queue {
            self.frontier.push(priority, url).await;
        }
    }

    /// Processes the seed page, whose failure ends the run, then adds the
    /// sitemap's URLs to the frontier.
    async fn seed(self: &Arc<Self>, seed: &NormalizedUrl) -> Result<(), CrawlError> {
        self.visited.insert(seed.as_str());
        let outcome = self.process_page(seed.as_str(), true).await;
        self.stats.record(&outcome);
        outcome?;

        if self.config.use_sitemap {
            for url in discover_sitemap_urls(&self.client, seed.as_str()).await {
                self.enqueue(&url, false).await;
            }
        }
        Ok(())
    }

    /// Canonicalizes `raw` and queues it unless it is out of scope or
    /// already dispatched.
    pub(super) async fn enqueue(&self, raw: &str, is_pagination: bool) -> Option<NormalizedUrl> {
        let url = match self.canonicalizer.canonicalize(raw).await {
            Ok(url) => url,
            Err(e) => {
                debug!(url = %raw, error = %e, "dropping unparsable link");
                return None;
            }
        };
        if self.visited.contains(url.as_str())
            || !passes_scope(url.as_str(), &self.base_domain, &self.start_path)
        {
            return None;
        }
        let priority = calculate_priority(
            url.as_str(),
            &self.hash_store,
            &self.history,
            &self.doc_name,
            &self.version,
            is_pagination,
        )
        .await;
        self.frontier.push(priority, url.as_str()).await;
        Some(url)
    }

    /// Keeps up to `max_workers` workers running while the frontier has
    /// work, and returns once it is empty with no worker in flight.
    async fn drive(self: &Arc<Self>) {
        let mut workers = JoinSet::new();
        loop {
            while workers.len() < self.config.max_workers && !self.frontier.is_empty().await {
                workers.spawn(Arc::clone(self).worker());
            }
            if workers.is_empty() {
                break;
            }
            tokio::select! {
                Some(joined) = workers.join_next() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "crawl worker panicked");
                    }
                }
                () = tokio::time::sleep(SUPERVISOR_TICK) => {}
            }
            self.maybe_snapshot().await;
        }
        debug!("worker pool drained");
    }

    async fn worker(self: Arc<Self>) {
        while let Some(item) = self.frontier.pop_timeout(self.config.dequeue_timeout).await {
            self.dispatch(item).await;
        }
    }

    async fn dispatch(self: &Arc<Self>, item: FrontierItem) {
        let url = match normalize(&item.url) {
            Ok(url) => url,
            Err(e) => {
                log_crawl_error(&item.url, &e);
                self.stats.record(&Err(e));
                return;
            }
        };
        if !self.visited.insert(url.as_str()) {
            debug!(url = %url, "already visited");
            return;
        }

        debug!(url = %url, priority = item.priority, "dispatching");
        let outcome = self.process_page(url.as_str(), false).await;
        match &outcome {
            Ok(PageOutcome::Skipped(reason)) => debug!(url = %url, ?reason, "page skipped"),
            Ok(_) => {}
            Err(e) => {
                log_crawl_error(url.as_str(), e);
                self.rate_limiter.backoff().await;
            }
        }
        self.stats.record(&outcome);
    }

    /// Writes a snapshot if `snapshot_interval` has passed since the last.
    async fn maybe_snapshot(&self) {
        let mut last_save = self.last_save.lock().await;
        if last_save.elapsed() < self.config.snapshot_interval {
            return;
        }
        let snapshot = CrawlSnapshot {
            queue: self.frontier.snapshot().await,
            visited: self.visited.to_vec(),
        };
        match snapshot.save(&self.snapshot_path).await {
            Ok(()) => *last_save = Instant::now(),
            Err(e) => warn!(error = %e, "failed to save crawl snapshot"),
        }
    }

    async fn finish(&self, resumed: bool) -> Result<CrawlSummary, CrawlError> {
        let mut pending = std::mem::take(&mut *self.integrity_tasks.lock().await);
        if !pending.is_empty() {
            debug!(batches = pending.len(), "waiting for link integrity checks");
        }
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "link integrity task panicked");
            }
        }

        let results = std::mem::take(&mut *self.integrity_results.lock().await);
        let links_checked = results.len();
        let report_path = self
            .config
            .layout()
            .link_integrity_report(&self.doc_name, &self.version);
        LinkIntegrityReport::from_results(results)
            .write(&report_path)
            .await?;
        CrawlSnapshot::remove(&self.snapshot_path).await?;
        Ok(self.stats.summary(links_checked, resumed))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_path() {
        assert_eq!(scope_path("/"), "/");
        assert_eq!(scope_path("/docs/2.1/"), "/docs/2.1/");
        assert_eq!(scope_path("/docs/2.1/index.html"), "/docs/2.1/");
        assert_eq!(scope_path(""), "/");
    }

    #[test]
    fn test_stats_summary() {
        let stats = CrawlStats::default();
        stats.increment_fetched();
        stats.record(&Ok(PageOutcome::Changed));
        stats.record(&Err(CrawlError::timeout("https://x.com/")));

        let summary = stats.summary(3, true);
        assert_eq!(summary.pages_fetched, 1);
        assert_eq!(summary.pages_changed, 1);
        assert_eq!(summary.pages_failed, 1);
        assert_eq!(summary.links_checked, 3);
        assert!(summary.resumed);
    }
}
