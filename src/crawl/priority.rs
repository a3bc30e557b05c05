//! Crawl priority of a discovered URL.
//!
//! ```text
//! priority = 1.0 + 0.3 * frequency + 0.3 * freshness + 0.2 * depth + 0.2 * relevance
//! ```
//!
//! multiplied by 1.5 for pagination links. Every term lies in `[0, 1]`.

use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use crate::store::{CrawlHistory, VersionedContentHashStore};

/// Constant part of every priority.
pub const BASE_PRIORITY: f64 = 1.0;

/// Multiplier applied to pagination links.
pub const PAGINATION_BOOST: f64 = 1.5;

/// URL substrings that raise relevance.
pub const RELEVANCE_KEYWORDS: [&str; 4] = ["important", "critical", "update", "new"];

const FREQUENCY_WEIGHT: f64 = 0.3;
const FRESHNESS_WEIGHT: f64 = 0.3;
const DEPTH_WEIGHT: f64 = 0.2;
const RELEVANCE_WEIGHT: f64 = 0.2;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// The individual terms of a priority.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityFactors {
    /// Normalized recent update frequency.
    pub frequency: f64,
    /// Recency of the last observed change; 1.0 for unseen URLs.
    pub freshness: f64,
    /// Inverse path depth.
    pub depth: f64,
    /// Fraction of [`RELEVANCE_KEYWORDS`] present in the URL.
    pub relevance: f64,
}

impl PriorityFactors {
    /// Weighted sum of the terms, boosted for pagination links.
    #[must_use]
    pub fn combine(&self, is_pagination: bool) -> f64 {
        let priority = BASE_PRIORITY
            + FREQUENCY_WEIGHT * self.frequency
            + FRESHNESS_WEIGHT * self.freshness
            + DEPTH_WEIGHT * self.depth
            + RELEVANCE_WEIGHT * self.relevance;
        if is_pagination {
            priority * PAGINATION_BOOST
        } else {
            priority
        }
    }
}

/// Maps an update frequency onto `[0, 1]`; ten updates per day saturate.
#[must_use]
pub fn frequency_score(update_frequency: f64) -> f64 {
    (update_frequency / 10.0).clamp(0.0, 1.0)
}

/// `1 / (1 + days since last_modified)`, or 1.0 when never seen.
#[must_use]
pub fn freshness_score(last_modified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match last_modified {
        None => 1.0,
        Some(at) => {
            #[allow(clippy::cast_precision_loss)]
            let seconds = (now - at).num_seconds().max(0) as f64;
            1.0 / (1.0 + seconds / SECONDS_PER_DAY)
        }
    }
}

/// `1 / (1 + depth)`, depth being the number of `/`s in the path.
///
/// `https://x.com/` has depth 1, `https://x.com/a/b` depth 2.
#[must_use]
pub fn depth_score(url: &str) -> f64 {
    let depth = Url::parse(url).map_or(0, |u| u.path().matches('/').count());
    #[allow(clippy::cast_precision_loss)]
    let depth = depth as f64;
    1.0 / (1.0 + depth)
}

/// Fraction of [`RELEVANCE_KEYWORDS`] occurring in the lowercased URL.
#[must_use]
pub fn keyword_relevance(url: &str) -> f64 {
    let lower = url.to_lowercase();
    let hits = RELEVANCE_KEYWORDS
        .iter()
        .filter(|keyword| lower.contains(*keyword))
        .count();
    #[allow(clippy::cast_precision_loss)]
    let relevance = hits as f64 / RELEVANCE_KEYWORDS.len() as f64;
    relevance.min(1.0)
}

/// Computes the priority of `url` from the hash store and update history.
///
/// A failing history lookup counts as no recorded updates.
pub async fn calculate_priority(
    url: &str,
    hash_store: &VersionedContentHashStore,
    history: &CrawlHistory,
    doc_name: &str,
    version: &str,
    is_pagination: bool,
) -> f64 {
    let update_frequency = history.update_frequency(url).await.unwrap_or_else(|e| {
        debug!(url, error = %e, "update frequency unavailable");
        0.0
    });
    let last_modified = hash_store
        .get_hash_info(doc_name, version, url)
        .await
        .map(|info| info.last_modified);

    let factors = PriorityFactors {
        frequency: frequency_score(update_frequency),
        freshness: freshness_score(last_modified, Utc::now()),
        depth: depth_score(url),
        relevance: keyword_relevance(url),
    };
    factors.combine(is_pagination)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    // ==================== Factor Tests ====================

    #[test]
    fn test_depth_score() {
        assert!(close(depth_score("https://x.com/"), 0.5));
        assert!(close(depth_score("https://x.com/a/b"), 1.0 / 3.0));
        assert!(depth_score("https://x.com/a/") > depth_score("https://x.com/a/b/c/"));
    }

    #[test]
    fn test_keyword_relevance() {
        assert!(close(keyword_relevance("https://x.com/guide/"), 0.0));
        assert!(close(keyword_relevance("https://x.com/NEW/critical-update/"), 0.75));
    }

    #[test]
    fn test_freshness_score() {
        let now = Utc::now();
        assert!(close(freshness_score(None, now), 1.0));
        assert!(close(freshness_score(Some(now - Duration::days(1)), now), 0.5));
        assert!(close(freshness_score(Some(now), now), 1.0));
    }

    #[test]
    fn test_frequency_score_saturates() {
        assert!(close(frequency_score(0.0), 0.0));
        assert!(close(frequency_score(5.0), 0.5));
        assert!(close(frequency_score(40.0), 1.0));
    }

    // ==================== Combination Tests ====================

    #[test]
    fn test_combine_weights_and_pagination_boost() {
        let factors = PriorityFactors {
            frequency: 1.0,
            freshness: 1.0,
            depth: 0.5,
            relevance: 0.0,
        };
        let plain = factors.combine(false);
        assert!(close(plain, 1.0 + 0.3 + 0.3 + 0.1));
        assert!(close(factors.combine(true), plain * 1.5));
    }

    #[tokio::test]
    async fn test_calculate_priority_for_unseen_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionedContentHashStore::open(dir.path()).await.unwrap();
        let history = CrawlHistory::in_memory().await.unwrap();

        // Unseen: freshness 1.0, no updates, depth 1.
        let priority =
            calculate_priority("https://x.com/", &store, &history, "d", "1", false).await;
        assert!(close(priority, 1.0 + 0.3 + 0.2 * 0.5));

        let boosted = calculate_priority("https://x.com/", &store, &history, "d", "1", true).await;
        assert!(close(boosted, priority * 1.5));
    }

    #[tokio::test]
    async fn test_recently_changed_url_outranks_stale_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionedContentHashStore::open(dir.path()).await.unwrap();
        let history = CrawlHistory::in_memory().await.unwrap();
        let busy = "https://x.com/a/";
        let quiet = "https://x.com/b/";

        store.content_changed("d", "1", busy, "v1").await.unwrap();
        store.content_changed("d", "1", quiet, "v1").await.unwrap();
        for i in 0..20 {
            history.record_update(busy, &format!("h{i}")).await.unwrap();
        }

        let busy_priority = calculate_priority(busy, &store, &history, "d", "1", false).await;
        let quiet_priority = calculate_priority(quiet, &store, &history, "d", "1", false).await;
        assert!(busy_priority > quiet_priority);
    }
}
