//! Sqlite-backed crawl history.
//!
//! Holds the records the crawler consults across runs but that are not part
//! of the change-detection oracle:
//!
//! - `page_updates`: one row per detected content change, feeding the
//!   update-frequency term of the crawl priority
//! - `scrape_progress`: when each URL was last processed
//! - `page_headers`: validator headers from the last successful fetch, for
//!   the HEAD short-circuit
//! - `link_integrity`: the latest integrity check per link
//!
//! Timestamps are RFC 3339 UTC strings with millisecond precision, so string
//! order is time order.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::Row;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::CrawlError;

/// Look-back window of the update-frequency calculation.
pub const UPDATE_WINDOW_DAYS: i64 = 30;

/// One `link_integrity` row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkIntegrityRow {
    /// Checked link.
    pub url: String,
    /// Final HTTP status, absent when the request failed.
    pub status_code: Option<u16>,
    /// Whether the link redirected.
    pub is_redirect: bool,
    /// URL after redirects.
    pub final_url: Option<String>,
    /// Content type of the final response.
    pub content_type: Option<String>,
    /// Whether the link is on the crawled site.
    pub is_internal: bool,
    /// Whether the link's fragment resolved, if it was checked.
    pub anchor_exists: Option<bool>,
    /// Request failure, if any.
    pub error: Option<String>,
}

/// Repository over the crawl history tables.
#[derive(Debug, Clone)]
pub struct CrawlHistory {
    db: Database,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn sql_error(operation: &str) -> impl FnOnce(sqlx::Error) -> CrawlError + '_ {
    move |e| CrawlError::database(operation, e)
}

impl CrawlHistory {
    /// Wraps an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Opens an in-memory history, for runs that keep no history on disk.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the schema cannot be created.
    pub async fn in_memory() -> Result<Self, CrawlError> {
        let db = Database::new_in_memory().await?;
        Ok(Self::new(db))
    }

    /// Appends a content-change row stamped now.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the insert fails.
    pub async fn record_update(&self, url: &str, checksum: &str) -> Result<(), CrawlError> {
        self.record_update_at(url, checksum, Utc::now()).await
    }

    /// Appends a content-change row with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the insert fails.
    #[instrument(level = "debug", skip(self, checksum))]
    pub async fn record_update_at(
        &self,
        url: &str,
        checksum: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CrawlError> {
        sqlx::query(r"INSERT INTO page_updates (url, checksum, updated_at) VALUES (?, ?, ?)")
            .bind(url)
            .bind(checksum)
            .bind(timestamp(at))
            .execute(self.db.pool())
            .await
            .map_err(sql_error("record page update"))?;
        Ok(())
    }

    /// Recent update rate of a URL.
    ///
    /// `updates in the last 30 days / (whole days since the last update + 1)`,
    /// or `0.0` when the URL has no update in the window.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the query fails.
    pub async fn update_frequency(&self, url: &str) -> Result<f64, CrawlError> {
        let now = Utc::now();
        let cutoff = timestamp(now - Duration::days(UPDATE_WINDOW_DAYS));

        let row = sqlx::query(
            r"SELECT COUNT(*) AS updates, MAX(updated_at) AS last_update
              FROM page_updates
              WHERE url = ? AND updated_at >= ?",
        )
        .bind(url)
        .bind(cutoff)
        .fetch_one(self.db.pool())
        .await
        .map_err(sql_error("read update frequency"))?;

        let updates: i64 = row.get("updates");
        let last_update: Option<String> = row.get("last_update");
        let Some(last_update) = last_update.filter(|_| updates > 0) else {
            return Ok(0.0);
        };

        let last_update = DateTime::parse_from_rfc3339(&last_update)
            .map_err(|e| CrawlError::parsing(last_update.clone(), e.to_string()))?
            .with_timezone(&Utc);
        let days_since = (now - last_update).num_days().max(0);

        #[allow(clippy::cast_precision_loss)]
        let frequency = updates as f64 / (days_since + 1) as f64;
        Ok(frequency)
    }

    /// Marks a URL as processed now.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the upsert fails.
    pub async fn save_progress(&self, url: &str) -> Result<(), CrawlError> {
        sqlx::query(r"INSERT OR REPLACE INTO scrape_progress (url, last_scraped) VALUES (?, ?)")
            .bind(url)
            .bind(timestamp(Utc::now()))
            .execute(self.db.pool())
            .await
            .map_err(sql_error("save scrape progress"))?;
        Ok(())
    }

    /// Most recently processed URL, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the query fails.
    pub async fn last_scraped_url(&self) -> Result<Option<String>, CrawlError> {
        let row = sqlx::query(
            r"SELECT url FROM scrape_progress
              ORDER BY last_scraped DESC, rowid DESC
              LIMIT 1",
        )
        .fetch_optional(self.db.pool())
        .await
        .map_err(sql_error("read scrape progress"))?;
        Ok(row.map(|row| row.get("url")))
    }

    /// Validator headers stored for a URL.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the query fails, or
    /// [`CrawlError::Parsing`] if the stored JSON is corrupt.
    pub async fn stored_headers(
        &self,
        url: &str,
    ) -> Result<Option<BTreeMap<String, String>>, CrawlError> {
        let row = sqlx::query(r"SELECT headers FROM page_headers WHERE url = ?")
            .bind(url)
            .fetch_optional(self.db.pool())
            .await
            .map_err(sql_error("read page headers"))?;

        row.map(|row| {
            let raw: String = row.get("headers");
            serde_json::from_str(&raw).map_err(|e| CrawlError::parsing(url, e.to_string()))
        })
        .transpose()
    }

    /// Replaces the stored validator headers for a URL.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if serialization or the upsert fails.
    pub async fn store_headers(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), CrawlError> {
        let json = serde_json::to_string(headers)
            .map_err(|e| CrawlError::database("serialize page headers", e))?;
        sqlx::query(
            r"INSERT OR REPLACE INTO page_headers (url, headers, last_updated) VALUES (?, ?, ?)",
        )
        .bind(url)
        .bind(json)
        .bind(timestamp(Utc::now()))
        .execute(self.db.pool())
        .await
        .map_err(sql_error("store page headers"))?;
        debug!(url, count = headers.len(), "stored page headers");
        Ok(())
    }

    /// Upserts the latest integrity check of a link.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the upsert fails.
    pub async fn save_link_integrity(&self, row: &LinkIntegrityRow) -> Result<(), CrawlError> {
        sqlx::query(
            r"INSERT OR REPLACE INTO link_integrity (
                url, status_code, is_redirect, final_url, content_type,
                is_internal, anchor_exists, error, checked_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.url)
        .bind(row.status_code.map(i64::from))
        .bind(row.is_redirect)
        .bind(row.final_url.as_deref())
        .bind(row.content_type.as_deref())
        .bind(row.is_internal)
        .bind(row.anchor_exists)
        .bind(row.error.as_deref())
        .bind(timestamp(Utc::now()))
        .execute(self.db.pool())
        .await
        .map_err(sql_error("save link integrity"))?;
        Ok(())
    }

    /// Latest integrity check of a link.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the query fails.
    pub async fn link_integrity(&self, url: &str) -> Result<Option<LinkIntegrityRow>, CrawlError> {
        let row = sqlx::query(
            r"SELECT url, status_code, is_redirect, final_url, content_type,
                     is_internal, anchor_exists, error
              FROM link_integrity WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(self.db.pool())
        .await
        .map_err(sql_error("read link integrity"))?;

        Ok(row.map(|row| {
            let status_code: Option<i64> = row.get("status_code");
            LinkIntegrityRow {
                url: row.get("url"),
                status_code: status_code.and_then(|s| u16::try_from(s).ok()),
                is_redirect: row.get("is_redirect"),
                final_url: row.get("final_url"),
                content_type: row.get("content_type"),
                is_internal: row.get("is_internal"),
                anchor_exists: row.get("anchor_exists"),
                error: row.get("error"),
            }
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn history() -> CrawlHistory {
        CrawlHistory::in_memory().await.unwrap()
    }

    // ==================== Update Frequency Tests ====================

    #[tokio::test]
    async fn test_frequency_is_zero_without_updates() {
        let h = history().await;
        assert!(h.update_frequency("https://x.com/a/").await.unwrap().abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_frequency_counts_recent_updates() {
        let h = history().await;
        let url = "https://x.com/a/";
        h.record_update(url, "h1").await.unwrap();
        h.record_update(url, "h2").await.unwrap();
        h.record_update("https://x.com/other/", "h").await.unwrap();

        // Two updates, last one today.
        let frequency = h.update_frequency(url).await.unwrap();
        assert!((frequency - 2.0).abs() < 1e-9, "{frequency}");
    }

    #[tokio::test]
    async fn test_frequency_divides_by_days_since_last_update() {
        let h = history().await;
        let url = "https://x.com/a/";
        let now = Utc::now();
        h.record_update_at(url, "h1", now - Duration::days(5)).await.unwrap();
        h.record_update_at(url, "h2", now - Duration::days(3)).await.unwrap();
        h.record_update_at(url, "old", now - Duration::days(45)).await.unwrap();

        // Two in-window updates, last one 3 days ago: 2 / (3 + 1).
        let frequency = h.update_frequency(url).await.unwrap();
        assert!((frequency - 0.5).abs() < 1e-9, "{frequency}");
    }

    // ==================== Progress Tests ====================

    #[tokio::test]
    async fn test_last_scraped_url_tracks_latest() {
        let h = history().await;
        assert!(h.last_scraped_url().await.unwrap().is_none());

        h.save_progress("https://x.com/a/").await.unwrap();
        h.save_progress("https://x.com/b/").await.unwrap();
        assert_eq!(h.last_scraped_url().await.unwrap().unwrap(), "https://x.com/b/");

        h.save_progress("https://x.com/a/").await.unwrap();
        assert_eq!(h.last_scraped_url().await.unwrap().unwrap(), "https://x.com/a/");
    }

    // ==================== Header Tests ====================

    #[tokio::test]
    async fn test_headers_round_trip_and_replace() {
        let h = history().await;
        let url = "https://x.com/a/";
        assert!(h.stored_headers(url).await.unwrap().is_none());

        let mut headers = BTreeMap::new();
        headers.insert("etag".to_string(), "\"v1\"".to_string());
        h.store_headers(url, &headers).await.unwrap();
        assert_eq!(h.stored_headers(url).await.unwrap().unwrap(), headers);

        headers.insert("etag".to_string(), "\"v2\"".to_string());
        h.store_headers(url, &headers).await.unwrap();
        assert_eq!(h.stored_headers(url).await.unwrap().unwrap()["etag"], "\"v2\"");
    }

    // ==================== Link Integrity Tests ====================

    #[tokio::test]
    async fn test_link_integrity_upsert() {
        let h = history().await;
        let mut row = LinkIntegrityRow {
            url: "https://x.com/a/#intro".into(),
            status_code: Some(200),
            is_internal: true,
            anchor_exists: Some(false),
            ..LinkIntegrityRow::default()
        };
        h.save_link_integrity(&row).await.unwrap();
        assert_eq!(h.link_integrity(&row.url).await.unwrap().unwrap(), row);

        row.status_code = None;
        row.anchor_exists = None;
        row.error = Some("connection refused".into());
        h.save_link_integrity(&row).await.unwrap();
        assert_eq!(h.link_integrity(&row.url).await.unwrap().unwrap(), row);
    }
}
