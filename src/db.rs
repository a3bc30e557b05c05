//! Database connection and schema management for crawl history.
//!
//! One SQLite file per output root, opened in WAL mode with a busy timeout
//! so concurrent crawl workers can append history rows while others read.
//! Migrations under `migrations/` run on every open.
//!
//! The schema backs [`crate::store::CrawlHistory`]: the page update log,
//! per-URL scrape progress, stored response headers and link integrity rows.
//!
//! # Example
//!
//! ```no_run
//! use docmirror_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("mirror/crawl_history.db")).await?;
//! let history = docmirror_core::store::CrawlHistory::new(db);
//! println!("{:?}", history.last_scraped_url().await?);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

use crate::error::CrawlError;

/// Pool size for the on-disk history; SQLite serializes writers anyway.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures opening the history database.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to or query the database.
    #[error("cannot open history database: {0}")]
    Connection(#[from] sqlx::Error),

    /// A schema migration failed.
    #[error("history schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<DbError> for CrawlError {
    fn from(err: DbError) -> Self {
        let operation = match &err {
            DbError::Connection(_) => "connect",
            DbError::Migration(_) => "migrate",
        };
        CrawlError::database(operation, err)
    }
}

/// Pooled connection to the crawl history database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the history database at `db_path`, creating it if missing.
    ///
    /// Every pooled connection runs in WAL mode with a busy timeout, so
    /// concurrent workers wait for the write lock instead of failing.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the file cannot be opened,
    /// or `DbError::Migration` if the schema cannot be brought up to date.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Opens a throwaway in-memory history.
    ///
    /// Single connection: each `:memory:` connection is its own database.
    ///
    /// # Errors
    ///
    /// See [`Database::new`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// The connection pool, for repositories built on top.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_converts_into_crawl_error_type() {
        let db: Result<Database, CrawlError> = Database::new_in_memory().await.map_err(Into::into);
        assert!(db.is_ok());
    }

    #[tokio::test]
    async fn test_database_page_updates_table_exists() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO page_updates (url, checksum) VALUES ('https://example.com/', 'abc')",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_ok(), "page_updates table should exist after migration");
    }

    #[tokio::test]
    async fn test_database_link_integrity_rejects_bad_flags() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO link_integrity (url, is_redirect, is_internal) VALUES ('https://example.com/', 2, 0)",
        )
        .execute(db.pool())
        .await;

        assert!(
            result.is_err(),
            "Non-boolean is_redirect should be rejected by CHECK constraint"
        );
    }

    #[tokio::test]
    async fn test_database_file_uses_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("crawl_history.db");

        let db = Database::new(&db_path).await.unwrap();
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();

        assert!(mode.eq_ignore_ascii_case("wal"));
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_database_reopen_keeps_rows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("crawl_history.db");

        let db = Database::new(&db_path).await.unwrap();
        sqlx::query("INSERT INTO scrape_progress (url) VALUES ('https://example.com/')")
            .execute(db.pool())
            .await
            .unwrap();
        db.pool().close().await;

        let reopened = Database::new(&db_path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scrape_progress")
            .fetch_one(reopened.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
