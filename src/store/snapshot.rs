//! Crash-recovery snapshot of a crawl run.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::write_atomic;
use crate::error::CrawlError;

/// Frontier contents and visited set of an in-progress crawl.
///
/// Serialized as `{"queue": [[priority, url], ...], "visited": [url, ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlSnapshot {
    /// Pending frontier items, highest priority first.
    pub queue: Vec<(f64, String)>,
    /// URLs already dispatched.
    pub visited: Vec<String>,
}

impl CrawlSnapshot {
    /// Loads a snapshot, returning `None` when none exists.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the file cannot be read, or
    /// [`CrawlError::Parsing`] if it is not a valid snapshot.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Option<Self>, CrawlError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CrawlError::database("load snapshot", e)),
        };
        let snapshot: Self = serde_json::from_str(&raw)
            .map_err(|e| CrawlError::parsing(path.display().to_string(), e.to_string()))?;
        info!(
            queued = snapshot.queue.len(),
            visited = snapshot.visited.len(),
            "loaded crawl snapshot"
        );
        Ok(Some(snapshot))
    }

    /// Writes the snapshot atomically.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<(), CrawlError> {
        let json =
            serde_json::to_vec(self).map_err(|e| CrawlError::database("serialize snapshot", e))?;
        write_atomic(path, &json).await?;
        debug!(
            path = %path.display(),
            queued = self.queue.len(),
            visited = self.visited.len(),
            "saved crawl snapshot"
        );
        Ok(())
    }

    /// Deletes a snapshot file; a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] for any other removal failure.
    pub async fn remove(path: &Path) -> Result<(), CrawlError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CrawlError::database("remove snapshot", e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CrawlSnapshot::load(&dir.path().join("none.json")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_writes_documented_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scrape_states").join("d_1_state.json");
        let snapshot = CrawlSnapshot {
            queue: vec![(1.5, "https://x.com/b/".into())],
            visited: vec!["https://x.com/".into()],
        };

        snapshot.save(&path).await.unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["queue"][0][0], 1.5);
        assert_eq!(value["queue"][0][1], "https://x.com/b/");
        assert_eq!(value["visited"][0], "https://x.com/");
        assert_eq!(CrawlSnapshot::load(&path).await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        CrawlSnapshot::default().save(&path).await.unwrap();

        CrawlSnapshot::remove(&path).await.unwrap();
        CrawlSnapshot::remove(&path).await.unwrap();
        assert!(!path.exists());
    }
}
