//! Versioned content hash store.
//!
//! One JSON file per document under `metadata/content_hashes/`, keyed by
//! version then URL:
//!
//! ```json
//! {"2.1": {"https://docs.example.com/a/": {"hash": "...", "size": 1234,
//!          "last_modified": "2024-05-01T12:00:00Z"}}}
//! ```
//!
//! Every file is loaded eagerly when the store is opened and held in
//! memory. Each update rewrites the whole document file; fine for
//! documentation-sized corpora, linear in the number of URLs per document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{sha256_hex, write_atomic};
use crate::error::CrawlError;

const HASH_FILE_SUFFIX: &str = "_hashes.json";

/// Last-seen fingerprint of a URL's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashInfo {
    /// Lowercase hex SHA-256 of the content.
    pub hash: String,
    /// Content length in bytes.
    pub size: u64,
    /// When the content was last seen to change.
    pub last_modified: DateTime<Utc>,
}

/// One `(doc_name, version, url)` row of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlEntry {
    /// Document name.
    pub doc_name: String,
    /// Document version.
    pub version: String,
    /// Normalized URL.
    pub url: String,
    /// Content hash.
    pub content_hash: String,
    /// Content size in bytes.
    pub content_size: u64,
    /// Last change time.
    pub last_modified: DateTime<Utc>,
}

type VersionMap = BTreeMap<String, BTreeMap<String, HashInfo>>;

/// In-memory view of every document's hash file, written through on update.
#[derive(Debug)]
pub struct VersionedContentHashStore {
    dir: PathBuf,
    docs: Mutex<BTreeMap<String, VersionMap>>,
}

impl VersionedContentHashStore {
    /// Opens the store rooted at `dir`, loading every `*_hashes.json` file.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the directory cannot be created or
    /// read, or [`CrawlError::Parsing`] if a hash file is not valid JSON.
    #[instrument(skip(dir), fields(dir = %dir.as_ref().display()))]
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, CrawlError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CrawlError::database("create hash dir", e))?;

        let mut docs = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| CrawlError::database("read hash dir", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CrawlError::database("read hash dir", e))?
        {
            let file_name = entry.file_name();
            let Some(doc_name) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(HASH_FILE_SUFFIX))
            else {
                continue;
            };
            let raw = tokio::fs::read_to_string(entry.path())
                .await
                .map_err(|e| CrawlError::database("read hash file", e))?;
            let versions: VersionMap = serde_json::from_str(&raw)
                .map_err(|e| CrawlError::parsing(entry.path().display().to_string(), e.to_string()))?;
            debug!(doc_name, versions = versions.len(), "loaded hash file");
            docs.insert(doc_name.to_string(), versions);
        }

        info!(documents = docs.len(), "opened content hash store");
        Ok(Self {
            dir,
            docs: Mutex::new(docs),
        })
    }

    /// Stored fingerprint for a URL, if any.
    pub async fn get_hash_info(&self, doc_name: &str, version: &str, url: &str) -> Option<HashInfo> {
        self.docs
            .lock()
            .await
            .get(doc_name)
            .and_then(|versions| versions.get(version))
            .and_then(|urls| urls.get(url))
            .cloned()
    }

    /// Compares `content` against the stored fingerprint.
    ///
    /// Returns `true` when the URL is unseen or its hash or size differ; in
    /// that case the store has **already been updated and persisted** when
    /// this returns. Returns `false` without any mutation otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the hash file cannot be written;
    /// the in-memory entry is rolled back so memory and disk agree.
    #[instrument(level = "debug", skip(self, content))]
    pub async fn content_changed(
        &self,
        doc_name: &str,
        version: &str,
        url: &str,
        content: &str,
    ) -> Result<bool, CrawlError> {
        let hash = sha256_hex(content.as_bytes());
        let size = u64::try_from(content.len()).unwrap_or(u64::MAX);

        let mut docs = self.docs.lock().await;
        let urls = docs
            .entry(doc_name.to_string())
            .or_default()
            .entry(version.to_string())
            .or_default();

        if urls
            .get(url)
            .is_some_and(|info| info.hash == hash && info.size == size)
        {
            return Ok(false);
        }

        let previous = urls.insert(
            url.to_string(),
            HashInfo {
                hash,
                size,
                last_modified: Utc::now(),
            },
        );

        if let Err(e) = self.persist(doc_name, &docs).await {
            warn!(url, error = %e, "failed to persist hash update, rolling back");
            if let Some(urls) = docs
                .get_mut(doc_name)
                .and_then(|versions| versions.get_mut(version))
            {
                match previous {
                    Some(info) => {
                        urls.insert(url.to_string(), info);
                    }
                    None => {
                        urls.remove(url);
                    }
                }
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Every stored row, ordered by document, version and URL.
    pub async fn entries(&self) -> Vec<CrawlEntry> {
        let docs = self.docs.lock().await;
        let mut out = Vec::new();
        for (doc_name, versions) in docs.iter() {
            for (version, urls) in versions {
                for (url, info) in urls {
                    out.push(CrawlEntry {
                        doc_name: doc_name.clone(),
                        version: version.clone(),
                        url: url.clone(),
                        content_hash: info.hash.clone(),
                        content_size: info.size,
                        last_modified: info.last_modified,
                    });
                }
            }
        }
        out
    }

    /// Path of the hash file for `doc_name`.
    #[must_use]
    pub fn hash_file(&self, doc_name: &str) -> PathBuf {
        self.dir.join(format!("{doc_name}{HASH_FILE_SUFFIX}"))
    }

    async fn persist(
        &self,
        doc_name: &str,
        docs: &BTreeMap<String, VersionMap>,
    ) -> Result<(), CrawlError> {
        let Some(versions) = docs.get(doc_name) else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(versions)
            .map_err(|e| CrawlError::database("serialize hashes", e))?;
        write_atomic(&self.hash_file(doc_name), &json).await
    }
}
