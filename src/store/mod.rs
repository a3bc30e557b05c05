//! Durable crawl state.
//!
//! - [`VersionedContentHashStore`] - per-document, per-version URL hashes;
//!   the change-detection oracle
//! - [`CrawlSnapshot`] - frontier and visited set saved for crash recovery
//! - [`ContentStore`] / [`FsContentStore`] - mirrored page bodies, with
//!   diff-based partial updates
//! - [`CrawlHistory`] - sqlite-backed update log, scrape progress, stored
//!   headers and link integrity rows
//!
//! JSON artifacts are written atomically (temp file + rename), so a crash
//! never leaves a half-written file behind.

mod content;
mod hash_store;
mod history;
mod snapshot;

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::CrawlError;

pub use content::{ContentStore, FsContentStore, PageRef};
pub use hash_store::{CrawlEntry, HashInfo, VersionedContentHashStore};
pub use history::{CrawlHistory, LinkIntegrityRow, UPDATE_WINDOW_DAYS};
pub use snapshot::CrawlSnapshot;

/// Lowercase hex SHA-256 of `content`.
#[must_use]
pub fn sha256_hex(content: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let digest = Sha256::digest(content);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

/// Writes `bytes` to `path` via a sibling temp file and a rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CrawlError> {
    let operation = format!("write {}", path.display());
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CrawlError::database(&operation, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| CrawlError::database(&operation, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| CrawlError::database(&operation, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_write_atomic_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("state.json");

        write_atomic(&path, b"{}").await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "{}");
        assert!(!dir.path().join("a/b/state.json.tmp").exists());
    }
}
