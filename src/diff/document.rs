//! Chunked diff documents for partial page updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::myers::{DiffError, EditOp, apply_diff, diff};
use crate::config::DEFAULT_DIFF_CHUNK_SIZE;
use crate::store::sha256_hex;

/// Identification and integrity data of a [`DiffDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffMetadata {
    /// Document name.
    pub doc_name: String,
    /// Document version.
    pub version: String,
    /// When the diff was generated.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the old content.
    pub old_hash: String,
    /// SHA-256 of the new content.
    pub new_hash: String,
    /// Chunk size in bytes.
    pub chunk_size: usize,
    /// Number of chunks in the new content.
    pub chunk_count: usize,
}

/// Edit script for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffChunk {
    /// Position of the chunk in the new content.
    pub chunk_index: usize,
    /// Operations rebuilding the chunk from the old chunk at the same index.
    pub operations: Vec<EditOp>,
}

/// A complete chunked diff between two versions of a page.
///
/// Only chunks that differ are listed; unlisted chunk indices below
/// `chunk_count` are copied unchanged from the old content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffDocument {
    /// Identification and integrity data.
    pub metadata: DiffMetadata,
    /// Changed chunks in ascending index order.
    pub chunks: Vec<DiffChunk>,
}

impl DiffDocument {
    /// Whether the diff changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Splits `content` into chunks of at most `chunk_size` bytes, never
/// splitting a UTF-8 character.
///
/// A chunk exceeds `chunk_size` only when a single character is wider.
#[must_use]
pub fn chunk_content(content: &str, chunk_size: usize) -> Vec<&str> {
    let size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(content.len() / size + 1);
    let mut start = 0;
    while start < content.len() {
        let mut end = (start + size).min(content.len());
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            end = start + 1;
            while !content.is_char_boundary(end) {
                end += 1;
            }
        }
        chunks.push(&content[start..end]);
        start = end;
    }
    chunks
}

/// Computes a chunked diff.
///
/// Both versions are split into `chunk_size`-byte chunks. The line-level
/// Myers diff runs only on chunk indices present in both whose bytes
/// differ; chunks only present in the new content become a single
/// whole-chunk insert.
#[must_use]
pub fn optimized_diff(
    old: &str,
    new: &str,
    doc_name: &str,
    version: &str,
    chunk_size: usize,
) -> DiffDocument {
    let old_chunks = chunk_content(old, chunk_size);
    let new_chunks = chunk_content(new, chunk_size);

    let mut chunks = Vec::new();
    for (index, new_chunk) in new_chunks.iter().enumerate() {
        match old_chunks.get(index) {
            Some(old_chunk) if old_chunk == new_chunk => {}
            Some(old_chunk) => chunks.push(DiffChunk {
                chunk_index: index,
                operations: diff(old_chunk, new_chunk),
            }),
            None => chunks.push(DiffChunk {
                chunk_index: index,
                operations: vec![EditOp::Insert {
                    old_index: 0,
                    new_index: 0,
                    content: (*new_chunk).to_string(),
                }],
            }),
        }
    }

    debug!(
        doc_name,
        version,
        old_chunks = old_chunks.len(),
        new_chunks = new_chunks.len(),
        changed_chunks = chunks.len(),
        "computed chunked diff"
    );

    DiffDocument {
        metadata: DiffMetadata {
            doc_name: doc_name.to_string(),
            version: version.to_string(),
            timestamp: Utc::now(),
            old_hash: sha256_hex(old.as_bytes()),
            new_hash: sha256_hex(new.as_bytes()),
            chunk_size,
            chunk_count: new_chunks.len(),
        },
        chunks,
    }
}

/// Computes a chunked diff with the default chunk size.
#[must_use]
pub fn generate_diff(old: &str, new: &str, doc_name: &str, version: &str) -> DiffDocument {
    optimized_diff(old, new, doc_name, version, DEFAULT_DIFF_CHUNK_SIZE)
}

/// Rebuilds the new content from `old` and a chunked diff.
///
/// # Errors
///
/// Fails if `old` is not the content the diff was computed against, if an
/// operation does not line up with its old chunk, or if the rebuilt content
/// does not hash to `new_hash`.
pub fn apply_document(old: &str, document: &DiffDocument) -> Result<String, DiffError> {
    let old_hash = sha256_hex(old.as_bytes());
    if old_hash != document.metadata.old_hash {
        return Err(DiffError::BaseHashMismatch {
            expected: document.metadata.old_hash.clone(),
            actual: old_hash,
        });
    }

    let old_chunks = chunk_content(old, document.metadata.chunk_size);
    let mut changed = document.chunks.iter().peekable();
    let mut out = String::with_capacity(old.len());

    for index in 0..document.metadata.chunk_count {
        let base = old_chunks.get(index).copied().unwrap_or("");
        match changed.next_if(|chunk| chunk.chunk_index == index) {
            Some(chunk) => out.push_str(&apply_diff(base, &chunk.operations)?),
            None => out.push_str(base),
        }
    }

    let new_hash = sha256_hex(out.as_bytes());
    if new_hash != document.metadata.new_hash {
        return Err(DiffError::ResultHashMismatch {
            expected: document.metadata.new_hash.clone(),
            actual: new_hash,
        });
    }
    Ok(out)
}
