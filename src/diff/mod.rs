//! Diff engine for partial page updates.
//!
//! [`diff`] computes a line-level Myers shortest edit script. For page
//! bodies, [`optimized_diff`] first splits both versions into fixed-size
//! byte chunks and diffs only the chunks that differ, producing a
//! [`DiffDocument`] that [`apply_document`] replays against the stored copy.
//!
//! Reconstruction is verified end to end: the stored copy must hash to the
//! diff's `old_hash` and the result to its `new_hash`. Callers treat any
//! [`DiffError`] as "write the full new content instead".
//!
//! # Example
//!
//! ```
//! use docmirror_core::diff::{apply_diff, diff};
//!
//! let old = "a\nb\nc\n";
//! let new = "a\nB\nc\nd\n";
//! let ops = diff(old, new);
//! assert_eq!(apply_diff(old, &ops).unwrap(), new);
//! ```

mod document;
mod myers;

pub use document::{
    DiffChunk, DiffDocument, DiffMetadata, apply_document, chunk_content, generate_diff,
    optimized_diff,
};
pub use myers::{DiffError, EditOp, apply_diff, diff, split_lines};
