//! Line-level Myers shortest edit script.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CrawlError;

/// One step of an edit script.
///
/// Indices are positions in the old and new line arrays at the point the
/// operation applies. Lines keep their trailing `\n`, so concatenating the
/// new side of every operation reproduces the new text byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum EditOp {
    /// Line present in both.
    Equal {
        /// Index in the old lines.
        old_index: usize,
        /// Index in the new lines.
        new_index: usize,
        /// The shared line.
        content: String,
    },
    /// Line only in the new text.
    Insert {
        /// Old-side position the line is inserted at.
        old_index: usize,
        /// Index in the new lines.
        new_index: usize,
        /// The inserted line.
        content: String,
    },
    /// Line only in the old text.
    Delete {
        /// Index in the old lines.
        old_index: usize,
        /// New-side position the line was removed at.
        new_index: usize,
        /// The removed line.
        content: String,
    },
    /// Old line replaced by a new line.
    Replace {
        /// Index in the old lines.
        old_index: usize,
        /// Index in the new lines.
        new_index: usize,
        /// The removed line.
        old_content: String,
        /// The inserted line.
        new_content: String,
    },
}

/// Reconstruction failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    /// An operation does not line up with the base content.
    #[error("edit script does not match base content at old line {index}")]
    BaseMismatch {
        /// Old-line index where the mismatch was found.
        index: usize,
    },

    /// The base content hash differs from the one the diff was made against.
    #[error("base content hash {actual} does not match expected {expected}")]
    BaseHashMismatch {
        /// Hash recorded in the diff.
        expected: String,
        /// Hash of the supplied base.
        actual: String,
    },

    /// The rebuilt content hash differs from the recorded target.
    #[error("rebuilt content hash {actual} does not match expected {expected}")]
    ResultHashMismatch {
        /// Hash recorded in the diff.
        expected: String,
        /// Hash of the rebuilt content.
        actual: String,
    },
}

impl From<DiffError> for CrawlError {
    fn from(err: DiffError) -> Self {
        CrawlError::database("apply diff", err)
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Equal(usize, usize),
    Insert(usize, usize),
    Delete(usize, usize),
}

/// Splits text into lines, keeping line terminators.
#[must_use]
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Computes the shortest edit script turning `old` into `new`.
///
/// Runs of deletions immediately followed by insertions are paired into
/// [`EditOp::Replace`] operations.
#[must_use]
pub fn diff(old: &str, new: &str) -> Vec<EditOp> {
    let a = split_lines(old);
    let b = split_lines(new);
    let steps = backtrack(&a, &b, &shortest_edit_trace(&a, &b));
    into_ops(&a, &b, &steps)
}

/// Replays `ops` on `old`.
///
/// Equal and insert operations contribute their content, replacements their
/// new side, deletions nothing.
///
/// # Errors
///
/// Returns [`DiffError::BaseMismatch`] if the old-side content of the
/// operations does not match `old` line for line.
pub fn apply_diff(old: &str, ops: &[EditOp]) -> Result<String, DiffError> {
    let lines = split_lines(old);
    let mut cursor = 0usize;
    let mut out = String::with_capacity(old.len());

    let mut consume = |index: usize, expected: &str| -> Result<(), DiffError> {
        if index != cursor || lines.get(index).copied() != Some(expected) {
            return Err(DiffError::BaseMismatch { index });
        }
        cursor += 1;
        Ok(())
    };

    for op in ops {
        match op {
            EditOp::Equal {
                old_index, content, ..
            } => {
                consume(*old_index, content.as_str())?;
                out.push_str(content);
            }
            EditOp::Insert { content, .. } => out.push_str(content),
            EditOp::Delete {
                old_index, content, ..
            } => consume(*old_index, content.as_str())?,
            EditOp::Replace {
                old_index,
                old_content,
                new_content,
                ..
            } => {
                consume(*old_index, old_content.as_str())?;
                out.push_str(new_content);
            }
        }
    }

    if cursor != lines.len() {
        return Err(DiffError::BaseMismatch { index: cursor });
    }
    Ok(out)
}

/// Forward pass: one snapshot of the furthest-reaching `x` per diagonal
/// before each edit distance `d`.
fn shortest_edit_trace(a: &[&str], b: &[&str]) -> Vec<Vec<usize>> {
    let n = a.len();
    let m = b.len();
    let max = n + m;
    // Diagonal k lives at index k + offset; k ranges over -max-1..=max+1.
    let offset = max + 1;
    let mut v = vec![0usize; 2 * max + 3];
    let mut trace = Vec::new();

    for d in 0..=max {
        trace.push(v.clone());
        for step in 0..=d {
            let idx = offset + 2 * step - d;
            let mut x = if step == 0 || (step != d && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            // y = x - k, with k = idx - offset.
            let mut y = (x + offset).saturating_sub(idx);
            while x < n && y < m && a[x] == b[y] {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                return trace;
            }
        }
    }
    trace
}

fn backtrack(a: &[&str], b: &[&str], trace: &[Vec<usize>]) -> Vec<Step> {
    let mut x = a.len();
    let mut y = b.len();
    let offset = a.len() + b.len() + 1;
    let mut steps = Vec::new();

    for (d, v) in trace.iter().enumerate().rev() {
        // Diagonal index of (x, y): k + offset.
        let idx = x + offset - y;
        let lowest = offset - d;
        let highest = offset + d;
        let prev_idx = if idx == lowest || (idx != highest && v[idx - 1] < v[idx + 1]) {
            idx + 1
        } else {
            idx - 1
        };
        let prev_x = v[prev_idx];
        let prev_y = (prev_x + offset).saturating_sub(prev_idx);

        while x > prev_x && y > prev_y {
            steps.push(Step::Equal(x - 1, y - 1));
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            if x == prev_x {
                steps.push(Step::Insert(x, y - 1));
            } else {
                steps.push(Step::Delete(x - 1, y));
            }
        }
        x = prev_x;
        y = prev_y;
    }

    steps.reverse();
    steps
}

fn into_ops(a: &[&str], b: &[&str], steps: &[Step]) -> Vec<EditOp> {
    let mut ops = Vec::with_capacity(steps.len());
    let mut i = 0;
    while i < steps.len() {
        match steps[i] {
            Step::Equal(x, y) => {
                ops.push(EditOp::Equal {
                    old_index: x,
                    new_index: y,
                    content: a[x].to_string(),
                });
                i += 1;
            }
            Step::Insert(x, y) => {
                ops.push(EditOp::Insert {
                    old_index: x,
                    new_index: y,
                    content: b[y].to_string(),
                });
                i += 1;
            }
            Step::Delete(..) => {
                let del_start = i;
                while i < steps.len() && matches!(steps[i], Step::Delete(..)) {
                    i += 1;
                }
                let ins_start = i;
                while i < steps.len() && matches!(steps[i], Step::Insert(..)) {
                    i += 1;
                }
                let deletes = &steps[del_start..ins_start];
                let inserts = &steps[ins_start..i];
                let paired = deletes.len().min(inserts.len());

                for (del, ins) in deletes.iter().zip(inserts) {
                    if let (Step::Delete(x, _), Step::Insert(_, y)) = (*del, *ins) {
                        ops.push(EditOp::Replace {
                            old_index: x,
                            new_index: y,
                            old_content: a[x].to_string(),
                            new_content: b[y].to_string(),
                        });
                    }
                }
                for del in &deletes[paired..] {
                    if let Step::Delete(x, y) = *del {
                        ops.push(EditOp::Delete {
                            old_index: x,
                            new_index: y + paired,
                            content: a[x].to_string(),
                        });
                    }
                }
                for ins in &inserts[paired..] {
                    if let Step::Insert(x, y) = *ins {
                        ops.push(EditOp::Insert {
                            old_index: x,
                            new_index: y,
                            content: b[y].to_string(),
                        });
                    }
                }
            }
        }
    }
    ops
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn round_trip(old: &str, new: &str) {
        let ops = diff(old, new);
        assert_eq!(apply_diff(old, &ops).unwrap(), new, "old={old:?} new={new:?}");
    }

    fn edit_count(ops: &[EditOp]) -> usize {
        ops.iter()
            .map(|op| match op {
                EditOp::Equal { .. } => 0,
                EditOp::Insert { .. } | EditOp::Delete { .. } => 1,
                EditOp::Replace { .. } => 2,
            })
            .sum()
    }

    // ==================== Round-trip Tests ====================

    #[test]
    fn test_round_trip_assorted_pairs() {
        let cases = [
            ("", ""),
            ("", "a\nb\n"),
            ("a\nb\n", ""),
            ("a\nb\nc\n", "a\nb\nc\n"),
            ("a\nb\nc\na\nb\nb\na\n", "c\nb\na\nb\na\nc\n"),
            ("one\ntwo\nthree", "one\n2\nthree\nfour"),
            ("x\n", "x"),
            ("<h1>Title</h1>\n<p>old</p>\n", "<h1>Title</h1>\n<p>new</p>\n<p>more</p>\n"),
        ];
        for (old, new) in cases {
            round_trip(old, new);
        }
    }

    #[test]
    fn test_identical_input_is_all_equal() {
        let ops = diff("a\nb\n", "a\nb\n");
        assert!(ops.iter().all(|op| matches!(op, EditOp::Equal { .. })));
        assert_eq!(ops.len(), 2);
    }

    // ==================== Minimality Tests ====================

    #[test]
    fn test_classic_example_is_minimal() {
        // ABCABBA -> CBABAC has edit distance 5.
        let old = "A\nB\nC\nA\nB\nB\nA\n";
        let new = "C\nB\nA\nB\nA\nC\n";
        assert_eq!(edit_count(&diff(old, new)), 5);
    }

    #[test]
    fn test_single_line_change_is_replace() {
        let ops = diff("a\nb\nc\n", "a\nX\nc\n");
        assert_eq!(
            ops[1],
            EditOp::Replace {
                old_index: 1,
                new_index: 1,
                old_content: "b\n".into(),
                new_content: "X\n".into(),
            }
        );
        assert_eq!(ops.len(), 3);
    }

    #[test]
    fn test_pure_insert_and_delete() {
        let ops = diff("a\n", "a\nb\n");
        assert!(matches!(&ops[1], EditOp::Insert { content, new_index: 1, .. } if content == "b\n"));

        let ops = diff("a\nb\n", "b\n");
        assert!(matches!(&ops[0], EditOp::Delete { content, old_index: 0, .. } if content == "a\n"));
    }

    // ==================== Apply Error Tests ====================

    #[test]
    fn test_apply_rejects_wrong_base() {
        let ops = diff("a\nb\n", "a\nc\n");
        assert_eq!(
            apply_diff("z\nb\n", &ops),
            Err(DiffError::BaseMismatch { index: 0 })
        );
        assert!(apply_diff("a\nb\nextra\n", &ops).is_err());
    }

    #[test]
    fn test_ops_serialize_with_operation_tag() {
        let op = EditOp::Insert {
            old_index: 0,
            new_index: 0,
            content: "x".into(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["operation"], "insert");
        assert_eq!(json["content"], "x");
    }
}
