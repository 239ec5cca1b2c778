//! Pure operations on line edit scripts.
//!
//! Content is treated as a sequence of lines split on `\n`; the empty string
//! is the empty sequence. Every function here is total over well-formed
//! scripts and does no I/O, so the persistence layer in
//! [`super::PatchEngine`] can stay thin.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::edit::LineEdit;
use crate::errors::PatchError;

// ---------------------------------------------------------------------------
// Line helpers
// ---------------------------------------------------------------------------

/// Split content into lines. `""` yields no lines.
pub fn split_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    content.split('\n').map(str::to_string).collect()
}

/// Inverse of [`split_lines`].
pub fn join_lines(lines: &[String]) -> String {
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Apply / invert / compose
// ---------------------------------------------------------------------------

/// Run a script against `content`.
///
/// Every `Equal` and `Delete` must find its expected line at `pos`, and every
/// `Insert` must target an existing line or the end of the buffer; otherwise
/// the whole application fails with [`PatchError::IncompatibleContent`].
pub fn apply_effect(content: &str, ops: &[LineEdit]) -> Result<String, PatchError> {
    let mut lines = split_lines(content);

    for op in ops {
        match op {
            LineEdit::Equal { pos, content } => {
                expect_line(&lines, *pos, content)?;
            }
            LineEdit::Insert { pos, content } => {
                if *pos > lines.len() {
                    return Err(PatchError::IncompatibleContent {
                        pos: *pos,
                        detail: format!("insert past end of {} line(s)", lines.len()),
                    });
                }
                lines.insert(*pos, content.clone());
            }
            LineEdit::Delete { pos, content } => {
                expect_line(&lines, *pos, content)?;
                lines.remove(*pos);
            }
        }
    }

    Ok(join_lines(&lines))
}

fn expect_line(lines: &[String], pos: usize, expected: &str) -> Result<(), PatchError> {
    match lines.get(pos) {
        Some(found) if found == expected => Ok(()),
        Some(found) => Err(PatchError::IncompatibleContent {
            pos,
            detail: format!("expected {:?}, found {:?}", expected, found),
        }),
        None => Err(PatchError::IncompatibleContent {
            pos,
            detail: format!("line out of range ({} line(s))", lines.len()),
        }),
    }
}

/// The script that undoes `ops`: steps reversed, inserts and deletes swapped.
pub fn invert_effect(ops: &[LineEdit]) -> Vec<LineEdit> {
    ops.iter().rev().map(LineEdit::inverse).collect()
}

/// A single script equivalent to running `first` then `second`.
pub fn compose_effects(first: &[LineEdit], second: &[LineEdit]) -> Vec<LineEdit> {
    first.iter().chain(second.iter()).cloned().collect()
}

// ---------------------------------------------------------------------------
// Commute
// ---------------------------------------------------------------------------

/// Where a buffer line came from while replaying a script.
enum Origin {
    Base(usize),
    Added(String),
}

/// A script's net effect expressed in coordinates of the shared base.
#[derive(Debug, Default)]
struct BaseProjection {
    /// Base lines removed, by base index.
    deletes: BTreeMap<usize, String>,
    /// Lines added immediately before the given base index.
    inserts: BTreeMap<usize, Vec<String>>,
    /// Base lines asserted but left alone.
    equals: BTreeMap<usize, String>,
}

impl BaseProjection {
    fn of(ops: &[LineEdit]) -> Self {
        let mut buffer: Vec<Origin> = Vec::new();
        // Base lines at and after `tail` are not materialized yet.
        let mut tail = 0usize;
        let mut projection = Self::default();

        let materialize = |buffer: &mut Vec<Origin>, tail: &mut usize, len: usize| {
            while buffer.len() < len {
                buffer.push(Origin::Base(*tail));
                *tail += 1;
            }
        };

        for op in ops {
            match op {
                LineEdit::Equal { pos, content } => {
                    materialize(&mut buffer, &mut tail, pos + 1);
                    if let Origin::Base(i) = &buffer[*pos] {
                        projection.equals.insert(*i, content.clone());
                    }
                }
                LineEdit::Insert { pos, content } => {
                    materialize(&mut buffer, &mut tail, *pos);
                    buffer.insert(*pos, Origin::Added(content.clone()));
                }
                LineEdit::Delete { pos, content } => {
                    materialize(&mut buffer, &mut tail, pos + 1);
                    if let Origin::Base(i) = buffer.remove(*pos) {
                        projection.deletes.insert(i, content.clone());
                    }
                }
            }
        }

        // Each added line is anchored to the next surviving base line.
        let mut pending: Vec<String> = Vec::new();
        for origin in buffer {
            match origin {
                Origin::Added(line) => pending.push(line),
                Origin::Base(i) => {
                    if !pending.is_empty() {
                        projection
                            .inserts
                            .entry(i)
                            .or_default()
                            .append(&mut pending);
                    }
                }
            }
        }
        if !pending.is_empty() {
            projection.inserts.entry(tail).or_default().append(&mut pending);
        }

        projection
    }

    /// Base positions this script changes: deleted lines and insert anchors.
    fn touched(&self) -> BTreeSet<usize> {
        self.deletes
            .keys()
            .chain(self.inserts.keys())
            .copied()
            .collect()
    }

    /// Re-express this projection as a sequential script that runs on the
    /// output of `applied` instead of on the base.
    fn rebase_onto(&self, applied: &BaseProjection) -> Vec<LineEdit> {
        let indices: BTreeSet<usize> = self
            .touched()
            .into_iter()
            .chain(self.equals.keys().copied())
            .chain(applied.touched())
            .collect();

        let mut ops = Vec::new();
        let mut offset: isize = 0;

        for i in indices {
            let start = (i as isize + offset).max(0) as usize;
            let applied_inserts = applied.inserts.get(&i).map_or(0, Vec::len);
            let applied_deleted = applied.deletes.contains_key(&i);

            let mut cursor = start + applied_inserts;
            let own_inserts = self.inserts.get(&i).map_or(&[][..], Vec::as_slice);
            for line in own_inserts {
                ops.push(LineEdit::Insert {
                    pos: cursor,
                    content: line.clone(),
                });
                cursor += 1;
            }

            let mut own_deleted = false;
            if !applied_deleted {
                if let Some(content) = self.deletes.get(&i) {
                    ops.push(LineEdit::Delete {
                        pos: cursor,
                        content: content.clone(),
                    });
                    own_deleted = true;
                } else if let Some(content) = self.equals.get(&i) {
                    ops.push(LineEdit::Equal {
                        pos: cursor,
                        content: content.clone(),
                    });
                }
            }

            offset += (applied_inserts + own_inserts.len()) as isize
                - applied_deleted as isize
                - own_deleted as isize;
        }

        ops
    }
}

/// Reorder two independent scripts that share a base.
///
/// Returns `(first', second')` such that `second'` runs on the output of
/// `first` and `first'` runs on the output of `second`, both ending at the
/// same content. Fails with [`PatchError::CannotCommute`] when both scripts
/// modify the same base position: the same line deleted twice, an insert
/// next to a line the other side deletes, or two inserts at the same spot.
pub fn commute_effects(
    first: &[LineEdit],
    second: &[LineEdit],
) -> Result<(Vec<LineEdit>, Vec<LineEdit>), PatchError> {
    let p1 = BaseProjection::of(first);
    let p2 = BaseProjection::of(second);

    if let Some(line) = p1.touched().intersection(&p2.touched()).next() {
        return Err(PatchError::CannotCommute(format!(
            "both patches modify base line {}",
            line
        )));
    }

    let first_prime = p1.rebase_onto(&p2);
    let second_prime = p2.rebase_onto(&p1);
    debug!(
        first_ops = first_prime.len(),
        second_ops = second_prime.len(),
        "commuted line edit scripts"
    );
    Ok((first_prime, second_prime))
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Compute a sequential script that turns `old` into `new`.
///
/// Unchanged lines are kept as `Equal` steps so the script also verifies
/// the content it is applied to.
pub fn diff_lines(old: &str, new: &str) -> Vec<LineEdit> {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let old_text = terminated(&old_lines);
    let new_text = terminated(&new_lines);

    let patch = diffy::create_patch(&old_text, &new_text);

    let mut ops = Vec::new();
    let mut pos = 0usize;
    let mut old_cursor = 0usize;

    let keep_until = |ops: &mut Vec<LineEdit>, pos: &mut usize, cursor: &mut usize, end: usize| {
        while *cursor < end && *cursor < old_lines.len() {
            ops.push(LineEdit::Equal {
                pos: *pos,
                content: old_lines[*cursor].clone(),
            });
            *pos += 1;
            *cursor += 1;
        }
    };

    for hunk in patch.hunks() {
        // Hunk ranges are 1-based.
        let hunk_start = hunk.old_range().start().saturating_sub(1);
        keep_until(&mut ops, &mut pos, &mut old_cursor, hunk_start);

        for line in hunk.lines() {
            match line {
                diffy::Line::Context(text) => {
                    ops.push(LineEdit::Equal {
                        pos,
                        content: strip_newline(text),
                    });
                    pos += 1;
                    old_cursor += 1;
                }
                diffy::Line::Delete(text) => {
                    ops.push(LineEdit::Delete {
                        pos,
                        content: strip_newline(text),
                    });
                    old_cursor += 1;
                }
                diffy::Line::Insert(text) => {
                    ops.push(LineEdit::Insert {
                        pos,
                        content: strip_newline(text),
                    });
                    pos += 1;
                }
            }
        }
    }
    keep_until(&mut ops, &mut pos, &mut old_cursor, usize::MAX);

    ops
}

fn terminated(lines: &[String]) -> String {
    let mut text = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    text
}

fn strip_newline(text: &str) -> String {
    text.strip_suffix('\n').unwrap_or(text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(pos: usize, content: &str) -> LineEdit {
        LineEdit::Insert {
            pos,
            content: content.into(),
        }
    }

    fn del(pos: usize, content: &str) -> LineEdit {
        LineEdit::Delete {
            pos,
            content: content.into(),
        }
    }

    fn eq(pos: usize, content: &str) -> LineEdit {
        LineEdit::Equal {
            pos,
            content: content.into(),
        }
    }

    #[test]
    fn test_split_and_join() {
        assert!(split_lines("").is_empty());
        assert_eq!(split_lines("a\nb"), vec!["a", "b"]);
        assert_eq!(split_lines("a\n"), vec!["a", ""]);
        assert_eq!(join_lines(&split_lines("x\ny\nz")), "x\ny\nz");
    }

    #[test]
    fn test_apply_insert_delete_equal() {
        let ops = vec![eq(0, "a"), del(1, "b"), ins(1, "B"), ins(3, "d")];
        assert_eq!(apply_effect("a\nb\nc", &ops).unwrap(), "a\nB\nc\nd");
    }

    #[test]
    fn test_apply_rejects_mismatched_content() {
        let err = apply_effect("a\nb", &[del(1, "x")]).unwrap_err();
        assert!(matches!(err, PatchError::IncompatibleContent { pos: 1, .. }));

        let err = apply_effect("a", &[eq(3, "a")]).unwrap_err();
        assert!(matches!(err, PatchError::IncompatibleContent { pos: 3, .. }));

        let err = apply_effect("a", &[ins(5, "z")]).unwrap_err();
        assert!(matches!(err, PatchError::IncompatibleContent { pos: 5, .. }));
    }

    #[test]
    fn test_empty_script_is_identity() {
        assert_eq!(apply_effect("a\nb", &[]).unwrap(), "a\nb");
        assert_eq!(apply_effect("", &[]).unwrap(), "");
    }

    #[test]
    fn test_invert_restores_original() {
        let original = "one\ntwo\nthree";
        let ops = vec![del(0, "one"), ins(1, "2.5"), ins(3, "four"), eq(0, "two")];
        let changed = apply_effect(original, &ops).unwrap();
        assert_eq!(changed, "two\n2.5\nthree\nfour");
        assert_eq!(apply_effect(&changed, &invert_effect(&ops)).unwrap(), original);
    }

    #[test]
    fn test_compose_matches_sequential_application() {
        let a = "a\nb\nc";
        let p = vec![del(1, "b")];
        let q = vec![ins(0, "z"), eq(2, "c")];
        let via_steps = apply_effect(&apply_effect(a, &p).unwrap(), &q).unwrap();
        let via_compose = apply_effect(a, &compose_effects(&p, &q)).unwrap();
        assert_eq!(via_steps, via_compose);
        assert_eq!(via_compose, "z\na\nc");
    }

    #[test]
    fn test_commute_disjoint_edits_reach_same_result() {
        let base = "l0\nl1\nl2\nl3\nl4";
        let first = vec![del(1, "l1")];
        let second = vec![ins(4, "new"), del(5, "l4")];

        let (first_prime, second_prime) = commute_effects(&first, &second).unwrap();

        let via_first = apply_effect(&apply_effect(base, &first).unwrap(), &second_prime).unwrap();
        let via_second = apply_effect(&apply_effect(base, &second).unwrap(), &first_prime).unwrap();
        assert_eq!(via_first, via_second);
        assert_eq!(via_first, "l0\nl2\nl3\nnew");
    }

    #[test]
    fn test_commute_adjacent_edits_are_independent() {
        let base = "a\nb\nc";
        // Delete line 0 on one side, insert before line 1 on the other.
        let first = vec![del(0, "a")];
        let second = vec![ins(1, "x")];

        let (first_prime, second_prime) = commute_effects(&first, &second).unwrap();
        let left = apply_effect(&apply_effect(base, &first).unwrap(), &second_prime).unwrap();
        let right = apply_effect(&apply_effect(base, &second).unwrap(), &first_prime).unwrap();
        assert_eq!(left, right);
        assert_eq!(left, "x\nb\nc");
    }

    #[test]
    fn test_commute_overlapping_edits_fail() {
        let err = commute_effects(&[del(1, "b")], &[del(1, "b")]).unwrap_err();
        assert!(matches!(err, PatchError::CannotCommute(_)));

        let err = commute_effects(&[ins(2, "x")], &[ins(2, "y")]).unwrap_err();
        assert!(matches!(err, PatchError::CannotCommute(_)));

        let err = commute_effects(&[ins(1, "x")], &[del(1, "b")]).unwrap_err();
        assert!(matches!(err, PatchError::CannotCommute(_)));
    }

    #[test]
    fn test_commute_drops_assertions_on_lines_the_other_side_deletes() {
        let base = "a\nb\nc";
        let first = vec![eq(1, "b"), ins(3, "d")];
        let second = vec![del(1, "b")];

        let (first_prime, second_prime) = commute_effects(&first, &second).unwrap();
        assert!(first_prime.iter().all(|op| op.content() != "b"));

        let left = apply_effect(&apply_effect(base, &first).unwrap(), &second_prime).unwrap();
        let right = apply_effect(&apply_effect(base, &second).unwrap(), &first_prime).unwrap();
        assert_eq!(left, right);
        assert_eq!(left, "a\nc\nd");
    }

    #[test]
    fn test_commute_with_empty_script() {
        let ops = vec![ins(0, "x")];
        let (first_prime, second_prime) = commute_effects(&ops, &[]).unwrap();
        assert_eq!(first_prime, ops);
        assert!(second_prime.is_empty());
    }

    #[test]
    fn test_diff_lines_round_trips() {
        let cases = [
            ("", ""),
            ("", "a\nb"),
            ("a\nb", ""),
            ("a\nb\nc", "a\nc"),
            ("a\nb\nc", "a\nB\nc\nd"),
            (
                "1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n11\n12",
                "1\n2\nthree\n4\n5\n6\n7\n8\n9\n10\n11\ntwelve",
            ),
        ];
        for (old, new) in cases {
            let ops = diff_lines(old, new);
            assert_eq!(apply_effect(old, &ops).unwrap(), new, "{:?} -> {:?}", old, new);
            assert_eq!(apply_effect(new, &invert_effect(&ops)).unwrap(), old);
        }
    }

    #[test]
    fn test_diff_identical_is_all_equal() {
        let ops = diff_lines("a\nb", "a\nb");
        assert_eq!(ops, vec![eq(0, "a"), eq(1, "b")]);
    }
}
