//! Structural differencing for tree-shaped content.
//!
//! Both inputs are decoded as JSON and walked in parallel. Objects are
//! matched key by key (in sorted key order), arrays index by index, so the
//! resulting edit script keeps the structure that a line diff would flatten.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::edit::{PathSegment, TreeEdit, TreePath};
use crate::errors::TreeDiffError;

/// Knobs for [`TreeDiff::compute_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDiffOptions {
    /// Also emit `Equal` edits for unchanged leaves.
    pub emit_equal: bool,
}

/// Result of a structural diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDiff {
    pub edits: Vec<TreeEdit>,
    /// Number of leaves touched by the non-`Equal` edits.
    pub distance: usize,
}

impl TreeDiff {
    /// Diff two serialized documents with default options.
    pub fn compute(content_a: &[u8], content_b: &[u8]) -> Result<Self, TreeDiffError> {
        Self::compute_with(content_a, content_b, TreeDiffOptions::default())
    }

    /// Diff two serialized documents.
    ///
    /// Fails with [`TreeDiffError::UnsupportedContent`] naming the first
    /// side that does not decode as JSON.
    pub fn compute_with(
        content_a: &[u8],
        content_b: &[u8],
        options: TreeDiffOptions,
    ) -> Result<Self, TreeDiffError> {
        let a = parse_side(content_a, "content_a")?;
        let b = parse_side(content_b, "content_b")?;
        let diff = Self::between(&a, &b, options);
        debug!(
            edits = diff.edits.len(),
            distance = diff.distance,
            "computed tree diff"
        );
        Ok(diff)
    }

    /// Diff two already-decoded values.
    pub fn between(a: &Value, b: &Value, options: TreeDiffOptions) -> Self {
        let mut walker = Walker {
            options,
            edits: Vec::new(),
            distance: 0,
        };
        walker.walk(a, b, &TreePath::root());
        Self {
            edits: walker.edits,
            distance: walker.distance,
        }
    }

    pub fn is_identical(&self) -> bool {
        self.distance == 0
    }
}

fn parse_side(content: &[u8], side: &str) -> Result<Value, TreeDiffError> {
    serde_json::from_slice(content).map_err(|e| TreeDiffError::UnsupportedContent {
        side: side.to_string(),
        detail: e.to_string(),
    })
}

/// Number of scalar leaves in a value; an empty container counts as one.
pub fn leaf_count(value: &Value) -> usize {
    match value {
        Value::Object(map) if !map.is_empty() => map.values().map(leaf_count).sum(),
        Value::Array(items) if !items.is_empty() => items.iter().map(leaf_count).sum(),
        _ => 1,
    }
}

struct Walker {
    options: TreeDiffOptions,
    edits: Vec<TreeEdit>,
    distance: usize,
}

impl Walker {
    fn walk(&mut self, a: &Value, b: &Value, path: &TreePath) {
        match (a, b) {
            (Value::Object(map_a), Value::Object(map_b)) => {
                let mut keys: Vec<&String> = map_a.keys().collect();
                keys.sort();
                for key in keys {
                    let child = path.key(key.as_str());
                    match map_b.get(key) {
                        Some(value_b) => self.walk(&map_a[key], value_b, &child),
                        None => self.delete(child, &map_a[key]),
                    }
                }

                let mut added: Vec<&String> =
                    map_b.keys().filter(|k| !map_a.contains_key(*k)).collect();
                added.sort();
                for key in added {
                    self.insert(path.key(key.as_str()), &map_b[key]);
                }
            }
            (Value::Array(items_a), Value::Array(items_b)) => {
                let common = items_a.len().min(items_b.len());
                for i in 0..common {
                    self.walk(&items_a[i], &items_b[i], &path.index(i));
                }
                for (i, item) in items_a.iter().enumerate().skip(common) {
                    self.delete(path.index(i), item);
                }
                for (i, item) in items_b.iter().enumerate().skip(common) {
                    self.insert(path.index(i), item);
                }
            }
            _ if a == b => {
                if self.options.emit_equal {
                    self.edits.push(TreeEdit::Equal { path: path.clone() });
                }
            }
            _ => {
                self.distance += leaf_count(a).max(leaf_count(b));
                self.edits.push(TreeEdit::Update {
                    path: path.clone(),
                    old_value: a.clone(),
                    new_value: b.clone(),
                });
            }
        }
    }

    fn delete(&mut self, path: TreePath, old_value: &Value) {
        self.distance += leaf_count(old_value);
        self.edits.push(TreeEdit::Delete {
            path,
            old_value: old_value.clone(),
        });
    }

    fn insert(&mut self, path: TreePath, new_value: &Value) {
        self.distance += leaf_count(new_value);
        self.edits.push(TreeEdit::Insert {
            path,
            new_value: new_value.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Replay a tree edit script onto `value`.
///
/// Updates run first, then deletes (deepest and highest index first so array
/// positions stay valid), then inserts in ascending path order. `Equal`
/// edits are ignored.
pub fn apply(value: &Value, edits: &[TreeEdit]) -> Result<Value, TreeDiffError> {
    let mut root = value.clone();

    for edit in edits {
        if let TreeEdit::Update {
            path, new_value, ..
        } = edit
        {
            let slot = locate(&mut root, path)?;
            *slot = new_value.clone();
        }
    }

    let mut deletes: Vec<&TreePath> = edits
        .iter()
        .filter(|e| matches!(e, TreeEdit::Delete { .. }))
        .map(TreeEdit::path)
        .collect();
    deletes.sort_by(|x, y| y.cmp(x));
    for path in deletes {
        let (parent_path, last) = split(path)?;
        let parent = locate(&mut root, &parent_path)?;
        match (parent, last) {
            (Value::Object(map), PathSegment::Key(key)) => {
                if map.remove(key).is_none() {
                    return Err(apply_failed(path, "key does not exist"));
                }
            }
            (Value::Array(items), PathSegment::Index(i)) if *i < items.len() => {
                items.remove(*i);
            }
            _ => return Err(apply_failed(path, "nothing to delete")),
        }
    }

    let mut inserts: Vec<(&TreePath, &Value)> = edits
        .iter()
        .filter_map(|e| match e {
            TreeEdit::Insert { path, new_value } => Some((path, new_value)),
            _ => None,
        })
        .collect();
    inserts.sort_by(|x, y| x.0.cmp(y.0));
    for (path, new_value) in inserts {
        let (parent_path, last) = split(path)?;
        let parent = locate(&mut root, &parent_path)?;
        match (parent, last) {
            (Value::Object(map), PathSegment::Key(key)) => {
                map.insert(key.clone(), new_value.clone());
            }
            (Value::Array(items), PathSegment::Index(i)) if *i <= items.len() => {
                items.insert(*i, new_value.clone());
            }
            _ => return Err(apply_failed(path, "cannot insert here")),
        }
    }

    Ok(root)
}

fn split(path: &TreePath) -> Result<(TreePath, &PathSegment), TreeDiffError> {
    path.split_last()
        .ok_or_else(|| apply_failed(path, "root cannot be inserted or deleted"))
}

fn locate<'a>(root: &'a mut Value, path: &TreePath) -> Result<&'a mut Value, TreeDiffError> {
    let mut current = root;
    for segment in path.segments() {
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map
                .get_mut(key)
                .ok_or_else(|| apply_failed(path, "missing key"))?,
            (Value::Array(items), PathSegment::Index(i)) => items
                .get_mut(*i)
                .ok_or_else(|| apply_failed(path, "index out of range"))?,
            _ => return Err(apply_failed(path, "path does not match value shape")),
        };
    }
    Ok(current)
}

fn apply_failed(path: &TreePath, detail: &str) -> TreeDiffError {
    TreeDiffError::ApplyFailed {
        path: path.to_string(),
        detail: detail.to_string(),
    }
}
