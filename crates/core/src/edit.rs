//! Edit operation vocabulary.
//!
//! Two closed families of edits cross the library boundary as JSON:
//!
//! - [`LineEdit`] -- line-oriented operations that make up a patch effect.
//! - [`TreeEdit`] -- path-addressed operations produced by the tree diff.
//!
//! Serialized text is decoded into these enums on entry; anything that does
//! not decode is rejected with an input-validation error rather than carried
//! around as loosely-typed JSON.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PatchError;

// ---------------------------------------------------------------------------
// Line edits
// ---------------------------------------------------------------------------

/// One step of a line edit script.
///
/// Scripts are sequential: `pos` indexes the buffer as left by the steps
/// before this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineEdit {
    /// Assert that the line at `pos` is `content`.
    Equal {
        #[serde(alias = "line")]
        pos: usize,
        content: String,
    },
    /// Insert `content` before the line at `pos` (`pos == len` appends).
    Insert {
        #[serde(alias = "line")]
        pos: usize,
        content: String,
    },
    /// Remove the line at `pos`, which must be `content`.
    Delete {
        #[serde(alias = "line")]
        pos: usize,
        content: String,
    },
}

impl LineEdit {
    pub fn pos(&self) -> usize {
        match self {
            Self::Equal { pos, .. } | Self::Insert { pos, .. } | Self::Delete { pos, .. } => *pos,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Equal { content, .. }
            | Self::Insert { content, .. }
            | Self::Delete { content, .. } => content,
        }
    }

    /// Whether this step changes the buffer.
    pub fn is_modification(&self) -> bool {
        !matches!(self, Self::Equal { .. })
    }

    /// The step that undoes this one: inserts become deletes and vice versa.
    pub fn inverse(&self) -> Self {
        match self {
            Self::Equal { pos, content } => Self::Equal {
                pos: *pos,
                content: content.clone(),
            },
            Self::Insert { pos, content } => Self::Delete {
                pos: *pos,
                content: content.clone(),
            },
            Self::Delete { pos, content } => Self::Insert {
                pos: *pos,
                content: content.clone(),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Equal { .. } => "equal",
            Self::Insert { .. } => "insert",
            Self::Delete { .. } => "delete",
        }
    }
}

impl fmt::Display for LineEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sigil = match self {
            Self::Equal { .. } => ' ',
            Self::Insert { .. } => '+',
            Self::Delete { .. } => '-',
        };
        write!(f, "{}{:>5} {}", sigil, self.pos(), self.content())
    }
}

/// Decode a serialized effect into a line edit script.
///
/// The text must be a JSON array of `{"type", "pos", "content"}` objects
/// with `type` one of `equal`, `insert`, `delete`. Line contents may not
/// contain a newline.
pub fn decode_effect(text: &str) -> Result<Vec<LineEdit>, PatchError> {
    let ops: Vec<LineEdit> =
        serde_json::from_str(text).map_err(|e| PatchError::InvalidEffect(e.to_string()))?;

    if let Some((index, _)) = ops
        .iter()
        .enumerate()
        .find(|(_, op)| op.content().contains('\n'))
    {
        return Err(PatchError::InvalidEffect(format!(
            "operation {} content contains a newline",
            index
        )));
    }

    Ok(ops)
}

/// Serialize a line edit script to its JSON text form.
pub fn encode_effect(ops: &[LineEdit]) -> Result<String, PatchError> {
    serde_json::to_string(ops).map_err(|e| PatchError::InvalidEffect(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tree paths
// ---------------------------------------------------------------------------

/// One step from a container into a child.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

/// Ordered sequence of keys/indices from the root of a structured value.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreePath(Vec<PathSegment>);

impl TreePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        Self(segments)
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// Split into the parent path and the final segment.
    pub fn split_last(&self) -> Option<(TreePath, &PathSegment)> {
        self.0
            .split_last()
            .map(|(last, parent)| (TreePath(parent.to_vec()), last))
    }
}

impl From<Vec<PathSegment>> for TreePath {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "$");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(k) if i == 0 => write!(f, "{}", k)?,
                PathSegment::Key(k) => write!(f, ".{}", k)?,
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tree edits
// ---------------------------------------------------------------------------

/// One operation of a structural edit script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeEdit {
    Equal {
        path: TreePath,
    },
    Insert {
        path: TreePath,
        #[serde(rename = "newValue")]
        new_value: Value,
    },
    Delete {
        path: TreePath,
        #[serde(rename = "oldValue")]
        old_value: Value,
    },
    Update {
        path: TreePath,
        #[serde(rename = "oldValue")]
        old_value: Value,
        #[serde(rename = "newValue")]
        new_value: Value,
    },
}

impl TreeEdit {
    pub fn path(&self) -> &TreePath {
        match self {
            Self::Equal { path }
            | Self::Insert { path, .. }
            | Self::Delete { path, .. }
            | Self::Update { path, .. } => path,
        }
    }

    pub fn is_equal(&self) -> bool {
        matches!(self, Self::Equal { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Equal { .. } => "equal",
            Self::Insert { .. } => "insert",
            Self::Delete { .. } => "delete",
            Self::Update { .. } => "update",
        }
    }
}
