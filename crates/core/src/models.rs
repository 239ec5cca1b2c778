//! Record types persisted by the database layer.
//!
//! These types bridge the patch engine, the resolution chain, the version
//! store, and the SQLite query helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::edit::LineEdit;

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// A named, directional line edit script between two content labels.
///
/// Patches are immutable once stored; every transform yields a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub id: String,
    pub base: String,
    pub target: String,
    pub effect: Vec<LineEdit>,
    /// IDs of the patches this one was derived from (inverse, compose, commute).
    pub dependencies: Vec<String>,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Conflict resolution
// ---------------------------------------------------------------------------

/// Registry metadata for a conflict resolution provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub name: String,
    pub category: String,
    pub priority: i32,
    pub registered_seq: i64,
    pub updated_at: String,
}

/// A cached successful resolution keyed by `(v1, v2, context)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub key: String,
    pub v1: String,
    pub v2: String,
    pub base: Option<String>,
    pub context: String,
    pub result: String,
    pub provider: String,
    pub resolved_at: String,
}

/// Review state of a pending conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    /// Waiting for a human decision.
    Pending,
    /// Looked at, decision postponed.
    Deferred,
    /// A human picked the outcome.
    Resolved,
}

impl PendingStatus {
    /// Parse a stored status string. Unknown values read as `Pending`.
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "deferred" => Self::Deferred,
            "resolved" => Self::Resolved,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deferred => "deferred",
            Self::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted, unresolved merge awaiting human review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConflict {
    pub id: String,
    pub base: Option<String>,
    pub v1: String,
    pub v2: String,
    pub context: String,
    /// `v1`, `v2`, then `base` if supplied; duplicates removed.
    pub candidates: Vec<String>,
    pub status: PendingStatus,
    pub resolution: Option<String>,
    pub resolved_by: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

impl PendingConflict {
    /// Build a fresh pending conflict with a new UUID.
    pub fn new(
        v1: impl Into<String>,
        v2: impl Into<String>,
        base: Option<String>,
        context: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        let v1 = v1.into();
        let v2 = v2.into();

        let mut candidates: Vec<String> = Vec::with_capacity(3);
        for candidate in [Some(&v1), Some(&v2), base.as_ref()].into_iter().flatten() {
            if !candidates.contains(candidate) {
                candidates.push(candidate.clone());
            }
        }

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            base,
            v1,
            v2,
            context: context.into(),
            candidates,
            status: PendingStatus::Pending,
            resolution: None,
            resolved_by: None,
            created_at: created_at.into(),
            resolved_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Temporal versions
// ---------------------------------------------------------------------------

/// A content snapshot with system-time and valid-time intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalVersion {
    pub id: String,
    /// Name of the version store this record belongs to.
    pub store: String,
    pub content_hash: String,
    pub metadata: String,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub system_from: DateTime<Utc>,
    /// `None` while this is the store's current version.
    pub system_to: Option<DateTime<Utc>>,
    /// The version this one corrected, when created by `supersede`.
    pub supersedes: Option<String>,
}

impl TemporalVersion {
    pub fn is_open(&self) -> bool {
        self.system_to.is_none()
    }

    /// `system_from <= t < system_to`, with an open `system_to` as +infinity.
    pub fn system_contains(&self, t: DateTime<Utc>) -> bool {
        self.system_from <= t && self.system_to.map_or(true, |to| t < to)
    }

    /// `valid_from <= t <= valid_to`, absent bounds being open.
    pub fn valid_contains(&self, t: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| from <= t) && self.valid_to.map_or(true, |to| t <= to)
    }

    /// Whether `[system_from, system_to)` overlaps `[start, end]`.
    pub fn system_overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.system_from <= end && self.system_to.map_or(true, |to| to > start)
    }

    /// Whether `[valid_from, valid_to]` overlaps `[start, end]`.
    pub fn valid_overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| from <= end)
            && self.valid_to.map_or(true, |to| to >= start)
    }
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// A row from the `audit_log` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub subject_id: Option<String>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}
