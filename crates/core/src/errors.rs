//! Error types for the Concord core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Outcomes that are part of normal operation (a conflict no provider could
//! resolve, an empty version store) are modelled as return values, not
//! errors.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    TreeDiff(#[from] TreeDiffError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Temporal(#[from] TemporalError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Patch errors
// ---------------------------------------------------------------------------

/// Errors from the patch algebra.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The serialized effect is not a well-formed line edit script.
    #[error("invalid patch effect: {0}")]
    InvalidEffect(String),

    /// No patch with this ID is stored.
    #[error("patch not found: {0}")]
    NotFound(String),

    /// `first.target` does not line up with `second.base`.
    #[error("patches are not sequential: first.target '{first_target}' != second.base '{second_base}'")]
    NonSequential {
        first_target: String,
        second_base: String,
    },

    /// The two patches cannot be reordered.
    #[error("patches cannot commute: {0}")]
    CannotCommute(String),

    /// The content does not match what the patch expects.
    #[error("content does not match patch at line {pos}: {detail}")]
    IncompatibleContent { pos: usize, detail: String },

    /// Database error while loading or storing a patch.
    #[error("patch database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Tree diff errors
// ---------------------------------------------------------------------------

/// Errors from the structural differencer.
#[derive(Debug, Error)]
pub enum TreeDiffError {
    /// One of the inputs does not decode to a structured value.
    #[error("unsupported content in {side}: {detail}")]
    UnsupportedContent { side: String, detail: String },

    /// A tree edit could not be replayed onto a value.
    #[error("cannot apply tree edit at '{path}': {detail}")]
    ApplyFailed { path: String, detail: String },
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from the conflict resolution chain and pending-conflict review.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// The requested pending conflict ID was not found.
    #[error("conflict not found: {0}")]
    NotFound(String),

    /// Attempted to resolve a conflict that is already resolved.
    #[error("conflict {0} is already resolved")]
    AlreadyResolved(String),

    /// The provided resolution is invalid.
    #[error("invalid resolution for conflict {id}: {detail}")]
    InvalidResolution { id: String, detail: String },

    /// A provider name that is not one of the built-ins.
    #[error("unknown resolution provider: {0}")]
    UnknownProvider(String),

    /// Database error when persisting conflict data.
    #[error("conflict database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Temporal errors
// ---------------------------------------------------------------------------

/// Errors from the bitemporal version store.
#[derive(Debug, Error)]
pub enum TemporalError {
    /// No version matches the ID or the requested instant.
    #[error("version not found: {0}")]
    NotFound(String),

    /// `between` was called with an unknown time dimension.
    #[error("invalid time dimension '{0}': expected \"system\" or \"valid\"")]
    InvalidDimension(String),

    /// A valid-time interval ends before it starts.
    #[error("invalid valid-time interval: {0}")]
    InvalidInterval(String),

    /// Database error when reading or writing versions.
    #[error("temporal database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stored column could not be decoded (bad JSON or timestamp).
    #[error("corrupt {entity} record {id}: {detail}")]
    Corrupt {
        entity: String,
        id: String,
        detail: String,
    },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = PatchError::NotFound("patch-1".into());
        assert_eq!(err.to_string(), "patch not found: patch-1");

        let err = PatchError::NonSequential {
            first_target: "v2".into(),
            second_base: "v3".into(),
        };
        assert!(err.to_string().contains("'v2'"));
        assert!(err.to_string().contains("'v3'"));

        let err = TemporalError::InvalidDimension("bad".into());
        assert!(err.to_string().contains("'bad'"));

        let err = TreeDiffError::UnsupportedContent {
            side: "content_a".into(),
            detail: "expected value".into(),
        };
        assert!(err.to_string().contains("content_a"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let patch_err = PatchError::CannotCommute("overlap".into());
        let core_err: CoreError = patch_err.into();
        assert!(matches!(core_err, CoreError::Patch(_)));

        let db_err = DatabaseError::NotFound {
            entity: "patch".into(),
            id: "abc".into(),
        };
        let core_err: CoreError = CoreError::Database(db_err);
        assert!(matches!(core_err, CoreError::Database(_)));
    }
}
