//! The provider seam of the resolution chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::Database;
use crate::errors::ConflictError;

/// Category every conflict resolution provider reports.
pub const PROVIDER_CATEGORY: &str = "conflict-resolution";

/// Two divergent versions of the same content, plus what is known about
/// where they came from.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionRequest<'a> {
    pub v1: &'a str,
    pub v2: &'a str,
    /// Common ancestor, when the caller has one.
    pub base: Option<&'a str>,
    /// Opaque description of what is being merged (a document path, a key).
    pub context: &'a str,
    pub requested_at: DateTime<Utc>,
}

impl ResolutionRequest<'_> {
    /// Cache key for this request: hex SHA-256 over `v1`, `v2` and `context`.
    ///
    /// Each part is length-prefixed so that moving bytes between parts
    /// changes the key.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [self.v1, self.v2, self.context] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// What a single provider made of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Resolved {
        result: String,
    },
    CannotResolve {
        reason: String,
        /// Set when the provider queued the conflict for human review.
        pending_conflict: Option<String>,
    },
}

impl ResolutionOutcome {
    pub fn cannot(reason: impl Into<String>) -> Self {
        Self::CannotResolve {
            reason: reason.into(),
            pending_conflict: None,
        }
    }
}

/// A strategy for merging two divergent versions.
///
/// Providers are consulted in ascending `priority`; the first one that
/// returns [`ResolutionOutcome::Resolved`] wins.
pub trait ConflictResolutionProvider: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> &str {
        PROVIDER_CATEGORY
    }

    fn priority(&self) -> i32;

    /// Try to merge `request.v1` and `request.v2`.
    ///
    /// Declining is an outcome, not an error; `Err` is reserved for
    /// failures of the provider's own collaborators.
    fn attempt(
        &self,
        request: &ResolutionRequest<'_>,
        db: &Database,
    ) -> Result<ResolutionOutcome, ConflictError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(v1: &'a str, v2: &'a str, context: &'a str) -> ResolutionRequest<'a> {
        ResolutionRequest {
            v1,
            v2,
            base: None,
            context,
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn test_cache_key_is_stable_and_hex() {
        let key = request("a", "b", "doc").cache_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, request("a", "b", "doc").cache_key());
    }

    #[test]
    fn test_cache_key_separates_parts() {
        assert_ne!(
            request("ab", "c", "x").cache_key(),
            request("a", "bc", "x").cache_key()
        );
        assert_ne!(
            request("a", "b", "x").cache_key(),
            request("b", "a", "x").cache_key()
        );
    }

    #[test]
    fn test_cache_key_ignores_base() {
        let mut with_base = request("a", "b", "doc");
        with_base.base = Some("o");
        assert_eq!(with_base.cache_key(), request("a", "b", "doc").cache_key());
    }
}
