//! Human review of queued conflicts.
//!
//! The [`ConflictReview`] provides named operations for settling a pending
//! conflict: accept one of its candidates, supply custom content, or defer
//! the decision. Accepted outcomes are also written to the resolution cache
//! (unless caching is disabled), so the chain answers the same conflict
//! without queuing it again. Both writes commit together or not at all.

use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::db::{queries, Database};
use crate::errors::{ConflictError, DatabaseError};
use crate::models::{PendingConflict, PendingStatus, ResolutionRecord};

use super::manual::MANUAL_NAME;
use super::provider::ResolutionRequest;

/// Review operations over the `pending_conflicts` table.
#[derive(Debug, Clone)]
pub struct ConflictReview {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    cache_resolutions: bool,
}

impl ConflictReview {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
            cache_resolutions: true,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether accepted outcomes are written to the resolution cache.
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.cache_resolutions = enabled;
        self
    }

    /// List conflicts, optionally filtered by status, newest first.
    pub fn list(
        &self,
        status: Option<PendingStatus>,
        limit: u32,
    ) -> Result<Vec<PendingConflict>, ConflictError> {
        Ok(self.db.list_pending_conflicts(status, limit)?)
    }

    /// Load one conflict.
    pub fn get(&self, id: &str) -> Result<PendingConflict, ConflictError> {
        self.db.get_pending_conflict(id).map_err(|e| match e {
            DatabaseError::NotFound { .. } => ConflictError::NotFound(id.to_string()),
            other => other.into(),
        })
    }

    /// Resolve a conflict with one of its candidates (0-based index).
    /// Returns the accepted content.
    pub fn accept_candidate(
        &self,
        id: &str,
        index: usize,
        resolved_by: &str,
    ) -> Result<String, ConflictError> {
        let conflict = self.open_conflict(id)?;
        let content = conflict.candidates.get(index).cloned().ok_or_else(|| {
            ConflictError::InvalidResolution {
                id: id.to_string(),
                detail: format!(
                    "candidate index {} out of range ({} candidate(s))",
                    index,
                    conflict.candidates.len()
                ),
            }
        })?;

        info!(id, index, resolved_by, "resolving conflict: accept candidate");
        self.apply_resolution(&conflict, &content, resolved_by, &format!("candidate {}", index))?;
        Ok(content)
    }

    /// Resolve a conflict with content that is not one of its candidates.
    pub fn accept_custom(
        &self,
        id: &str,
        content: &str,
        resolved_by: &str,
    ) -> Result<(), ConflictError> {
        let conflict = self.open_conflict(id)?;
        info!(id, resolved_by, "resolving conflict: accept custom content");
        self.apply_resolution(&conflict, content, resolved_by, "custom")
    }

    /// Postpone the decision. Deferred conflicts can still be resolved later.
    pub fn defer(&self, id: &str, deferred_by: &str) -> Result<(), ConflictError> {
        let conflict = self.open_conflict(id)?;
        self.db.defer_pending_conflict(&conflict.id)?;
        self.db.record_audit(
            "conflict.defer",
            Some(id),
            Some(&format!("by={}", deferred_by)),
            true,
        );
        debug!(id, deferred_by, "conflict deferred");
        Ok(())
    }

    fn open_conflict(&self, id: &str) -> Result<PendingConflict, ConflictError> {
        let conflict = self.get(id)?;
        if conflict.status == PendingStatus::Resolved {
            return Err(ConflictError::AlreadyResolved(id.to_string()));
        }
        Ok(conflict)
    }

    fn apply_resolution(
        &self,
        conflict: &PendingConflict,
        content: &str,
        resolved_by: &str,
        strategy: &str,
    ) -> Result<(), ConflictError> {
        let now = self.clock.now();
        let resolved_at = crate::clock::format_instant(now);
        let request = ResolutionRequest {
            v1: &conflict.v1,
            v2: &conflict.v2,
            base: conflict.base.as_deref(),
            context: &conflict.context,
            requested_at: now,
        };
        let record = self.cache_resolutions.then(|| ResolutionRecord {
            key: request.cache_key(),
            v1: conflict.v1.clone(),
            v2: conflict.v2.clone(),
            base: conflict.base.clone(),
            context: conflict.context.clone(),
            result: content.to_string(),
            provider: MANUAL_NAME.to_string(),
            resolved_at: resolved_at.clone(),
        });

        self.db.transaction(|conn| -> Result<(), ConflictError> {
            queries::mark_conflict_resolved(conn, &conflict.id, content, resolved_by, &resolved_at)?;
            if let Some(record) = &record {
                queries::write_resolution_record(conn, record)?;
            }
            Ok(())
        })?;

        self.db.record_audit(
            "conflict.review",
            Some(&conflict.id),
            Some(&format!(
                "Resolved conflict on '{}' with {} by '{}'",
                conflict.context, strategy, resolved_by
            )),
            true,
        );

        info!(id = %conflict.id, strategy, "conflict resolved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ChainOutcome, ResolutionChain};

    fn setup_with_conflict() -> (Arc<Database>, String) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let conflict = PendingConflict::new(
            "left version",
            "right version",
            Some("base version".into()),
            "notes.md",
            "2024-01-01T00:00:00.000000Z",
        );
        db.insert_pending_conflict(&conflict).unwrap();
        (Arc::new(db), conflict.id)
    }

    #[test]
    fn test_accept_candidate() {
        let (db, id) = setup_with_conflict();
        let review = ConflictReview::new(Arc::clone(&db));

        let content = review.accept_candidate(&id, 1, "alice").unwrap();
        assert_eq!(content, "right version");

        let conflict = review.get(&id).unwrap();
        assert_eq!(conflict.status, PendingStatus::Resolved);
        assert_eq!(conflict.resolution.as_deref(), Some("right version"));
        assert_eq!(conflict.resolved_by.as_deref(), Some("alice"));
        assert!(conflict.resolved_at.is_some());
    }

    #[test]
    fn test_accept_custom() {
        let (db, id) = setup_with_conflict();
        let review = ConflictReview::new(db);
        review.accept_custom(&id, "merged by hand", "bob").unwrap();
        assert_eq!(
            review.get(&id).unwrap().resolution.as_deref(),
            Some("merged by hand")
        );
    }

    #[test]
    fn test_candidate_index_out_of_range() {
        let (db, id) = setup_with_conflict();
        let review = ConflictReview::new(db);
        let err = review.accept_candidate(&id, 3, "alice").unwrap_err();
        assert!(matches!(err, ConflictError::InvalidResolution { .. }));
        assert_eq!(review.get(&id).unwrap().status, PendingStatus::Pending);
    }

    #[test]
    fn test_defer_then_resolve() {
        let (db, id) = setup_with_conflict();
        let review = ConflictReview::new(db);
        review.defer(&id, "alice").unwrap();
        assert_eq!(review.get(&id).unwrap().status, PendingStatus::Deferred);
        assert_eq!(
            review.list(Some(PendingStatus::Deferred), 10).unwrap().len(),
            1
        );

        review.accept_candidate(&id, 0, "alice").unwrap();
        assert_eq!(review.get(&id).unwrap().status, PendingStatus::Resolved);
    }

    #[test]
    fn test_cannot_resolve_twice() {
        let (db, id) = setup_with_conflict();
        let review = ConflictReview::new(db);
        review.accept_candidate(&id, 0, "alice").unwrap();

        assert!(matches!(
            review.accept_candidate(&id, 1, "bob"),
            Err(ConflictError::AlreadyResolved(_))
        ));
        assert!(matches!(
            review.defer(&id, "bob"),
            Err(ConflictError::AlreadyResolved(_))
        ));
    }

    #[test]
    fn test_unknown_conflict() {
        let (db, _) = setup_with_conflict();
        let review = ConflictReview::new(db);
        assert!(matches!(
            review.get("missing"),
            Err(ConflictError::NotFound(_))
        ));
    }

    #[test]
    fn test_review_decision_answers_later_attempts() {
        let (db, id) = setup_with_conflict();
        ConflictReview::new(Arc::clone(&db))
            .accept_candidate(&id, 2, "alice")
            .unwrap();

        let chain = ResolutionChain::new(Arc::clone(&db)).unwrap();
        let outcome = chain
            .attempt_resolve("left version", "right version", None, "notes.md")
            .unwrap();
        assert_eq!(
            outcome,
            ChainOutcome::Resolved {
                result: "base version".into(),
                provider: "manual".into(),
                cached: true,
            }
        );

        let audit = db.list_audit_log_by_action("conflict.review", 10).unwrap();
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn test_review_without_caching() {
        let (db, id) = setup_with_conflict();
        let review = ConflictReview::new(Arc::clone(&db)).with_caching(false);
        review.accept_candidate(&id, 0, "alice").unwrap();

        assert_eq!(review.get(&id).unwrap().status, PendingStatus::Resolved);
        assert_eq!(db.count_resolution_records().unwrap(), 0);
    }

    #[test]
    fn test_review_writes_cache_entry() {
        let (db, id) = setup_with_conflict();
        ConflictReview::new(Arc::clone(&db))
            .accept_custom(&id, "merged", "bob")
            .unwrap();
        assert_eq!(db.count_resolution_records().unwrap(), 1);
    }
}
