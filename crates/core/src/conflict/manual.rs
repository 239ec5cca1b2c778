//! Terminal provider that hands the conflict to a human.

use tracing::info;

use super::provider::{ConflictResolutionProvider, ResolutionOutcome, ResolutionRequest};
use crate::clock::format_instant;
use crate::db::Database;
use crate::errors::ConflictError;
use crate::models::PendingConflict;

pub const MANUAL_NAME: &str = "manual";
pub const MANUAL_PRIORITY: i32 = 99;

/// Never resolves. Every attempt stores a new [`PendingConflict`] with the
/// candidate versions and declines, citing manual review.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manual;

impl ConflictResolutionProvider for Manual {
    fn name(&self) -> &str {
        MANUAL_NAME
    }

    fn priority(&self) -> i32 {
        MANUAL_PRIORITY
    }

    fn attempt(
        &self,
        request: &ResolutionRequest<'_>,
        db: &Database,
    ) -> Result<ResolutionOutcome, ConflictError> {
        let conflict = PendingConflict::new(
            request.v1,
            request.v2,
            request.base.map(str::to_string),
            request.context,
            format_instant(request.requested_at),
        );
        db.insert_pending_conflict(&conflict)?;
        info!(id = %conflict.id, context = request.context, "queued conflict for manual review");

        Ok(ResolutionOutcome::CannotResolve {
            reason: "requires manual review".to_string(),
            pending_conflict: Some(conflict.id),
        })
    }
}
