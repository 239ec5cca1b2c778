//! Patch algebra over line edit scripts.
//!
//! A [`Patch`] names a transformation from one content label (`base`) to
//! another (`target`). Patches are stored once and never changed; invert,
//! compose and commute each produce new patches whose `dependencies` point
//! back at their inputs.
//!
//! The script-level operations live in [`algebra`] and are pure; the
//! [`PatchEngine`] adds label checks, persistence and audit provenance.

pub mod algebra;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::clock::format_instant;
use crate::db::{queries, Database};
use crate::edit::{decode_effect, LineEdit};
use crate::errors::{DatabaseError, PatchError};
use crate::models::Patch;

/// The pair of patches produced by [`PatchEngine::commute`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommutedPair {
    /// Replays the first patch's change on top of the second patch's target.
    pub first: Patch,
    /// Replays the second patch's change on top of the first patch's target.
    pub second: Patch,
}

/// Stores patches and runs the algebra over them.
#[derive(Debug, Clone)]
pub struct PatchEngine {
    db: Arc<Database>,
}

impl PatchEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a patch from a serialized effect. Returns the new patch ID.
    pub fn create(&self, base: &str, target: &str, effect: &str) -> Result<String, PatchError> {
        let ops = decode_effect(effect)?;
        let patch = self.store(base, target, ops, Vec::new())?;
        self.db
            .record_audit("patch.create", Some(&patch.id), Some(&labels(&patch)), true);
        Ok(patch.id)
    }

    /// Create a patch by diffing two texts.
    pub fn create_from_contents(
        &self,
        base: &str,
        target: &str,
        old: &str,
        new: &str,
    ) -> Result<String, PatchError> {
        let ops = algebra::diff_lines(old, new);
        debug!(ops = ops.len(), "computed line diff");
        let patch = self.store(base, target, ops, Vec::new())?;
        self.db
            .record_audit("patch.diff", Some(&patch.id), Some(&labels(&patch)), true);
        Ok(patch.id)
    }

    /// Load a stored patch.
    pub fn get(&self, id: &str) -> Result<Patch, PatchError> {
        self.db.get_patch(id).map_err(|e| match e {
            DatabaseError::NotFound { .. } => PatchError::NotFound(id.to_string()),
            other => other.into(),
        })
    }

    /// Recently created patches, newest first.
    pub fn list(&self, limit: u32) -> Result<Vec<Patch>, PatchError> {
        Ok(self.db.list_patches(limit)?)
    }

    /// Apply a stored patch to `content` and return the result.
    ///
    /// Nothing is written; a mismatch leaves no trace besides the error.
    pub fn apply(&self, id: &str, content: &str) -> Result<String, PatchError> {
        let patch = self.get(id)?;
        let result = algebra::apply_effect(content, &patch.effect)?;
        debug!(id, ops = patch.effect.len(), "applied patch");
        Ok(result)
    }

    /// Store the inverse of a patch. Returns the new patch ID.
    pub fn invert(&self, id: &str) -> Result<String, PatchError> {
        let patch = self.get(id)?;
        let inverse = self.store(
            &patch.target,
            &patch.base,
            algebra::invert_effect(&patch.effect),
            vec![patch.id.clone()],
        )?;
        info!(id, inverse = %inverse.id, "inverted patch");
        self.db
            .record_audit("patch.invert", Some(&inverse.id), Some(&format!("of={}", id)), true);
        Ok(inverse.id)
    }

    /// Store `first` followed by `second` as one patch.
    ///
    /// Fails with [`PatchError::NonSequential`] unless `first.target ==
    /// second.base`.
    pub fn compose(&self, first_id: &str, second_id: &str) -> Result<String, PatchError> {
        let first = self.get(first_id)?;
        let second = self.get(second_id)?;

        if first.target != second.base {
            return Err(PatchError::NonSequential {
                first_target: first.target,
                second_base: second.base,
            });
        }

        let composed = self.store(
            &first.base,
            &second.target,
            algebra::compose_effects(&first.effect, &second.effect),
            vec![first.id.clone(), second.id.clone()],
        )?;
        info!(first = first_id, second = second_id, composed = %composed.id, "composed patches");
        self.db.record_audit(
            "patch.compose",
            Some(&composed.id),
            Some(&format!("of={},{}", first_id, second_id)),
            true,
        );
        Ok(composed.id)
    }

    /// Reorder two independent patches that share a base.
    ///
    /// On success both commuted patches are stored and end at the same
    /// target label, `"{first.target}+{second.target}"`.
    pub fn commute(&self, first_id: &str, second_id: &str) -> Result<CommutedPair, PatchError> {
        let first = self.get(first_id)?;
        let second = self.get(second_id)?;

        if first.base != second.base {
            return Err(PatchError::CannotCommute(format!(
                "patches have different bases ('{}' vs '{}')",
                first.base, second.base
            )));
        }

        let (first_ops, second_ops) = algebra::commute_effects(&first.effect, &second.effect)?;
        let merged = format!("{}+{}", first.target, second.target);
        let deps = vec![first.id.clone(), second.id.clone()];

        let first_prime = new_patch(&second.target, &merged, first_ops, deps.clone());
        let second_prime = new_patch(&first.target, &merged, second_ops, deps);
        self.db.transaction(|conn| -> Result<(), PatchError> {
            queries::write_patch(conn, &first_prime)?;
            queries::write_patch(conn, &second_prime)?;
            Ok(())
        })?;

        info!(
            first = first_id,
            second = second_id,
            first_prime = %first_prime.id,
            second_prime = %second_prime.id,
            "commuted patches"
        );
        self.db.record_audit(
            "patch.commute",
            Some(&first_prime.id),
            Some(&format!(
                "of={},{} pair={}",
                first_id, second_id, second_prime.id
            )),
            true,
        );

        Ok(CommutedPair {
            first: first_prime,
            second: second_prime,
        })
    }

    fn store(
        &self,
        base: &str,
        target: &str,
        effect: Vec<LineEdit>,
        dependencies: Vec<String>,
    ) -> Result<Patch, PatchError> {
        let patch = new_patch(base, target, effect, dependencies);
        self.db.insert_patch(&patch)?;
        info!(id = %patch.id, base, target, ops = patch.effect.len(), "stored patch");
        Ok(patch)
    }
}

fn new_patch(base: &str, target: &str, effect: Vec<LineEdit>, dependencies: Vec<String>) -> Patch {
    Patch {
        id: uuid::Uuid::new_v4().to_string(),
        base: base.to_string(),
        target: target.to_string(),
        effect,
        dependencies,
        created_at: format_instant(Utc::now()),
    }
}

fn labels(patch: &Patch) -> String {
    format!("{} -> {}", patch.base, patch.target)
}
