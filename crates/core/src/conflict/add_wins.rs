//! Add-wins set merge.
//!
//! Treats both versions as sets and keeps every element either side has.
//! Removals are lost by construction, which is the point: concurrent adds
//! always survive.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::provider::{ConflictResolutionProvider, ResolutionOutcome, ResolutionRequest};
use crate::db::Database;
use crate::errors::ConflictError;

pub const ADD_WINS_NAME: &str = "add-wins";
pub const ADD_WINS_PRIORITY: i32 = 20;

/// Union of two JSON arrays, deduplicated by canonical encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddWins;

impl ConflictResolutionProvider for AddWins {
    fn name(&self) -> &str {
        ADD_WINS_NAME
    }

    fn priority(&self) -> i32 {
        ADD_WINS_PRIORITY
    }

    fn attempt(
        &self,
        request: &ResolutionRequest<'_>,
        _db: &Database,
    ) -> Result<ResolutionOutcome, ConflictError> {
        let (Some(left), Some(right)) = (as_set(request.v1), as_set(request.v2)) else {
            return Ok(ResolutionOutcome::cannot("content is not a set-like structure"));
        };

        // Keyed by canonical encoding: dedups and fixes the output order.
        let union: BTreeMap<String, Value> = left
            .into_iter()
            .chain(right)
            .map(|item| (item.to_string(), item))
            .collect();

        debug!(elements = union.len(), "merged sets");
        let merged = Value::Array(union.into_values().collect());
        Ok(ResolutionOutcome::Resolved {
            result: merged.to_string(),
        })
    }
}

fn as_set(payload: &str) -> Option<Vec<Value>> {
    match serde_json::from_str(payload) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn attempt(v1: &str, v2: &str) -> ResolutionOutcome {
        let db = Database::in_memory().unwrap();
        let request = ResolutionRequest {
            v1,
            v2,
            base: Some("[\"ignored\"]"),
            context: "tags",
            requested_at: Utc::now(),
        };
        AddWins.attempt(&request, &db).unwrap()
    }

    fn union(v1: &str, v2: &str) -> String {
        match attempt(v1, v2) {
            ResolutionOutcome::Resolved { result } => result,
            other => panic!("expected a merge, got {:?}", other),
        }
    }

    #[test]
    fn test_union_orders_deterministically() {
        assert_eq!(union(r#"["z","a","m"]"#, r#"["b","z"]"#), r#"["a","b","m","z"]"#);
    }

    #[test]
    fn test_union_is_associative() {
        let (a, b, c) = (r#"["x",1]"#, r#"[2,"y","x"]"#, r#"[{"k":1},1,"z"]"#);
        assert_eq!(union(&union(a, b), c), union(a, &union(b, c)));
    }

    #[test]
    fn test_union_is_idempotent() {
        let (a, b) = (r#"["m","a"]"#, r#"["a","q"]"#);
        let once = union(a, b);
        assert_eq!(union(&once, b), once);
        assert_eq!(union(&once, &once), once);
    }

    #[test]
    fn test_union_is_sorted_and_deduplicated() {
        let outcome = attempt(r#"["b","a"]"#, r#"["c","a"]"#);
        assert_eq!(
            outcome,
            ResolutionOutcome::Resolved {
                result: r#"["a","b","c"]"#.into()
            }
        );
    }

    #[test]
    fn test_union_is_symmetric() {
        assert_eq!(
            attempt(r#"[1,{"k":2},"x"]"#, r#"[3]"#),
            attempt(r#"[3]"#, r#"[1,{"k":2},"x"]"#)
        );
    }

    #[test]
    fn test_objects_dedup_by_canonical_form() {
        let outcome = attempt(r#"[{"a":1,"b":2}]"#, r#"[{"b":2,"a":1}]"#);
        assert_eq!(
            outcome,
            ResolutionOutcome::Resolved {
                result: r#"[{"a":1,"b":2}]"#.into()
            }
        );
    }

    #[test]
    fn test_non_arrays_are_declined() {
        for (v1, v2) in [(r#"{"a":1}"#, "[1]"), ("[1]", "plain text"), ("3", "4")] {
            match attempt(v1, v2) {
                ResolutionOutcome::CannotResolve {
                    reason,
                    pending_conflict,
                } => {
                    assert!(reason.contains("not a set-like structure"));
                    assert!(pending_conflict.is_none());
                }
                other => panic!("expected CannotResolve, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_empty_sets() {
        assert_eq!(
            attempt("[]", "[]"),
            ResolutionOutcome::Resolved {
                result: "[]".into()
            }
        );
    }
}
