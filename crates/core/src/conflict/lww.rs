//! Last-writer-wins by embedded timestamp.

use chrono::DateTime;
use serde_json::Value;
use tracing::debug;

use super::provider::{ConflictResolutionProvider, ResolutionOutcome, ResolutionRequest};
use crate::db::Database;
use crate::errors::ConflictError;

pub const LWW_NAME: &str = "lww";
pub const LWW_PRIORITY: i32 = 10;

/// Picks whichever version carries the later timestamp.
///
/// A version is timestamped if it is a JSON object with a `_ts` field
/// (milliseconds since the epoch, or an RFC 3339 string), or if it is an
/// RFC 3339 string on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl ConflictResolutionProvider for LastWriterWins {
    fn name(&self) -> &str {
        LWW_NAME
    }

    fn priority(&self) -> i32 {
        LWW_PRIORITY
    }

    fn attempt(
        &self,
        request: &ResolutionRequest<'_>,
        _db: &Database,
    ) -> Result<ResolutionOutcome, ConflictError> {
        let (Some(t1), Some(t2)) = (timestamp_millis(request.v1), timestamp_millis(request.v2))
        else {
            return Ok(ResolutionOutcome::cannot(
                "unable to extract timestamps from one or both versions",
            ));
        };

        debug!(t1, t2, "comparing write timestamps");
        let winner = match t1.cmp(&t2) {
            std::cmp::Ordering::Greater => request.v1,
            std::cmp::Ordering::Less => request.v2,
            std::cmp::Ordering::Equal => {
                return Ok(ResolutionOutcome::cannot(
                    "timestamps are identical; concurrent writes have no order",
                ));
            }
        };

        Ok(ResolutionOutcome::Resolved {
            result: winner.to_string(),
        })
    }
}

/// Extract a write timestamp in milliseconds since the epoch.
pub fn timestamp_millis(payload: &str) -> Option<i64> {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => match map.get("_ts")? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => rfc3339_millis(s),
            _ => None,
        },
        Ok(Value::String(s)) => rfc3339_millis(&s),
        Ok(_) => None,
        Err(_) => rfc3339_millis(payload.trim()),
    }
}

fn rfc3339_millis(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}
