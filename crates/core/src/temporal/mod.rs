//! Bitemporal version history.
//!
//! Every version carries two intervals:
//!
//! - **system time** `[system_from, system_to)`: when the store believed the
//!   version. Assigned by the store, never by callers.
//! - **valid time** `[valid_from, valid_to]`: when the content is true in
//!   the world. Supplied by callers; absent bounds are open.
//!
//! Exactly one version per store has an open system interval: the current
//! one.

pub mod store;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TemporalError;

pub use store::VersionStore;

/// A point-in-time lookup along exactly one time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "dimension", content = "at", rename_all = "snake_case")]
pub enum TimeQuery {
    /// What did the store believe at this instant?
    System(DateTime<Utc>),
    /// What was true in the world at this instant, as currently known?
    Valid(DateTime<Utc>),
}

/// One of the two time axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeDimension {
    System,
    Valid,
}

impl TimeDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Valid => "valid",
        }
    }
}

impl FromStr for TimeDimension {
    type Err = TemporalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "valid" => Ok(Self::Valid),
            other => Err(TemporalError::InvalidDimension(other.to_string())),
        }
    }
}

impl fmt::Display for TimeDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A closed valid-time interval with optional bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidInterval {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ValidInterval {
    /// Build an interval, rejecting one that ends before it starts.
    pub fn new(
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Self, TemporalError> {
        if let (Some(f), Some(t)) = (from, to) {
            if f > t {
                return Err(TemporalError::InvalidInterval(format!(
                    "valid_from {} is after valid_to {}",
                    f.to_rfc3339(),
                    t.to_rfc3339()
                )));
            }
        }
        Ok(Self { from, to })
    }

    /// Unbounded on both sides.
    pub fn always() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_instant;

    #[test]
    fn test_dimension_parsing() {
        assert_eq!("system".parse::<TimeDimension>().unwrap(), TimeDimension::System);
        assert_eq!("valid".parse::<TimeDimension>().unwrap(), TimeDimension::Valid);
        let err = "transaction".parse::<TimeDimension>().unwrap_err();
        assert!(matches!(err, TemporalError::InvalidDimension(ref d) if d == "transaction"));
    }

    #[test]
    fn test_valid_interval_rejects_inverted_bounds() {
        let early = parse_instant("2024-01-01");
        let late = parse_instant("2024-12-31");
        assert!(ValidInterval::new(early, late).is_ok());
        assert!(ValidInterval::new(early, early).is_ok());
        assert!(ValidInterval::new(None, late).is_ok());
        assert!(matches!(
            ValidInterval::new(late, early),
            Err(TemporalError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_time_query_serialization() {
        let q = TimeQuery::Valid(parse_instant("2024-01-01").unwrap());
        let encoded = serde_json::to_value(q).unwrap();
        assert_eq!(encoded["dimension"], "valid");
    }
}
