//! Time source abstraction.
//!
//! The version store stamps every record with system time. Production code
//! uses [`SystemClock`]; tests use [`FixedClock`] to get deterministic,
//! controllable instants.

use std::fmt::Debug;
use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};

/// A provider of the current instant.
pub trait Clock: Send + Sync + Debug {
    /// Current time in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current time as an RFC 3339 string with microsecond precision.
    fn now_rfc3339(&self) -> String {
        format_instant(self.now())
    }
}

/// Real wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock that only moves when told to.
///
/// ```
/// use concord_core::clock::{Clock, FixedClock};
///
/// let clock = FixedClock::at_millis(1_704_067_200_000);
/// let t1 = clock.now();
/// clock.advance_millis(5);
/// assert_eq!(clock.now() - t1, chrono::Duration::milliseconds(5));
/// ```
#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock frozen at `instant`.
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(instant),
        }
    }

    /// Create a clock frozen at the given milliseconds since the Unix epoch.
    pub fn at_millis(millis: i64) -> Self {
        let instant = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_default();
        Self::new(instant)
    }

    /// Move the clock forward.
    pub fn advance_millis(&self, ms: i64) {
        let mut guard = self.lock();
        *guard = *guard + Duration::milliseconds(ms);
    }

    /// Jump to a specific instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.lock() = instant;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        self.instant
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        // 2024-01-01T00:00:00Z
        Self::at_millis(1_704_067_200_000)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// Canonical storage format for instants.
///
/// Fixed-width (microseconds, `Z` suffix) so stored values sort
/// lexicographically in the same order as chronologically.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an instant from RFC 3339, or from a bare `YYYY-MM-DD` date
/// (interpreted as midnight UTC).
pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
