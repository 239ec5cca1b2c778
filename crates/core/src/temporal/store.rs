//! SQLite-backed version store.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use super::{TimeDimension, TimeQuery, ValidInterval};
use crate::clock::{format_instant, Clock, SystemClock};
use crate::db::{queries, Database};
use crate::errors::{DatabaseError, TemporalError};
use crate::models::TemporalVersion;

/// Version history for one named store.
///
/// Several stores can share a database; each keeps its own current version.
#[derive(Debug, Clone)]
pub struct VersionStore {
    db: Arc<Database>,
    name: String,
    clock: Arc<dyn Clock>,
}

impl VersionStore {
    pub fn new(db: Arc<Database>, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record a new current version. Returns its ID.
    ///
    /// The previous current version, if any, is closed at the same instant
    /// the new one opens.
    pub fn record(
        &self,
        content_hash: &str,
        metadata: &str,
        valid: ValidInterval,
    ) -> Result<String, TemporalError> {
        let version = self.db.transaction(|conn| -> Result<_, TemporalError> {
            let now = self.next_system_time(conn)?;
            self.close_current(conn, now)?;

            let version = TemporalVersion {
                id: uuid::Uuid::new_v4().to_string(),
                store: self.name.clone(),
                content_hash: content_hash.to_string(),
                metadata: metadata.to_string(),
                valid_from: valid.from,
                valid_to: valid.to,
                system_from: now,
                system_to: None,
                supersedes: None,
            };
            queries::insert_version(conn, &version)?;
            Ok(version)
        })?;

        info!(
            store = %self.name,
            id = %version.id,
            content_hash,
            system_from = %format_instant(version.system_from),
            "recorded version"
        );
        self.db.record_audit(
            "version.record",
            Some(&version.id),
            Some(&format!("store={} hash={}", self.name, content_hash)),
            true,
        );
        Ok(version.id)
    }

    /// The version whose system interval is still open, if any.
    pub fn current(&self) -> Result<Option<TemporalVersion>, TemporalError> {
        Ok(self.db.current_temporal_version(&self.name)?)
    }

    /// Load one version of this store.
    pub fn get(&self, id: &str) -> Result<TemporalVersion, TemporalError> {
        let version = self
            .db
            .get_temporal_version(id)
            .map_err(|e| not_found(e, id))?;
        if version.store != self.name {
            return Err(TemporalError::NotFound(id.to_string()));
        }
        Ok(version)
    }

    /// Every version of this store, oldest first.
    pub fn history(&self) -> Result<Vec<TemporalVersion>, TemporalError> {
        Ok(self.db.list_temporal_versions(&self.name)?)
    }

    /// Find the version visible at a point on one time axis.
    ///
    /// For system time this is the version the store held at that instant;
    /// an instant at or after the clock's now reads the current version.
    /// For valid time it is the most recently recorded version whose valid
    /// interval contains the instant.
    pub fn as_of(&self, query: TimeQuery) -> Result<TemporalVersion, TemporalError> {
        let history = self.history()?;
        let found = match query {
            TimeQuery::System(t) => {
                let t = if t >= self.clock.now() {
                    t.max(horizon(&history, t))
                } else {
                    t
                };
                history.into_iter().find(|v| v.system_contains(t))
            }
            TimeQuery::Valid(t) => history
                .into_iter()
                .filter(|v| v.valid_contains(t))
                .max_by_key(|v| v.system_from),
        };

        debug!(store = %self.name, ?query, found = found.is_some(), "as_of lookup");
        found.ok_or_else(|| {
            let (dimension, at) = match query {
                TimeQuery::System(t) => ("system", t),
                TimeQuery::Valid(t) => ("valid", t),
            };
            TemporalError::NotFound(format!(
                "no version of '{}' at {} time {}",
                self.name,
                dimension,
                format_instant(at)
            ))
        })
    }

    /// Versions whose interval on `dimension` (`"system"` or `"valid"`)
    /// overlaps `[start, end]`, oldest first.
    pub fn between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        dimension: &str,
    ) -> Result<Vec<TemporalVersion>, TemporalError> {
        let dimension: TimeDimension = dimension.parse()?;
        if start > end {
            return Err(TemporalError::InvalidInterval(format!(
                "range start {} is after end {}",
                format_instant(start),
                format_instant(end)
            )));
        }

        let versions: Vec<TemporalVersion> = self
            .history()?
            .into_iter()
            .filter(|v| match dimension {
                TimeDimension::System => v.system_overlaps(start, end),
                TimeDimension::Valid => v.valid_overlaps(start, end),
            })
            .collect();
        debug!(store = %self.name, %dimension, count = versions.len(), "range lookup");
        Ok(versions)
    }

    /// Record a correction of `version_id` and make it current.
    ///
    /// The correction inherits the superseded version's valid interval and
    /// metadata unless `valid_override` is given, and links back to it
    /// through `supersedes`. Returns the new version's ID.
    pub fn supersede(
        &self,
        version_id: &str,
        new_content_hash: &str,
        valid_override: Option<ValidInterval>,
    ) -> Result<String, TemporalError> {
        let version = self.db.transaction(|conn| -> Result<_, TemporalError> {
            let target =
                queries::select_version(conn, version_id).map_err(|e| not_found(e, version_id))?;
            if target.store != self.name {
                return Err(TemporalError::NotFound(version_id.to_string()));
            }

            let now = self.next_system_time(conn)?;
            self.close_current(conn, now)?;

            let valid = valid_override.unwrap_or(ValidInterval {
                from: target.valid_from,
                to: target.valid_to,
            });
            let version = TemporalVersion {
                id: uuid::Uuid::new_v4().to_string(),
                store: self.name.clone(),
                content_hash: new_content_hash.to_string(),
                metadata: target.metadata.clone(),
                valid_from: valid.from,
                valid_to: valid.to,
                system_from: now,
                system_to: None,
                supersedes: Some(target.id.clone()),
            };
            queries::insert_version(conn, &version)?;
            Ok(version)
        })?;

        info!(
            store = %self.name,
            superseded = version_id,
            id = %version.id,
            "superseded version"
        );
        self.db.record_audit(
            "version.supersede",
            Some(&version.id),
            Some(&format!("store={} supersedes={}", self.name, version_id)),
            true,
        );
        Ok(version.id)
    }

    /// The instant to stamp a new version with: the clock, truncated to the
    /// stored precision and pushed past the latest recorded `system_from`.
    fn next_system_time(&self, conn: &Connection) -> Result<DateTime<Utc>, DatabaseError> {
        let now = self.clock.now().trunc_subsecs(6);
        match queries::latest_system_from(conn, &self.name)? {
            Some(latest) if now <= latest => Ok(latest + Duration::microseconds(1)),
            _ => Ok(now),
        }
    }

    fn close_current(&self, conn: &Connection, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        if let Some(open) = queries::select_open_version(conn, &self.name)? {
            queries::close_version(conn, &open.id, at)?;
            debug!(store = %self.name, id = %open.id, "closed current version");
        }
        Ok(())
    }
}

/// The store's logical now: `system_from` of the newest version can run
/// ahead of the clock when several versions land in one tick.
fn horizon(history: &[TemporalVersion], now: DateTime<Utc>) -> DateTime<Utc> {
    history
        .iter()
        .map(|v| v.system_from)
        .max()
        .map_or(now, |latest| latest.max(now))
}

fn not_found(e: DatabaseError, id: &str) -> TemporalError {
    match e {
        DatabaseError::NotFound { .. } => TemporalError::NotFound(id.to_string()),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{parse_instant, FixedClock};

    fn setup() -> (VersionStore, Arc<FixedClock>) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let clock = Arc::new(FixedClock::default());
        let store = VersionStore::new(Arc::new(db), "main").with_clock(clock.clone());
        (store, clock)
    }

    fn at(s: &str) -> DateTime<Utc> {
        parse_instant(s).unwrap()
    }

    #[test]
    fn test_empty_store_has_no_current() {
        let (store, _) = setup();
        assert!(store.current().unwrap().is_none());
        assert!(store.history().unwrap().is_empty());
    }

    #[test]
    fn test_record_closes_previous_version() {
        let (store, clock) = setup();
        let first = store.record("h1", "", ValidInterval::always()).unwrap();
        clock.advance_millis(1_000);
        let second = store.record("h2", "", ValidInterval::always()).unwrap();

        let current = store.current().unwrap().unwrap();
        assert_eq!(current.id, second);
        assert!(current.is_open());

        let closed = store.get(&first).unwrap();
        assert_eq!(closed.system_to, Some(current.system_from));
    }

    #[test]
    fn test_frozen_clock_still_orders_versions() {
        let (store, _) = setup();
        let a = store.record("h1", "", ValidInterval::always()).unwrap();
        let b = store.record("h2", "", ValidInterval::always()).unwrap();

        let a = store.get(&a).unwrap();
        let b = store.get(&b).unwrap();
        assert!(b.system_from > a.system_from);
        assert_eq!(a.system_to, Some(b.system_from));
    }

    #[test]
    fn test_same_tick_records_stay_visible() {
        let (store, clock) = setup();
        let h1 = store
            .record(
                "h1",
                "",
                ValidInterval::new(Some(at("2024-01-01")), Some(at("2024-06-30"))).unwrap(),
            )
            .unwrap();
        let h2 = store
            .record(
                "h2",
                "",
                ValidInterval::new(Some(at("2024-07-01")), Some(at("2024-12-31"))).unwrap(),
            )
            .unwrap();

        assert_eq!(store.current().unwrap().unwrap().id, h2);
        assert_eq!(store.as_of(TimeQuery::Valid(at("2024-08-01"))).unwrap().id, h2);
        assert_eq!(store.as_of(TimeQuery::Valid(at("2024-03-15"))).unwrap().id, h1);
        assert_eq!(store.as_of(TimeQuery::System(clock.now())).unwrap().id, h2);
    }

    #[test]
    fn test_as_of_system_time() {
        let (store, clock) = setup();
        let t0 = clock.now();
        let first = store.record("h1", "", ValidInterval::always()).unwrap();
        clock.advance_millis(10);
        let second = store.record("h2", "", ValidInterval::always()).unwrap();

        assert_eq!(store.as_of(TimeQuery::System(t0)).unwrap().id, first);
        assert_eq!(
            store
                .as_of(TimeQuery::System(t0 + Duration::milliseconds(5)))
                .unwrap()
                .id,
            first
        );
        // system_to is exclusive.
        assert_eq!(
            store
                .as_of(TimeQuery::System(t0 + Duration::milliseconds(10)))
                .unwrap()
                .id,
            second
        );
        assert!(matches!(
            store.as_of(TimeQuery::System(t0 - Duration::seconds(1))),
            Err(TemporalError::NotFound(_))
        ));
    }

    #[test]
    fn test_as_of_valid_time_prefers_latest_recording() {
        let (store, clock) = setup();
        let h1 = store
            .record(
                "h1",
                "",
                ValidInterval::new(Some(at("2023-01-01")), Some(at("2023-12-31"))).unwrap(),
            )
            .unwrap();
        clock.advance_millis(1);
        let h2 = store
            .record(
                "h2",
                "",
                ValidInterval::new(Some(at("2023-06-01")), None).unwrap(),
            )
            .unwrap();

        assert_eq!(store.as_of(TimeQuery::Valid(at("2023-03-01"))).unwrap().id, h1);
        assert_eq!(store.as_of(TimeQuery::Valid(at("2023-07-01"))).unwrap().id, h2);
        assert!(matches!(
            store.as_of(TimeQuery::Valid(at("2022-01-01"))),
            Err(TemporalError::NotFound(_))
        ));
    }

    #[test]
    fn test_between_dimensions() {
        let (store, clock) = setup();
        let t0 = clock.now();
        let a = store
            .record(
                "a",
                "",
                ValidInterval::new(Some(at("2020-01-01")), Some(at("2020-12-31"))).unwrap(),
            )
            .unwrap();
        clock.advance_millis(100);
        let b = store
            .record(
                "b",
                "",
                ValidInterval::new(Some(at("2021-01-01")), None).unwrap(),
            )
            .unwrap();

        let ids = |vs: Vec<TemporalVersion>| vs.into_iter().map(|v| v.id).collect::<Vec<_>>();

        assert_eq!(
            ids(store.between(t0, t0 + Duration::milliseconds(50), "system").unwrap()),
            vec![a.clone()]
        );
        assert_eq!(
            ids(store.between(t0, t0 + Duration::seconds(1), "system").unwrap()),
            vec![a.clone(), b.clone()]
        );
        assert_eq!(
            ids(store.between(at("2021-06-01"), at("2030-01-01"), "valid").unwrap()),
            vec![b]
        );
        assert_eq!(
            ids(store.between(at("2020-06-01"), at("2020-07-01"), "valid").unwrap()),
            vec![a]
        );
    }

    #[test]
    fn test_between_rejects_bad_input() {
        let (store, _) = setup();
        assert!(matches!(
            store.between(at("2024-01-01"), at("2024-02-01"), "wall"),
            Err(TemporalError::InvalidDimension(_))
        ));
        assert!(matches!(
            store.between(at("2024-02-01"), at("2024-01-01"), "valid"),
            Err(TemporalError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_supersede_inherits_valid_interval_and_metadata() {
        let (store, clock) = setup();
        let valid = ValidInterval::new(Some(at("2024-01-01")), Some(at("2024-06-30"))).unwrap();
        let original = store.record("h1", r#"{"author":"a"}"#, valid).unwrap();
        clock.advance_millis(5);

        let fixed = store.supersede(&original, "h1-fixed", None).unwrap();
        let current = store.current().unwrap().unwrap();
        assert_eq!(current.id, fixed);
        assert_eq!(current.content_hash, "h1-fixed");
        assert_eq!(current.valid_from, valid.from);
        assert_eq!(current.valid_to, valid.to);
        assert_eq!(current.metadata, r#"{"author":"a"}"#);
        assert_eq!(current.supersedes.as_deref(), Some(original.as_str()));

        let open: Vec<_> = store
            .history()
            .unwrap()
            .into_iter()
            .filter(TemporalVersion::is_open)
            .collect();
        assert_eq!(open.len(), 1);
    }

    #[test]
    fn test_supersede_closed_version_keeps_its_interval() {
        let (store, clock) = setup();
        let old = store.record("h1", "", ValidInterval::always()).unwrap();
        clock.advance_millis(5);
        let newer = store.record("h2", "", ValidInterval::always()).unwrap();
        let old_closed_at = store.get(&old).unwrap().system_to;
        clock.advance_millis(5);

        let override_valid = ValidInterval::new(None, Some(at("2023-12-31"))).unwrap();
        let fixed = store.supersede(&old, "h1b", Some(override_valid)).unwrap();

        assert_eq!(store.get(&old).unwrap().system_to, old_closed_at);
        assert!(store.get(&newer).unwrap().system_to.is_some());
        let current = store.current().unwrap().unwrap();
        assert_eq!(current.id, fixed);
        assert_eq!(current.valid_to, override_valid.to);
    }

    #[test]
    fn test_supersede_unknown_version() {
        let (store, _) = setup();
        assert!(matches!(
            store.supersede("missing", "h", None),
            Err(TemporalError::NotFound(_))
        ));
    }

    #[test]
    fn test_stores_are_isolated() {
        let (store, clock) = setup();
        let db = Arc::clone(&store.db);
        let other = VersionStore::new(db, "other").with_clock(clock);

        let a = store.record("a", "", ValidInterval::always()).unwrap();
        other.record("b", "", ValidInterval::always()).unwrap();

        assert_eq!(store.current().unwrap().unwrap().id, a);
        assert_eq!(other.history().unwrap().len(), 1);
        assert!(matches!(other.get(&a), Err(TemporalError::NotFound(_))));
    }
}
