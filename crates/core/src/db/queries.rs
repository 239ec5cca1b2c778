//! Typed query helpers for every table in the Concord database.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::Database;
use crate::clock::format_instant;
use crate::errors::DatabaseError;
use crate::models::{
    AuditLogEntry, Patch, PendingConflict, PendingStatus, ProviderRecord, ResolutionRecord,
    TemporalVersion,
};

const PATCH_COLUMNS: &str = "id, base, target, effect, dependencies, created_at";

const PENDING_COLUMNS: &str = "id, base, v1, v2, context, candidates, status, resolution, \
                               resolved_by, created_at, resolved_at";

const VERSION_COLUMNS: &str = "id, store, content_hash, metadata, valid_from, valid_to, \
                               system_from, system_to, supersedes";

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- patches -----------------------------------------------------------

    /// Store a new patch. Patches are never updated afterwards.
    pub fn insert_patch(&self, patch: &Patch) -> Result<(), DatabaseError> {
        write_patch(&self.conn(), patch)
    }

    /// Get a patch by ID (returns an error if not found).
    pub fn get_patch(&self, id: &str) -> Result<Patch, DatabaseError> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM patches WHERE id = ?1", PATCH_COLUMNS),
            params![id],
            row_to_patch,
        )
        .map_err(|e| lookup_error(e, "patch", id))
    }

    /// List patches, newest first.
    pub fn list_patches(&self, limit: u32) -> Result<Vec<Patch>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM patches ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            PATCH_COLUMNS
        ))?;
        let patches = stmt
            .query_map(params![limit], row_to_patch)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patches)
    }

    // -- resolution providers ----------------------------------------------

    /// Insert or replace a provider's registry row.
    pub fn upsert_provider(&self, provider: &ProviderRecord) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO resolution_providers (name, category, priority, registered_seq, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                category = excluded.category,
                priority = excluded.priority,
                updated_at = excluded.updated_at",
            params![
                provider.name,
                provider.category,
                provider.priority,
                provider.registered_seq,
                provider.updated_at
            ],
        )?;
        debug!(name = %provider.name, priority = provider.priority, "upserted resolution provider");
        Ok(())
    }

    /// List registered providers in resolution order.
    pub fn list_providers(&self) -> Result<Vec<ProviderRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name, category, priority, registered_seq, updated_at
             FROM resolution_providers ORDER BY priority ASC, registered_seq ASC",
        )?;
        let providers = stmt
            .query_map([], |row| {
                Ok(ProviderRecord {
                    name: row.get(0)?,
                    category: row.get(1)?,
                    priority: row.get(2)?,
                    registered_seq: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(providers)
    }

    // -- resolution cache --------------------------------------------------

    /// Look up a cached resolution by key.
    pub fn get_resolution_record(
        &self,
        key: &str,
    ) -> Result<Option<ResolutionRecord>, DatabaseError> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT key, v1, v2, base, context, result, provider, resolved_at
                 FROM resolution_records WHERE key = ?1",
                params![key],
                |row| {
                    Ok(ResolutionRecord {
                        key: row.get(0)?,
                        v1: row.get(1)?,
                        v2: row.get(2)?,
                        base: row.get(3)?,
                        context: row.get(4)?,
                        result: row.get(5)?,
                        provider: row.get(6)?,
                        resolved_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Store (or overwrite) a cached resolution.
    pub fn upsert_resolution_record(&self, record: &ResolutionRecord) -> Result<(), DatabaseError> {
        write_resolution_record(&self.conn(), record)
    }

    /// Count cached resolutions.
    pub fn count_resolution_records(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM resolution_records", [], |row| row.get(0))?;
        Ok(count)
    }

    // -- pending conflicts -------------------------------------------------

    /// Persist a new pending conflict.
    pub fn insert_pending_conflict(&self, conflict: &PendingConflict) -> Result<(), DatabaseError> {
        let candidates = to_json(&conflict.candidates)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO pending_conflicts
                (id, base, v1, v2, context, candidates, status, resolution, resolved_by,
                 created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                conflict.id,
                conflict.base,
                conflict.v1,
                conflict.v2,
                conflict.context,
                candidates,
                conflict.status.as_str(),
                conflict.resolution,
                conflict.resolved_by,
                conflict.created_at,
                conflict.resolved_at
            ],
        )?;
        debug!(id = %conflict.id, context = %conflict.context, "inserted pending conflict");
        Ok(())
    }

    /// Get a pending conflict by ID (returns an error if not found).
    pub fn get_pending_conflict(&self, id: &str) -> Result<PendingConflict, DatabaseError> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM pending_conflicts WHERE id = ?1", PENDING_COLUMNS),
            params![id],
            row_to_pending,
        )
        .map_err(|e| lookup_error(e, "pending conflict", id))
    }

    /// List pending conflicts, optionally filtered by status, newest first.
    pub fn list_pending_conflicts(
        &self,
        status: Option<PendingStatus>,
        limit: u32,
    ) -> Result<Vec<PendingConflict>, DatabaseError> {
        let conn = self.conn();
        let conflicts = match status {
            Some(s) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM pending_conflicts WHERE status = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                    PENDING_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![s.as_str(), limit], row_to_pending)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM pending_conflicts
                     ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                    PENDING_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![limit], row_to_pending)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(conflicts)
    }

    /// Defer a pending conflict.
    pub fn defer_pending_conflict(&self, id: &str) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE pending_conflicts SET status = 'deferred' WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "pending conflict".into(),
                id: id.to_string(),
            });
        }
        debug!(id, "deferred pending conflict");
        Ok(())
    }

    /// Count pending conflicts with the given status.
    pub fn count_pending_conflicts_by_status(
        &self,
        status: PendingStatus,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_conflicts WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- temporal versions -------------------------------------------------

    /// Get a version by ID (returns an error if not found).
    pub fn get_temporal_version(&self, id: &str) -> Result<TemporalVersion, DatabaseError> {
        let conn = self.conn();
        select_version(&conn, id)
    }

    /// The open version of `store`, if any.
    pub fn current_temporal_version(
        &self,
        store: &str,
    ) -> Result<Option<TemporalVersion>, DatabaseError> {
        let conn = self.conn();
        select_open_version(&conn, store)
    }

    /// Every version of `store`, oldest `system_from` first.
    pub fn list_temporal_versions(
        &self,
        store: &str,
    ) -> Result<Vec<TemporalVersion>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM temporal_versions WHERE store = ?1 ORDER BY system_from ASC",
            VERSION_COLUMNS
        ))?;
        let versions = stmt
            .query_map(params![store], row_to_version)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    /// Names of every store that has at least one version.
    pub fn list_temporal_stores(&self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT store FROM temporal_versions ORDER BY store")?;
        let stores = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stores)
    }

    // -- audit log ---------------------------------------------------------

    /// Insert an audit log entry.
    pub fn insert_audit_log(
        &self,
        action: &str,
        subject_id: Option<&str>,
        details: Option<&str>,
        success: bool,
    ) -> Result<i64, DatabaseError> {
        let now = format_instant(Utc::now());
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, subject_id, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![action, subject_id, details, success, now],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action, "inserted audit_log entry");
        Ok(id)
    }

    /// Record an audit entry, logging instead of failing on error.
    ///
    /// Audit provenance never decides the outcome of the operation it
    /// describes.
    pub fn record_audit(
        &self,
        action: &str,
        subject_id: Option<&str>,
        details: Option<&str>,
        success: bool,
    ) {
        if let Err(e) = self.insert_audit_log(action, subject_id, details, success) {
            tracing::warn!(action, error = %e, "failed to write audit log entry");
        }
    }

    /// List recent audit log entries, newest first.
    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, subject_id, details, success, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], row_to_audit)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// List audit log entries for one action, newest first.
    pub fn list_audit_log_by_action(
        &self,
        action: &str,
        limit: u32,
    ) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, subject_id, details, success, created_at
             FROM audit_log WHERE action = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![action, limit], row_to_audit)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers (usable inside `Database::transaction`)
// ---------------------------------------------------------------------------

pub(crate) fn write_patch(conn: &Connection, patch: &Patch) -> Result<(), DatabaseError> {
    let effect = to_json(&patch.effect)?;
    let dependencies = to_json(&patch.dependencies)?;
    conn.execute(
        "INSERT INTO patches (id, base, target, effect, dependencies, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            patch.id,
            patch.base,
            patch.target,
            effect,
            dependencies,
            patch.created_at
        ],
    )?;
    debug!(id = %patch.id, base = %patch.base, target = %patch.target, "inserted patch");
    Ok(())
}

pub(crate) fn write_resolution_record(
    conn: &Connection,
    record: &ResolutionRecord,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO resolution_records
            (key, v1, v2, base, context, result, provider, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.key,
            record.v1,
            record.v2,
            record.base,
            record.context,
            record.result,
            record.provider,
            record.resolved_at
        ],
    )?;
    debug!(key = %record.key, provider = %record.provider, "cached resolution");
    Ok(())
}

/// Mark a pending conflict resolved with the chosen content.
pub(crate) fn mark_conflict_resolved(
    conn: &Connection,
    id: &str,
    resolution: &str,
    resolved_by: &str,
    resolved_at: &str,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE pending_conflicts
         SET status = 'resolved', resolution = ?1, resolved_by = ?2, resolved_at = ?3
         WHERE id = ?4",
        params![resolution, resolved_by, resolved_at, id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "pending conflict".into(),
            id: id.to_string(),
        });
    }
    debug!(id, resolved_by, "resolved pending conflict");
    Ok(())
}

/// Insert a version row.
pub(crate) fn insert_version(
    conn: &Connection,
    version: &TemporalVersion,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO temporal_versions
            (id, store, content_hash, metadata, valid_from, valid_to,
             system_from, system_to, supersedes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            version.id,
            version.store,
            version.content_hash,
            version.metadata,
            version.valid_from.map(format_instant),
            version.valid_to.map(format_instant),
            format_instant(version.system_from),
            version.system_to.map(format_instant),
            version.supersedes
        ],
    )?;
    debug!(id = %version.id, store = %version.store, "inserted temporal version");
    Ok(())
}

/// Set `system_to` on an open version. Returns the number of rows closed.
pub(crate) fn close_version(
    conn: &Connection,
    id: &str,
    system_to: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE temporal_versions SET system_to = ?1 WHERE id = ?2 AND system_to IS NULL",
        params![format_instant(system_to), id],
    )?;
    Ok(changed)
}

pub(crate) fn select_version(conn: &Connection, id: &str) -> Result<TemporalVersion, DatabaseError> {
    conn.query_row(
        &format!("SELECT {} FROM temporal_versions WHERE id = ?1", VERSION_COLUMNS),
        params![id],
        row_to_version,
    )
    .map_err(|e| lookup_error(e, "version", id))
}

pub(crate) fn select_open_version(
    conn: &Connection,
    store: &str,
) -> Result<Option<TemporalVersion>, DatabaseError> {
    let version = conn
        .query_row(
            &format!(
                "SELECT {} FROM temporal_versions WHERE store = ?1 AND system_to IS NULL",
                VERSION_COLUMNS
            ),
            params![store],
            row_to_version,
        )
        .optional()?;
    Ok(version)
}

/// The greatest `system_from` recorded for `store`.
pub(crate) fn latest_system_from(
    conn: &Connection,
    store: &str,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    let raw: Option<String> = conn.query_row(
        "SELECT MAX(system_from) FROM temporal_versions WHERE store = ?1",
        params![store],
        |row| row.get(0),
    )?;
    raw.map(|s| {
        parse_stored_instant(&s).map_err(|e| DatabaseError::Corrupt {
            entity: "version".into(),
            id: store.to_string(),
            detail: e.to_string(),
        })
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_patch(row: &Row<'_>) -> rusqlite::Result<Patch> {
    Ok(Patch {
        id: row.get(0)?,
        base: row.get(1)?,
        target: row.get(2)?,
        effect: json_column(row, 3)?,
        dependencies: json_column(row, 4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_pending(row: &Row<'_>) -> rusqlite::Result<PendingConflict> {
    let status: String = row.get(6)?;
    Ok(PendingConflict {
        id: row.get(0)?,
        base: row.get(1)?,
        v1: row.get(2)?,
        v2: row.get(3)?,
        context: row.get(4)?,
        candidates: json_column(row, 5)?,
        status: PendingStatus::from_str_val(&status),
        resolution: row.get(7)?,
        resolved_by: row.get(8)?,
        created_at: row.get(9)?,
        resolved_at: row.get(10)?,
    })
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<TemporalVersion> {
    Ok(TemporalVersion {
        id: row.get(0)?,
        store: row.get(1)?,
        content_hash: row.get(2)?,
        metadata: row.get(3)?,
        valid_from: optional_instant_column(row, 4)?,
        valid_to: optional_instant_column(row, 5)?,
        system_from: instant_column(row, 6)?,
        system_to: optional_instant_column(row, 7)?,
        supersedes: row.get(8)?,
    })
}

fn row_to_audit(row: &Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: row.get(0)?,
        action: row.get(1)?,
        subject_id: row.get(2)?,
        details: row.get(3)?,
        success: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn instant_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_stored_instant(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn optional_instant_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        parse_stored_instant(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn parse_stored_instant(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Corrupt {
        entity: "json".into(),
        id: String::new(),
        detail: e.to_string(),
    })
}

/// Map a single-row lookup failure to `NotFound` / `Corrupt`.
fn lookup_error(e: rusqlite::Error, entity: &str, id: &str) -> DatabaseError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        },
        rusqlite::Error::FromSqlConversionFailure(_, _, cause) => DatabaseError::Corrupt {
            entity: entity.into(),
            id: id.to_string(),
            detail: cause.to_string(),
        },
        other => other.into(),
    }
}
