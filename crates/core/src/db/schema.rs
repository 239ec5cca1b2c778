//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `user_version`
//! pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS patches (
            id           TEXT PRIMARY KEY,
            base         TEXT NOT NULL,
            target       TEXT NOT NULL,
            effect       TEXT NOT NULL,
            dependencies TEXT NOT NULL DEFAULT '[]',
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_patches_base ON patches (base);
        CREATE INDEX IF NOT EXISTS idx_patches_target ON patches (target);

        CREATE TABLE IF NOT EXISTS resolution_providers (
            name           TEXT PRIMARY KEY,
            category       TEXT    NOT NULL,
            priority       INTEGER NOT NULL,
            registered_seq INTEGER NOT NULL,
            updated_at     TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS resolution_records (
            key         TEXT PRIMARY KEY,
            v1          TEXT NOT NULL,
            v2          TEXT NOT NULL,
            base        TEXT,
            context     TEXT NOT NULL,
            result      TEXT NOT NULL,
            provider    TEXT NOT NULL,
            resolved_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pending_conflicts (
            id          TEXT PRIMARY KEY,
            base        TEXT,
            v1          TEXT NOT NULL,
            v2          TEXT NOT NULL,
            context     TEXT NOT NULL,
            candidates  TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending', 'deferred', 'resolved')),
            resolution  TEXT,
            resolved_by TEXT,
            created_at  TEXT NOT NULL,
            resolved_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_pending_conflicts_status ON pending_conflicts (status);

        CREATE TABLE IF NOT EXISTS audit_log (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            action     TEXT    NOT NULL,
            subject_id TEXT,
            details    TEXT,
            success    INTEGER NOT NULL DEFAULT 1,
            created_at TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);
        "#,
    ),
    (
        2,
        "bitemporal versions",
        r#"
        CREATE TABLE IF NOT EXISTS temporal_versions (
            id           TEXT PRIMARY KEY,
            store        TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            metadata     TEXT NOT NULL DEFAULT '',
            valid_from   TEXT,
            valid_to     TEXT,
            system_from  TEXT NOT NULL,
            system_to    TEXT,
            supersedes   TEXT REFERENCES temporal_versions (id)
        );

        CREATE INDEX IF NOT EXISTS idx_temporal_versions_store
            ON temporal_versions (store, system_from);

        -- At most one open (current) version per store.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_temporal_versions_open
            ON temporal_versions (store) WHERE system_to IS NULL;
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.execute_batch(&format!("PRAGMA user_version = {};", version))?;
    Ok(())
}
