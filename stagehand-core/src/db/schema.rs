//! Ledger schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: runs and their injection results
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id         TEXT NOT NULL UNIQUE,
        device_serial      TEXT,
        started_at         DATETIME NOT NULL,
        finished_at        DATETIME,
        total              INTEGER NOT NULL DEFAULT 0,
        successful         INTEGER NOT NULL DEFAULT 0,
        verified           INTEGER NOT NULL DEFAULT 0,
        failed             INTEGER NOT NULL DEFAULT 0,
        permission_denied  INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS injections (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id             INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
        seq                INTEGER NOT NULL,
        kind               TEXT NOT NULL,
        uri                TEXT,
        address            TEXT NOT NULL,
        ts                 INTEGER NOT NULL,
        success            INTEGER NOT NULL,
        verified           INTEGER NOT NULL,
        permission_denied  INTEGER NOT NULL DEFAULT 0,
        error              TEXT,
        UNIQUE(run_id, seq)
    );

    CREATE INDEX IF NOT EXISTS idx_injections_run ON injections(run_id, seq);
    "#,
    // Version 2: last verification outcome per run
    r#"
    ALTER TABLE runs ADD COLUMN verification_success INTEGER;
    ALTER TABLE runs ADD COLUMN verification_report JSON;
    "#,
    // Version 3: runs stopped before their last event
    r#"
    ALTER TABLE runs ADD COLUMN interrupted INTEGER NOT NULL DEFAULT 0;
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::debug!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking ledger migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running ledger migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
