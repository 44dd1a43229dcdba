//! Ledger repository layer
//!
//! Insert and query operations for inject runs and their results.

use crate::error::{Error, Result};
use crate::inject::{InjectionBatch, InjectionResult};
use crate::types::RecordKind;
use crate::verify::VerificationReport;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// One inject run as stored in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: i64,
    pub session_id: String,
    pub device_serial: Option<String>,
    pub started_at: DateTime<Utc>,
    /// `None` while the run is still writing
    pub finished_at: Option<DateTime<Utc>>,
    pub total: i64,
    pub successful: i64,
    pub verified: i64,
    pub failed: i64,
    pub permission_denied: i64,
    /// Outcome of the most recent verification, if any
    pub verification_success: Option<bool>,
    /// Stopped before its last event
    pub interrupted: bool,
}

const UPSERT_RESULT: &str = r#"
    INSERT INTO injections (run_id, seq, kind, uri, address, ts, success,
                            verified, permission_denied, error)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(run_id, seq) DO UPDATE SET
        success = excluded.success,
        verified = excluded.verified,
        permission_denied = excluded.permission_denied,
        error = excluded.error
"#;

fn upsert_result(conn: &Connection, run_id: i64, result: &InjectionResult) -> Result<()> {
    let mut stmt = conn.prepare_cached(UPSERT_RESULT)?;
    stmt.execute(params![
        run_id,
        result.seq as i64,
        result.kind.as_str(),
        result.uri,
        result.address,
        result.timestamp,
        result.success,
        result.verified,
        result.permission_denied,
        result.error,
    ])?;
    Ok(())
}

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        super::schema::run_migrations(&self.conn())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============================================
    // Run operations
    // ============================================

    /// Start a run and return its id
    pub fn insert_run(
        &self,
        session_id: Uuid,
        device_serial: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO runs (session_id, device_serial, started_at) VALUES (?1, ?2, ?3)",
            params![
                session_id.to_string(),
                device_serial,
                started_at.to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Store one result as soon as it is known, so an interrupted run keeps
    /// what it wrote.
    pub fn record_result(&self, run_id: i64, result: &InjectionResult) -> Result<()> {
        upsert_result(&self.conn(), run_id, result)
    }

    /// Store every result of a batch and close the run with its counters.
    ///
    /// Results already stored by [`Database::record_result`] are updated in place.
    pub fn finish_run(
        &self,
        run_id: i64,
        batch: &InjectionBatch,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for result in &batch.results {
            upsert_result(&tx, run_id, result)?;
        }
        let updated = tx.execute(
            r#"
            UPDATE runs SET finished_at = ?2, total = ?3, successful = ?4, verified = ?5,
                            failed = ?6, permission_denied = ?7, interrupted = ?8
            WHERE id = ?1
            "#,
            params![
                run_id,
                finished_at.to_rfc3339(),
                batch.total() as i64,
                batch.successful as i64,
                batch.verified as i64,
                batch.failed as i64,
                batch.permission_denied as i64,
                batch.interrupted,
            ],
        )?;
        if updated == 0 {
            return Err(Error::Database(rusqlite::Error::QueryReturnedNoRows));
        }
        tx.commit()?;
        Ok(())
    }

    /// Remember the outcome of a verification against this run.
    pub fn record_verification(&self, run_id: i64, report: &VerificationReport) -> Result<()> {
        let json = serde_json::to_string(report)?;
        self.conn().execute(
            "UPDATE runs SET verification_success = ?2, verification_report = ?3 WHERE id = ?1",
            params![run_id, report.success, json],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: i64) -> Result<Option<RunRecord>> {
        self.conn()
            .query_row("SELECT * FROM runs WHERE id = ?", [run_id], Self::row_to_run)
            .optional()
            .map_err(Error::from)
    }

    /// Most recent run that finished or stored at least one result
    pub fn get_latest_run(&self) -> Result<Option<RunRecord>> {
        self.conn()
            .query_row(
                r#"
                SELECT * FROM runs
                WHERE finished_at IS NOT NULL
                   OR EXISTS (SELECT 1 FROM injections i WHERE i.run_id = runs.id)
                ORDER BY id DESC LIMIT 1
                "#,
                [],
                Self::row_to_run,
            )
            .optional()
            .map_err(Error::from)
    }

    /// Runs, newest first
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM runs ORDER BY id DESC LIMIT ?")?;
        let runs = stmt
            .query_map([limit as i64], Self::row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Stored results of one run, in injection order
    pub fn get_run_results(&self, run_id: i64) -> Result<Vec<InjectionResult>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT seq, kind, uri, address, ts, success, verified, permission_denied, error
            FROM injections WHERE run_id = ? ORDER BY seq
            "#,
        )?;
        let results = stmt
            .query_map([run_id], Self::row_to_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    fn row_to_run(row: &Row) -> rusqlite::Result<RunRecord> {
        let started_at: String = row.get("started_at")?;
        let finished_at: Option<String> = row.get("finished_at")?;

        Ok(RunRecord {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            device_serial: row.get("device_serial")?,
            started_at: DateTime::parse_from_rfc3339(&started_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            finished_at: finished_at
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            total: row.get("total")?,
            successful: row.get("successful")?,
            verified: row.get("verified")?,
            failed: row.get("failed")?,
            permission_denied: row.get("permission_denied")?,
            verification_success: row.get("verification_success")?,
            interrupted: row.get("interrupted")?,
        })
    }

    fn row_to_result(row: &Row) -> rusqlite::Result<InjectionResult> {
        let kind: String = row.get("kind")?;
        let kind: RecordKind = kind
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?;
        let seq: i64 = row.get("seq")?;

        Ok(InjectionResult {
            seq: seq as usize,
            kind,
            uri: row.get("uri")?,
            address: row.get("address")?,
            timestamp: row.get("ts")?,
            success: row.get("success")?,
            verified: row.get("verified")?,
            permission_denied: row.get("permission_denied")?,
            error: row.get("error")?,
        })
    }
}
