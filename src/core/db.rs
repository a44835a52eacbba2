use crate::core::error::StarmapError;
use rusqlite::Connection;

pub const LEDGER_DB_NAME: &str = "ledger.db";

pub const LEDGER_SCHEMA_RUN_SESSIONS: &str = "
    CREATE TABLE IF NOT EXISTS run_sessions (
        run_id TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        sample_json TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        backup_ref TEXT,
        created_ts TEXT NOT NULL,
        updated_ts TEXT NOT NULL
    )
";

pub const LEDGER_SCHEMA_APPROVALS: &str = "
    CREATE TABLE IF NOT EXISTS approvals (
        approval_id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        actor TEXT NOT NULL,
        ts TEXT NOT NULL,
        FOREIGN KEY(run_id) REFERENCES run_sessions(run_id)
    )
";
pub const LEDGER_SCHEMA_APPROVALS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_approvals_run ON approvals(run_id)";

/// Resumability ledger: one row per completed atomic write.
pub const LEDGER_SCHEMA_COMPLETED_PATHS: &str = "
    CREATE TABLE IF NOT EXISTS completed_paths (
        run_id TEXT NOT NULL,
        path TEXT NOT NULL,
        ts TEXT NOT NULL,
        PRIMARY KEY(run_id, path)
    )
";

/// Promotion ledger: per-module before/after category diff.
pub const LEDGER_SCHEMA_PROMOTIONS: &str = "
    CREATE TABLE IF NOT EXISTS promotions (
        run_id TEXT NOT NULL,
        path TEXT NOT NULL,
        category TEXT NOT NULL,
        before_json TEXT NOT NULL,
        after_json TEXT NOT NULL,
        ts TEXT NOT NULL,
        PRIMARY KEY(run_id, path, category)
    )
";

pub fn db_connect(db_path: &str) -> Result<Connection, StarmapError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(StarmapError::SqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(StarmapError::SqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(StarmapError::SqliteError)?;
    Ok(conn)
}
