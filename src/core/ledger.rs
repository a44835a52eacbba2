//! Ledger service: run sessions, approvals, the resumability ledger, and the
//! promotion ledger, all behind a serialized broker.
//!
//! The broker is the single seam through which ledger state mutates. Access
//! is serialized with an in-process lock so parallel chunk workers cannot
//! lose appends, and every operation lands an audit event in
//! `ledger.events.jsonl`.

use crate::core::db;
use crate::core::error::StarmapError;
use crate::core::store::Store;
use rusqlite::{Connection, params};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Draft,
    CanaryBuilt,
    CanaryApproved,
    CanaryRejected,
    Aborted,
    FullRunInProgress,
    PostRunValidated,
    Committed,
    RolledBack,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Draft => "draft",
            RunState::CanaryBuilt => "canary_built",
            RunState::CanaryApproved => "canary_approved",
            RunState::CanaryRejected => "canary_rejected",
            RunState::Aborted => "aborted",
            RunState::FullRunInProgress => "full_run_in_progress",
            RunState::PostRunValidated => "post_run_validated",
            RunState::Committed => "committed",
            RunState::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Result<RunState, StarmapError> {
        Ok(match s {
            "draft" => RunState::Draft,
            "canary_built" => RunState::CanaryBuilt,
            "canary_approved" => RunState::CanaryApproved,
            "canary_rejected" => RunState::CanaryRejected,
            "aborted" => RunState::Aborted,
            "full_run_in_progress" => RunState::FullRunInProgress,
            "post_run_validated" => RunState::PostRunValidated,
            "committed" => RunState::Committed,
            "rolled_back" => RunState::RolledBack,
            other => {
                return Err(StarmapError::ConfigError(format!(
                    "unknown run state {:?}",
                    other
                )));
            }
        })
    }

    /// Legal transitions of the run-session state machine.
    pub fn can_transition(&self, to: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, to),
            (Draft, CanaryBuilt)
                | (CanaryBuilt, CanaryApproved)
                | (CanaryBuilt, CanaryRejected)
                | (CanaryRejected, Aborted)
                | (CanaryApproved, FullRunInProgress)
                // crash-resume re-enters the same state
                | (FullRunInProgress, FullRunInProgress)
                | (FullRunInProgress, PostRunValidated)
                | (FullRunInProgress, Aborted)
                | (PostRunValidated, Committed)
                | (PostRunValidated, RolledBack)
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunSession {
    pub run_id: String,
    pub state: RunState,
    pub sample: Vec<String>,
    pub fingerprint: String,
    pub backup_ref: Option<String>,
    pub created_ts: String,
    pub updated_ts: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub approval_id: String,
    pub run_id: String,
    pub fingerprint: String,
    pub actor: String,
    pub ts: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct LedgerEvent {
    ts: String,
    event_id: String,
    actor: String,
    op: String,
    status: String,
}

/// Serialized access to the ledger database plus the audit trail.
pub struct LedgerBroker {
    db_path: PathBuf,
    audit_log_path: PathBuf,
}

impl LedgerBroker {
    pub fn new(store: &Store) -> Self {
        Self {
            db_path: store.ledger_db_path(),
            audit_log_path: store.root.join("ledger.events.jsonl"),
        }
    }

    pub fn init(&self) -> Result<(), StarmapError> {
        self.with_conn("starmap", "ledger.init", |conn| {
            conn.execute(db::LEDGER_SCHEMA_RUN_SESSIONS, [])?;
            conn.execute(db::LEDGER_SCHEMA_APPROVALS, [])?;
            conn.execute(db::LEDGER_SCHEMA_APPROVALS_INDEX, [])?;
            conn.execute(db::LEDGER_SCHEMA_COMPLETED_PATHS, [])?;
            conn.execute(db::LEDGER_SCHEMA_PROMOTIONS, [])?;
            Ok(())
        })
    }

    /// Execute a closure with a serialized connection to the ledger.
    pub fn with_conn<F, R>(&self, actor: &str, op_name: &str, f: F) -> Result<R, StarmapError>
    where
        F: FnOnce(&Connection) -> Result<R, StarmapError>,
    {
        static LEDGER_LOCK: Mutex<()> = Mutex::new(());
        let _lock = LEDGER_LOCK.lock().unwrap();

        let conn = db::db_connect(&self.db_path.to_string_lossy())?;
        let result = f(&conn);

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, op_name, status)?;

        result
    }

    fn log_event(&self, actor: &str, op: &str, status: &str) -> Result<(), StarmapError> {
        use std::fs::OpenOptions;
        use std::io::Write;

        let ev = LedgerEvent {
            ts: now_iso(),
            event_id: Ulid::new().to_string(),
            actor: actor.to_string(),
            op: op.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(StarmapError::IoError)?;
        writeln!(f, "{}", serde_json::to_string(&ev).unwrap()).map_err(StarmapError::IoError)?;
        Ok(())
    }

    // --- run sessions ---

    pub fn insert_session(
        &self,
        run_id: &str,
        sample: &[String],
        fingerprint: &str,
    ) -> Result<(), StarmapError> {
        let sample_json = serde_json::to_string(sample).unwrap();
        let now = now_iso();
        self.with_conn("starmap", "session.insert", |conn| {
            conn.execute(
                "INSERT INTO run_sessions(run_id, state, sample_json, fingerprint, backup_ref, created_ts, updated_ts)
                 VALUES(?1, ?2, ?3, ?4, NULL, ?5, ?5)",
                params![run_id, RunState::Draft.as_str(), sample_json, fingerprint, now],
            )?;
            Ok(())
        })
    }

    pub fn load_session(&self, run_id: &str) -> Result<RunSession, StarmapError> {
        let row = self.with_conn("starmap", "session.load", |conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, state, sample_json, fingerprint, backup_ref, created_ts, updated_ts
                 FROM run_sessions WHERE run_id = ?1",
            )?;
            let mut rows = stmt.query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;
            match rows.next() {
                Some(r) => Ok(Some(r?)),
                None => Ok(None),
            }
        })?;

        let (run_id, state, sample_json, fingerprint, backup_ref, created_ts, updated_ts) =
            row.ok_or_else(|| StarmapError::NotFound(format!("no run session {}", run_id)))?;
        Ok(RunSession {
            run_id,
            state: RunState::parse(&state)?,
            sample: serde_json::from_str(&sample_json)
                .map_err(|e| StarmapError::ConfigError(e.to_string()))?,
            fingerprint,
            backup_ref,
            created_ts,
            updated_ts,
        })
    }

    /// Transition a session, enforcing the state machine.
    pub fn transition(&self, run_id: &str, to: RunState) -> Result<(), StarmapError> {
        let session = self.load_session(run_id)?;
        if !session.state.can_transition(to) {
            return Err(StarmapError::SafetyGateError(format!(
                "illegal run transition {} -> {} for {}",
                session.state.as_str(),
                to.as_str(),
                run_id
            )));
        }
        let now = now_iso();
        self.with_conn("starmap", "session.transition", |conn| {
            conn.execute(
                "UPDATE run_sessions SET state = ?1, updated_ts = ?2 WHERE run_id = ?3",
                params![to.as_str(), now, run_id],
            )?;
            Ok(())
        })
    }

    pub fn set_backup_ref(&self, run_id: &str, backup_ref: &str) -> Result<(), StarmapError> {
        let now = now_iso();
        self.with_conn("starmap", "session.backup_ref", |conn| {
            conn.execute(
                "UPDATE run_sessions SET backup_ref = ?1, updated_ts = ?2 WHERE run_id = ?3",
                params![backup_ref, now, run_id],
            )?;
            Ok(())
        })
    }

    // --- approvals ---

    pub fn record_approval(
        &self,
        run_id: &str,
        fingerprint: &str,
        actor: &str,
    ) -> Result<String, StarmapError> {
        let approval_id = Ulid::new().to_string();
        let now = now_iso();
        self.with_conn(actor, "approval.record", |conn| {
            conn.execute(
                "INSERT INTO approvals(approval_id, run_id, fingerprint, actor, ts) VALUES(?1, ?2, ?3, ?4, ?5)",
                params![approval_id, run_id, fingerprint, actor, now],
            )?;
            Ok(())
        })?;
        Ok(approval_id)
    }

    /// The approval check fails closed: no row, or a fingerprint that does
    /// not match the session's canary set, reads as unapproved.
    pub fn find_approval(&self, run_id: &str, fingerprint: &str) -> Result<Option<Approval>, StarmapError> {
        self.with_conn("starmap", "approval.check", |conn| {
            let mut stmt = conn.prepare(
                "SELECT approval_id, run_id, fingerprint, actor, ts FROM approvals
                 WHERE run_id = ?1 AND fingerprint = ?2",
            )?;
            let mut rows = stmt.query_map(params![run_id, fingerprint], |row| {
                Ok(Approval {
                    approval_id: row.get(0)?,
                    run_id: row.get(1)?,
                    fingerprint: row.get(2)?,
                    actor: row.get(3)?,
                    ts: row.get(4)?,
                })
            })?;
            match rows.next() {
                Some(r) => Ok(Some(r?)),
                None => Ok(None),
            }
        })
    }

    // --- resumability ledger ---

    pub fn mark_completed(&self, run_id: &str, path: &str) -> Result<(), StarmapError> {
        let now = now_iso();
        self.with_conn("worker", "ledger.mark_completed", |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO completed_paths(run_id, path, ts) VALUES(?1, ?2, ?3)",
                params![run_id, path, now],
            )?;
            Ok(())
        })
    }

    pub fn completed_paths(&self, run_id: &str) -> Result<FxHashSet<String>, StarmapError> {
        self.with_conn("starmap", "ledger.completed_paths", |conn| {
            let mut stmt =
                conn.prepare("SELECT path FROM completed_paths WHERE run_id = ?1")?;
            let rows = stmt.query_map(params![run_id], |row| row.get::<_, String>(0))?;
            let mut out = FxHashSet::default();
            for r in rows {
                out.insert(r?);
            }
            Ok(out)
        })
    }

    // --- promotion ledger ---

    pub fn record_promotion(
        &self,
        run_id: &str,
        path: &str,
        category: &str,
        before: &[String],
        after: &[String],
    ) -> Result<(), StarmapError> {
        let before_json = serde_json::to_string(before).unwrap();
        let after_json = serde_json::to_string(after).unwrap();
        let now = now_iso();
        self.with_conn("worker", "ledger.record_promotion", |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO promotions(run_id, path, category, before_json, after_json, ts)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
                params![run_id, path, category, before_json, after_json, now],
            )?;
            Ok(())
        })
    }

    pub fn promotions_for_run(&self, run_id: &str) -> Result<Vec<(String, String)>, StarmapError> {
        self.with_conn("starmap", "ledger.promotions", |conn| {
            let mut stmt = conn.prepare(
                "SELECT path, category FROM promotions WHERE run_id = ?1 ORDER BY path, category",
            )?;
            let rows = stmt.query_map(params![run_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
    }
}

pub fn now_iso() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}
