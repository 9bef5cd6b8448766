//! Best-effort audit persistence.
//!
//! Two tables: one row per attempt across the whole run, one row per
//! run. Every public method returns normally no matter what the
//! underlying store does — persistence failures are logged at warn and
//! swallowed, and a store that cannot open within its deadline degrades
//! to a no-op for the rest of the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::records::TierAttemptRecord;

/// Deadline for opening the database before degrading to a no-op.
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    tier_index INTEGER NOT NULL,
    tier_name TEXT NOT NULL,
    tier_mode TEXT NOT NULL,
    model_artisan TEXT NOT NULL,
    model_librarian TEXT,
    model_critic TEXT,
    iteration INTEGER NOT NULL,
    code_change_summary TEXT NOT NULL,
    test_status TEXT NOT NULL,
    failed_tests TEXT NOT NULL,
    error_messages TEXT NOT NULL,
    cost_usd REAL NOT NULL,
    duration_ms INTEGER NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_attempts_run ON attempts(run_id);
CREATE INDEX IF NOT EXISTS idx_attempts_run_tier ON attempts(run_id, tier_index);

CREATE TABLE IF NOT EXISTS run_metadata (
    id TEXT PRIMARY KEY NOT NULL,
    objective TEXT NOT NULL,
    working_dir TEXT NOT NULL,
    test_command TEXT NOT NULL,
    tier_config_path TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    outcome TEXT NOT NULL,
    resolved_tier_name TEXT,
    resolved_iteration INTEGER
);
"#;

/// Terminal (or in-flight) state of a run as recorded in `run_metadata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failed,
    BudgetExhausted,
    InProgress,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::BudgetExhausted => "budget_exhausted",
            Self::InProgress => "in_progress",
        }
    }
}

/// Handle to the audit database. Cloneable; all writes serialize through
/// one connection (WAL keeps concurrent runs from corrupting the file).
#[derive(Clone)]
pub struct AuditStore {
    conn: Option<Arc<Mutex<Connection>>>,
}

impl AuditStore {
    /// Open (or create) the audit database at `path`.
    ///
    /// Never fails: any problem — unreachable path, read-only filesystem,
    /// schema error, open slower than the 3s deadline — produces a
    /// disabled store and a warn log.
    pub async fn open(path: &Path) -> Self {
        let path_buf = path.to_path_buf();
        let opened = tokio::time::timeout(
            OPEN_TIMEOUT,
            tokio::task::spawn_blocking(move || Self::open_blocking(&path_buf)),
        )
        .await;

        match opened {
            Ok(Ok(Ok(conn))) => Self {
                conn: Some(Arc::new(Mutex::new(conn))),
            },
            Ok(Ok(Err(e))) => {
                tracing::warn!(path = %path.display(), error = %e, "Audit store unavailable; audit writes are disabled");
                Self::disabled()
            }
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "Audit store open task failed; audit writes are disabled");
                Self::disabled()
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), "Audit store open timed out; audit writes are disabled");
                Self::disabled()
            }
        }
    }

    /// A store that ignores every write.
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    fn open_blocking(path: &Path) -> rusqlite::Result<Connection> {
        if let Some(parent) = path.parent() {
            // Creation failure surfaces as an open failure below.
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Persist one attempt row.
    pub async fn write_attempt(&self, record: &TierAttemptRecord) {
        let Some(conn) = &self.conn else { return };

        let failed_tests =
            serde_json::to_string(&record.failed_tests).unwrap_or_else(|_| "[]".to_string());
        let error_messages =
            serde_json::to_string(&record.error_messages).unwrap_or_else(|_| "[]".to_string());

        let conn = conn.lock().await;
        let result = conn.execute(
            "INSERT INTO attempts (
                run_id, tier_index, tier_name, tier_mode,
                model_artisan, model_librarian, model_critic,
                iteration, code_change_summary, test_status,
                failed_tests, error_messages, cost_usd, duration_ms, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                record.run_id.to_string(),
                record.tier_index,
                record.tier_name,
                record.tier_mode.to_string(),
                record.model_artisan,
                record.model_librarian,
                record.model_critic,
                record.iteration,
                record.code_change_summary,
                record.test_status.to_string(),
                failed_tests,
                error_messages,
                record.cost_usd,
                record.duration_ms,
                record.timestamp.to_rfc3339(),
            ],
        );

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist attempt record");
        }
    }

    /// Insert the run row at start of run.
    pub async fn write_run_metadata(
        &self,
        run_id: Uuid,
        objective: &str,
        working_dir: &Path,
        test_command: &str,
        tier_config_path: Option<&Path>,
    ) {
        let Some(conn) = &self.conn else { return };

        let conn = conn.lock().await;
        let result = conn.execute(
            "INSERT OR REPLACE INTO run_metadata (
                id, objective, working_dir, test_command, tier_config_path,
                started_at, completed_at, outcome, resolved_tier_name, resolved_iteration
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, NULL, NULL)",
            params![
                run_id.to_string(),
                objective,
                working_dir.to_string_lossy(),
                test_command,
                tier_config_path.map(|p| p.to_string_lossy().to_string()),
                Utc::now().to_rfc3339(),
                RunOutcome::InProgress.as_str(),
            ],
        );

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist run metadata");
        }
    }

    /// Mark the run finished.
    pub async fn update_run_metadata(
        &self,
        run_id: Uuid,
        outcome: RunOutcome,
        resolved_tier_name: Option<&str>,
        resolved_iteration: Option<u32>,
    ) {
        let Some(conn) = &self.conn else { return };

        let conn = conn.lock().await;
        let result = conn.execute(
            "UPDATE run_metadata
             SET completed_at = ?2, outcome = ?3, resolved_tier_name = ?4, resolved_iteration = ?5
             WHERE id = ?1",
            params![
                run_id.to_string(),
                Utc::now().to_rfc3339(),
                outcome.as_str(),
                resolved_tier_name,
                resolved_iteration,
            ],
        );

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to update run metadata");
        }
    }

    /// Number of attempt rows for a run (reporting and tests).
    pub async fn count_attempts(&self, run_id: Uuid) -> Option<u64> {
        let conn = self.conn.as_ref()?;
        let conn = conn.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM attempts WHERE run_id = ?1",
            params![run_id.to_string()],
            |row| row.get::<_, u64>(0),
        )
        .map_err(|e| {
            tracing::warn!(error = %e, "Failed to count attempt records");
            e
        })
        .ok()
    }

    /// Fetch the recorded outcome for a run (reporting and tests).
    pub async fn run_outcome(&self, run_id: Uuid) -> Option<(String, Option<String>)> {
        let conn = self.conn.as_ref()?;
        let conn = conn.lock().await;
        conn.query_row(
            "SELECT outcome, resolved_tier_name FROM run_metadata WHERE id = ?1",
            params![run_id.to_string()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .map_err(|e| {
            tracing::warn!(error = %e, "Failed to read run metadata");
            e
        })
        .ok()
    }

    /// Flush and drop the connection. Safe to call on a disabled store.
    pub async fn close(&self) {
        if let Some(conn) = &self.conn {
            let conn = conn.lock().await;
            if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
                tracing::warn!(error = %e, "Audit store checkpoint on close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TestStatus;
    use crate::tiers::TierMode;

    fn attempt(run_id: Uuid, tier_index: u32, iteration: u32) -> TierAttemptRecord {
        TierAttemptRecord {
            run_id,
            tier_index,
            tier_name: "cheap".to_string(),
            tier_mode: TierMode::Simple,
            model_artisan: "gpt-4o-mini".to_string(),
            model_librarian: None,
            model_critic: None,
            iteration,
            code_change_summary: "swapped + for *".to_string(),
            test_status: TestStatus::Failed,
            failed_tests: vec!["test_multiply".to_string()],
            error_messages: vec!["AssertionError".to_string()],
            cost_usd: 0.01,
            duration_ms: 42,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::open(&dir.path().join("audit.db")).await;
        assert!(store.is_enabled());

        let run_id = Uuid::new_v4();
        store
            .write_run_metadata(run_id, "fix multiply", dir.path(), "pytest", None)
            .await;
        store.write_attempt(&attempt(run_id, 0, 1)).await;
        store.write_attempt(&attempt(run_id, 0, 2)).await;
        store.write_attempt(&attempt(run_id, 1, 3)).await;
        store
            .update_run_metadata(run_id, RunOutcome::Success, Some("heavy"), Some(3))
            .await;

        assert_eq!(store.count_attempts(run_id).await, Some(3));
        let (outcome, tier) = store.run_outcome(run_id).await.unwrap();
        assert_eq!(outcome, "success");
        assert_eq!(tier.as_deref(), Some("heavy"));
        store.close().await;
    }

    #[tokio::test]
    async fn test_unwritable_path_degrades_silently() {
        // A path under a file (not a directory) cannot be created.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let store = AuditStore::open(&blocker.join("sub/audit.db")).await;
        assert!(!store.is_enabled());

        // Every call still returns normally.
        let run_id = Uuid::new_v4();
        store.write_attempt(&attempt(run_id, 0, 1)).await;
        store
            .write_run_metadata(run_id, "obj", dir.path(), "true", None)
            .await;
        store
            .update_run_metadata(run_id, RunOutcome::Failed, None, None)
            .await;
        assert_eq!(store.count_attempts(run_id).await, None);
        store.close().await;
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let first = AuditStore::open(&path).await;
        first.close().await;
        let second = AuditStore::open(&path).await;
        assert!(second.is_enabled());
    }
}
