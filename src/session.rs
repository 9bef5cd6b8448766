//! Per-run filesystem layout under `<project>/.ralph/`.
//!
//! `session-<id>/iterations.log` gets one JSON line per loop event;
//! per-iteration test results and context checkpoints land next to it.
//! Everything here is best-effort, like the audit store: a read-only
//! project directory must never kill a run.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::context::{AgentContext, TestResult};

/// Writer for one run's session directory.
pub struct SessionLog {
    dir: Option<PathBuf>,
    file: Mutex<Option<std::fs::File>>,
}

impl SessionLog {
    /// Create `<project>/.ralph/session-<session_id>/` and open the log.
    pub fn create(project_dir: &Path, session_id: Uuid) -> Self {
        let dir = project_dir
            .join(".ralph")
            .join(format!("session-{}", session_id));

        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "Session directory unavailable; session logging is disabled");
            return Self::disabled();
        }

        let log_path = dir.join("iterations.log");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            Ok(file) => Self {
                dir: Some(dir),
                file: Mutex::new(Some(file)),
            },
            Err(e) => {
                tracing::warn!(path = %log_path.display(), error = %e, "Cannot open iterations.log; session logging is disabled");
                Self::disabled()
            }
        }
    }

    /// A log that ignores every write.
    pub fn disabled() -> Self {
        Self {
            dir: None,
            file: Mutex::new(None),
        }
    }

    /// Append one event line to `iterations.log`.
    pub fn log_event(&self, event_type: &str, payload: serde_json::Value) {
        let Ok(mut guard) = self.file.lock() else { return };
        let Some(file) = guard.as_mut() else { return };

        let line = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event_type,
            "payload": payload,
        });

        if let Err(e) = writeln!(file, "{}", line) {
            tracing::warn!(error = %e, "Failed to append session event");
        }
    }

    /// Write the raw test result of one iteration as its own JSON file.
    pub fn write_test_result(&self, iteration: u32, result: &TestResult) {
        let Some(dir) = &self.dir else { return };
        let path = dir.join(format!("test-result-{}.json", iteration));
        match serde_json::to_vec_pretty(result) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&path, bytes) {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to write test result snapshot");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize test result"),
        }
    }

    /// Checkpoint the full context snapshot for post-mortem debugging.
    pub fn write_checkpoint(&self, iteration: u32, context: &AgentContext) {
        let Some(dir) = &self.dir else { return };
        let path = dir.join(format!("checkpoint-{}.json", iteration));
        match serde_json::to_vec_pretty(context) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&path, bytes) {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to write checkpoint");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize checkpoint"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TestStatus;

    #[test]
    fn test_events_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let session_id = Uuid::new_v4();
        let log = SessionLog::create(dir.path(), session_id);

        log.log_event("iteration_start", json!({"iteration": 1}));
        log.log_event("iteration_end", json!({"iteration": 1, "status": "failed"}));

        let content = std::fs::read_to_string(
            dir.path()
                .join(".ralph")
                .join(format!("session-{}", session_id))
                .join("iterations.log"),
        )
        .unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed["timestamp"].is_string());
            assert!(parsed["event"].is_string());
        }
    }

    #[test]
    fn test_disabled_log_ignores_writes() {
        let log = SessionLog::disabled();
        log.log_event("noop", json!({}));
        log.write_test_result(
            1,
            &TestResult {
                status: TestStatus::Failed,
                failed_tests: vec![],
                error_messages: vec![],
                duration_ms: 1,
            },
        );
    }
}
