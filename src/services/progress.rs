//! Resumable grading ledger.
//!
//! Per student the state moves `Unseen -> InProgress -> Completed | Failed`.
//! `Completed` is sticky until [`ProgressLedger::reset`]; `Failed` is not, so failed
//! students are graded again on the next run. Every mutation rewrites the whole file
//! atomically while holding the ledger lock, so concurrent workers never lose updates.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::time::now_rfc3339;
use crate::schemas::grading::GradingRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CompletedEntry {
    pub(crate) student_id: String,
    pub(crate) score: u32,
    pub(crate) comment: String,
    pub(crate) timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FailedEntry {
    pub(crate) student_id: String,
    pub(crate) error: String,
    pub(crate) timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct LedgerStatistics {
    pub(crate) total_completed: usize,
    pub(crate) total_failed: usize,
    pub(crate) last_updated: Option<String>,
    pub(crate) in_progress: Option<String>,
}

/// On-disk document. Unknown top-level keys ride along in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct LedgerState {
    completed: Vec<CompletedEntry>,
    failed: Vec<FailedEntry>,
    in_progress: Option<String>,
    timestamp: Option<String>,
    session_id: Option<String>,
    statistics: LedgerStatistics,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl LedgerState {
    fn statistics(&self) -> LedgerStatistics {
        LedgerStatistics {
            total_completed: self.completed.len(),
            total_failed: self.failed.len(),
            last_updated: self.timestamp.clone(),
            in_progress: self.in_progress.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum LedgerError {
    #[error("failed to write progress ledger {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("failed to serialize progress ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug)]
pub(crate) struct ProgressLedger {
    path: PathBuf,
    session_id: String,
    state: Mutex<LedgerState>,
}

impl ProgressLedger {
    /// Loads the ledger at `path`, or starts empty if it is missing. A corrupt file is
    /// moved aside to `<path>.corrupt` and replaced by an empty ledger.
    pub(crate) async fn open(path: &Path) -> Self {
        let state = match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<LedgerState>(&bytes) {
                Ok(state) => state,
                Err(err) => {
                    tracing::error!(
                        path = %path.display(),
                        error = %err,
                        "Progress ledger is corrupt; starting from an empty ledger"
                    );
                    backup_corrupt_file(path).await;
                    LedgerState::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => LedgerState::default(),
            Err(err) => {
                tracing::error!(
                    path = %path.display(),
                    error = %err,
                    "Progress ledger is unreadable; starting from an empty ledger"
                );
                LedgerState::default()
            }
        };

        let session_id = Uuid::new_v4().to_string();
        tracing::info!(
            path = %path.display(),
            session_id = %session_id,
            completed = state.completed.len(),
            failed = state.failed.len(),
            "Progress ledger opened"
        );

        Self { path: path.to_path_buf(), session_id, state: Mutex::new(state) }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// True once the student has a completed entry.
    pub(crate) async fn should_skip(&self, student_id: &str) -> bool {
        self.state.lock().await.completed.iter().any(|entry| entry.student_id == student_id)
    }

    pub(crate) async fn completed_ids(&self) -> BTreeSet<String> {
        let state = self.state.lock().await;
        state.completed.iter().map(|entry| entry.student_id.clone()).collect()
    }

    pub(crate) async fn failed_ids(&self) -> BTreeSet<String> {
        let state = self.state.lock().await;
        state.failed.iter().map(|entry| entry.student_id.clone()).collect()
    }

    pub(crate) async fn mark_in_progress(&self, student_id: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.in_progress = Some(student_id.to_string());
        self.persist(&mut state).await
    }

    pub(crate) async fn clear_in_progress(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.in_progress = None;
        self.persist(&mut state).await
    }

    /// Also drops earlier failures of the same student.
    pub(crate) async fn mark_completed(
        &self,
        student_id: &str,
        record: &GradingRecord,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.failed.retain(|entry| entry.student_id != student_id);
        state.completed.push(CompletedEntry {
            student_id: student_id.to_string(),
            score: record.score,
            comment: record.comment.clone(),
            timestamp: now_rfc3339(),
        });
        self.persist(&mut state).await
    }

    pub(crate) async fn mark_failed(
        &self,
        student_id: &str,
        error: &str,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.failed.push(FailedEntry {
            student_id: student_id.to_string(),
            error: error.to_string(),
            timestamp: now_rfc3339(),
        });
        self.persist(&mut state).await
    }

    /// Forgets failures so a retry run can resubmit them. Completed entries stay.
    pub(crate) async fn reset_failed(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.failed.clear();
        self.persist(&mut state).await
    }

    /// Clears everything except unknown keys written by other tools.
    pub(crate) async fn reset(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let extra = std::mem::take(&mut state.extra);
        *state = LedgerState { extra, ..LedgerState::default() };
        self.persist(&mut state).await
    }

    pub(crate) async fn statistics(&self) -> LedgerStatistics {
        self.state.lock().await.statistics()
    }

    async fn persist(&self, state: &mut LedgerState) -> Result<(), LedgerError> {
        state.timestamp = Some(now_rfc3339());
        state.session_id = Some(self.session_id.clone());
        state.statistics = state.statistics();

        let bytes = serde_json::to_vec_pretty(&*state)?;
        crate::core::fs::write_atomic(&self.path, &bytes)
            .await
            .map_err(|source| LedgerError::Io { path: self.path.display().to_string(), source })
    }
}

async fn backup_corrupt_file(path: &Path) {
    let mut backup = path.as_os_str().to_os_string();
    backup.push(".corrupt");
    if let Err(err) = tokio::fs::rename(path, &backup).await {
        tracing::warn!(path = %path.display(), error = %err, "Failed to back up corrupt ledger");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn record(student_id: &str, score: u32) -> GradingRecord {
        GradingRecord::graded(student_id, score, "ok", format!("{student_id}-{score}-ok"))
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).expect("read")).expect("json")
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ProgressLedger::open(&dir.path().join("progress.json")).await;

        assert!(!ledger.should_skip("S001").await);
        assert_eq!(ledger.statistics().await, LedgerStatistics::default());
        assert!(!ledger.path().exists());
    }

    #[tokio::test]
    async fn completed_is_sticky_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");

        let ledger = ProgressLedger::open(&path).await;
        ledger.mark_in_progress("S001").await.unwrap();
        ledger.mark_completed("S001", &record("S001", 96)).await.unwrap();

        let reopened = ProgressLedger::open(&path).await;
        assert!(reopened.should_skip("S001").await);
        assert!(!reopened.should_skip("S002").await);

        let json = read_json(&path);
        assert_eq!(json["completed"][0]["student_id"], "S001");
        assert_eq!(json["completed"][0]["score"], 96);
        assert_eq!(json["in_progress"], "S001");
        assert_eq!(json["statistics"]["total_completed"], 1);
        assert!(json["timestamp"].is_string());
        assert!(json["session_id"].is_string());
    }

    #[tokio::test]
    async fn failed_is_not_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ProgressLedger::open(&dir.path().join("progress.json")).await;

        ledger.mark_failed("S002", "API request failed").await.unwrap();

        assert!(!ledger.should_skip("S002").await);
        assert_eq!(ledger.failed_ids().await, BTreeSet::from(["S002".to_string()]));
    }

    #[tokio::test]
    async fn completion_supersedes_earlier_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        let ledger = ProgressLedger::open(&path).await;
        ledger.mark_failed("S001", "timeout").await.unwrap();
        ledger.mark_failed("S002", "timeout").await.unwrap();

        ledger.mark_completed("S001", &record("S001", 97)).await.unwrap();

        let stats = ledger.statistics().await;
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(ledger.failed_ids().await, BTreeSet::from(["S002".to_string()]));
        assert_eq!(read_json(&path)["statistics"]["total_failed"], 1);
    }

    #[tokio::test]
    async fn reset_failed_keeps_completed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        let ledger = ProgressLedger::open(&path).await;
        ledger.mark_completed("S001", &record("S001", 98)).await.unwrap();
        ledger.mark_failed("S002", "timeout").await.unwrap();

        ledger.reset_failed().await.unwrap();

        assert!(ledger.should_skip("S001").await);
        assert!(!ledger.should_skip("S002").await);
        assert!(ledger.failed_ids().await.is_empty());
        assert_eq!(read_json(&path)["failed"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ProgressLedger::open(&dir.path().join("progress.json")).await;
        ledger.mark_completed("S001", &record("S001", 98)).await.unwrap();
        ledger.mark_failed("S002", "timeout").await.unwrap();
        ledger.mark_in_progress("S003").await.unwrap();

        ledger.reset().await.unwrap();

        let stats = ledger.statistics().await;
        assert_eq!(stats.total_completed, 0);
        assert_eq!(stats.total_failed, 0);
        assert_eq!(stats.in_progress, None);
        assert!(ledger.completed_ids().await.is_empty());
    }

    #[tokio::test]
    async fn statistics_track_counts_and_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ProgressLedger::open(&dir.path().join("progress.json")).await;
        ledger.mark_completed("S001", &record("S001", 98)).await.unwrap();
        ledger.mark_failed("S002", "timeout").await.unwrap();
        ledger.mark_in_progress("S003").await.unwrap();

        let stats = ledger.statistics().await;
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.in_progress.as_deref(), Some("S003"));
        assert!(stats.last_updated.is_some());

        ledger.clear_in_progress().await.unwrap();
        assert_eq!(ledger.statistics().await.in_progress, None);
    }

    #[tokio::test]
    async fn unknown_keys_survive_rewrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        std::fs::write(
            &path,
            r#"{"completed": [], "failed": [], "in_progress": null, "statistics": {},
                "exported_by": "gradebook-sync", "notes": {"term": "fall"}}"#,
        )
        .unwrap();

        let ledger = ProgressLedger::open(&path).await;
        ledger.mark_completed("S001", &record("S001", 95)).await.unwrap();
        ledger.reset().await.unwrap();

        let json = read_json(&path);
        assert_eq!(json["exported_by"], "gradebook-sync");
        assert_eq!(json["notes"]["term"], "fall");
    }

    #[tokio::test]
    async fn corrupt_file_is_backed_up_and_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        std::fs::write(&path, r#"{"completed": [ {"student_id": "#).unwrap();

        let ledger = ProgressLedger::open(&path).await;
        assert_eq!(ledger.statistics().await.total_completed, 0);
        assert!(dir.path().join("progress.json.corrupt").exists());

        ledger.mark_completed("S001", &record("S001", 92)).await.unwrap();
        assert!(ProgressLedger::open(&path).await.should_skip("S001").await);
    }

    #[tokio::test]
    async fn concurrent_completions_are_not_lost() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        let ledger = Arc::new(ProgressLedger::open(&path).await);

        let handles = (0..32)
            .map(|idx| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    let id = format!("S{idx:03}");
                    ledger.mark_in_progress(&id).await.unwrap();
                    ledger.mark_completed(&id, &record(&id, 96)).await.unwrap();
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.await.expect("join");
        }

        assert_eq!(ledger.completed_ids().await.len(), 32);
        let reopened = ProgressLedger::open(&path).await;
        assert_eq!(reopened.statistics().await.total_completed, 32);
        assert_eq!(read_json(&path)["completed"].as_array().map(Vec::len), Some(32));
    }
}
