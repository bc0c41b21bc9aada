//! Persistence of test cases, executions and debug sessions.
//!
//! The engine talks to storage through [`ExecutionStore`]. [`JsonFileStore`]
//! keeps everything as pretty-printed JSON under one base directory:
//!
//! ```text
//! <base>/test_cases/<id>.json
//! <base>/executions/<id>/execution.json
//! <base>/executions/<id>/steps/step_<n>.json
//! <base>/debug/<id>.json
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::debug;

use crate::config;
use crate::debug::DebugSessionSnapshot;
use crate::execution::{ExecutionOutcome, ExecutionResult, StepResult, TestCase};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// The persistence collaborator
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn load_test_case(&self, id: &str) -> StoreResult<TestCase>;
    async fn save_test_case(&self, test_case: &TestCase) -> StoreResult<()>;
    async fn save_execution(&self, result: &ExecutionResult) -> StoreResult<()>;
    async fn save_step(&self, execution_id: &str, step: &StepResult) -> StoreResult<()>;
    async fn save_debug_session(&self, snapshot: &DebugSessionSnapshot) -> StoreResult<()>;
    async fn load_debug_session(&self, id: &str) -> StoreResult<DebugSessionSnapshot>;
}

/// Execution record as written to disk
#[derive(Debug, Serialize, Deserialize)]
struct ExecutionRecord {
    host: String,
    #[serde(flatten)]
    result: ExecutionResult,
}

/// One line of `list_executions`
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub test_case_id: String,
    pub outcome: ExecutionOutcome,
    pub started_at: DateTime<Utc>,
    pub host: String,
    pub dir: PathBuf,
}

/// File-backed store
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    base: PathBuf,
}

impl JsonFileStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Store rooted at the configured base directory
    pub fn from_config() -> Self {
        Self::new(config::store_base_dir())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn execution_dir(&self, execution_id: &str) -> PathBuf {
        self.base.join("executions").join(sanitize_name(execution_id))
    }

    fn test_case_path(&self, id: &str) -> PathBuf {
        self.base.join("test_cases").join(format!("{}.json", sanitize_name(id)))
    }

    fn debug_path(&self, id: &str) -> PathBuf {
        self.base.join("debug").join(format!("{}.json", sanitize_name(id)))
    }

    /// Every stored execution, newest first; unreadable records are skipped
    pub fn list_executions(&self) -> std::io::Result<Vec<ExecutionSummary>> {
        let root = self.base.join("executions");
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        for entry in fs::read_dir(&root)? {
            let dir = entry?.path();
            let record = fs::read(dir.join("execution.json"))
                .ok()
                .and_then(|bytes| serde_json::from_slice::<ExecutionRecord>(&bytes).ok());
            match record {
                Some(record) => summaries.push(ExecutionSummary {
                    execution_id: record.result.execution_id,
                    test_case_id: record.result.test_case_id,
                    outcome: record.result.outcome,
                    started_at: record.result.started_at,
                    host: record.host,
                    dir,
                }),
                None => debug!(dir = %dir.display(), "Skipping unreadable execution record"),
            }
        }
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }

    /// Remove execution directories not modified within `max_age`
    pub fn cleanup_old_executions(&self, max_age: Duration) -> std::io::Result<usize> {
        let root = self.base.join("executions");
        if !root.exists() {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut cleaned = 0;
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if matches!(age, Some(age) if age > max_age) && fs::remove_dir_all(&path).is_ok() {
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> StoreResult<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(what.to_string())),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ExecutionStore for JsonFileStore {
    async fn load_test_case(&self, id: &str) -> StoreResult<TestCase> {
        read_json(&self.test_case_path(id), &format!("test case {}", id)).await
    }

    async fn save_test_case(&self, test_case: &TestCase) -> StoreResult<()> {
        write_json(&self.test_case_path(&test_case.id), test_case).await
    }

    async fn save_execution(&self, result: &ExecutionResult) -> StoreResult<()> {
        let record = ExecutionRecord {
            host: host_name(),
            result: result.clone(),
        };
        let path = self.execution_dir(&result.execution_id).join("execution.json");
        write_json(&path, &record).await?;
        debug!(path = %path.display(), "Execution saved");
        Ok(())
    }

    async fn save_step(&self, execution_id: &str, step: &StepResult) -> StoreResult<()> {
        let path = self
            .execution_dir(execution_id)
            .join("steps")
            .join(format!("step_{}.json", step.index));
        write_json(&path, step).await
    }

    async fn save_debug_session(&self, snapshot: &DebugSessionSnapshot) -> StoreResult<()> {
        write_json(&self.debug_path(&snapshot.session_id), snapshot).await
    }

    async fn load_debug_session(&self, id: &str) -> StoreResult<DebugSessionSnapshot> {
        read_json(&self.debug_path(id), &format!("debug session {}", id)).await
    }
}

fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Sanitize an id for use in file names
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserKind;
    use crate::execution::StepOutcome;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn result(id: &str) -> ExecutionResult {
        let now = Utc::now();
        ExecutionResult {
            execution_id: id.to_string(),
            test_case_id: "tc-1".into(),
            environment: "staging".into(),
            browser: BrowserKind::Chromium,
            steps: Vec::new(),
            outcome: ExecutionOutcome::Passed,
            error: None,
            profile_injection: None,
            profile: None,
            started_at: now,
            finished_at: now,
        }
    }

    #[tokio::test]
    async fn test_test_case_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path());
        let case = TestCase::new("Checkout", ["Click Buy"]).with_id("tc/../1");

        store.save_test_case(&case).await.unwrap();
        assert!(tmp.path().join("test_cases/tc____1.json").exists());
        assert_eq!(store.load_test_case("tc/../1").await.unwrap(), case);
        assert!(matches!(store.load_test_case("missing").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_execution_layout_and_listing() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path());
        let step = StepResult {
            index: 3,
            instruction: "Click Buy".into(),
            action_taken: "click Buy".into(),
            outcome: StepOutcome::Passed,
            error_detail: None,
            duration_ms: 5,
            tier: None,
        };

        store.save_step("exec-1", &step).await.unwrap();
        store.save_execution(&result("exec-1")).await.unwrap();
        assert!(tmp.path().join("executions/exec-1/steps/step_3.json").exists());

        let listed = store.list_executions().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].execution_id, "exec-1");
        assert!(!listed[0].host.is_empty());
    }

    #[test]
    fn test_cleanup_keeps_recent() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path());
        fs::create_dir_all(store.execution_dir("fresh")).unwrap();
        assert_eq!(store.cleanup_old_executions(Duration::from_secs(3600)).unwrap(), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.cleanup_old_executions(Duration::ZERO).unwrap(), 1);
    }

    #[test]
    fn test_list_on_missing_base() {
        let store = JsonFileStore::new("/nonexistent/nl-browser-test-store");
        assert!(store.list_executions().unwrap().is_empty());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("a b/c"), "a_b_c");
        assert_eq!(sanitize_name("run-01_x"), "run-01_x");
    }
}
