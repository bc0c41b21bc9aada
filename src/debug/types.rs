use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::browser::BrowserError;
use crate::execution::{ExecutionError, StepResult};

/// Result type for debug operations
pub type DebugResult<T> = Result<T, DebugError>;

/// Precondition and lifecycle errors of debug sessions.
///
/// Every variant except `Execution` and `Driver` is raised before any side
/// effect, leaving the session unchanged.
#[derive(Debug, Error)]
pub enum DebugError {
    #[error("debug session '{0}' not found")]
    NotFound(String),

    #[error("invalid range [{from}, {to}] for a test case of {step_count} step(s)")]
    Bounds { from: usize, to: usize, step_count: usize },

    #[error("cannot jump to step {index}; valid positions are 0..={step_count}")]
    JumpOutOfRange { index: usize, step_count: usize },

    #[error("debug session '{id}' is {status} and cannot run further steps")]
    NotRunnable { id: String, status: DebugStatus },

    #[error("debug session '{0}' is busy with another operation")]
    Busy(String),

    #[error("test case '{0}' has no steps")]
    EmptyTestCase(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("browser error: {0}")]
    Driver(#[from] BrowserError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    /// Browser released; the session is unusable
    Disposed,
}

impl DebugStatus {
    /// Whether step/continue/range/jump may run in this state
    pub fn accepts_commands(&self) -> bool {
        matches!(self, DebugStatus::Idle | DebugStatus::Paused)
    }
}

impl fmt::Display for DebugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DebugStatus::Idle => "idle",
            DebugStatus::Running => "running",
            DebugStatus::Paused => "paused",
            DebugStatus::Completed => "completed",
            DebugStatus::Failed => "failed",
            DebugStatus::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugMode {
    #[default]
    Sequential,
    Range,
}

/// Inclusive step range, `from <= to < step_count`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeBounds {
    pub from: usize,
    pub to: usize,
}

impl RangeBounds {
    pub fn validate(from: usize, to: usize, step_count: usize) -> DebugResult<Self> {
        if from > to || to >= step_count {
            return Err(DebugError::Bounds { from, to, step_count });
        }
        Ok(Self { from, to })
    }
}

/// Serializable view of a debug session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugSessionSnapshot {
    pub session_id: String,
    pub test_case_id: String,
    pub step_count: usize,
    pub cursor: usize,
    pub mode: DebugMode,
    pub status: DebugStatus,
    pub range: Option<RangeBounds>,
    /// Visible step results ordered by index; silent prerequisite replays are not included
    pub results: Vec<StepResult>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}
