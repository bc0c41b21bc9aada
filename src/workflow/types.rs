use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::execution::TestCase;
use crate::llm::{LlmError, TokenUsage};

/// Prefix of every error message produced by cooperative cancellation
pub const CANCELLATION_MARKER: &str = "CANCELLED";

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error("workflow '{id}' is already {status}")]
    Terminal { id: String, status: WorkflowStatus },

    #[error("workflow '{0}' is already running")]
    AlreadyRunning(String),

    #[error("invalid workflow transition {from} -> {to}")]
    InvalidTransition { from: WorkflowStatus, to: WorkflowStatus },

    #[error("workflow task failed: {0}")]
    Join(String),
}

/// Failure of one pipeline stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("stage produced unusable output: {0}")]
    InvalidOutput(String),

    #[error("{0}")]
    Other(String),
}

pub type StageResult<T> = Result<T, StageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    /// Status only moves forward: pending -> running -> terminal.
    /// An empty pipeline goes straight from pending to completed.
    pub fn can_transition_to(&self, to: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        match (self, to) {
            (Pending, _) => true,
            (Running, Completed | Failed | Cancelled) => true,
            (from, to) => *from == to && !from.is_terminal(),
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// What the pipeline is asked to produce a test for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInput {
    /// Page or application under test
    #[serde(default)]
    pub target_url: Option<String>,
    /// Free-text description of the feature or flow to test
    pub description: String,
    /// Extra material handed to every stage (requirements excerpts, notes)
    #[serde(default)]
    pub context: Vec<String>,
}

impl WorkflowInput {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }
}

/// State of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub status: WorkflowStatus,
    pub current_stage: Option<String>,
    /// Stage name -> fraction complete, in pipeline order
    pub stage_progress: IndexMap<String, f64>,
    /// Weighted aggregate of `stage_progress`
    pub progress: f64,
    pub stage_outputs: IndexMap<String, String>,
    pub token_usage: TokenUsage,
    pub input: WorkflowInput,
    /// Test case parsed from the final stage's output
    pub test_case: Option<TestCase>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl WorkflowState {
    pub fn pending<I, S>(id: impl Into<String>, input: WorkflowInput, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            status: WorkflowStatus::Pending,
            current_stage: None,
            stage_progress: stages.into_iter().map(|s| (s.into(), 0.0)).collect(),
            progress: 0.0,
            stage_outputs: IndexMap::new(),
            token_usage: TokenUsage::default(),
            input,
            test_case: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Enter `stage`, moving a pending workflow to running
    pub fn start_stage(&mut self, stage: impl Into<String>) {
        self.status = WorkflowStatus::Running;
        self.current_stage = Some(stage.into());
    }

    /// Move to the terminal `status`; the store rejects this if it goes backwards
    pub fn finish(&mut self, status: WorkflowStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.current_stage = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == WorkflowStatus::Cancelled
    }
}
