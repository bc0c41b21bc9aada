//! Multi-stage test-generation workflows.
//!
//! [`OrchestrationService`] runs an ordered list of [`PipelineStage`]s for one
//! workflow id, recording every transition in a [`WorkflowStateStore`] that
//! callers poll and cancel through.

pub mod orchestrator;
pub mod progress;
pub mod stages;
pub mod store;
pub mod types;

pub use orchestrator::{OrchestrationService, WorkflowHandle};
pub use progress::ProgressTracker;
pub use stages::{
    PipelineStage, ProgressReporter, PromptStage, StageContext, StageOutput, builtin_prompt, default_pipeline,
};
pub use store::WorkflowStateStore;
pub use types::{
    CANCELLATION_MARKER, StageError, StageResult, WorkflowError, WorkflowInput, WorkflowResult, WorkflowState,
    WorkflowStatus,
};
