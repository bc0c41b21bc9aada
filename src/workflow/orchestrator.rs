//! Runs the ordered stage pipeline for one workflow id.
//!
//! Cancellation is checked before every stage, never during one. All state
//! changes go through [`WorkflowStateStore`], so `get_workflow_state` always
//! shows what the run has done so far.

use indexmap::IndexMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::progress::ProgressTracker;
use super::stages::{PipelineStage, ProgressReporter, StageContext};
use super::store::WorkflowStateStore;
use super::types::{CANCELLATION_MARKER, WorkflowError, WorkflowInput, WorkflowResult, WorkflowState, WorkflowStatus};
use crate::execution::TestCase;

/// A workflow spawned on the runtime
pub struct WorkflowHandle {
    pub workflow_id: String,
    pub task: JoinHandle<WorkflowResult<WorkflowState>>,
}

impl WorkflowHandle {
    /// Wait for the run to finish
    pub async fn wait(self) -> WorkflowResult<WorkflowState> {
        self.task.await.map_err(|e| WorkflowError::Join(e.to_string()))?
    }
}

pub struct OrchestrationService {
    store: Arc<WorkflowStateStore>,
    stages: Vec<Arc<dyn PipelineStage>>,
    tracker: Arc<ProgressTracker>,
}

impl OrchestrationService {
    pub fn new(store: Arc<WorkflowStateStore>, stages: Vec<Arc<dyn PipelineStage>>) -> Self {
        let tracker = ProgressTracker::new(stages.iter().map(|s| (s.name().to_string(), s.weight())));
        Self {
            store,
            stages,
            tracker: Arc::new(tracker),
        }
    }

    pub fn store(&self) -> &Arc<WorkflowStateStore> {
        &self.store
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Record a pending state for `id` unless one already exists
    pub fn create(&self, id: &str, input: WorkflowInput) -> WorkflowResult<WorkflowState> {
        match self.store.get(id) {
            Some(state) if state.status.is_terminal() => Err(WorkflowError::Terminal {
                id: id.to_string(),
                status: state.status,
            }),
            Some(state) if state.status == WorkflowStatus::Running => Err(WorkflowError::AlreadyRunning(id.to_string())),
            Some(state) => Ok(state),
            None => {
                let state = WorkflowState::pending(id, input, self.stage_names());
                self.store.set(state.clone())?;
                Ok(state)
            }
        }
    }

    /// Run every stage in order and return the final persisted state.
    ///
    /// Stage failures and cancellation are reported in the returned state;
    /// `Err` means the workflow could not be run at all.
    #[instrument(skip_all, fields(workflow_id = %id))]
    pub async fn run_workflow(&self, id: &str, input: WorkflowInput) -> WorkflowResult<WorkflowState> {
        let state = self.create(id, input)?;
        let input = state.input;
        let mut outputs: IndexMap<String, String> = IndexMap::new();

        for stage in &self.stages {
            let name = stage.name().to_string();

            if self.store.is_cancel_requested(id) {
                info!(stage = %name, "Cancellation observed; stopping before stage");
                let error = format!("{}: workflow cancelled before stage '{}'", CANCELLATION_MARKER, name);
                return self.store.update(id, |s| s.finish(WorkflowStatus::Cancelled, Some(error)));
            }

            self.store.update(id, |s| s.start_stage(name.clone()))?;
            info!(stage = %name, "Stage started");

            let ctx = StageContext {
                workflow_id: id.to_string(),
                input: input.clone(),
                prior_outputs: outputs.clone(),
                progress: ProgressReporter::new(self.store.clone(), self.tracker.clone(), id, name.clone()),
            };

            match stage.run(&ctx).await {
                Ok(output) => {
                    let tracker = &self.tracker;
                    let state = self.store.update(id, |s| {
                        s.stage_progress.insert(name.clone(), 1.0);
                        s.progress = tracker.aggregate(&s.stage_progress);
                        s.stage_outputs.insert(name.clone(), output.text.clone());
                        s.token_usage.add(&output.usage);
                    })?;
                    info!(stage = %name, progress = state.progress, tokens = output.usage.total, "Stage completed");
                    outputs.insert(name, output.text);
                }
                Err(e) => {
                    warn!(stage = %name, error = %e, "Stage failed; stopping pipeline");
                    let error = format!("stage '{}' failed: {}", name, e);
                    return self.store.update(id, |s| s.finish(WorkflowStatus::Failed, Some(error)));
                }
            }
        }

        let test_case = outputs.values().last().and_then(|text| TestCase::from_generated_text(text));
        if let Some(case) = &test_case {
            info!(steps = case.step_count(), "Final stage produced a test case");
        }
        let state = self.store.update(id, |s| {
            s.test_case = test_case;
            s.progress = 1.0;
            s.finish(WorkflowStatus::Completed, None);
        })?;
        info!(tokens = state.token_usage.total, "Workflow completed");
        Ok(state)
    }

    /// Create the pending state now and run the pipeline on the runtime
    pub fn start_workflow(self: &Arc<Self>, id: Option<String>, input: WorkflowInput) -> WorkflowResult<WorkflowHandle> {
        let workflow_id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let state = self.create(&workflow_id, input)?;

        let service = Arc::clone(self);
        let run_id = workflow_id.clone();
        let task = tokio::spawn(async move { service.run_workflow(&run_id, state.input).await });
        Ok(WorkflowHandle { workflow_id, task })
    }
}
