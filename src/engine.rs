//! The surface consumed by an HTTP layer: workflows, executions and debug
//! sessions behind one object.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::browser::{BrowserLauncher, BrowserProfileData};
use crate::config;
use crate::debug::{DebugResult, DebugSessionService, DebugSessionSnapshot};
use crate::execution::{ExecutionError, ExecutionResult, ExecutionService, RunConfig, RunResult, TestCase};
use crate::executor::{LlmActionInference, TieredStepExecutor};
use crate::llm::{CompletionClient, HttpCompletionClient, LlmConfig};
use crate::store::{ExecutionStore, JsonFileStore, StoreError};
use crate::workflow::{
    OrchestrationService, WorkflowHandle, WorkflowInput, WorkflowResult, WorkflowState, WorkflowStateStore,
    default_pipeline,
};

pub struct Engine {
    workflows: Arc<WorkflowStateStore>,
    orchestrator: Arc<OrchestrationService>,
    execution: Arc<ExecutionService>,
    debug: DebugSessionService,
}

impl Engine {
    pub fn new(orchestrator: Arc<OrchestrationService>, execution: Arc<ExecutionService>) -> Self {
        Self {
            workflows: orchestrator.store().clone(),
            debug: DebugSessionService::new(execution.clone()),
            orchestrator,
            execution,
        }
    }

    /// Engine wired to the configured LLM endpoint, pipeline and file store
    pub fn from_config(launcher: Arc<dyn BrowserLauncher>) -> Self {
        let client: Arc<dyn CompletionClient> = Arc::new(HttpCompletionClient::new(LlmConfig::default()));
        Self::with_client(launcher, client, Arc::new(JsonFileStore::from_config()))
    }

    /// Engine using `client` for both pipeline stages and action inference
    pub fn with_client(
        launcher: Arc<dyn BrowserLauncher>,
        client: Arc<dyn CompletionClient>,
        store: Arc<dyn ExecutionStore>,
    ) -> Self {
        let model = config::llm_model();
        let stages = default_pipeline(client.clone(), &model, &config::get().pipeline.stages);
        let orchestrator = OrchestrationService::new(Arc::new(WorkflowStateStore::new()), stages);

        let inference = LlmActionInference::new(client, model);
        let executor = TieredStepExecutor::new(Arc::new(inference));
        let execution = ExecutionService::new(launcher, Arc::new(executor)).with_store(store);
        Self::new(Arc::new(orchestrator), Arc::new(execution))
    }

    pub fn debug_sessions(&self) -> &DebugSessionService {
        &self.debug
    }

    // ---- workflows -------------------------------------------------------

    /// Accept a workflow and run it in the background
    pub fn start_workflow(&self, id: Option<String>, input: WorkflowInput) -> WorkflowResult<WorkflowHandle> {
        let handle = self.orchestrator.start_workflow(id, input)?;
        info!(workflow_id = %handle.workflow_id, "Workflow accepted");
        Ok(handle)
    }

    /// Run a workflow to completion on the current task
    pub async fn run_workflow(&self, id: &str, input: WorkflowInput) -> WorkflowResult<WorkflowState> {
        self.orchestrator.run_workflow(id, input).await
    }

    pub fn get_workflow_state(&self, id: &str) -> Option<WorkflowState> {
        self.workflows.get(id)
    }

    pub fn request_cancel(&self, id: &str) {
        self.workflows.request_cancel(id);
    }

    pub fn delete_workflow(&self, id: &str) -> Option<WorkflowState> {
        self.workflows.delete(id)
    }

    // ---- executions ------------------------------------------------------

    pub async fn run_execution(&self, test_case: &TestCase, config: &RunConfig) -> RunResult<ExecutionResult> {
        self.run_execution_with_cancel(test_case, config, &CancellationToken::new()).await
    }

    pub async fn run_execution_with_cancel(
        &self,
        test_case: &TestCase,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> RunResult<ExecutionResult> {
        self.execution.run_execution(test_case, config, cancel).await
    }

    /// Load a stored test case and run it
    pub async fn run_stored_test_case(&self, test_case_id: &str, config: &RunConfig) -> RunResult<ExecutionResult> {
        let store = self
            .execution
            .store()
            .ok_or_else(|| ExecutionError::Store("no store configured".to_string()))?;
        let test_case = store.load_test_case(test_case_id).await.map_err(|e| match e {
            StoreError::NotFound(_) => ExecutionError::TestCaseNotFound(test_case_id.to_string()),
            other => ExecutionError::Store(other.to_string()),
        })?;
        if test_case.steps.is_empty() {
            return Err(ExecutionError::EmptyTestCase(test_case.id));
        }
        self.run_execution(&test_case, config).await
    }

    // ---- debug sessions --------------------------------------------------

    pub async fn start_debug_session(&self, test_case: TestCase, config: RunConfig) -> DebugResult<String> {
        self.debug.start(test_case, config).await
    }

    pub async fn debug_step(&self, session_id: &str) -> DebugResult<DebugSessionSnapshot> {
        self.debug.step(session_id).await
    }

    pub async fn debug_continue(&self, session_id: &str) -> DebugResult<DebugSessionSnapshot> {
        self.debug.continue_run(session_id).await
    }

    pub async fn debug_jump(&self, session_id: &str, index: usize) -> DebugResult<DebugSessionSnapshot> {
        self.debug.jump(session_id, index).await
    }

    pub async fn debug_run_range(&self, session_id: &str, from: usize, to: usize) -> DebugResult<DebugSessionSnapshot> {
        self.debug.run_range(session_id, from, to).await
    }

    pub async fn debug_dispose(&self, session_id: &str) -> DebugResult<DebugSessionSnapshot> {
        self.debug.dispose(session_id).await
    }

    pub fn debug_snapshot(&self, session_id: &str) -> DebugResult<DebugSessionSnapshot> {
        self.debug.snapshot(session_id)
    }

    pub async fn export_profile(&self, session_id: &str) -> DebugResult<BrowserProfileData> {
        self.debug.export_profile(session_id).await
    }
}
