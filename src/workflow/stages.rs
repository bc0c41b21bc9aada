//! Pipeline stages.
//!
//! A stage turns the workflow input plus the outputs of earlier stages into
//! text. [`PromptStage`] does this with one LLM completion; the final stage of
//! the default pipeline asks for a test case the orchestrator can parse.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::progress::ProgressTracker;
use super::store::WorkflowStateStore;
use super::types::{StageError, StageResult, WorkflowInput};
use crate::llm::{ChatMessage, CompletionClient, TokenUsage};

/// What a stage hands back to the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    pub text: String,
    pub usage: TokenUsage,
}

impl StageOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: TokenUsage::default(),
        }
    }
}

/// One named phase of the pipeline
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &str;

    /// Relative share of the aggregate progress
    fn weight(&self) -> f64 {
        1.0
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutput>;
}

/// Lets a running stage publish sub-progress for itself
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<WorkflowStateStore>,
    tracker: Arc<ProgressTracker>,
    workflow_id: String,
    stage: String,
}

impl ProgressReporter {
    pub fn new(
        store: Arc<WorkflowStateStore>,
        tracker: Arc<ProgressTracker>,
        workflow_id: impl Into<String>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            store,
            tracker,
            workflow_id: workflow_id.into(),
            stage: stage.into(),
        }
    }

    /// Record `fraction` (clamped to 0..=1) and refresh the aggregate
    pub fn report(&self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let tracker = &self.tracker;
        let stage = &self.stage;
        let updated = self.store.update(&self.workflow_id, |state| {
            state.stage_progress.insert(stage.clone(), fraction);
            state.progress = tracker.aggregate(&state.stage_progress);
        });
        if let Err(e) = updated {
            debug!(workflow_id = %self.workflow_id, stage = %self.stage, error = %e, "Progress report dropped");
        }
    }
}

/// Everything a stage may read
pub struct StageContext {
    pub workflow_id: String,
    pub input: WorkflowInput,
    /// Outputs of completed stages, in pipeline order
    pub prior_outputs: IndexMap<String, String>,
    pub progress: ProgressReporter,
}

impl StageContext {
    pub fn prior(&self, stage: &str) -> Option<&str> {
        self.prior_outputs.get(stage).map(String::as_str)
    }
}

const OBSERVATION_PROMPT: &str = "You are a QA engineer exploring a web application. \
Describe the pages, forms, controls and navigation paths relevant to the feature under test. \
Be concrete: name visible labels, buttons and fields exactly as a user sees them.";

const REQUIREMENTS_PROMPT: &str = "You are a QA analyst. From the feature description and the \
observations so far, list the functional requirements that a test must verify. \
Number them and keep each to one sentence.";

const ANALYSIS_PROMPT: &str = "You are a test designer. Map each requirement to the user actions \
and expected outcomes that would verify it. Call out payment or credential fields, dropdown \
selections and any waits for redirects.";

const GENERATION_PROMPT: &str = "You write executable browser tests in plain English. \
Produce one test case as JSON: {\"name\": string, \"steps\": [string, ...]}. \
Each step is a single action a person could perform: \"Navigate to <url>\", \"Click the <label> button\", \
\"Enter '<value>' in the <label> field\", \"Select '<option>' from the <label> dropdown\", \
or \"Verify that '<text>' is shown\". Quote every literal value. Output only the JSON.";

const GENERIC_PROMPT: &str = "You are one stage of a test-generation pipeline. \
Refine the work of the previous stages toward an executable browser test.";

/// Built-in system prompt for a stage name
pub fn builtin_prompt(stage: &str) -> &'static str {
    match stage.to_ascii_lowercase().as_str() {
        "observation" | "observe" => OBSERVATION_PROMPT,
        "requirements" | "requirement" => REQUIREMENTS_PROMPT,
        "analysis" | "analyze" => ANALYSIS_PROMPT,
        "generation" | "evolution" | "generate" => GENERATION_PROMPT,
        _ => GENERIC_PROMPT,
    }
}

/// Stage backed by one LLM completion
pub struct PromptStage {
    name: String,
    system_prompt: String,
    weight: f64,
    client: Arc<dyn CompletionClient>,
    model: String,
}

impl PromptStage {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        client: Arc<dyn CompletionClient>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            weight: 1.0,
            client,
            model: model.into(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    fn user_prompt(&self, ctx: &StageContext) -> String {
        let mut prompt = format!("Feature under test:\n{}\n", ctx.input.description);
        if let Some(url) = &ctx.input.target_url {
            prompt.push_str(&format!("\nApplication URL: {}\n", url));
        }
        for extra in &ctx.input.context {
            prompt.push_str(&format!("\nAdditional context:\n{}\n", extra));
        }
        for (stage, output) in &ctx.prior_outputs {
            prompt.push_str(&format!("\n## Output of the {} stage\n{}\n", stage, output));
        }
        prompt
    }
}

#[async_trait]
impl PipelineStage for PromptStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutput> {
        let messages = [
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(self.user_prompt(ctx)),
        ];
        let completion = self.client.complete(&messages, &self.model).await?;
        if completion.text.trim().is_empty() {
            warn!(stage = %self.name, "Model returned an empty completion");
            return Err(StageError::InvalidOutput(format!("{} stage returned no text", self.name)));
        }
        Ok(StageOutput {
            text: completion.text,
            usage: completion.usage,
        })
    }
}

/// One [`PromptStage`] per configured name, with the built-in prompts
pub fn default_pipeline(
    client: Arc<dyn CompletionClient>,
    model: &str,
    stages: &[String],
) -> Vec<Arc<dyn PipelineStage>> {
    stages
        .iter()
        .map(|name| {
            Arc::new(PromptStage::new(name.clone(), builtin_prompt(name), client.clone(), model))
                as Arc<dyn PipelineStage>
        })
        .collect()
}
