use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::browser::{BrowserError, BrowserKind, BrowserProfileData, ProfileInjectionReport};
use crate::config;
use crate::executor::{ResolutionTier, StepAttempt};

/// Result type for execution runs
pub type RunResult<T> = Result<T, ExecutionError>;

/// Errors that prevent a run from producing an [`ExecutionResult`]
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to launch {browser} browser: {source}")]
    Launch {
        browser: BrowserKind,
        #[source]
        source: BrowserError,
    },
    #[error("test case '{0}' not found")]
    TestCaseNotFound(String),
    #[error("test case '{0}' has no steps")]
    EmptyTestCase(String),
    #[error("store error: {0}")]
    Store(String),
}

/// One step of a test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StepRepr")]
pub struct TestStep {
    pub instruction: String,
    /// A failure of this step skips every later step
    pub required: bool,
    /// Replayed to rebuild page state when debugging a later range
    pub prerequisite: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StepRepr {
    Text(String),
    Full {
        #[serde(alias = "text", alias = "step")]
        instruction: String,
        #[serde(default = "default_required")]
        required: bool,
        #[serde(default)]
        prerequisite: bool,
    },
}

fn default_required() -> bool {
    true
}

impl From<StepRepr> for TestStep {
    fn from(repr: StepRepr) -> Self {
        match repr {
            StepRepr::Text(instruction) => TestStep::new(instruction),
            StepRepr::Full {
                instruction,
                required,
                prerequisite,
            } => TestStep {
                instruction,
                required,
                prerequisite,
            },
        }
    }
}

impl TestStep {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            required: true,
            prerequisite: false,
        }
    }

    /// A step whose failure does not stop the run
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn prerequisite(mut self) -> Self {
        self.prerequisite = true;
        self
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// An ordered list of natural-language steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub steps: Vec<TestStep>,
}

static NUMBERED_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:step\s*)?\d+\s*[.):]\s+(?P<text>\S.*?)\s*$").expect("numbered line regex")
});

impl TestCase {
    pub fn new<I, S>(name: impl Into<String>, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: new_id(),
            name: name.into(),
            base_url: None,
            steps: steps.into_iter().map(TestStep::new).collect(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_steps(mut self, steps: Vec<TestStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Read a test case out of generated model output.
    ///
    /// Accepts a JSON object with `steps`, a JSON array of steps, or numbered lines.
    pub fn from_generated_text(text: &str) -> Option<TestCase> {
        #[derive(Deserialize)]
        struct Generated {
            #[serde(default, alias = "title")]
            name: String,
            #[serde(default)]
            base_url: Option<String>,
            steps: Vec<TestStep>,
        }

        if let Some(json) = slice_between(text, '{', '}') {
            if let Ok(generated) = serde_json::from_str::<Generated>(json) {
                if !generated.steps.is_empty() {
                    let mut case = TestCase::new(generated.name, Vec::<String>::new()).with_steps(generated.steps);
                    case.base_url = generated.base_url;
                    return Some(case);
                }
            }
        }
        if let Some(json) = slice_between(text, '[', ']') {
            if let Ok(steps) = serde_json::from_str::<Vec<TestStep>>(json) {
                if !steps.is_empty() {
                    return Some(TestCase::new("Generated test case", Vec::<String>::new()).with_steps(steps));
                }
            }
        }
        let lines: Vec<String> = NUMBERED_LINE
            .captures_iter(text)
            .filter_map(|c| c.name("text").map(|m| m.as_str().to_string()))
            .collect();
        (!lines.is_empty()).then(|| TestCase::new("Generated test case", lines))
    }
}

fn slice_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Settings for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub browser: BrowserKind,
    pub environment: String,
    /// Overrides the test case's base URL
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub profile: Option<BrowserProfileData>,
    /// Attach the final browser profile to the result
    #[serde(default)]
    pub export_profile: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            browser: config::get().execution.default_browser.parse().unwrap_or_default(),
            environment: "default".to_string(),
            base_url: None,
            profile: None,
            export_profile: false,
        }
    }
}

impl RunConfig {
    pub fn browser(mut self, browser: BrowserKind) -> Self {
        self.browser = browser;
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn profile(mut self, profile: BrowserProfileData) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn export_profile(mut self, export: bool) -> Self {
        self.export_profile = export;
        self
    }

    /// Base URL of the run: the override, else the test case's
    pub fn effective_base_url(&self, test_case: &TestCase) -> Option<String> {
        self.base_url.clone().or_else(|| test_case.base_url.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Passed,
    Failed,
    Skipped,
}

/// Result of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub instruction: String,
    pub action_taken: String,
    pub outcome: StepOutcome,
    pub error_detail: Option<String>,
    pub duration_ms: u64,
    pub tier: Option<ResolutionTier>,
}

impl StepResult {
    pub fn from_attempt(index: usize, step: &TestStep, attempt: StepAttempt, elapsed: Duration) -> Self {
        let outcome = if attempt.is_passed() {
            StepOutcome::Passed
        } else {
            StepOutcome::Failed
        };
        Self {
            index,
            instruction: step.instruction.clone(),
            action_taken: attempt.action_taken,
            outcome,
            error_detail: attempt.error.map(|e| format!("step {}: {}", index, e)),
            duration_ms: elapsed.as_millis() as u64,
            tier: attempt.tier,
        }
    }

    /// The step hit a fatal driver fault
    pub fn fault(index: usize, step: &TestStep, error: &BrowserError, elapsed: Duration) -> Self {
        Self {
            index,
            instruction: step.instruction.clone(),
            action_taken: String::new(),
            outcome: StepOutcome::Failed,
            error_detail: Some(format!("step {}: driver fault: {}", index, error)),
            duration_ms: elapsed.as_millis() as u64,
            tier: None,
        }
    }

    pub fn skipped(index: usize, step: &TestStep, reason: impl Into<String>) -> Self {
        Self {
            index,
            instruction: step.instruction.clone(),
            action_taken: String::new(),
            outcome: StepOutcome::Skipped,
            error_detail: Some(format!("step {}: {}", index, reason.into())),
            duration_ms: 0,
            tier: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == StepOutcome::Passed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Passed,
    Failed,
    Cancelled,
}

/// Full record of one test-case run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub test_case_id: String,
    pub environment: String,
    pub browser: BrowserKind,
    pub steps: Vec<StepResult>,
    pub outcome: ExecutionOutcome,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_injection: Option<ProfileInjectionReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<BrowserProfileData>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn passed(&self) -> bool {
        self.outcome == ExecutionOutcome::Passed
    }

    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.steps.iter().filter(|s| s.outcome == outcome).count()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// `passed` iff every required step passed
pub fn overall_outcome(test_case: &TestCase, steps: &[StepResult]) -> ExecutionOutcome {
    let all_required_passed = test_case
        .steps
        .iter()
        .enumerate()
        .filter(|(_, step)| step.required)
        .all(|(index, _)| steps.iter().any(|r| r.index == index && r.passed()));
    if all_required_passed {
        ExecutionOutcome::Passed
    } else {
        ExecutionOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_step_deserializes_from_text_or_object() {
        let steps: Vec<TestStep> = serde_json::from_str(
            r#"["Click Next", {"instruction": "Accept cookies", "required": false, "prerequisite": true}]"#,
        )
        .unwrap();
        assert_eq!(steps[0], TestStep::new("Click Next"));
        assert!(!steps[1].required);
        assert!(steps[1].prerequisite);
    }

    #[test]
    fn test_from_generated_json_object() {
        let text = "Here you go:\n```json\n{\"name\": \"Checkout\", \"steps\": [\"Navigate to /cart\", \"Click Checkout\"]}\n```";
        let case = TestCase::from_generated_text(text).unwrap();
        assert_eq!(case.name, "Checkout");
        assert_eq!(case.step_count(), 2);
    }

    #[test]
    fn test_from_generated_array_and_lines() {
        let case = TestCase::from_generated_text(r#"["Click A", "Click B"]"#).unwrap();
        assert_eq!(case.steps[1].instruction, "Click B");

        let case = TestCase::from_generated_text("1. Open the site\n2) Click Login\nStep 3: Verify 'Welcome'").unwrap();
        let texts: Vec<_> = case.steps.iter().map(|s| s.instruction.as_str()).collect();
        assert_eq!(texts, vec!["Open the site", "Click Login", "Verify 'Welcome'"]);

        assert!(TestCase::from_generated_text("no steps here").is_none());
    }

    #[test]
    fn test_overall_outcome_ignores_optional_failures() {
        let case = TestCase::new("t", Vec::<String>::new())
            .with_steps(vec![TestStep::new("a"), TestStep::new("b").optional()]);
        let pass = StepResult {
            index: 0,
            instruction: "a".into(),
            action_taken: "click a".into(),
            outcome: StepOutcome::Passed,
            error_detail: None,
            duration_ms: 1,
            tier: Some(ResolutionTier::Deterministic),
        };
        let fail = StepResult::skipped(1, &case.steps[1], "n/a");
        assert_eq!(overall_outcome(&case, &[pass.clone(), fail]), ExecutionOutcome::Passed);
        assert_eq!(overall_outcome(&case, &[]), ExecutionOutcome::Failed);
    }

    #[test]
    fn test_run_config_base_url_override() {
        let case = TestCase::new("t", ["Click a"]).with_base_url("https://a.test");
        assert_eq!(RunConfig::default().effective_base_url(&case).as_deref(), Some("https://a.test"));
        let config = RunConfig::default().base_url("https://b.test");
        assert_eq!(config.effective_base_url(&case).as_deref(), Some("https://b.test"));
    }
}
