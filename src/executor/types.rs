use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config;
use crate::interpreter::{ActionKind, ParsedAction};
use crate::llm::LlmError;

/// Result type for action inference
pub type InferenceResult<T> = Result<T, InferenceError>;

/// Failures of the action-inference collaborator
///
/// Every variant is a single failed attempt; the executor falls back to
/// deterministic lookup instead of retrying.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
    #[error("inference provider error: {0}")]
    Upstream(String),
    #[error("unusable inference reply: {0}")]
    InvalidResponse(String),
}

impl From<LlmError> for InferenceError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(after) => InferenceError::Timeout(after),
            LlmError::InvalidResponse(msg) => InferenceError::InvalidResponse(msg),
            other => InferenceError::Upstream(other.to_string()),
        }
    }
}

/// A concrete action proposed by the inference service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredAction {
    pub kind: ActionKind,
    /// Selector or element description the driver can resolve
    pub target: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Answer of the inference service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inference {
    Found(InferredAction),
    NotFound,
}

/// Which strategy resolved a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    /// AI-driven resolver
    Inference,
    /// Attribute/XPath lookup against known field semantics
    Deterministic,
    /// No element lookup needed (navigation, page assertions)
    Direct,
}

impl ResolutionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionTier::Inference => "inference",
            ResolutionTier::Deterministic => "deterministic",
            ResolutionTier::Direct => "direct",
        }
    }
}

/// Outcome of executing one instruction.
///
/// A failed attempt is data, not an error: only driver faults escape the
/// executor as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepAttempt {
    pub action: ParsedAction,
    /// What was actually done, e.g. `fill "#email" = "a@b.c"`
    pub action_taken: String,
    pub tier: Option<ResolutionTier>,
    pub error: Option<String>,
}

impl StepAttempt {
    pub fn passed(action: ParsedAction, tier: ResolutionTier, action_taken: String) -> Self {
        Self {
            action,
            action_taken,
            tier: Some(tier),
            error: None,
        }
    }

    pub fn failed(action: ParsedAction, reason: impl Into<String>) -> Self {
        let action_taken = action.describe();
        Self {
            action,
            action_taken,
            tier: None,
            error: Some(reason.into()),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.error.is_none()
    }
}

/// Payment-gateway readiness settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// URL substrings that identify the payment page
    pub url_markers: Vec<String>,
    /// Selectors whose presence identifies the payment form
    pub element_selectors: Vec<String>,
    /// Upper bound on waiting for the gateway
    pub wait: Duration,
    pub poll_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let exec = &config::get().execution;
        Self {
            url_markers: ["/payment", "/checkout/pay", "pay.", "gateway", "stripe.com", "adyen", "braintree"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            element_selectors: [
                "input[autocomplete='cc-number']",
                "input[name='cardnumber']",
                "#card-number",
                "iframe[name^='__privateStripeFrame']",
                "iframe[title*='card' i]",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            wait: Duration::from_millis(exec.gateway_wait_ms),
            poll_interval: Duration::from_millis(exec.gateway_poll_ms),
        }
    }
}

/// Executor settings; defaults come from [`crate::config`]
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bound on every individual browser call
    pub action_timeout: Duration,
    /// Bound on one selector candidate during deterministic lookup, capped by `action_timeout`
    pub candidate_timeout: Duration,
    /// Bound on one inference call
    pub inference_timeout: Duration,
    pub gateway: GatewayConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let exec = &config::get().execution;
        Self {
            action_timeout: Duration::from_millis(exec.action_timeout_ms),
            candidate_timeout: Duration::from_millis(exec.candidate_timeout_ms),
            inference_timeout: Duration::from_millis(exec.inference_timeout_ms),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn candidate_timeout(mut self, timeout: Duration) -> Self {
        self.candidate_timeout = timeout;
        self
    }

    /// Effective per-candidate bound
    pub fn candidate_budget(&self) -> Duration {
        self.candidate_timeout.min(self.action_timeout)
    }

    pub fn inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    pub fn gateway_wait(mut self, wait: Duration) -> Self {
        self.gateway.wait = wait;
        self
    }

    pub fn gateway_poll(mut self, poll: Duration) -> Self {
        self.gateway.poll_interval = poll;
        self
    }

    pub fn gateway_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gateway.url_markers = markers.into_iter().map(Into::into).collect();
        self
    }
}
