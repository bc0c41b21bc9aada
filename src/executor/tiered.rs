//! Tiered step execution.
//!
//! Normal steps ask the inference service first and fall back to
//! deterministic lookup; sensitive (payment) steps pass the gateway gate and
//! then use deterministic lookup only. Every browser call is time-bounded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::gateway::PaymentGate;
use super::inference::ActionInference;
use super::locator;
use super::types::{ExecutorConfig, Inference, InferenceError, ResolutionTier, StepAttempt};
use crate::browser::{BrowserError, BrowserResult, BrowserSession, PageSnapshot, bounded, text_presence_script};
use crate::interpreter::{ActionKind, Instruction, InstructionInterpreter, ParsedAction};

/// State carried across the steps of one execution
#[derive(Debug, Clone)]
pub struct StepContext {
    pub base_url: Option<String>,
    pub gate: PaymentGate,
}

impl StepContext {
    pub fn new(base_url: Option<String>, config: &ExecutorConfig) -> Self {
        Self {
            base_url,
            gate: PaymentGate::new(config.gateway.clone(), config.action_timeout),
        }
    }
}

/// Executes single instructions against a browser session
pub struct TieredStepExecutor {
    inference: Arc<dyn ActionInference>,
    interpreter: InstructionInterpreter,
    config: ExecutorConfig,
}

impl TieredStepExecutor {
    pub fn new(inference: Arc<dyn ActionInference>) -> Self {
        Self {
            inference,
            interpreter: InstructionInterpreter::default(),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_interpreter(mut self, interpreter: InstructionInterpreter) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn interpret(&self, text: &str) -> ParsedAction {
        self.interpreter.interpret(text)
    }

    /// Fresh per-execution context
    pub fn context(&self, base_url: Option<String>) -> StepContext {
        StepContext::new(base_url, &self.config)
    }

    /// Execute one instruction.
    ///
    /// Element-level problems come back as a failed [`StepAttempt`]; only a
    /// fatal driver fault is returned as `Err`.
    #[instrument(skip_all, fields(step = instruction.index))]
    pub async fn execute(
        &self,
        session: &dyn BrowserSession,
        instruction: &Instruction,
        ctx: &mut StepContext,
    ) -> BrowserResult<StepAttempt> {
        let action = self.interpreter.interpret(&instruction.text);
        debug!(kind = %action.kind, risk = ?action.risk_class, "Interpreted instruction");

        match action.kind {
            ActionKind::Navigate => self.navigate(session, instruction, action, ctx).await,
            ActionKind::Assert if action.literal_value.is_some() => self.assert_literal(session, action).await,
            ActionKind::Fill | ActionKind::Select if action.is_sensitive() => {
                self.execute_sensitive(session, action, ctx).await
            }
            ActionKind::Assert | ActionKind::Click | ActionKind::Fill | ActionKind::Select | ActionKind::Unknown => {
                self.execute_tiered(session, instruction, action, ctx).await
            }
        }
    }

    async fn execute_sensitive(
        &self,
        session: &dyn BrowserSession,
        action: ParsedAction,
        ctx: &mut StepContext,
    ) -> BrowserResult<StepAttempt> {
        match ctx.gate.ensure_ready(session).await {
            Ok(status) => debug!(?status, "Sensitive step routed to deterministic lookup"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(StepAttempt::failed(action, format!("payment gateway check failed: {}", e))),
        }
        self.deterministic(session, action).await
    }

    async fn execute_tiered(
        &self,
        session: &dyn BrowserSession,
        instruction: &Instruction,
        action: ParsedAction,
        ctx: &StepContext,
    ) -> BrowserResult<StepAttempt> {
        let snapshot = match self.bounded("snapshot", session.snapshot()).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Page snapshot failed; inferring without it");
                PageSnapshot::default()
            }
        };

        let inferred = tokio::time::timeout(
            self.config.inference_timeout,
            self.inference.infer_action(&instruction.text, &snapshot),
        )
        .await
        .unwrap_or(Err(InferenceError::Timeout(self.config.inference_timeout)));

        let fallback_reason = match inferred {
            Ok(Inference::Found(inferred)) => {
                let value = action.literal_value.as_deref().or(inferred.value.as_deref());
                match self
                    .perform(session, inferred.kind, &inferred.target, value, ctx.base_url.as_deref())
                    .await
                {
                    Ok(taken) => {
                        return Ok(StepAttempt::passed(action, ResolutionTier::Inference, taken));
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => format!("inferred target '{}' failed: {}", inferred.target, e),
                }
            }
            Ok(Inference::NotFound) => "inference found no matching element".to_string(),
            Err(e) => e.to_string(),
        };
        info!(reason = %fallback_reason, "Falling back to deterministic lookup");

        if action.kind == ActionKind::Unknown {
            return Ok(StepAttempt::failed(
                action,
                format!("could not interpret instruction ({})", fallback_reason),
            ));
        }

        let mut attempt = self.deterministic(session, action).await?;
        if let Some(error) = attempt.error.as_mut() {
            *error = format!("{}; {}", fallback_reason, error);
        }
        Ok(attempt)
    }

    async fn deterministic(&self, session: &dyn BrowserSession, action: ParsedAction) -> BrowserResult<StepAttempt> {
        let kind = match action.kind {
            ActionKind::Navigate => ActionKind::Click,
            other => other,
        };
        match kind {
            ActionKind::Unknown => {
                return Ok(StepAttempt::failed(action, "could not interpret instruction"));
            }
            ActionKind::Assert => {
                let expected = locator::field_label(&action.target_hint);
                return Ok(match self.check_text(session, &expected).await {
                    Ok(()) => {
                        let taken = format!("assert text \"{}\"", expected);
                        StepAttempt::passed(action, ResolutionTier::Deterministic, taken)
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => StepAttempt::failed(action, e.to_string()),
                });
            }
            ActionKind::Fill | ActionKind::Select if action.literal_value.is_none() => {
                return Ok(StepAttempt::failed(
                    action,
                    format!("no value could be extracted for {} step", kind),
                ));
            }
            ActionKind::Click | ActionKind::Fill | ActionKind::Select | ActionKind::Navigate => {}
        }

        let candidates = locator::candidates(kind, &action.target_hint);
        if candidates.is_empty() {
            return Ok(StepAttempt::failed(action, "instruction names no target element"));
        }

        // A driver that auto-waits on missing elements would spend the full
        // action timeout on every absent candidate
        let budget = self.config.candidate_budget();
        let mut last_error: Option<BrowserError> = None;
        for candidate in &candidates {
            match self
                .perform_within(budget, session, kind, candidate, action.literal_value.as_deref(), None)
                .await
            {
                Ok(taken) => {
                    let taken = if action.is_sensitive() { mask_taken(&taken, &action) } else { taken };
                    return Ok(StepAttempt::passed(action, ResolutionTier::Deterministic, taken));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(candidate = %candidate, error = %e, "Candidate failed");
                    last_error = Some(e);
                }
            }
        }

        let reason = format!(
            "element not found for '{}' after {} candidate(s){}",
            action.target_hint,
            candidates.len(),
            last_error.map(|e| format!(": {}", e)).unwrap_or_default()
        );
        Ok(StepAttempt::failed(action, reason))
    }

    async fn navigate(
        &self,
        session: &dyn BrowserSession,
        instruction: &Instruction,
        action: ParsedAction,
        ctx: &StepContext,
    ) -> BrowserResult<StepAttempt> {
        let raw = action
            .literal_value
            .clone()
            .or_else(|| looks_like_url(&action.target_hint).then(|| action.target_hint.clone()));
        let Some(raw) = raw else {
            // "Go to the cart page": resolve it like a link
            return self.execute_tiered(session, instruction, action, ctx).await;
        };

        match self
            .perform(session, ActionKind::Navigate, &raw, None, ctx.base_url.as_deref())
            .await
        {
            Ok(taken) => Ok(StepAttempt::passed(action, ResolutionTier::Direct, taken)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(StepAttempt::failed(action, e.to_string())),
        }
    }

    async fn assert_literal(&self, session: &dyn BrowserSession, action: ParsedAction) -> BrowserResult<StepAttempt> {
        let expected = action.literal_value.clone().unwrap_or_default();
        match self.check_text(session, &expected).await {
            Ok(()) => {
                let taken = format!("assert text \"{}\"", expected);
                Ok(StepAttempt::passed(action, ResolutionTier::Direct, taken))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(StepAttempt::failed(action, e.to_string())),
        }
    }

    /// Perform one concrete action, returning a description of what was done
    async fn perform(
        &self,
        session: &dyn BrowserSession,
        kind: ActionKind,
        target: &str,
        value: Option<&str>,
        base_url: Option<&str>,
    ) -> BrowserResult<String> {
        self.perform_within(self.config.action_timeout, session, kind, target, value, base_url)
            .await
    }

    async fn perform_within(
        &self,
        limit: Duration,
        session: &dyn BrowserSession,
        kind: ActionKind,
        target: &str,
        value: Option<&str>,
        base_url: Option<&str>,
    ) -> BrowserResult<String> {
        match (kind, value) {
            (ActionKind::Click, _) => {
                bounded(limit, "click", session.click(target)).await?;
                Ok(format!("click {}", target))
            }
            (ActionKind::Fill, Some(value)) => {
                bounded(limit, "fill", session.fill(target, value)).await?;
                Ok(format!("fill {} = \"{}\"", target, value))
            }
            (ActionKind::Select, Some(value)) => {
                bounded(limit, "select", session.select(target, value)).await?;
                Ok(format!("select {} = \"{}\"", target, value))
            }
            (ActionKind::Fill | ActionKind::Select, None) => {
                Err(BrowserError::Driver(format!("no value to {} into {}", kind, target)))
            }
            (ActionKind::Navigate, _) => {
                let url = resolve_url(base_url, target)?;
                bounded(limit, "goto", session.goto(&url)).await?;
                Ok(format!("goto {}", url))
            }
            (ActionKind::Assert, expected) => {
                let expected = expected.unwrap_or(target);
                self.check_text(session, expected).await?;
                Ok(format!("assert text \"{}\"", expected))
            }
            (ActionKind::Unknown, _) => Err(BrowserError::Driver(format!(
                "resolver proposed no concrete action for {}",
                target
            ))),
        }
    }

    async fn check_text(&self, session: &dyn BrowserSession, expected: &str) -> BrowserResult<()> {
        if expected.trim().is_empty() {
            return Err(BrowserError::ElementNotFound("empty assertion text".to_string()));
        }
        let found = self
            .bounded("assert", session.evaluate(&text_presence_script(expected)))
            .await?;
        if found.as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(format!("text '{}' on page", expected)))
        }
    }

    async fn bounded<T, F>(&self, action: &str, call: F) -> BrowserResult<T>
    where
        F: Future<Output = BrowserResult<T>>,
    {
        bounded(self.config.action_timeout, action, call).await
    }
}

fn looks_like_url(text: &str) -> bool {
    let t = text.trim();
    t.starts_with("http://") || t.starts_with("https://") || (t.starts_with('/') && !t.contains(' '))
}

/// Resolve `raw` against `base`, accepting absolute URLs as they are
pub fn resolve_url(base: Option<&str>, raw: &str) -> BrowserResult<String> {
    let raw = raw.trim();
    if let Ok(url) = url::Url::parse(raw) {
        return Ok(url.to_string());
    }
    let base = base.ok_or_else(|| BrowserError::Driver(format!("relative URL '{}' needs a base URL", raw)))?;
    let base = url::Url::parse(base).map_err(|e| BrowserError::Driver(format!("invalid base URL '{}': {}", base, e)))?;
    base.join(raw)
        .map(|u| u.to_string())
        .map_err(|e| BrowserError::Driver(format!("cannot resolve '{}': {}", raw, e)))
}

/// Mask the quoted value at the end of a `fill`/`select` description,
/// leaving the selector untouched
fn mask_taken(taken: &str, action: &ParsedAction) -> String {
    let Some(value) = &action.literal_value else {
        return taken.to_string();
    };
    match taken.strip_suffix(&format!("= \"{}\"", value)) {
        Some(head) => format!("{}= \"{}\"", head, mask(value)),
        None => taken.to_string(),
    }
}

fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}
