//! Whole-test-case runs.
//!
//! One run owns one browser session from launch to close. Steps execute in
//! index order; cancellation is checked between steps and never interrupts a
//! step in flight.

use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::types::{
    ExecutionError, ExecutionOutcome, ExecutionResult, RunConfig, RunResult, StepOutcome, StepResult, TestCase,
    overall_outcome,
};
use crate::browser::{
    BrowserLauncher, BrowserProfileData, BrowserResult, BrowserSession, ProfileInjectionReport, bounded,
    export_profile, inject_profile, is_restricted_url,
};
use crate::executor::{StepContext, TieredStepExecutor};
use crate::interpreter::Instruction;
use crate::store::ExecutionStore;
use crate::workflow::CANCELLATION_MARKER;

/// A launched, profile-injected browser session plus its step context
pub struct ExecutionSession {
    pub session: Box<dyn BrowserSession>,
    pub ctx: StepContext,
    pub injection: Option<ProfileInjectionReport>,
}

impl ExecutionSession {
    /// Close the browser, logging rather than returning failures
    pub async fn close(&self) {
        if let Err(e) = self.session.close().await {
            warn!(error = %e, "Closing browser session failed");
        }
    }
}

/// Runs test cases against browsers from a launcher
pub struct ExecutionService {
    launcher: Arc<dyn BrowserLauncher>,
    executor: Arc<TieredStepExecutor>,
    store: Option<Arc<dyn ExecutionStore>>,
}

impl ExecutionService {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, executor: Arc<TieredStepExecutor>) -> Self {
        Self {
            launcher,
            executor,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn executor(&self) -> &Arc<TieredStepExecutor> {
        &self.executor
    }

    pub fn store(&self) -> Option<&Arc<dyn ExecutionStore>> {
        self.store.as_ref()
    }

    /// Launch a browser for `config`; the session still needs [`prepare`](Self::prepare)
    pub async fn open_session(&self, test_case: &TestCase, config: &RunConfig) -> RunResult<ExecutionSession> {
        let session = self
            .launcher
            .launch(config.browser)
            .await
            .map_err(|source| ExecutionError::Launch {
                browser: config.browser,
                source,
            })?;
        Ok(ExecutionSession {
            session,
            ctx: self.executor.context(config.effective_base_url(test_case)),
            injection: None,
        })
    }

    /// Inject the configured profile and open the base URL.
    ///
    /// Non-fatal problems are logged; a fatal driver fault is returned.
    pub async fn prepare(&self, exec: &mut ExecutionSession, config: &RunConfig) -> BrowserResult<()> {
        let base_url = exec.ctx.base_url.clone();
        self.prepare_with(exec, config.profile.as_ref(), base_url.as_deref()).await
    }

    async fn prepare_with(
        &self,
        exec: &mut ExecutionSession,
        profile: Option<&BrowserProfileData>,
        base_url: Option<&str>,
    ) -> BrowserResult<()> {
        let limit = self.executor.config().action_timeout;
        if let Some(profile) = profile.filter(|p| !p.is_empty()) {
            let report = inject_profile(exec.session.as_ref(), profile, base_url, limit).await?;
            for warning in &report.warnings {
                warn!(warning = %warning, "Profile injection warning");
            }
            exec.injection = Some(report);
        }

        if let Some(base) = base_url {
            let current = match bounded(limit, "read URL", exec.session.current_url()).await {
                Ok(url) => url,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Could not read page URL; opening base URL anyway");
                    String::new()
                }
            };
            if current.is_empty() || is_restricted_url(&current) {
                debug!(base_url = base, "Opening base URL");
                if let Err(e) = bounded(limit, "goto", exec.session.goto(base)).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!(error = %e, "Opening base URL failed; steps start from the current page");
                }
            }
        }
        Ok(())
    }

    /// Execute one step of `test_case`; the primitive shared with debug sessions
    pub async fn run_step(
        &self,
        exec: &mut ExecutionSession,
        test_case: &TestCase,
        index: usize,
    ) -> BrowserResult<StepResult> {
        let step = &test_case.steps[index];
        let started = Instant::now();
        let instruction = Instruction::new(index, step.instruction.clone());
        let attempt = self
            .executor
            .execute(exec.session.as_ref(), &instruction, &mut exec.ctx)
            .await?;
        let result = StepResult::from_attempt(index, step, attempt, started.elapsed());
        match &result.error_detail {
            None => info!(step = index, action = %result.action_taken, duration_ms = result.duration_ms, "Step passed"),
            Some(error) => warn!(step = index, error = %error, "Step failed"),
        }
        Ok(result)
    }

    /// Run a whole test case.
    ///
    /// Only a launch failure is returned as `Err`; everything after launch is
    /// reported inside the [`ExecutionResult`].
    #[instrument(skip_all, fields(test_case = %test_case.id, browser = %config.browser))]
    pub async fn run_execution(
        &self,
        test_case: &TestCase,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> RunResult<ExecutionResult> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(execution_id = %execution_id, steps = test_case.step_count(), "Starting execution");

        let mut steps: Vec<StepResult> = Vec::with_capacity(test_case.step_count());
        let mut error: Option<String> = None;
        let mut cancelled = false;
        let mut faulted = false;
        let mut profile = None;

        let mut exec = self.open_session(test_case, config).await?;
        match self.prepare(&mut exec, config).await {
            Ok(()) => {
                for (index, step) in test_case.steps.iter().enumerate() {
                    if cancel.is_cancelled() {
                        info!(step = index, "Cancellation observed; stopping before step");
                        cancelled = true;
                        error = Some(format!("{}: execution cancelled before step {}", CANCELLATION_MARKER, index));
                        break;
                    }
                    let started = Instant::now();
                    match self.run_step(&mut exec, test_case, index).await {
                        Ok(result) => {
                            self.persist_step(&execution_id, &result).await;
                            let stop = step.required && !result.passed();
                            if stop {
                                error = result.error_detail.clone();
                            }
                            steps.push(result);
                            if stop {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(step = index, error = %e, "Driver fault; disposing session");
                            let result = StepResult::fault(index, step, &e, started.elapsed());
                            self.persist_step(&execution_id, &result).await;
                            error = result.error_detail.clone();
                            steps.push(result);
                            faulted = true;
                            break;
                        }
                    }
                }

                if config.export_profile && !faulted {
                    let limit = self.executor.config().action_timeout;
                    match export_profile(exec.session.as_ref(), limit).await {
                        Ok(exported) => profile = Some(exported),
                        Err(e) => warn!(error = %e, "Profile export failed"),
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Driver fault during session setup");
                faulted = true;
                error = Some(format!("session setup: driver fault: {}", e));
            }
        }
        exec.close().await;

        let reason = if cancelled {
            "cancelled".to_string()
        } else {
            match steps.last() {
                Some(last) => format!("step {} did not pass", last.index),
                None => "session setup failed".to_string(),
            }
        };
        for index in steps.len()..test_case.step_count() {
            steps.push(StepResult::skipped(index, &test_case.steps[index], format!("skipped: {}", reason)));
        }

        let outcome = if cancelled {
            ExecutionOutcome::Cancelled
        } else if faulted {
            ExecutionOutcome::Failed
        } else {
            overall_outcome(test_case, &steps)
        };

        let result = ExecutionResult {
            execution_id,
            test_case_id: test_case.id.clone(),
            environment: config.environment.clone(),
            browser: config.browser,
            steps,
            outcome,
            error,
            profile_injection: exec.injection.take(),
            profile,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            execution_id = %result.execution_id,
            outcome = ?result.outcome,
            passed = result.count(StepOutcome::Passed),
            "Execution finished"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.save_execution(&result).await {
                warn!(error = %e, "Failed to persist execution");
            }
        }
        Ok(result)
    }

    async fn persist_step(&self, execution_id: &str, result: &StepResult) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_step(execution_id, result).await {
                warn!(step = result.index, error = %e, "Failed to persist step");
            }
        }
    }
}
