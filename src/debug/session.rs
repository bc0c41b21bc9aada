//! The debug session state machine.
//!
//! ```text
//! idle -> running -> paused | completed | failed
//! paused -> running (step, continue, range)
//! any -> disposed
//! ```
//!
//! Preconditions are checked before any browser call, so a rejected command
//! leaves cursor, status and results untouched.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::policy::PrerequisitePolicy;
use super::types::{DebugError, DebugMode, DebugResult, DebugSessionSnapshot, DebugStatus, RangeBounds};
use crate::browser::{BrowserProfileData, export_profile};
use crate::execution::{ExecutionService, ExecutionSession, StepResult, TestCase};

/// Latest published snapshot of every session, readable while a session is busy
pub type SnapshotBoard = Arc<DashMap<String, DebugSessionSnapshot>>;

pub struct DebugSession {
    id: String,
    test_case: TestCase,
    exec: ExecutionSession,
    cursor: usize,
    mode: DebugMode,
    status: DebugStatus,
    range: Option<RangeBounds>,
    results: Vec<StepResult>,
    error: Option<String>,
    board: SnapshotBoard,
}

impl DebugSession {
    pub fn new(id: String, test_case: TestCase, exec: ExecutionSession, board: SnapshotBoard) -> Self {
        let session = Self {
            id,
            test_case,
            exec,
            cursor: 0,
            mode: DebugMode::Sequential,
            status: DebugStatus::Idle,
            range: None,
            results: Vec::new(),
            error: None,
            board,
        };
        session.publish();
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> DebugStatus {
        self.status
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn step_count(&self) -> usize {
        self.test_case.step_count()
    }

    pub fn snapshot(&self) -> DebugSessionSnapshot {
        DebugSessionSnapshot {
            session_id: self.id.clone(),
            test_case_id: self.test_case.id.clone(),
            step_count: self.step_count(),
            cursor: self.cursor,
            mode: self.mode,
            status: self.status,
            range: self.range,
            results: self.results.clone(),
            error: self.error.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Execute exactly the step at the cursor
    pub async fn step(&mut self, service: &ExecutionService) -> DebugResult<()> {
        self.ensure_runnable()?;
        if self.cursor >= self.step_count() {
            return Err(self.not_runnable(DebugStatus::Completed));
        }

        self.begin(DebugMode::Sequential, None);
        let index = self.cursor;
        if self.execute_visible(service, index).await {
            self.cursor = index + 1;
            self.settle();
        }
        Ok(())
    }

    /// Execute from the cursor to the last step
    pub async fn continue_run(&mut self, service: &ExecutionService) -> DebugResult<()> {
        self.ensure_runnable()?;
        if self.cursor >= self.step_count() {
            return Err(self.not_runnable(DebugStatus::Completed));
        }

        self.begin(DebugMode::Sequential, None);
        for index in self.cursor..self.step_count() {
            if !self.execute_visible(service, index).await {
                return Ok(());
            }
            self.cursor = index + 1;
        }
        self.settle();
        Ok(())
    }

    /// Execute `[from, to]`, first replaying whatever prerequisites `policy` asks for
    pub async fn run_range(
        &mut self,
        service: &ExecutionService,
        policy: &dyn PrerequisitePolicy,
        from: usize,
        to: usize,
    ) -> DebugResult<()> {
        let bounds = RangeBounds::validate(from, to, self.step_count())?;
        self.ensure_runnable()?;

        let replay = policy.steps_to_replay(&self.test_case, from, self.cursor);
        self.begin(DebugMode::Range, Some(bounds));

        for index in replay {
            debug!(session = %self.id, step = index, "Replaying prerequisite step");
            match service.run_step(&mut self.exec, &self.test_case, index).await {
                Ok(result) if !result.passed() => {
                    warn!(session = %self.id, step = index, error = ?result.error_detail, "Prerequisite step failed")
                }
                Ok(_) => {}
                Err(e) => {
                    let fault = StepResult::fault(index, &self.test_case.steps[index], &e, Duration::ZERO);
                    self.fail(fault).await;
                    return Ok(());
                }
            }
        }

        for index in from..=to {
            if !self.execute_visible(service, index).await {
                return Ok(());
            }
            self.cursor = index + 1;
        }
        self.settle();
        Ok(())
    }

    /// Move the cursor without executing anything
    pub fn jump(&mut self, index: usize) -> DebugResult<()> {
        self.ensure_runnable()?;
        if index > self.step_count() {
            return Err(DebugError::JumpOutOfRange {
                index,
                step_count: self.step_count(),
            });
        }
        self.cursor = index;
        self.mode = DebugMode::Sequential;
        self.range = None;
        self.settle();
        Ok(())
    }

    /// Export cookies and storage from the live browser
    pub async fn export_profile(&mut self, service: &ExecutionService) -> DebugResult<BrowserProfileData> {
        if matches!(self.status, DebugStatus::Failed | DebugStatus::Disposed) {
            return Err(self.not_runnable(self.status));
        }
        let limit = service.executor().config().action_timeout;
        Ok(export_profile(self.exec.session.as_ref(), limit).await?)
    }

    /// Release the browser; the session is unusable afterwards
    pub async fn dispose(&mut self) {
        if self.status != DebugStatus::Failed {
            self.exec.close().await;
        }
        self.status = DebugStatus::Disposed;
        info!(session = %self.id, "Debug session disposed");
        self.publish();
    }

    fn ensure_runnable(&self) -> DebugResult<()> {
        if self.status.accepts_commands() {
            Ok(())
        } else {
            Err(self.not_runnable(self.status))
        }
    }

    fn not_runnable(&self, status: DebugStatus) -> DebugError {
        DebugError::NotRunnable {
            id: self.id.clone(),
            status,
        }
    }

    fn begin(&mut self, mode: DebugMode, range: Option<RangeBounds>) {
        self.mode = mode;
        self.range = range;
        self.status = DebugStatus::Running;
        self.publish();
    }

    fn settle(&mut self) {
        self.status = if self.cursor >= self.step_count() {
            DebugStatus::Completed
        } else {
            DebugStatus::Paused
        };
        self.publish();
    }

    /// Run one visible step; `false` when a driver fault ended the session
    async fn execute_visible(&mut self, service: &ExecutionService, index: usize) -> bool {
        match service.run_step(&mut self.exec, &self.test_case, index).await {
            Ok(result) => {
                self.record(result);
                true
            }
            Err(e) => {
                let fault = StepResult::fault(index, &self.test_case.steps[index], &e, Duration::ZERO);
                self.fail(fault).await;
                false
            }
        }
    }

    async fn fail(&mut self, fault: StepResult) {
        warn!(session = %self.id, error = ?fault.error_detail, "Driver fault; debug session failed");
        self.error = fault.error_detail.clone();
        self.record(fault);
        self.status = DebugStatus::Failed;
        self.exec.close().await;
        self.publish();
    }

    /// Keep results ordered by index, replacing an earlier run of the same step
    fn record(&mut self, result: StepResult) {
        match self.results.binary_search_by_key(&result.index, |r| r.index) {
            Ok(pos) => self.results[pos] = result,
            Err(pos) => self.results.insert(pos, result),
        }
    }

    fn publish(&self) {
        self.board.insert(self.id.clone(), self.snapshot());
    }
}
