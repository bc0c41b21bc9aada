//! Registry of live debug sessions.
//!
//! Each session sits behind its own async mutex. Commands take the lock with
//! `try_lock`, so a second command arriving while one is in flight is refused
//! with [`DebugError::Busy`] instead of queueing. Reads go through the snapshot
//! board and never wait. Disposed sessions stay on the board only until
//! [`DISPOSED_RETENTION`] newer disposals push them out.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

use super::policy::{FlaggedPrerequisites, PrerequisitePolicy};
use super::session::{DebugSession, SnapshotBoard};
use super::types::{DebugError, DebugResult, DebugSessionSnapshot, DebugStatus};
use crate::browser::BrowserProfileData;
use crate::execution::{ExecutionService, RunConfig, TestCase};

/// Disposed snapshots kept readable before their board entries are dropped
pub const DISPOSED_RETENTION: usize = 64;

pub struct DebugSessionService {
    execution: Arc<ExecutionService>,
    policy: Arc<dyn PrerequisitePolicy>,
    sessions: DashMap<String, Arc<Mutex<DebugSession>>>,
    board: SnapshotBoard,
    disposed: std::sync::Mutex<VecDeque<String>>,
    disposed_retention: usize,
}

impl DebugSessionService {
    pub fn new(execution: Arc<ExecutionService>) -> Self {
        Self {
            execution,
            policy: Arc::new(FlaggedPrerequisites),
            sessions: DashMap::new(),
            board: Arc::new(DashMap::new()),
            disposed: std::sync::Mutex::new(VecDeque::new()),
            disposed_retention: DISPOSED_RETENTION,
        }
    }

    pub fn with_disposed_retention(mut self, retention: usize) -> Self {
        self.disposed_retention = retention;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn PrerequisitePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Launch a browser for `test_case` and register an idle session
    #[instrument(skip_all, fields(test_case = %test_case.id))]
    pub async fn start(&self, test_case: TestCase, config: RunConfig) -> DebugResult<String> {
        if test_case.steps.is_empty() {
            return Err(DebugError::EmptyTestCase(test_case.id));
        }

        let mut exec = self.execution.open_session(&test_case, &config).await?;
        if let Err(e) = self.execution.prepare(&mut exec, &config).await {
            exec.close().await;
            return Err(e.into());
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = DebugSession::new(id.clone(), test_case, exec, self.board.clone());
        let snapshot = session.snapshot();
        self.sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        self.persist(&snapshot).await;
        info!(session = %id, steps = snapshot.step_count, "Debug session started");
        Ok(id)
    }

    /// Execute the step at the cursor
    pub async fn step(&self, id: &str) -> DebugResult<DebugSessionSnapshot> {
        let mut session = self.acquire(id)?;
        session.step(&self.execution).await?;
        Ok(self.settled(&session).await)
    }

    /// Execute from the cursor to the end
    pub async fn continue_run(&self, id: &str) -> DebugResult<DebugSessionSnapshot> {
        let mut session = self.acquire(id)?;
        session.continue_run(&self.execution).await?;
        Ok(self.settled(&session).await)
    }

    /// Execute the inclusive range `[from, to]`
    pub async fn run_range(&self, id: &str, from: usize, to: usize) -> DebugResult<DebugSessionSnapshot> {
        let mut session = self.acquire(id)?;
        session.run_range(&self.execution, self.policy.as_ref(), from, to).await?;
        Ok(self.settled(&session).await)
    }

    /// Move the cursor to `index` (0..=step_count)
    pub async fn jump(&self, id: &str, index: usize) -> DebugResult<DebugSessionSnapshot> {
        let mut session = self.acquire(id)?;
        session.jump(index)?;
        Ok(self.settled(&session).await)
    }

    pub async fn export_profile(&self, id: &str) -> DebugResult<BrowserProfileData> {
        let mut session = self.acquire(id)?;
        session.export_profile(&self.execution).await
    }

    /// Close the browser and drop the session
    pub async fn dispose(&self, id: &str) -> DebugResult<DebugSessionSnapshot> {
        let mut session = self.acquire(id)?;
        session.dispose().await;
        self.sessions.remove(id);
        let snapshot = self.settled(&session).await;
        self.retire(id);
        Ok(snapshot)
    }

    /// Latest snapshot, including while a command is running
    pub fn snapshot(&self, id: &str) -> DebugResult<DebugSessionSnapshot> {
        self.board
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DebugError::NotFound(id.to_string()))
    }

    /// Number of snapshots on the board, live and recently disposed
    pub fn board_len(&self) -> usize {
        self.board.len()
    }

    /// Ids of sessions that still hold a browser
    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    fn acquire(&self, id: &str) -> DebugResult<OwnedMutexGuard<DebugSession>> {
        let Some(session) = self.sessions.get(id).map(|entry| entry.value().clone()) else {
            return match self.board.get(id).map(|entry| entry.status) {
                Some(DebugStatus::Disposed) => Err(DebugError::NotRunnable {
                    id: id.to_string(),
                    status: DebugStatus::Disposed,
                }),
                _ => Err(DebugError::NotFound(id.to_string())),
            };
        };
        session.try_lock_owned().map_err(|_| DebugError::Busy(id.to_string()))
    }

    /// Queue a disposed id and drop the board entries that fall out of retention
    fn retire(&self, id: &str) {
        let evicted: Vec<String> = {
            let mut disposed = self.disposed.lock().unwrap_or_else(|e| e.into_inner());
            disposed.push_back(id.to_string());
            let excess = disposed.len().saturating_sub(self.disposed_retention);
            disposed.drain(..excess).collect()
        };
        for old in evicted {
            self.board.remove(&old);
        }
    }

    async fn settled(&self, session: &DebugSession) -> DebugSessionSnapshot {
        let snapshot = session.snapshot();
        self.persist(&snapshot).await;
        snapshot
    }

    async fn persist(&self, snapshot: &DebugSessionSnapshot) {
        if let Some(store) = self.execution.store() {
            if let Err(e) = store.save_debug_session(snapshot).await {
                warn!(session = %snapshot.session_id, error = %e, "Failed to persist debug session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{MockAction, MockBrowser, MockElement};
    use crate::execution::{StepOutcome, TestStep};
    use crate::executor::{ExecutorConfig, ScriptedInference, TieredStepExecutor};
    use crate::store::{ExecutionStore, JsonFileStore};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn shop() -> MockBrowser {
        MockBrowser::new()
            .with_element(MockElement::new("#email").alias("Email"))
            .with_element(MockElement::new("Continue"))
            .with_element(MockElement::new("Help"))
            .with_page_text("Welcome back")
    }

    fn execution(browser: &MockBrowser) -> ExecutionService {
        let config = ExecutorConfig::default()
            .action_timeout(Duration::from_secs(1))
            .inference_timeout(Duration::from_millis(50))
            .gateway_wait(Duration::from_millis(10));
        let executor = TieredStepExecutor::new(Arc::new(ScriptedInference::new())).with_config(config);
        ExecutionService::new(Arc::new(browser.clone()), Arc::new(executor))
    }

    fn service(browser: &MockBrowser) -> DebugSessionService {
        DebugSessionService::new(Arc::new(execution(browser)))
    }

    fn case() -> TestCase {
        TestCase::new(
            "login",
            [
                "Enter 'a@b.c' in the Email field",
                "Click the Help link",
                "Click the Continue button",
                "Verify that 'Welcome back' is shown",
            ],
        )
    }

    fn shape(snapshot: &DebugSessionSnapshot) -> Vec<(usize, StepOutcome, String)> {
        snapshot
            .results
            .iter()
            .map(|r| (r.index, r.outcome, r.action_taken.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_stepping_walks_cursor_to_completion() {
        let browser = shop();
        let svc = service(&browser);
        let id = svc.start(case(), RunConfig::default()).await.unwrap();
        assert_eq!(svc.snapshot(&id).unwrap().status, DebugStatus::Idle);

        for expected in 1..=3 {
            let snap = svc.step(&id).await.unwrap();
            assert_eq!(snap.cursor, expected);
            assert_eq!(snap.status, DebugStatus::Paused);
        }
        let snap = svc.step(&id).await.unwrap();
        assert_eq!(snap.cursor, 4);
        assert_eq!(snap.status, DebugStatus::Completed);
        assert!(snap.results.iter().all(|r| r.passed()));

        assert!(matches!(svc.step(&id).await, Err(DebugError::NotRunnable { .. })));
    }

    #[tokio::test]
    async fn test_full_range_matches_step_by_step() {
        let stepped = {
            let browser = shop();
            let svc = service(&browser);
            let id = svc.start(case(), RunConfig::default()).await.unwrap();
            let mut last = None;
            for _ in 0..4 {
                last = Some(svc.step(&id).await.unwrap());
            }
            last.unwrap()
        };
        let ranged = {
            let browser = shop();
            let svc = service(&browser);
            let id = svc.start(case(), RunConfig::default()).await.unwrap();
            svc.run_range(&id, 0, 3).await.unwrap()
        };

        assert_eq!(shape(&stepped), shape(&ranged));
        assert_eq!(ranged.cursor, 4);
        assert_eq!(ranged.status, DebugStatus::Completed);
    }

    #[tokio::test]
    async fn test_bad_range_changes_nothing() {
        let browser = shop();
        let svc = service(&browser);
        let id = svc.start(case(), RunConfig::default()).await.unwrap();
        let before = svc.snapshot(&id).unwrap();
        let actions_before = browser.actions().len();

        assert!(matches!(svc.run_range(&id, 2, 4).await, Err(DebugError::Bounds { .. })));
        assert!(matches!(svc.run_range(&id, 3, 1).await, Err(DebugError::Bounds { .. })));

        let after = svc.snapshot(&id).unwrap();
        assert_eq!(after.cursor, before.cursor);
        assert_eq!(after.status, DebugStatus::Idle);
        assert!(after.results.is_empty());
        assert_eq!(browser.actions().len(), actions_before);
    }

    #[tokio::test]
    async fn test_range_replays_prerequisites_silently() {
        let browser = shop();
        let svc = service(&browser);
        let case = TestCase::new("t", Vec::<String>::new()).with_steps(vec![
            TestStep::new("Navigate to https://shop.test/login").prerequisite(),
            TestStep::new("Click the Help link"),
            TestStep::new("Click the Continue button"),
        ]);
        let id = svc.start(case, RunConfig::default()).await.unwrap();

        let snap = svc.run_range(&id, 2, 2).await.unwrap();
        assert_eq!(snap.results.len(), 1);
        assert_eq!(snap.results[0].index, 2);
        assert_eq!(snap.cursor, 3);

        let actions = browser.actions();
        assert!(actions.contains(&MockAction::Goto("https://shop.test/login".into())));
        assert!(!actions.contains(&MockAction::Click("Help".into())));
    }

    #[tokio::test]
    async fn test_range_continues_past_failures() {
        let browser = shop();
        let svc = service(&browser);
        let case = TestCase::new("t", ["Click the Missing button", "Click the Continue button"]);
        let id = svc.start(case, RunConfig::default()).await.unwrap();

        let snap = svc.run_range(&id, 0, 1).await.unwrap();
        let outcomes: Vec<_> = snap.results.iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes, vec![StepOutcome::Failed, StepOutcome::Passed]);
        assert_eq!(snap.status, DebugStatus::Completed);
    }

    #[tokio::test]
    async fn test_jump_and_rerun_replaces_result() {
        let browser = shop();
        let svc = service(&browser);
        let id = svc.start(case(), RunConfig::default()).await.unwrap();

        svc.step(&id).await.unwrap();
        let snap = svc.jump(&id, 0).await.unwrap();
        assert_eq!(snap.cursor, 0);
        assert_eq!(snap.status, DebugStatus::Paused);

        let snap = svc.step(&id).await.unwrap();
        assert_eq!(snap.results.len(), 1);

        assert!(matches!(svc.jump(&id, 5).await, Err(DebugError::JumpOutOfRange { .. })));
        let snap = svc.jump(&id, 4).await.unwrap();
        assert_eq!(snap.status, DebugStatus::Completed);
        assert!(matches!(svc.jump(&id, 0).await, Err(DebugError::NotRunnable { .. })));
    }

    #[tokio::test]
    async fn test_continue_runs_to_end() {
        let browser = shop();
        let svc = service(&browser);
        let id = svc.start(case(), RunConfig::default()).await.unwrap();
        svc.step(&id).await.unwrap();

        let snap = svc.continue_run(&id).await.unwrap();
        assert_eq!(snap.cursor, 4);
        assert_eq!(snap.results.len(), 4);
        assert_eq!(snap.status, DebugStatus::Completed);
    }

    #[tokio::test]
    async fn test_driver_fault_fails_session() {
        let browser = shop();
        let svc = service(&browser);
        let id = svc.start(case(), RunConfig::default()).await.unwrap();
        browser.disconnect();

        let snap = svc.step(&id).await.unwrap();
        assert_eq!(snap.status, DebugStatus::Failed);
        assert!(snap.error.unwrap().contains("driver fault"));
        assert!(matches!(svc.step(&id).await, Err(DebugError::NotRunnable { .. })));
    }

    #[tokio::test]
    async fn test_overlapping_command_is_busy() {
        let browser = shop().with_action_delay(Duration::from_millis(200));
        let svc = Arc::new(service(&browser));
        let id = svc.start(case(), RunConfig::default()).await.unwrap();

        let background = {
            let svc = svc.clone();
            let id = id.clone();
            tokio::spawn(async move { svc.step(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(svc.step(&id).await, Err(DebugError::Busy(_))));
        assert_eq!(svc.snapshot(&id).unwrap().status, DebugStatus::Running);

        let snap = background.await.unwrap().unwrap();
        assert_eq!(snap.cursor, 1);
    }

    #[tokio::test]
    async fn test_dispose_releases_browser() {
        let tmp = tempfile::TempDir::new().unwrap();
        let browser = shop();
        let store = Arc::new(JsonFileStore::new(tmp.path()));
        let svc = DebugSessionService::new(Arc::new(execution(&browser).with_store(store.clone())));
        let id = svc.start(case(), RunConfig::default()).await.unwrap();

        let snap = svc.dispose(&id).await.unwrap();
        assert_eq!(snap.status, DebugStatus::Disposed);
        assert!(browser.is_closed());
        assert!(svc.active_sessions().is_empty());
        assert!(matches!(
            svc.step(&id).await,
            Err(DebugError::NotRunnable { status: DebugStatus::Disposed, .. })
        ));
        assert_eq!(store.load_debug_session(&id).await.unwrap().status, DebugStatus::Disposed);
        assert!(matches!(svc.step("nope").await, Err(DebugError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_disposed_snapshots_leave_the_board() {
        let browser = shop();
        let svc = service(&browser).with_disposed_retention(1);
        let first = svc.start(case(), RunConfig::default()).await.unwrap();
        let second = svc.start(case(), RunConfig::default()).await.unwrap();
        let live = svc.start(case(), RunConfig::default()).await.unwrap();

        svc.dispose(&first).await.unwrap();
        assert_eq!(svc.snapshot(&first).unwrap().status, DebugStatus::Disposed);
        svc.dispose(&second).await.unwrap();

        assert_eq!(svc.board_len(), 2);
        assert!(matches!(svc.snapshot(&first), Err(DebugError::NotFound(_))));
        assert!(matches!(svc.step(&first).await, Err(DebugError::NotFound(_))));
        assert!(matches!(
            svc.step(&second).await,
            Err(DebugError::NotRunnable { status: DebugStatus::Disposed, .. })
        ));
        assert_eq!(svc.snapshot(&live).unwrap().status, DebugStatus::Idle);
    }

    #[tokio::test]
    async fn test_export_profile_from_live_session() {
        let browser = shop().with_local_storage("token", "abc");
        let svc = service(&browser);
        let config = RunConfig::default().base_url("https://shop.test/");
        let id = svc.start(case(), config).await.unwrap();

        let profile = svc.export_profile(&id).await.unwrap();
        assert_eq!(profile.local_storage.get("token").map(String::as_str), Some("abc"));
    }

    #[tokio::test]
    async fn test_empty_test_case_rejected() {
        let browser = shop();
        let svc = service(&browser);
        let err = svc
            .start(TestCase::new("empty", Vec::<String>::new()), RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DebugError::EmptyTestCase(_)));
        assert!(browser.launches().is_empty());
    }
}
