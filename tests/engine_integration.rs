//! Integration tests for workflows and debug sessions through the engine facade

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use nl_browser_test::llm::{ChatMessage, Completion, LlmResult, TokenUsage};
use nl_browser_test::{
    CANCELLATION_MARKER, CompletionClient, DebugError, DebugStatus, Engine, JsonFileStore, LlmError, MockBrowser,
    MockElement, RunConfig, StepOutcome, TestCase, WorkflowInput, WorkflowStatus,
};

/// Answers every stage with a short note and the final stage with a test case
struct PipelineClient {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionClient for PipelineClient {
    async fn complete(&self, messages: &[ChatMessage], _model: &str) -> LlmResult<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = if messages[0].content.contains("test case as JSON") {
            "```json\n{\"name\": \"Sign in\", \"steps\": [\"Click the Sign in button\"]}\n```".to_string()
        } else {
            "The page has a Sign in button.".to_string()
        };
        Ok(Completion {
            text,
            usage: TokenUsage {
                prompt: 10,
                completion: 5,
                total: 15,
            },
        })
    }
}

struct DownClient;

#[async_trait]
impl CompletionClient for DownClient {
    async fn complete(&self, _messages: &[ChatMessage], _model: &str) -> LlmResult<Completion> {
        Err(LlmError::Http {
            status: 503,
            body: "overloaded".to_string(),
        })
    }
}

fn engine(browser: &MockBrowser, client: Arc<dyn CompletionClient>, tmp: &TempDir) -> Engine {
    Engine::with_client(Arc::new(browser.clone()), client, Arc::new(JsonFileStore::new(tmp.path())))
}

#[tokio::test]
async fn test_generated_test_case_runs() {
    let tmp = TempDir::new().unwrap();
    let browser = MockBrowser::new().with_element(MockElement::new("Sign in"));
    let client = Arc::new(PipelineClient {
        calls: AtomicUsize::new(0),
    });
    let engine = engine(&browser, client.clone(), &tmp);

    let state = engine
        .run_workflow("wf-gen", WorkflowInput::new("sign in").with_target_url("https://app.test/"))
        .await
        .unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    let stages = state.stage_progress.len();
    assert!(stages > 0);
    assert!(state.stage_progress.values().all(|p| *p == 1.0));
    assert_eq!(state.token_usage.total, 15 * stages as u32);

    let case = state.test_case.expect("final stage yields a test case");
    assert_eq!(case.name, "Sign in");
    let result = engine.run_execution(&case, &RunConfig::default()).await.unwrap();
    assert!(result.passed(), "{:?}", result.error);
}

#[tokio::test]
async fn test_cancel_before_run_skips_every_stage() {
    let tmp = TempDir::new().unwrap();
    let client = Arc::new(PipelineClient {
        calls: AtomicUsize::new(0),
    });
    let engine = engine(&MockBrowser::new(), client.clone(), &tmp);

    engine.request_cancel("wf-cancel");
    let state = engine.run_workflow("wf-cancel", WorkflowInput::new("sign in")).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Cancelled);
    assert!(state.error.unwrap().starts_with(CANCELLATION_MARKER));
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.get_workflow_state("wf-cancel").unwrap().status, WorkflowStatus::Cancelled);
}

#[tokio::test]
async fn test_provider_failure_fails_workflow() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&MockBrowser::new(), Arc::new(DownClient), &tmp);

    let handle = engine.start_workflow(Some("wf-down".into()), WorkflowInput::new("sign in")).unwrap();
    let state = handle.wait().await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Failed);
    let error = state.error.unwrap();
    assert!(error.starts_with("stage '"), "{}", error);
    assert!(error.contains("503"));
    assert!(state.test_case.is_none());
}

#[tokio::test]
async fn test_debug_session_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let browser = MockBrowser::new()
        .with_element(MockElement::new("Continue"))
        .with_page_text("Welcome back");
    let engine = engine(&browser, Arc::new(DownClient), &tmp);
    let case = TestCase::new(
        "debug",
        ["Click the Continue button", "Click the Missing button", "Verify that 'Welcome back' is shown"],
    );

    let id = engine.start_debug_session(case, RunConfig::default()).await.unwrap();
    assert_eq!(engine.debug_snapshot(&id).unwrap().status, DebugStatus::Idle);

    assert!(matches!(
        engine.debug_run_range(&id, 1, 3).await,
        Err(DebugError::Bounds { step_count: 3, .. })
    ));
    assert!(matches!(
        engine.debug_jump(&id, 4).await,
        Err(DebugError::JumpOutOfRange { .. })
    ));

    let snapshot = engine.debug_continue(&id).await.unwrap();
    assert_eq!(snapshot.status, DebugStatus::Completed);
    assert_eq!(snapshot.cursor, 3);
    let outcomes: Vec<_> = snapshot.results.iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![StepOutcome::Passed, StepOutcome::Failed, StepOutcome::Passed]);

    let snapshot = engine.debug_dispose(&id).await.unwrap();
    assert_eq!(snapshot.status, DebugStatus::Disposed);
    assert!(browser.is_closed());
    assert!(matches!(
        engine.debug_step(&id).await,
        Err(DebugError::NotRunnable { status: DebugStatus::Disposed, .. })
    ));
}

#[tokio::test]
async fn test_debug_rejects_empty_test_case() {
    let tmp = TempDir::new().unwrap();
    let browser = MockBrowser::new();
    let engine = engine(&browser, Arc::new(DownClient), &tmp);

    let err = engine
        .start_debug_session(TestCase::new("empty", Vec::<String>::new()), RunConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DebugError::EmptyTestCase(_)));
    assert!(browser.launches().is_empty());
}
