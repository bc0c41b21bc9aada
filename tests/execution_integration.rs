//! Integration tests for whole test-case runs against the mock browser

use std::sync::Arc;
use std::time::Duration;

use nl_browser_test::browser::MockAction;
use nl_browser_test::executor::{ExecutorConfig, ResolutionTier};
use nl_browser_test::{
    ActionKind, CANCELLATION_MARKER, CancellationToken, ExecutionOutcome, ExecutionService, MockBrowser,
    MockElement, RunConfig, ScriptedInference, StepOutcome, TestCase, TestStep, TieredStepExecutor,
};

fn service(browser: &MockBrowser, inference: ScriptedInference) -> ExecutionService {
    let config = ExecutorConfig::default()
        .action_timeout(Duration::from_secs(1))
        .inference_timeout(Duration::from_millis(100))
        .gateway_wait(Duration::from_millis(50))
        .gateway_poll(Duration::from_millis(5));
    let executor = TieredStepExecutor::new(Arc::new(inference)).with_config(config);
    ExecutionService::new(Arc::new(browser.clone()), Arc::new(executor))
}

#[tokio::test]
async fn test_checkout_journey_routes_each_step() {
    let browser = MockBrowser::new()
        .with_element(MockElement::new("Continue").navigates_to("https://shop.test/payment"))
        .with_element_on("/payment", MockElement::new("input[autocomplete='cc-number']"));
    let inference = ScriptedInference::new();
    let case = TestCase::new(
        "checkout",
        [
            "Navigate to https://shop.test/cart",
            "Click the Continue button",
            "Input 4111111111111111 as the credit card number",
        ],
    );

    let result = service(&browser, inference.clone())
        .run_execution(&case, &RunConfig::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.outcome, ExecutionOutcome::Passed, "{:?}", result.error);
    let tiers: Vec<_> = result.steps.iter().map(|s| s.tier).collect();
    assert_eq!(
        tiers,
        vec![
            Some(ResolutionTier::Direct),
            Some(ResolutionTier::Deterministic),
            Some(ResolutionTier::Deterministic),
        ]
    );
    // Only the ordinary click went through inference
    assert_eq!(inference.calls(), vec!["Click the Continue button".to_string()]);
    assert!(!result.steps[2].action_taken.contains("4111111111111111"));
    assert_eq!(
        browser.element_value("input[autocomplete='cc-number']").as_deref(),
        Some("4111111111111111")
    );
    assert!(browser.is_closed());
}

#[tokio::test]
async fn test_stale_inferred_target_falls_back() {
    let text = "Click the Continue button";
    let browser = MockBrowser::new().with_element(MockElement::new("Continue"));
    let inference = ScriptedInference::new().with_action(text, ActionKind::Click, "#stale-continue", None);

    let result = service(&browser, inference)
        .run_execution(&TestCase::new("fallback", [text]), &RunConfig::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.passed());
    assert_eq!(result.steps[0].tier, Some(ResolutionTier::Deterministic));
    assert!(browser.actions().contains(&MockAction::Click("Continue".into())));
}

#[tokio::test]
async fn test_optional_failure_does_not_stop_the_run() {
    let browser = MockBrowser::new().with_element(MockElement::new("Continue"));
    let case = TestCase::new("optional", Vec::<String>::new()).with_steps(vec![
        TestStep::new("Click the Dismiss cookies button").optional(),
        TestStep::new("Click the Continue button"),
    ]);

    let result = service(&browser, ScriptedInference::new())
        .run_execution(&case, &RunConfig::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.outcome, ExecutionOutcome::Passed);
    assert_eq!(result.steps[0].outcome, StepOutcome::Failed);
    assert_eq!(result.steps[1].outcome, StepOutcome::Passed);
}

#[tokio::test]
async fn test_cancel_mid_run_finishes_current_step() {
    let browser = MockBrowser::new()
        .with_element(MockElement::new("Continue"))
        .with_action_delay(Duration::from_millis(150));
    let svc = Arc::new(service(&browser, ScriptedInference::new()));
    let case = TestCase::new(
        "slow",
        ["Click the Continue button", "Click the Continue button", "Click the Continue button"],
    );
    let token = CancellationToken::new();

    let run = {
        let svc = svc.clone();
        let token = token.clone();
        tokio::spawn(async move { svc.run_execution(&case, &RunConfig::default(), &token).await })
    };
    tokio::time::sleep(Duration::from_millis(40)).await;
    token.cancel();

    let result = run.await.unwrap().unwrap();
    assert_eq!(result.outcome, ExecutionOutcome::Cancelled);
    assert!(result.error.unwrap().starts_with(CANCELLATION_MARKER));
    assert_eq!(result.steps.len(), 3);
    assert_eq!(result.steps[0].outcome, StepOutcome::Passed);
    assert_eq!(result.steps[1].outcome, StepOutcome::Skipped);
    assert_eq!(result.steps[2].outcome, StepOutcome::Skipped);
    assert!(browser.is_closed());
}
