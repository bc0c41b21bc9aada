//! NL Browser Test - natural-language browser tests with tiered step resolution.
//!
//! This crate provides:
//! - An instruction interpreter that turns one English step into a typed action
//! - A tiered step executor: AI-inferred actions first, deterministic lookup for
//!   payment fields and as a fallback
//! - Whole-test-case execution with profile injection/export and cooperative cancellation
//! - Resumable debug sessions (step, continue, jump, run-range)
//! - A multi-stage LLM pipeline that generates test cases, with progress and cancellation
//! - MockBrowser for testing and offline dry runs
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nl_browser_test::{Engine, MockBrowser, MockElement, RunConfig, TestCase};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let browser = MockBrowser::new().with_element(MockElement::new("Continue"));
//! let engine = Engine::from_config(Arc::new(browser));
//! let case = TestCase::new("smoke", ["Click the Continue button"]);
//! let result = engine.run_execution(&case, &RunConfig::default()).await?;
//! println!("{:?}", result.outcome);
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod config;
pub mod debug;
pub mod engine;
pub mod execution;
pub mod executor;
pub mod interpreter;
pub mod llm;
pub mod store;
pub mod workflow;

// Re-export the facade
pub use engine::Engine;

// Re-export browser capability and the mock
pub use browser::{
    BrowserError, BrowserKind, BrowserLauncher, BrowserProfileData, BrowserResult, BrowserSession, Cookie,
    MockBrowser, MockElement, PageSnapshot,
};

// Re-export instruction interpretation
pub use interpreter::{
    ActionKind, Instruction, InstructionInterpreter, ParsedAction, RiskClass, extract_value, interpret,
    is_dropdown_instruction, is_payment_instruction,
};

// Re-export step execution
pub use executor::{ActionInference, ExecutorConfig, LlmActionInference, ScriptedInference, TieredStepExecutor};

// Re-export test-case runs
pub use execution::{
    ExecutionError, ExecutionOutcome, ExecutionResult, ExecutionService, RunConfig, RunResult, StepOutcome,
    StepResult, TestCase, TestStep,
};

// Re-export debug sessions
pub use debug::{DebugError, DebugResult, DebugSessionService, DebugSessionSnapshot, DebugStatus};

// Re-export workflows
pub use workflow::{
    CANCELLATION_MARKER, OrchestrationService, PipelineStage, WorkflowError, WorkflowInput, WorkflowResult,
    WorkflowState, WorkflowStateStore, WorkflowStatus,
};

// Re-export LLM client and persistence
pub use llm::{CompletionClient, HttpCompletionClient, LlmConfig, LlmError, check_health};
pub use store::{ExecutionStore, JsonFileStore, StoreError};

pub use tokio_util::sync::CancellationToken;
