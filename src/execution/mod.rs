//! Test-case execution: one browser session, steps in order, per-step results.

pub mod service;
pub mod types;

pub use service::{ExecutionService, ExecutionSession};
pub use types::{
    ExecutionError, ExecutionOutcome, ExecutionResult, RunConfig, RunResult, StepOutcome, StepResult, TestCase,
    TestStep, overall_outcome,
};
