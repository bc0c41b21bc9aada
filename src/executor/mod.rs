//! Step execution against a browser session.
//!
//! - [`TieredStepExecutor`]: inference-first with deterministic fallback, or
//!   deterministic-only for payment fields
//! - [`ActionInference`]: the AI resolver seam, with an LLM-backed implementation
//! - [`PaymentGate`]: bounded wait for the payment page before sensitive steps

pub mod gateway;
pub mod inference;
pub mod locator;
pub mod tiered;
pub mod types;

pub use gateway::{GateStatus, PaymentGate};
pub use inference::{ActionInference, LlmActionInference, ScriptedInference, parse_inference_reply};
pub use tiered::{StepContext, TieredStepExecutor, resolve_url};
pub use types::{
    ExecutorConfig, GatewayConfig, Inference, InferenceError, InferenceResult, InferredAction, ResolutionTier,
    StepAttempt,
};
