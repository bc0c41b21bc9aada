//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for the test engine, supporting:
//! - Environment variables for all configurable values
//! - Defaults suitable for a local OpenAI-compatible endpoint
//! - Builder pattern for programmatic configuration (see the per-component configs)
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `NLTEST_LLM_ENDPOINT` | Chat-completions endpoint URL | `http://127.0.0.1:8080/v1/chat/completions` |
//! | `NLTEST_LLM_MODEL` | Model used by pipeline stages and action inference | `qwen3` |
//! | `NLTEST_LLM_MAX_TOKENS` | Maximum tokens in a completion | `2048` |
//! | `NLTEST_LLM_CONNECT_TIMEOUT` | Connection timeout in seconds | `10` |
//! | `NLTEST_LLM_TIMEOUT` | Whole-request timeout in seconds | `120` |
//! | `NLTEST_ACTION_TIMEOUT_MS` | Timeout for a single browser action | `30000` |
//! | `NLTEST_CANDIDATE_TIMEOUT_MS` | Timeout for trying one fallback selector candidate | `3000` |
//! | `NLTEST_INFERENCE_TIMEOUT_MS` | Timeout for one action-inference call | `20000` |
//! | `NLTEST_GATEWAY_WAIT_MS` | Upper bound on waiting for a payment gateway | `15000` |
//! | `NLTEST_GATEWAY_POLL_MS` | Poll interval while waiting for a gateway | `500` |
//! | `NLTEST_DEFAULT_BROWSER` | Browser used when a run config names none | `chromium` |
//! | `NLTEST_PIPELINE_STAGES` | Ordered, comma-separated pipeline stages | `observation,requirements,analysis,generation` |
//! | `NLTEST_STORE_DIR` | Base directory of the JSON file store | `/tmp/nl-browser-test` |
//!
//! # Example
//!
//! ```bash
//! export NLTEST_LLM_ENDPOINT="http://localhost:11434/v1/chat/completions"
//! export NLTEST_LLM_MODEL="llava"
//! export NLTEST_PIPELINE_STAGES="observation,requirements,generation"
//! ```

use std::env;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default chat-completions endpoint
pub const DEFAULT_LLM_ENDPOINT: &str = "http://127.0.0.1:8080/v1/chat/completions";

/// Default model name
pub const DEFAULT_LLM_MODEL: &str = "qwen3";

/// Default max tokens for completions
pub const DEFAULT_LLM_MAX_TOKENS: u32 = 2048;

/// Default connection timeout (seconds)
pub const DEFAULT_LLM_CONNECT_TIMEOUT: u64 = 10;

/// Default whole-request timeout (seconds)
pub const DEFAULT_LLM_REQUEST_TIMEOUT: u64 = 120;

/// Default timeout for one browser action (milliseconds)
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 30_000;

/// Default timeout for trying one deterministic selector candidate (milliseconds)
pub const DEFAULT_CANDIDATE_TIMEOUT_MS: u64 = 3_000;

/// Default timeout for one action-inference call (milliseconds)
pub const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 20_000;

/// Default bound on the payment gateway readiness wait (milliseconds)
pub const DEFAULT_GATEWAY_WAIT_MS: u64 = 15_000;

/// Default poll interval for the payment gateway readiness wait (milliseconds)
pub const DEFAULT_GATEWAY_POLL_MS: u64 = 500;

/// Default browser kind
pub const DEFAULT_BROWSER: &str = "chromium";

/// Default pipeline stages, in execution order
pub const DEFAULT_PIPELINE_STAGES: &[&str] = &["observation", "requirements", "analysis", "generation"];

/// Default base directory for the JSON file store
pub const DEFAULT_STORE_DIR: &str = "/tmp/nl-browser-test";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_LLM_ENDPOINT: &str = "NLTEST_LLM_ENDPOINT";
pub const ENV_LLM_MODEL: &str = "NLTEST_LLM_MODEL";
pub const ENV_LLM_MAX_TOKENS: &str = "NLTEST_LLM_MAX_TOKENS";
pub const ENV_LLM_CONNECT_TIMEOUT: &str = "NLTEST_LLM_CONNECT_TIMEOUT";
pub const ENV_LLM_REQUEST_TIMEOUT: &str = "NLTEST_LLM_TIMEOUT";
pub const ENV_ACTION_TIMEOUT_MS: &str = "NLTEST_ACTION_TIMEOUT_MS";
pub const ENV_CANDIDATE_TIMEOUT_MS: &str = "NLTEST_CANDIDATE_TIMEOUT_MS";
pub const ENV_INFERENCE_TIMEOUT_MS: &str = "NLTEST_INFERENCE_TIMEOUT_MS";
pub const ENV_GATEWAY_WAIT_MS: &str = "NLTEST_GATEWAY_WAIT_MS";
pub const ENV_GATEWAY_POLL_MS: &str = "NLTEST_GATEWAY_POLL_MS";
pub const ENV_DEFAULT_BROWSER: &str = "NLTEST_DEFAULT_BROWSER";
pub const ENV_PIPELINE_STAGES: &str = "NLTEST_PIPELINE_STAGES";
pub const ENV_STORE_DIR: &str = "NLTEST_STORE_DIR";

/// Legacy endpoint variable shared with other tooling
pub const ENV_LLM_ENDPOINT_LEGACY: &str = "LLM_ENDPOINT";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmSettings,
    pub execution: ExecutionSettings,
    pub pipeline: PipelineSettings,
    pub store: StoreSettings,
}

/// LLM-related settings
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Whole-request timeout (seconds)
    pub request_timeout: u64,
}

/// Step execution settings
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub action_timeout_ms: u64,
    /// Bound on one selector candidate during deterministic lookup
    pub candidate_timeout_ms: u64,
    pub inference_timeout_ms: u64,
    pub gateway_wait_ms: u64,
    pub gateway_poll_ms: u64,
    pub default_browser: String,
}

/// Agent pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Stage names in execution order
    pub stages: Vec<String>,
}

/// File store settings
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub base_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            llm: LlmSettings::from_env(),
            execution: ExecutionSettings::from_env(),
            pipeline: PipelineSettings::from_env(),
            store: StoreSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            llm: LlmSettings::defaults(),
            execution: ExecutionSettings::defaults(),
            pipeline: PipelineSettings::defaults(),
            store: StoreSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl LlmSettings {
    pub fn from_env() -> Self {
        Self {
            endpoint: pick_endpoint(env::var(ENV_LLM_ENDPOINT).ok(), env::var(ENV_LLM_ENDPOINT_LEGACY).ok()),
            model: env::var(ENV_LLM_MODEL).unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            max_tokens: parse_env(ENV_LLM_MAX_TOKENS).unwrap_or(DEFAULT_LLM_MAX_TOKENS),
            connect_timeout: parse_env(ENV_LLM_CONNECT_TIMEOUT).unwrap_or(DEFAULT_LLM_CONNECT_TIMEOUT),
            request_timeout: parse_env(ENV_LLM_REQUEST_TIMEOUT).unwrap_or(DEFAULT_LLM_REQUEST_TIMEOUT),
        }
    }

    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            max_tokens: DEFAULT_LLM_MAX_TOKENS,
            connect_timeout: DEFAULT_LLM_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_LLM_REQUEST_TIMEOUT,
        }
    }
}

impl ExecutionSettings {
    pub fn from_env() -> Self {
        Self {
            action_timeout_ms: parse_env(ENV_ACTION_TIMEOUT_MS).unwrap_or(DEFAULT_ACTION_TIMEOUT_MS),
            candidate_timeout_ms: parse_env(ENV_CANDIDATE_TIMEOUT_MS).unwrap_or(DEFAULT_CANDIDATE_TIMEOUT_MS),
            inference_timeout_ms: parse_env(ENV_INFERENCE_TIMEOUT_MS)
                .unwrap_or(DEFAULT_INFERENCE_TIMEOUT_MS),
            gateway_wait_ms: parse_env(ENV_GATEWAY_WAIT_MS).unwrap_or(DEFAULT_GATEWAY_WAIT_MS),
            gateway_poll_ms: parse_env(ENV_GATEWAY_POLL_MS).unwrap_or(DEFAULT_GATEWAY_POLL_MS),
            default_browser: env::var(ENV_DEFAULT_BROWSER)
                .unwrap_or_else(|_| DEFAULT_BROWSER.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            action_timeout_ms: DEFAULT_ACTION_TIMEOUT_MS,
            candidate_timeout_ms: DEFAULT_CANDIDATE_TIMEOUT_MS,
            inference_timeout_ms: DEFAULT_INFERENCE_TIMEOUT_MS,
            gateway_wait_ms: DEFAULT_GATEWAY_WAIT_MS,
            gateway_poll_ms: DEFAULT_GATEWAY_POLL_MS,
            default_browser: DEFAULT_BROWSER.to_string(),
        }
    }
}

impl PipelineSettings {
    pub fn from_env() -> Self {
        let stages = env::var(ENV_PIPELINE_STAGES)
            .ok()
            .map(|raw| parse_stage_list(&raw))
            .filter(|stages| !stages.is_empty())
            .unwrap_or_else(default_stage_names);
        Self { stages }
    }

    pub fn defaults() -> Self {
        Self {
            stages: default_stage_names(),
        }
    }
}

impl StoreSettings {
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_STORE_DIR).unwrap_or_else(|_| DEFAULT_STORE_DIR.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_STORE_DIR.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn default_stage_names() -> Vec<String> {
    DEFAULT_PIPELINE_STAGES.iter().map(|s| s.to_string()).collect()
}

/// Parse a comma-separated stage list, dropping blanks and duplicates while keeping order
fn parse_stage_list(raw: &str) -> Vec<String> {
    let mut stages: Vec<String> = Vec::new();
    for name in raw.split(',').map(|s| s.trim().to_lowercase()) {
        if !name.is_empty() && !stages.contains(&name) {
            stages.push(name);
        }
    }
    stages
}

/// Get the LLM endpoint (convenience function)
pub fn llm_endpoint() -> String {
    get().llm.endpoint.clone()
}

/// `NLTEST_LLM_ENDPOINT` wins over the legacy `LLM_ENDPOINT`; blank values count as unset
fn pick_endpoint(primary: Option<String>, legacy: Option<String>) -> String {
    primary
        .filter(|v| !v.trim().is_empty())
        .or_else(|| legacy.filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_LLM_ENDPOINT.to_string())
}

/// Get the LLM model (convenience function)
pub fn llm_model() -> String {
    get().llm.model.clone()
}

/// Get the store base directory (convenience function)
pub fn store_base_dir() -> String {
    get().store.base_dir.clone()
}
