//! LLM completion client used by pipeline stages and action inference.
//!
//! Provides:
//! - The [`CompletionClient`] seam every stage and the action resolver talk through
//! - An OpenAI-compatible HTTP client driven through `curl`, with connect and
//!   whole-request bounds
//! - Connection health checks
//!
//! Provider-specific response shapes are normalized into [`Completion`] here so
//! nothing above this module sees raw JSON.
//!
//! # Configuration
//!
//! Settings come from [`crate::config`]:
//! - `NLTEST_LLM_ENDPOINT`: API endpoint URL
//! - `NLTEST_LLM_MODEL`: Model name
//! - `NLTEST_LLM_MAX_TOKENS`: Max tokens in response
//! - `NLTEST_LLM_TIMEOUT`: Whole-request timeout (seconds)
//! - `NLTEST_LLM_CONNECT_TIMEOUT`: Connection timeout (seconds)

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    /// Failed to connect to the endpoint
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// The provider answered with a non-success status
    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// The request exceeded its time budget
    #[error("No response within {0:?}")]
    Timeout(Duration),
    /// Invalid response from the provider
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Optional PNG attached to the message (sent as a data URL)
    #[serde(skip)]
    pub image: Option<Vec<u8>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            image: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            image: None,
        }
    }

    /// Attach a PNG screenshot to this message
    pub fn with_image(mut self, png: Vec<u8>) -> Self {
        self.image = Some(png);
        self
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

impl TokenUsage {
    /// Accumulate another usage report into this one
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }
}

/// A normalized completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// The completion collaborator.
///
/// Implementations normalize their provider's response shape before returning.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], model: &str) -> LlmResult<Completion>;
}

/// Configuration for the HTTP completion client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API endpoint URL
    pub endpoint: String,
    /// Model used when the caller passes an empty model name
    pub model: String,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Timeout for initial connection (seconds)
    pub connection_timeout: u64,
    /// Timeout for the whole request (seconds)
    pub request_timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            endpoint: cfg.llm.endpoint.clone(),
            model: cfg.llm.model.clone(),
            max_tokens: cfg.llm.max_tokens,
            connection_timeout: cfg.llm.connect_timeout,
            request_timeout: cfg.llm.request_timeout,
        }
    }
}

impl LlmConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn request_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout = seconds;
        self
    }
}

/// OpenAI-compatible chat-completions client
#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    config: LlmConfig,
}

impl HttpCompletionClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, messages: &[ChatMessage], model: &str) -> LlmResult<Completion> {
        let model = if model.is_empty() { self.config.model.as_str() } else { model };
        let request = build_request_body(messages, model, self.config.max_tokens);
        let request_json = serde_json::to_string(&request)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        debug!(endpoint = %self.config.endpoint, model, messages = messages.len(), "Sending completion request");

        let budget = Duration::from_secs(self.config.request_timeout);
        // The body goes through stdin; a screenshot-sized request exceeds the argv length limit
        let mut child = Command::new("curl")
            .args([
                "-s",
                "-X", "POST",
                &self.config.endpoint,
                "-H", "Content-Type: application/json",
                "--data-binary", "@-",
                "-w", "\n%{http_code}",
                "--connect-timeout", &self.config.connection_timeout.to_string(),
                "--max-time", &self.config.request_timeout.to_string(),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take();
        let exchange = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(request_json.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        // curl enforces --max-time itself; this only guards against a wedged process
        let output = tokio::time::timeout(budget + Duration::from_secs(5), exchange)
            .await
            .map_err(|_| LlmError::Timeout(budget))??;

        if !output.status.success() {
            // curl exit code 28 is its own timeout
            if output.status.code() == Some(28) {
                return Err(LlmError::Timeout(budget));
            }
            return Err(LlmError::ConnectionFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let (body, status) = split_status_trailer(&output.stdout);
        if !(200..300).contains(&status) {
            return Err(LlmError::Http {
                status,
                body: String::from_utf8_lossy(body).chars().take(500).collect(),
            });
        }

        parse_completion_response(body)
    }
}

/// Check if an endpoint is reachable (connection-only check).
///
/// Any HTTP answer counts as reachable; only a failed connection reports false.
pub async fn check_health(endpoint: &str, timeout_secs: u64) -> LlmResult<bool> {
    let url = endpoint.trim_start_matches("http://").trim_start_matches("https://");
    let host_port = url.split('/').next().unwrap_or("127.0.0.1:8080");

    let output = Command::new("curl")
        .args([
            "-s",
            "-o", "/dev/null",
            "-w", "%{http_code}",
            "--connect-timeout", &timeout_secs.to_string(),
            "--max-time", &timeout_secs.to_string(),
            "-I",
            &format!("http://{}", host_port),
        ])
        .output()
        .await?;

    let status = String::from_utf8_lossy(&output.stdout);
    // 000 means the connection failed entirely
    let code: u16 = status.trim().parse().unwrap_or(0);
    Ok(code > 0)
}

/// Build an OpenAI-compatible request body
pub fn build_request_body(messages: &[ChatMessage], model: &str, max_tokens: u32) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|message| match &message.image {
            Some(png) => {
                let img_base64 = base64::engine::general_purpose::STANDARD.encode(png);
                serde_json::json!({
                    "role": message.role,
                    "content": [
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:image/png;base64,{}", img_base64) }
                        },
                        { "type": "text", "text": message.content }
                    ]
                })
            }
            None => serde_json::json!({ "role": message.role, "content": message.content }),
        })
        .collect();

    serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "stream": false
    })
}

/// Parse a chat-completions response into a [`Completion`]
pub fn parse_completion_response(body: &[u8]) -> LlmResult<Completion> {
    let response: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    if let Some(message) = response["error"]["message"].as_str() {
        return Err(LlmError::InvalidResponse(message.to_string()));
    }

    let message = &response["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or("");

    // Thinking models sometimes leave content empty
    let text = if content.trim().is_empty() {
        message["reasoning_content"].as_str().unwrap_or("")
    } else {
        content
    };

    if text.trim().is_empty() {
        return Err(LlmError::InvalidResponse("response contained no content".to_string()));
    }

    let usage = &response["usage"];
    let as_u32 = |v: &serde_json::Value| v.as_u64().unwrap_or(0).min(u32::MAX as u64) as u32;

    Ok(Completion {
        text: text.to_string(),
        usage: TokenUsage {
            prompt: as_u32(&usage["prompt_tokens"]),
            completion: as_u32(&usage["completion_tokens"]),
            total: as_u32(&usage["total_tokens"]),
        },
    })
}

/// Split the `\n<status>` trailer curl appends via `-w`
fn split_status_trailer(stdout: &[u8]) -> (&[u8], u16) {
    match stdout.iter().rposition(|&b| b == b'\n') {
        Some(pos) => {
            let status = std::str::from_utf8(&stdout[pos + 1..])
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0);
            (&stdout[..pos], status)
        }
        None => (&stdout[..0], 0),
    }
}
