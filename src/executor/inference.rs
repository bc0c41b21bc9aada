//! Action inference: natural-language instruction + page snapshot to a concrete action.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use super::types::{Inference, InferenceError, InferenceResult, InferredAction};
use crate::browser::PageSnapshot;
use crate::interpreter::ActionKind;
use crate::llm::{ChatMessage, CompletionClient};

/// The action-inference collaborator
#[async_trait]
pub trait ActionInference: Send + Sync {
    async fn infer_action(&self, instruction: &str, page: &PageSnapshot) -> InferenceResult<Inference>;
}

const INFERENCE_SYSTEM_PROMPT: &str = r#"You control a web browser for an automated test.
Given one test instruction and an outline of the current page, pick the single element to act on.
Reply with JSON only:
{"found": true, "kind": "click|fill|select|navigate|assert", "target": "<css selector, xpath or visible text>", "value": "<text to type or option to pick, or null>"}
If no element on the page matches the instruction, reply {"found": false}."#;

/// Inference backed by an LLM completion client
pub struct LlmActionInference {
    client: Arc<dyn CompletionClient>,
    model: String,
    /// Attach the page screenshot when the snapshot has one
    send_screenshot: bool,
}

impl LlmActionInference {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            send_screenshot: true,
        }
    }

    pub fn without_screenshots(mut self) -> Self {
        self.send_screenshot = false;
        self
    }

    fn build_messages(&self, instruction: &str, page: &PageSnapshot) -> Vec<ChatMessage> {
        let user = format!(
            "Instruction: {}\n\nPage URL: {}\nPage title: {}\nInteractive elements:\n{}",
            instruction, page.url, page.title, page.outline
        );
        let mut user = ChatMessage::user(user);
        if self.send_screenshot {
            if let Some(png) = &page.screenshot {
                user = user.with_image(png.clone());
            }
        }
        vec![ChatMessage::system(INFERENCE_SYSTEM_PROMPT), user]
    }
}

#[async_trait]
impl ActionInference for LlmActionInference {
    async fn infer_action(&self, instruction: &str, page: &PageSnapshot) -> InferenceResult<Inference> {
        let messages = self.build_messages(instruction, page);
        let completion = self.client.complete(&messages, &self.model).await?;
        debug!(tokens = completion.usage.total, "Inference reply received");
        parse_inference_reply(&completion.text)
    }
}

#[derive(Deserialize)]
struct RawReply {
    #[serde(default)]
    found: Option<bool>,
    #[serde(default)]
    kind: Option<ActionKind>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

/// Parse a model reply, tolerating code fences and prose around the JSON object
pub fn parse_inference_reply(text: &str) -> InferenceResult<Inference> {
    let json = extract_json_object(text)
        .ok_or_else(|| InferenceError::InvalidResponse(format!("no JSON object in reply: {}", truncate(text, 120))))?;
    let raw: RawReply =
        serde_json::from_str(json).map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

    let target = raw.target.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    match (raw.found.unwrap_or(target.is_some()), raw.kind, target) {
        (true, Some(kind), Some(target)) => {
            let value = match raw.value {
                Some(serde_json::Value::String(s)) => Some(s),
                Some(serde_json::Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            };
            Ok(Inference::Found(InferredAction { kind, target, value }))
        }
        (true, None, _) => Err(InferenceError::InvalidResponse("reply is missing `kind`".to_string())),
        _ => Ok(Inference::NotFound),
    }
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Canned inference answers keyed by instruction text.
///
/// Unknown instructions answer `NotFound`, which makes this the offline
/// resolver for dry runs as well as a test double.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInference {
    replies: Arc<Mutex<HashMap<String, ScriptedReply>>>,
    calls: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

#[derive(Debug, Clone)]
enum ScriptedReply {
    Found(InferredAction),
    Fail(String),
}

impl ScriptedInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(
        self,
        instruction: impl Into<String>,
        kind: ActionKind,
        target: impl Into<String>,
        value: Option<&str>,
    ) -> Self {
        let action = InferredAction {
            kind,
            target: target.into(),
            value: value.map(str::to_string),
        };
        self.insert(instruction.into(), ScriptedReply::Found(action));
        self
    }

    /// Make the given instruction fail as an upstream provider error
    pub fn with_failure(self, instruction: impl Into<String>, message: impl Into<String>) -> Self {
        self.insert(instruction.into(), ScriptedReply::Fail(message.into()));
        self
    }

    /// Delay every answer, for exercising the inference timeout
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Instructions seen so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn insert(&self, key: String, reply: ScriptedReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.insert(key, reply);
        }
    }
}

#[async_trait]
impl ActionInference for ScriptedInference {
    async fn infer_action(&self, instruction: &str, _page: &PageSnapshot) -> InferenceResult<Inference> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(instruction.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|r| r.get(instruction).cloned());
        match reply {
            Some(ScriptedReply::Found(action)) => Ok(Inference::Found(action)),
            Some(ScriptedReply::Fail(message)) => Err(InferenceError::Upstream(message)),
            None => Ok(Inference::NotFound),
        }
    }
}
