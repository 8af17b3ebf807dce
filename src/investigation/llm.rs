//! The LLM client capability: a live Anthropic Messages API implementation
//! and an in-memory scripted fake for tests.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

const ANTHROPIC_API: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One turn's worth of conversation with the model: the raw content blocks
/// Anthropic returned (text and/or tool_use), kept as JSON so the engine can
/// pass them back verbatim on the next turn.
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub content_blocks: Vec<Value>,
}

impl LlmReply {
    pub fn tool_use_blocks(&self) -> Vec<&Value> {
        self.content_blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_use"))
            .collect()
    }

    pub fn has_tool_use(&self) -> bool {
        !self.tool_use_blocks().is_empty()
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends one turn. Returns `None` on any transport/decode failure — the
    /// caller treats that as "end the loop without a diagnosis", never as a
    /// raised error.
    async fn send_turn(&self, system: &str, messages: &[Value], tools: &[Value]) -> Option<LlmReply>;
}

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client configuration is valid");
        Self { http, api_key, model }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn send_turn(&self, system: &str, messages: &[Value], tools: &[Value]) -> Option<LlmReply> {
        let body = json!({
            "model": self.model,
            "max_tokens": 4096,
            "system": system,
            "messages": messages,
            "tools": tools,
        });

        let resp = self
            .http
            .post(ANTHROPIC_API)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("LLM transport error: {e}");
                return None;
            }
        };

        if !resp.status().is_success() {
            tracing::error!("LLM API returned status {}", resp.status());
            return None;
        }

        let value: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("LLM response decode error: {e}");
                return None;
            }
        };

        let content = value.get("content")?.as_array()?.clone();
        Some(LlmReply { content_blocks: content })
    }
}

/// Scripted fake: returns queued replies in order, one per call. Used by
/// Investigation Engine tests to exercise the turn loop deterministically.
pub struct FakeLlmClient {
    replies: std::sync::Mutex<std::collections::VecDeque<Option<LlmReply>>>,
}

impl FakeLlmClient {
    pub fn new(replies: Vec<LlmReply>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into_iter().map(Some).collect()),
        }
    }

    pub fn with_transport_failure_at_end(replies: Vec<LlmReply>) -> Self {
        let mut queue: std::collections::VecDeque<Option<LlmReply>> = replies.into_iter().map(Some).collect();
        queue.push_back(None);
        Self {
            replies: std::sync::Mutex::new(queue),
        }
    }
}

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn send_turn(&self, _system: &str, _messages: &[Value], _tools: &[Value]) -> Option<LlmReply> {
        self.replies.lock().unwrap().pop_front().flatten()
    }
}

pub fn text_reply(text: &str) -> LlmReply {
    LlmReply {
        content_blocks: vec![json!({ "type": "text", "text": text })],
    }
}

pub fn tool_use_reply(tool_use_id: &str, name: &str, input: Value) -> LlmReply {
    LlmReply {
        content_blocks: vec![json!({
            "type": "tool_use",
            "id": tool_use_id,
            "name": name,
            "input": input,
        })],
    }
}
