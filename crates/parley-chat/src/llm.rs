//! Chat model clients.
//!
//! `GeminiChatModel` talks to the Gemini `generateContent` REST endpoint.
//! `ScriptedChatModel` replays canned replies and records every prompt it
//! receives, for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use parley_core::config::LlmConfig;

use crate::error::ChatError;
use crate::prompt::{PromptMessage, PromptRole};

/// A language model that turns a prompt into free text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model name, for logging.
    fn name(&self) -> &str;

    /// Single non-streaming completion.
    async fn generate(&self, prompt: &[PromptMessage]) -> Result<String, ChatError>;
}

// ---------------------------------------------------------------------------
// GeminiChatModel
// ---------------------------------------------------------------------------

/// Google Gemini over its REST API.
#[derive(Clone)]
pub struct GeminiChatModel {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: Option<f32>,
}

impl GeminiChatModel {
    /// Build a client from the `[llm]` config section and a credential.
    pub fn new(config: &LlmConfig, api_key: &str) -> Result<Self, ChatError> {
        if api_key.trim().is_empty() {
            return Err(ChatError::Config("API key must not be empty".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(ChatError::Config("Model name must not be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.to_string(),
            temperature: config.temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Request body: system messages become `systemInstruction`, the rest
    /// become `contents` with consecutive same-role messages merged.
    fn request_body(&self, prompt: &[PromptMessage]) -> Value {
        let system: Vec<Value> = prompt
            .iter()
            .filter(|m| m.role == PromptRole::System)
            .map(|m| json!({ "text": m.content }))
            .collect();

        let mut contents: Vec<(&'static str, Vec<Value>)> = Vec::new();
        for message in prompt.iter().filter(|m| m.role != PromptRole::System) {
            let role = match message.role {
                PromptRole::Model => "model",
                _ => "user",
            };
            let part = json!({ "text": message.content });
            match contents.last_mut() {
                Some((last_role, parts)) if *last_role == role => parts.push(part),
                _ => contents.push((role, vec![part])),
            }
        }

        let mut body = json!({
            "contents": contents
                .into_iter()
                .map(|(role, parts)| json!({ "role": role, "parts": parts }))
                .collect::<Vec<_>>(),
        });

        if let Some(obj) = body.as_object_mut() {
            if !system.is_empty() {
                obj.insert("systemInstruction".to_string(), json!({ "parts": system }));
            }
            if let Some(t) = self.temperature {
                obj.insert("generationConfig".to_string(), json!({ "temperature": t }));
            }
        }

        body
    }
}

impl std::fmt::Debug for GeminiChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiChatModel")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[async_trait]
impl ChatModel for GeminiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &[PromptMessage]) -> Result<String, ChatError> {
        let res = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            warn!(model = %self.model, status = %status, "Gemini request failed");
            return Err(ChatError::Llm(format!(
                "Gemini returned {}: {}",
                status,
                error_message(&text)
            )));
        }

        let payload: Value = res.json().await?;
        let text = response_text(&payload)?;
        debug!(model = %self.model, chars = text.len(), "Gemini response received");
        Ok(text)
    }
}

/// Concatenated text parts of the first candidate.
fn response_text(payload: &Value) -> Result<String, ChatError> {
    let candidate = &payload["candidates"][0];
    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
        .unwrap_or_default();

    if !text.is_empty() {
        return Ok(text);
    }

    let reason = candidate["finishReason"]
        .as_str()
        .map(|r| format!("finish reason {}", r))
        .or_else(|| {
            payload["promptFeedback"]["blockReason"]
                .as_str()
                .map(|r| format!("prompt blocked: {}", r))
        })
        .unwrap_or_else(|| "no candidates".to_string());
    Err(ChatError::EmptyResponse(reason))
}

/// `error.message` of a Gemini error body, else the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// ScriptedChatModel
// ---------------------------------------------------------------------------

/// Deterministic chat model for tests.
///
/// Replies are taken from a queue in order; once the queue is empty the
/// fallback reply is used, or an error if there is none.
#[derive(Debug, Default)]
pub struct ScriptedChatModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    fallback: Option<String>,
    calls: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call with the same text.
    pub fn always(reply: impl Into<String>) -> Self {
        Self {
            fallback: Some(reply.into()),
            ..Self::default()
        }
    }

    /// Queue a successful reply.
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// Queue a failure.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Err(message.into()));
        self
    }

    fn push(&self, reply: Result<String, String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Every prompt received so far, in call order.
    pub fn calls(&self) -> Vec<Vec<PromptMessage>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &[PromptMessage]) -> Result<String, ChatError> {
        self.calls
            .lock()
            .map_err(|e| ChatError::Llm(format!("Lock poisoned: {}", e)))?
            .push(prompt.to_vec());

        let next = self
            .replies
            .lock()
            .map_err(|e| ChatError::Llm(format!("Lock poisoned: {}", e)))?
            .pop_front();

        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(ChatError::Llm(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ChatError::Llm("No scripted reply left".to_string())),
        }
    }
}
