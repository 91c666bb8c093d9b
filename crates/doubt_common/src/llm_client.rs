//! Chat completion client.
//!
//! A narrow interface over an OpenAI-compatible `/v1/chat/completions`
//! endpoint, plus a scripted fake for tests.

use crate::chat::{ChatMessage, ContentPart, MessageContent, TokenUsage};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_endpoint() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout(),
        }
    }
}

/// LLM errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("LLM is disabled in configuration")]
    Disabled,

    #[error("No API key configured")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("HTTP {code} from chat completion endpoint: {body}")]
    Status { code: u16, body: String },

    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("LLM returned empty response")]
    EmptyResponse,
}

/// One generated answer
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            model: None,
        }
    }
}

/// Generic chat completion client
pub trait ChatClient: Send + Sync {
    /// Send the whole conversation, get the next assistant message
    fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError>;
}

/// Real client over HTTP
pub struct HttpChatClient {
    config: LlmConfig,
    client: reqwest::blocking::Client,
}

impl HttpChatClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { config, client })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        json!({
            "model": self.config.model,
            "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        })
    }
}

impl ChatClient for HttpChatClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey)?;

        debug!(
            "Requesting completion from {} ({} messages)",
            self.config.model,
            messages.len()
        );

        let response = self
            .client
            .post(self.url())
            .bearer_auth(api_key)
            .json(&self.request_body(messages))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.config.timeout_secs)
                } else {
                    LlmError::HttpError(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!("Chat completion endpoint returned HTTP {}", status);
            return Err(LlmError::Status {
                code: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let response_json: Value = response
            .json()
            .map_err(|e| LlmError::InvalidJson(format!("Failed to parse response: {}", e)))?;

        parse_completion(&response_json)
    }
}

/// Message in the OpenAI wire format
fn wire_message(message: &ChatMessage) -> Value {
    let content = match &message.content {
        MessageContent::Text(text) => Value::String(text.clone()),
        MessageContent::Multimodal(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::Image { image } => json!({
                        "type": "image_url",
                        "image_url": {"url": image.url()},
                    }),
                })
                .collect(),
        ),
    };
    json!({"role": message.role.as_str(), "content": content})
}

/// Extract text and usage from a chat completion response
pub fn parse_completion(response: &Value) -> Result<Completion, LlmError> {
    let text = response
        .get("choices")
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("message"))
        .and_then(|v| v.get("content"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or(LlmError::EmptyResponse)?;

    let usage = response.get("usage").and_then(|u| {
        let count = |key: &str| u.get(key).and_then(|v| v.as_u64()).map(|v| v as u32);
        Some(TokenUsage {
            prompt_tokens: count("prompt_tokens")?,
            completion_tokens: count("completion_tokens")?,
            total_tokens: count("total_tokens")?,
        })
    });

    Ok(Completion {
        text: text.to_string(),
        usage,
        model: response
            .get("model")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Fake chat client for testing
pub struct FakeChatClient {
    responses: Mutex<Vec<Result<Completion, LlmError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeChatClient {
    /// Create a fake client with pre-defined responses
    pub fn new(responses: Vec<Result<Completion, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same text
    pub fn always(text: &str) -> Self {
        Self::new(vec![Ok(Completion {
            text: text.to_string(),
            usage: Some(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: Some("fake".to_string()),
        })])
    }

    /// Always fail with the same error
    pub fn always_error(error: LlmError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Conversations received so far
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ChatClient for FakeChatClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }

        let mut responses = self
            .responses
            .lock()
            .map_err(|_| LlmError::HttpError("fake client poisoned".to_string()))?;

        match responses.len() {
            0 => Err(LlmError::EmptyResponse),
            // Keep returning the last response
            1 => responses[0].clone(),
            _ => responses.remove(0),
        }
    }
}
