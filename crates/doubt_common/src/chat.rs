//! Chat message model shared by the solver, the store and the LLM client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the model fetches an image from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    /// Base64 bytes carried in the request itself
    Inline { mime: String, data: String },
    /// Publicly retrievable hosted image
    Url { url: String },
}

impl ImageRef {
    /// The URL handed to the model (a `data:` URL for inline images)
    pub fn url(&self) -> String {
        match self {
            ImageRef::Inline { mime, data } => format!("data:{};base64,{}", mime, data),
            ImageRef::Url { url } => url.clone(),
        }
    }
}

/// One typed part of a multimodal message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { image: ImageRef },
}

/// Message body: plain text or a list of typed parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MessageContent {
    Text(String),
    Multimodal(Vec<ContentPart>),
}

impl MessageContent {
    /// Text with an attached image
    pub fn with_image(text: impl Into<String>, image: ImageRef) -> Self {
        MessageContent::Multimodal(vec![
            ContentPart::Text { text: text.into() },
            ContentPart::Image { image },
        ])
    }

    /// The text of the message; first text part for multimodal content
    pub fn text(&self) -> &str {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Multimodal(parts) => parts
                .iter()
                .find_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .unwrap_or(""),
        }
    }

    pub fn image(&self) -> Option<&ImageRef> {
        match self {
            MessageContent::Text(_) => None,
            MessageContent::Multimodal(parts) => parts.iter().find_map(|part| match part {
                ContentPart::Image { image } => Some(image),
                ContentPart::Text { .. } => None,
            }),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

/// Token counters reported by the completion endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            token_usage: None,
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.token_usage = usage;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_image_url() {
        let image = ImageRef::Inline {
            mime: "image/png".to_string(),
            data: "AAAA".to_string(),
        };
        assert_eq!(image.url(), "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_multimodal_text_and_image() {
        let image = ImageRef::Url {
            url: "https://img.example/q.png".to_string(),
        };
        let content = MessageContent::with_image("Solve this", image.clone());
        assert_eq!(content.text(), "Solve this");
        assert_eq!(content.image(), Some(&image));

        let plain = MessageContent::from("just text");
        assert_eq!(plain.text(), "just text");
        assert!(plain.image().is_none());
    }

    #[test]
    fn test_content_json_shape() {
        let content = MessageContent::from("hi");
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["value"], "hi");

        let parsed: MessageContent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, content);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse("tool"), None);
        assert_eq!(Role::User.to_string(), "user");
    }
}
