//! Request and response bodies of the doubtd web API.

use crate::chat::TokenUsage;
use crate::normalizer::Strategy;
use crate::solver::Turn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
}

/// Body of every non-2xx reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizeRequest {
    #[serde(default)]
    pub text: Option<String>,
    /// Defaults to the daemon's configured strategy
    #[serde(default)]
    pub strategy: Option<Strategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeResponse {
    pub text: String,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub user_id: String,
    pub username: String,
    /// Bearer token, only present on login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub text: Option<String>,
    /// Raw base64 or a `data:` URL
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub question_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub text: String,
    #[serde(default)]
    pub rating: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub question_id: String,
    pub answer: String,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl From<Turn> for AnswerResponse {
    fn from(turn: Turn) -> Self {
        Self {
            question_id: turn.question_id,
            answer: turn.answer,
            usage: turn.usage,
        }
    }
}
