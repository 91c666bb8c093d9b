//! Question solving flow.
//!
//! Validates a submission, hosts its image, asks the model, normalizes the
//! math markup of the answer and persists the thread. Nothing is written
//! unless the model produced an answer.

use crate::auth::{self, AuthError};
use crate::chat::{ChatMessage, MessageContent, TokenUsage};
use crate::conversation::Conversation;
use crate::image_host::{ImageHost, ImageHostError, ImageUpload};
use crate::llm_client::{ChatClient, LlmError};
use crate::normalizer::{normalize_with, Strategy};
use crate::prompts::IMAGE_ONLY_PROMPT;
use crate::store::{Feedback, NewQuestion, QuestionSummary, QuestionThread, Store, StoreError, UserAccount};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Solver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Normalization applied to every answer
    #[serde(default)]
    pub strategy: Strategy,

    /// User messages allowed per thread, opening question included
    #[serde(default = "default_max_user_messages")]
    pub max_user_messages: usize,

    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    #[serde(default = "default_subject")]
    pub default_subject: String,

    #[serde(default = "default_question_type")]
    pub default_question_type: String,
}

fn default_max_user_messages() -> usize {
    10
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_subject() -> String {
    "General".to_string()
}

fn default_question_type() -> String {
    "Doubt".to_string()
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_user_messages: default_max_user_messages(),
            max_image_bytes: default_max_image_bytes(),
            default_subject: default_subject(),
            default_question_type: default_question_type(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("Please enter a question or upload an image.")]
    EmptyQuestion,

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("image upload failed: {0}")]
    Image(#[from] ImageHostError),

    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("message limit of {0} reached for this question")]
    FollowUpLimit(usize),
}

impl SolverError {
    /// Non-fatal notice for the person who submitted the request
    pub fn user_message(&self) -> String {
        match self {
            SolverError::EmptyQuestion => self.to_string(),
            SolverError::InvalidInput(msg) => msg.clone(),
            SolverError::Auth(AuthError::Store(_)) | SolverError::Store(_) => {
                "Something went wrong while saving. Please try again.".to_string()
            }
            SolverError::Auth(e) => e.to_string(),
            SolverError::Image(e) => format!("Image upload failed: {}", e),
            SolverError::Llm(e) => format!("Error getting response: {}", e),
            SolverError::NotFound(_) => "Question not found.".to_string(),
            SolverError::FollowUpLimit(limit) => format!(
                "This question has reached its limit of {} messages. Please start a new question.",
                limit
            ),
        }
    }
}

/// A submitted question
#[derive(Debug, Clone, Default)]
pub struct Question {
    pub text: Option<String>,
    /// Raw jpg/png bytes
    pub image: Option<Vec<u8>>,
    pub subject: Option<String>,
    pub question_type: Option<String>,
}

impl Question {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Outcome of one answered message
#[derive(Debug, Clone)]
pub struct Turn {
    pub question_id: String,
    /// Caller's conversation extended with this exchange
    pub conversation: Conversation,
    /// Normalized answer
    pub answer: String,
    pub usage: Option<TokenUsage>,
}

pub struct Solver {
    chat: Arc<dyn ChatClient>,
    images: Arc<dyn ImageHost>,
    store: Arc<Store>,
    config: SolverConfig,
}

impl Solver {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        images: Arc<dyn ImageHost>,
        store: Arc<Store>,
        config: SolverConfig,
    ) -> Self {
        Self {
            chat,
            images,
            store,
            config,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------------

    pub fn signup(&self, username: &str, password: &str) -> Result<UserAccount, AuthError> {
        let username = auth::validate_credentials(username, password)?;
        let user = self
            .store
            .add_user(username, &auth::hash_password(password))
            .map_err(|e| match e {
                StoreError::Duplicate(_) => AuthError::AlreadyExists,
                other => AuthError::Store(other),
            })?;
        info!("New account {}", user.id);
        Ok(user)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<UserAccount, AuthError> {
        let user = self.store.get_user(username.trim())?;
        let stored = user.as_ref().map(|user| user.password_hash.as_str());
        if !auth::verify_account(password, stored) {
            return Err(AuthError::InvalidCredentials);
        }
        let user = user.ok_or(AuthError::InvalidCredentials)?;
        info!("Login for {}", user.id);
        Ok(user)
    }

    // ------------------------------------------------------------------------
    // Questions
    // ------------------------------------------------------------------------

    /// Answer a new question and open a thread for it.
    ///
    /// On any error the caller keeps its own `conversation` and nothing is stored.
    pub fn ask(
        &self,
        user_id: &str,
        conversation: &Conversation,
        question: Question,
    ) -> Result<Turn, SolverError> {
        let text = non_blank(question.text);
        if text.is_none() && question.image.is_none() {
            return Err(SolverError::EmptyQuestion);
        }

        let image = match question.image {
            Some(bytes) => {
                let upload = ImageUpload::new(bytes, self.config.max_image_bytes)?;
                Some(self.images.upload(&upload).inspect_err(|e| {
                    warn!("Image upload failed: {}", e);
                })?)
            }
            None => None,
        };

        let content = match &image {
            Some(image) => MessageContent::with_image(
                text.clone().unwrap_or_else(|| IMAGE_ONLY_PROMPT.to_string()),
                image.clone(),
            ),
            None => MessageContent::Text(text.clone().unwrap_or_default()),
        };
        let user_message = ChatMessage::user(content);

        let (answer, usage) = self.answer(&conversation.with_message(user_message.clone()))?;
        let assistant_message = ChatMessage::assistant(answer.clone()).with_usage(usage);

        let new_question = NewQuestion {
            user_id: user_id.to_string(),
            question_text: text.unwrap_or_default(),
            image,
            subject: non_blank(question.subject).unwrap_or_else(|| self.config.default_subject.clone()),
            question_type: non_blank(question.question_type)
                .unwrap_or_else(|| self.config.default_question_type.clone()),
            first_message: user_message.clone(),
        };
        let question_id = self
            .store
            .add_question_with_replies(&new_question, std::slice::from_ref(&assistant_message))?;

        info!(
            "Question {} answered ({} tokens)",
            question_id,
            usage.map_or(0, |u| u.total_tokens)
        );

        Ok(Turn {
            question_id,
            conversation: conversation.with_exchange(user_message, assistant_message),
            answer,
            usage,
        })
    }

    /// Continue an existing thread with a text follow-up
    pub fn follow_up(&self, user_id: &str, question_id: &str, text: &str) -> Result<Turn, SolverError> {
        let text = non_blank(Some(text.to_string())).ok_or(SolverError::EmptyQuestion)?;
        let thread = self.thread(user_id, question_id)?;

        let asked = self.store.count_user_messages(question_id)?;
        if asked >= self.config.max_user_messages {
            return Err(SolverError::FollowUpLimit(self.config.max_user_messages));
        }

        let conversation = Conversation::from_messages(thread.messages);
        let user_message = ChatMessage::user(text);

        let (answer, usage) = self.answer(&conversation.with_message(user_message.clone()))?;
        let assistant_message = ChatMessage::assistant(answer.clone()).with_usage(usage);

        self.store
            .append_messages(question_id, &[user_message.clone(), assistant_message.clone()])?;

        info!("Follow-up {} on question {}", asked, question_id);

        Ok(Turn {
            question_id: question_id.to_string(),
            conversation: conversation.with_exchange(user_message, assistant_message),
            answer,
            usage,
        })
    }

    /// A thread owned by `user_id`. Other users' threads are reported as missing.
    pub fn thread(&self, user_id: &str, question_id: &str) -> Result<QuestionThread, SolverError> {
        match self.store.get_question(question_id) {
            Ok(thread) if thread.user_id == user_id => Ok(thread),
            Ok(_) | Err(StoreError::NotFound(_)) => {
                Err(SolverError::NotFound(format!("question '{}'", question_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn questions(&self, user_id: &str) -> Result<Vec<QuestionSummary>, SolverError> {
        Ok(self.store.list_questions(user_id)?)
    }

    pub fn submit_feedback(
        &self,
        user_id: &str,
        question_id: &str,
        text: &str,
        rating: Option<u8>,
    ) -> Result<Feedback, SolverError> {
        let text = non_blank(Some(text.to_string()))
            .ok_or_else(|| SolverError::InvalidInput("Feedback must not be empty.".to_string()))?;
        if let Some(rating) = rating {
            if !(1..=5).contains(&rating) {
                return Err(SolverError::InvalidInput(
                    "Rating must be between 1 and 5.".to_string(),
                ));
            }
        }
        self.thread(user_id, question_id)?;

        let feedback = self.store.add_feedback(user_id, question_id, &text, rating)?;
        info!("Feedback {} on question {}", feedback.id, question_id);
        Ok(feedback)
    }

    /// Normalize with the configured strategy
    pub fn normalize(&self, text: Option<&str>) -> String {
        normalize_with(self.config.strategy, text)
    }

    fn answer(&self, pending: &Conversation) -> Result<(String, Option<TokenUsage>), SolverError> {
        let completion = self.chat.complete(pending.messages()).inspect_err(|e| {
            warn!("Chat completion failed: {}", e);
        })?;
        Ok((self.normalize(Some(&completion.text)), completion.usage))
    }
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_host::InlineImageHost;
    use crate::llm_client::FakeChatClient;

    fn solver(chat: FakeChatClient) -> Solver {
        Solver::new(
            Arc::new(chat),
            Arc::new(InlineImageHost),
            Arc::new(Store::open_in_memory().unwrap()),
            SolverConfig::default(),
        )
    }

    #[test]
    fn test_signup_then_login() {
        let solver = solver(FakeChatClient::always("ok"));
        let user = solver.signup("asha", "secret").unwrap();
        assert_eq!(solver.login("asha", "secret").unwrap().id, user.id);
    }

    #[test]
    fn test_duplicate_signup_is_distinct_error() {
        let solver = solver(FakeChatClient::always("ok"));
        solver.signup("asha", "secret").unwrap();
        assert!(matches!(
            solver.signup("asha", "other"),
            Err(AuthError::AlreadyExists)
        ));
    }

    #[test]
    fn test_login_does_not_reveal_unknown_user() {
        let solver = solver(FakeChatClient::always("ok"));
        solver.signup("asha", "secret").unwrap();

        let wrong_password = solver.login("asha", "nope").unwrap_err();
        let unknown_user = solver.login("ravi", "secret").unwrap_err();
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
        assert!(matches!(unknown_user, AuthError::InvalidCredentials));
    }

    #[test]
    fn test_empty_question_rejected() {
        let solver = solver(FakeChatClient::always("ok"));
        let result = solver.ask("u", &Conversation::new(), Question::text("   "));
        assert!(matches!(result, Err(SolverError::EmptyQuestion)));
    }

    #[test]
    fn test_rating_range() {
        let solver = solver(FakeChatClient::always("ok"));
        let result = solver.submit_feedback("u", "q", "fine", Some(6));
        assert!(matches!(result, Err(SolverError::InvalidInput(_))));
        let result = solver.submit_feedback("u", "q", " ", None);
        assert!(matches!(result, Err(SolverError::InvalidInput(_))));
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            SolverError::Auth(AuthError::AlreadyExists).user_message(),
            "Username already exists. Please choose another."
        );
        assert_eq!(
            SolverError::Llm(LlmError::Timeout(30)).user_message(),
            "Error getting response: Request timeout after 30 seconds"
        );
        assert!(SolverError::FollowUpLimit(3).user_message().contains("limit of 3"));
    }
}
