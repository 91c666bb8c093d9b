//! Explicit conversation state.
//!
//! A `Conversation` is a value owned by the caller. Interactions produce a new
//! value instead of mutating shared state, so a failed model call leaves the
//! caller's conversation exactly as it was.

use crate::chat::{ChatMessage, Role};
use crate::prompts::TUTOR_SYSTEM_PROMPT;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// Fresh conversation seeded with the tutor system prompt
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::system(TUTOR_SYSTEM_PROMPT)],
        }
    }

    /// Rebuild a stored thread. Stored threads never hold the system prompt.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        let mut conversation = Self::new();
        conversation
            .messages
            .extend(messages.into_iter().filter(|m| m.role != Role::System));
        conversation
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Messages after the system prompt
    pub fn history(&self) -> &[ChatMessage] {
        &self.messages[1..]
    }

    pub fn user_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    pub fn last_answer(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Conversation with `user` pending, as sent to the model
    pub fn with_message(&self, user: ChatMessage) -> Self {
        let mut messages = self.messages.clone();
        messages.push(user);
        Self { messages }
    }

    /// Conversation extended by one completed exchange
    pub fn with_exchange(&self, user: ChatMessage, assistant: ChatMessage) -> Self {
        let mut next = self.with_message(user);
        next.messages.push(assistant);
        next
    }

    /// "Clear chat": back to just the system prompt
    pub fn cleared(&self) -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_has_only_system_prompt() {
        let conversation = Conversation::new();
        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.messages()[0].role, Role::System);
        assert!(conversation.history().is_empty());
        assert_eq!(conversation.user_message_count(), 0);
    }

    #[test]
    fn test_exchange_leaves_original_untouched() {
        let original = Conversation::new();
        let next = original.with_exchange(ChatMessage::user("q"), ChatMessage::assistant("a"));

        assert_eq!(original.messages().len(), 1);
        assert_eq!(next.messages().len(), 3);
        assert_eq!(next.user_message_count(), 1);
        assert_eq!(next.last_answer().map(|m| m.content.text()), Some("a"));
    }

    #[test]
    fn test_from_messages_drops_stored_system_prompts() {
        let conversation = Conversation::from_messages(vec![
            ChatMessage::system("stale"),
            ChatMessage::user("q"),
            ChatMessage::assistant("a"),
        ]);
        assert_eq!(conversation.messages().len(), 3);
        assert_eq!(conversation.messages()[0].content.text(), TUTOR_SYSTEM_PROMPT);
    }

    #[test]
    fn test_cleared() {
        let busy = Conversation::new().with_exchange(ChatMessage::user("q"), ChatMessage::assistant("a"));
        let cleared = busy.cleared();
        assert!(cleared.history().is_empty());
        assert_eq!(cleared.messages()[0].role, Role::System);
        assert_eq!(busy.messages().len(), 3);
    }
}
