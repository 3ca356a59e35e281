//! Input Validation
//!
//! Rejects malformed chat requests before any network call is made.
//!
//! # Design Philosophy
//!
//! Validation runs at the two places untrusted input enters: the HTTP routes
//! and the chat controller. A rejection is final for that request; retrying
//! the same input cannot succeed, so callers surface it as non-retryable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ChatRequest;
use crate::messages::{ChatMessage, MessageRole};

/// Size limits for chat input
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLimits {
    /// Maximum size of a single message in bytes (default: 32KB)
    pub max_message_bytes: usize,
    /// Maximum messages in one request's history (default: 200)
    pub max_history_messages: usize,
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            max_message_bytes: 32 * 1024, // 32KB
            max_history_messages: 200,
        }
    }
}

/// Why a request was rejected
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// No messages at all
    #[error("Conversation is empty")]
    EmptyHistory,

    /// History longer than allowed
    #[error("Too many messages: {count} (max: {max})")]
    TooManyMessages {
        /// Messages received
        count: usize,
        /// Configured limit
        max: usize,
    },

    /// One message is oversized
    #[error("Message {index} too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Position in the history
        index: usize,
        /// Size in bytes
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// One message carries control characters
    #[error("Message {index} contains invalid control characters")]
    ControlCharacters {
        /// Position in the history
        index: usize,
    },

    /// The history does not end with a user turn
    #[error("Last message must come from the user")]
    LastMessageNotUser,

    /// The user turn is empty or whitespace
    #[error("Message is empty")]
    BlankMessage,
}

/// Validator for chat input
#[derive(Clone, Debug, Default)]
pub struct InputValidator {
    limits: ChatLimits,
}

impl InputValidator {
    /// Create a validator with the given limits
    #[must_use]
    pub fn new(limits: ChatLimits) -> Self {
        Self { limits }
    }

    /// Configured limits
    #[must_use]
    pub fn limits(&self) -> &ChatLimits {
        &self.limits
    }

    /// Validate a single user message before it enters the transcript
    pub fn validate_message(&self, content: &str) -> Result<(), ValidationError> {
        if content.trim().is_empty() {
            return Err(ValidationError::BlankMessage);
        }
        self.check_content(0, content)
    }

    /// Drop the oldest turns so `messages` fits the history limit.
    ///
    /// The kept window never opens with an assistant reply. Returns how many
    /// messages were dropped.
    pub fn trim_history(&self, messages: &mut Vec<ChatMessage>) -> usize {
        let max = self.limits.max_history_messages.max(1);
        if messages.len() <= max {
            return 0;
        }
        let mut start = messages.len() - max;
        while start + 1 < messages.len() && messages[start].role != MessageRole::User {
            start += 1;
        }
        messages.drain(..start);
        start
    }

    /// Validate a whole request
    pub fn validate_request(&self, request: &ChatRequest) -> Result<(), ValidationError> {
        let Some(last) = request.messages.last() else {
            return Err(ValidationError::EmptyHistory);
        };
        if request.messages.len() > self.limits.max_history_messages {
            return Err(ValidationError::TooManyMessages {
                count: request.messages.len(),
                max: self.limits.max_history_messages,
            });
        }
        for (index, message) in request.messages.iter().enumerate() {
            self.check_content(index, &message.content)?;
        }
        if last.role != MessageRole::User {
            return Err(ValidationError::LastMessageNotUser);
        }
        if last.content.trim().is_empty() {
            return Err(ValidationError::BlankMessage);
        }
        Ok(())
    }

    fn check_content(&self, index: usize, content: &str) -> Result<(), ValidationError> {
        if content.len() > self.limits.max_message_bytes {
            return Err(ValidationError::MessageTooLarge {
                index,
                size: content.len(),
                max: self.limits.max_message_bytes,
            });
        }
        // Check for control characters (except newline, tab)
        if content
            .chars()
            .any(|c| c.is_control() && c != '\n' && c != '\t' && c != '\r')
        {
            return Err(ValidationError::ControlCharacters { index });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::Persona;

    fn request(messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest::new(Persona::Teenager, messages)
    }

    #[test]
    fn test_valid_request() {
        let v = InputValidator::default();
        let r = request(vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant("what"),
            ChatMessage::user("line one\nline two\ttabbed"),
        ]);
        assert_eq!(v.validate_request(&r), Ok(()));
    }

    #[test]
    fn test_trim_history_keeps_recent_window_from_a_user_turn() {
        let v = InputValidator::new(ChatLimits {
            max_message_bytes: 1024,
            max_history_messages: 4,
        });
        let mut messages = vec![
            ChatMessage::user("u1"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("u2"),
            ChatMessage::assistant("a2"),
            ChatMessage::user("u3"),
            ChatMessage::assistant("a3"),
            ChatMessage::user("u4"),
        ];
        assert_eq!(v.trim_history(&mut messages), 4);
        let kept: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(kept, vec!["u3", "a3", "u4"]);
        assert_eq!(v.validate_request(&request(messages)), Ok(()));
    }

    #[test]
    fn test_trim_history_within_limit_is_noop() {
        let v = InputValidator::default();
        let mut messages = vec![ChatMessage::user("hi")];
        assert_eq!(v.trim_history(&mut messages), 0);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_empty_history() {
        let v = InputValidator::default();
        assert_eq!(
            v.validate_request(&request(vec![])),
            Err(ValidationError::EmptyHistory)
        );
    }

    #[test]
    fn test_oversized_message() {
        let v = InputValidator::new(ChatLimits {
            max_message_bytes: 4,
            max_history_messages: 10,
        });
        assert_eq!(
            v.validate_request(&request(vec![ChatMessage::user("hello")])),
            Err(ValidationError::MessageTooLarge {
                index: 0,
                size: 5,
                max: 4
            })
        );
    }

    #[test]
    fn test_control_characters() {
        let v = InputValidator::default();
        assert_eq!(
            v.validate_message("bell\u{7}"),
            Err(ValidationError::ControlCharacters { index: 0 })
        );
    }

    #[test]
    fn test_history_limit() {
        let v = InputValidator::new(ChatLimits {
            max_message_bytes: 100,
            max_history_messages: 2,
        });
        let r = request(vec![ChatMessage::user("a"); 3]);
        assert_eq!(
            v.validate_request(&r),
            Err(ValidationError::TooManyMessages { count: 3, max: 2 })
        );
    }

    #[test]
    fn test_must_end_with_user_turn() {
        let v = InputValidator::default();
        let r = request(vec![ChatMessage::user("q"), ChatMessage::assistant("a")]);
        assert_eq!(v.validate_request(&r), Err(ValidationError::LastMessageNotUser));

        let r = request(vec![ChatMessage::user("   ")]);
        assert_eq!(v.validate_request(&r), Err(ValidationError::BlankMessage));
    }
}
