//! Chat Messages
//!
//! The message model shared by every layer: the transcript store, the
//! provider request shaping, the reveal engine (which correlates on
//! [`MessageId`]) and the host surfaces.
//!
//! # Design Philosophy
//!
//! A message id is the only correlation key between the transcript and the
//! typewriter. Ids are minted once and never reused, so a reveal target can
//! always be compared against the message it animates.

use serde::{Deserialize, Serialize};

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }

    /// Borrow the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input
    User,
    /// The persona answering
    Assistant,
    /// System message
    System,
}

impl MessageRole {
    /// Wire name used by the provider and the HTTP API
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A message in the transcript
///
/// `content` of an assistant message is replaced wholesale while its
/// response streams in; `complete` flips once and never flips back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Whether the message is terminal (no further content updates accepted)
    pub complete: bool,
}

impl Message {
    /// Create a finished message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            complete: true,
        }
    }

    /// Create an empty assistant message whose content will stream in
    #[must_use]
    pub fn streaming() -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::Assistant,
            content: String::new(),
            complete: false,
        }
    }

    /// Convert to the `{role, content}` pair sent upstream
    #[must_use]
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A `{role, content}` pair as exchanged with the provider and the HTTP API
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_unique() {
        let id1 = MessageId::new();
        let id2 = MessageId::new();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("msg_"));
    }

    #[test]
    fn test_role_wire_names() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: MessageRole = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, MessageRole::User);
        assert!(serde_json::from_str::<MessageRole>("\"robot\"").is_err());
    }

    #[test]
    fn test_streaming_message_starts_open() {
        let msg = Message::streaming();
        assert_eq!(msg.role, MessageRole::Assistant);
        assert!(msg.content.is_empty());
        assert!(!msg.complete);
    }
}
