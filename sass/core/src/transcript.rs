//! Transcript Store
//!
//! The ordered message log shared by the network side (the content batcher)
//! and the render side (the typewriter and the host).
//!
//! # Design Philosophy
//!
//! Every mutation replaces a message's content as a unit, so a reader holding
//! the lock sees either the old or the new content, never a torn value. The
//! store does not rate-limit writers; the batcher does that. Once a message is
//! marked complete it is frozen: later content updates are rejected, which is
//! what keeps a cancelled stream from resurrecting an interrupted reply.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::messages::{ChatMessage, Message, MessageId, MessageRole};

/// Errors from transcript mutations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    /// No message with this id exists in the current epoch
    #[error("message {0} not found")]
    NotFound(MessageId),

    /// The message was marked complete and no longer accepts updates
    #[error("message {0} is complete")]
    Completed(MessageId),
}

/// Ordered, append-only message log
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    epoch: u64,
}

/// Transcript shared between the batcher, the controller and the host
pub type SharedTranscript = Arc<RwLock<Transcript>>;

impl Transcript {
    /// Create an empty transcript
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty transcript wrapped for sharing
    #[must_use]
    pub fn shared() -> SharedTranscript {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Append a message and return its id
    pub fn append(&mut self, message: Message) -> MessageId {
        let id = message.id.clone();
        tracing::debug!(
            message_id = %id,
            role = message.role.as_str(),
            position = self.messages.len(),
            "Transcript append"
        );
        self.messages.push(message);
        id
    }

    /// Replace a message's content wholesale. Last write wins.
    pub fn update_content(
        &mut self,
        id: &MessageId,
        content: impl Into<String>,
    ) -> Result<(), TranscriptError> {
        let msg = self.find_mut(id)?;
        if msg.complete {
            return Err(TranscriptError::Completed(id.clone()));
        }
        msg.content = content.into();
        Ok(())
    }

    /// Mark a message terminal. Idempotent.
    pub fn mark_complete(&mut self, id: &MessageId) -> Result<(), TranscriptError> {
        let msg = self.find_mut(id)?;
        msg.complete = true;
        Ok(())
    }

    /// Remove a single message (used for assistant placeholders that never
    /// received a fragment)
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(index))
    }

    /// Drop every message after `id`, keeping `id` itself
    pub fn truncate_after(&mut self, id: &MessageId) -> Result<usize, TranscriptError> {
        let index = self
            .messages
            .iter()
            .position(|m| &m.id == id)
            .ok_or_else(|| TranscriptError::NotFound(id.clone()))?;
        let dropped = self.messages.len() - index - 1;
        self.messages.truncate(index + 1);
        Ok(dropped)
    }

    /// Clear the log and start a new epoch
    pub fn reset(&mut self) {
        tracing::debug!(
            epoch = self.epoch,
            dropped = self.messages.len(),
            "Transcript reset"
        );
        self.messages.clear();
        self.epoch += 1;
    }

    /// Reset counter, bumped on every [`reset`](Self::reset)
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Look up a message
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Current content of a message
    #[must_use]
    pub fn content(&self, id: &MessageId) -> Option<String> {
        self.get(id).map(|m| m.content.clone())
    }

    /// All messages in order
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Most recent user message
    #[must_use]
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
    }

    /// Conversation as sent upstream: non-empty user and assistant turns
    #[must_use]
    pub fn history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .filter(|m| !m.content.is_empty())
            .map(Message::to_chat_message)
            .collect()
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn find_mut(&mut self, id: &MessageId) -> Result<&mut Message, TranscriptError> {
        self.messages
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(|| TranscriptError::NotFound(id.clone()))
    }
}
