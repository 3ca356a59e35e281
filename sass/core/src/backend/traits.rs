//! Backend Traits
//!
//! Two seams sit between the chat controller and the network:
//!
//! - [`LlmBackend`] is the provider boundary. It takes a fully shaped
//!   [`CompletionRequest`] (system prompt, history, sampling parameters)
//!   and yields ordered [`StreamingToken`]s.
//! - [`ChatBackend`] is the persona boundary. It takes a [`ChatRequest`]
//!   (persona, history, interruption flag) and is what the controller and
//!   the HTTP routes talk to. It may shape the request locally
//!   ([`PersonaBackend`](super::PersonaBackend)) or forward it to a running
//!   server ([`RelayClient`](super::RelayClient)).
//!
//! Both return a channel receiver. The channel carries at most one terminal
//! token (`Complete` or `Error`) and closes after it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::messages::ChatMessage;
use crate::persona::{GenerationParams, Persona};

/// Token stream events from backends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A fragment of the response
    Token(String),
    /// Response completed successfully
    Complete {
        /// Provider finish reason, when reported
        finish_reason: Option<String>,
    },
    /// Error occurred during streaming
    Error(String),
}

impl StreamingToken {
    /// Whether this token ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Token(_))
    }
}

/// A provider-level completion request
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    /// Model identifier
    pub model: String,
    /// System prompt, sent ahead of the history
    pub system: Option<String>,
    /// Conversation history, oldest first
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling mass
    pub top_p: f32,
    /// Maximum output tokens (0 = provider default)
    pub max_tokens: u32,
    /// Whether to stream the response
    pub stream: bool,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            model: String::new(),
            system: None,
            messages: Vec::new(),
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 0,
            stream: true,
        }
    }
}

impl CompletionRequest {
    /// Create a request for a model and history
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Apply a persona's sampling parameters
    #[must_use]
    pub fn with_generation(mut self, params: &GenerationParams) -> Self {
        self.temperature = params.temperature;
        self.top_p = params.top_p;
        self.max_tokens = params.max_tokens;
        self
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Provider backend
///
/// Implement this trait to add support for different completion providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Send a request and get a streaming response
    ///
    /// Errors returned here happen before any fragment was produced (bad
    /// status, unreachable host). Errors after streaming started arrive as
    /// [`StreamingToken::Error`].
    async fn send_streaming(
        &self,
        request: &CompletionRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;
}

/// A persona-level chat request, as accepted by the HTTP API
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Who answers
    #[serde(skip)]
    pub persona: Persona,
    /// Conversation history, oldest first, ending with the user turn
    pub messages: Vec<ChatMessage>,
    /// The user cut off the previous reply to send this
    #[serde(rename = "isInterruption", default)]
    pub interruption: bool,
}

impl ChatRequest {
    /// Create a request
    #[must_use]
    pub fn new(persona: Persona, messages: Vec<ChatMessage>) -> Self {
        Self {
            persona,
            messages,
            interruption: false,
        }
    }

    /// Flag the request as an interruption
    #[must_use]
    pub fn interrupting(mut self, interruption: bool) -> Self {
        self.interruption = interruption;
        self
    }
}

/// Persona-level backend used by the controller and the server routes
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Check if whatever answers the chat is reachable
    async fn health_check(&self) -> bool;

    /// Start a persona reply
    async fn send_chat(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;
}

#[async_trait]
impl<T: ChatBackend + ?Sized> ChatBackend for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn health_check(&self) -> bool {
        (**self).health_check().await
    }

    async fn send_chat(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        (**self).send_chat(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request_builder() {
        let params = GenerationParams {
            temperature: 0.9,
            top_p: 0.92,
            max_tokens: 4096,
        };
        let request = CompletionRequest::new("gpt-4o", vec![ChatMessage::user("hi")])
            .with_system("be brief")
            .with_generation(&params)
            .with_stream(false);

        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.system.as_deref(), Some("be brief"));
        assert!((request.temperature - 0.9).abs() < f32::EPSILON);
        assert_eq!(request.max_tokens, 4096);
        assert!(!request.stream);
    }

    #[test]
    fn test_chat_request_wire_format() {
        let body = r#"{"messages":[{"role":"user","content":"yo"}],"isInterruption":true}"#;
        let request: ChatRequest = serde_json::from_str(body).unwrap();
        assert!(request.interruption);
        assert_eq!(request.messages, vec![ChatMessage::user("yo")]);

        let plain: ChatRequest =
            serde_json::from_str(r#"{"messages":[]}"#).unwrap();
        assert!(!plain.interruption);
    }

    #[test]
    fn test_terminal_tokens() {
        assert!(!StreamingToken::Token("a".into()).is_terminal());
        assert!(StreamingToken::Complete { finish_reason: None }.is_terminal());
        assert!(StreamingToken::Error("boom".into()).is_terminal());
    }
}
