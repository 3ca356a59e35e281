//! Backend Integration
//!
//! Provider and persona backends behind common trait interfaces.
//!
//! # Available Backends
//!
//! - **OpenAI**: any OpenAI-compatible chat completions endpoint (provider)
//! - **Scripted**: canned fragments for tests and offline runs (provider)
//! - **Persona**: shapes chat requests for a provider (persona)
//! - **Relay**: forwards chat requests to a running `sass-server` (persona)
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use sass_core::backend::{ChatBackend, ChatRequest, OpenAiBackend, PersonaBackend};
//!
//! let provider = Arc::new(OpenAiBackend::from_config(&config.provider)?);
//! let chat = PersonaBackend::new(provider, config.personas.clone(), &config.provider.model);
//! let rx = chat.send_chat(&ChatRequest::new(Persona::Exec, history)).await?;
//! ```

mod openai;
mod persona_backend;
mod relay_client;
mod scripted;
mod traits;

pub use openai::{OpenAiBackend, DEFAULT_BASE_URL};
pub use persona_backend::PersonaBackend;
pub use relay_client::{RelayClient, Utf8Accumulator};
pub use scripted::{Script, ScriptedBackend};
pub use traits::{
    ChatBackend, ChatRequest, CompletionRequest, LlmBackend, StreamingToken,
};
