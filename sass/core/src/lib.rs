//! Sass Core - Persona Chat Proxy Engine
//!
//! This crate holds everything in sass-gpt that does not depend on a UI or an
//! HTTP server: persona tables, the provider backends, the streaming relay,
//! the transcript store, the typewriter reveal engine and the chat controller
//! that ties them together.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────────────┐
//!  │                        Hosts (sass-server)                       │
//!  │   ┌─────────────────────────┐      ┌──────────────────────────┐  │
//!  │   │  HTTP proxy (axum)      │      │  sass-chat (terminal)    │  │
//!  │   └───────────┬─────────────┘      └────────────┬─────────────┘  │
//!  └───────────────┼─────────────────────────────────┼────────────────┘
//!                  │ relay()                         │ ChatEvent / RevealView
//!  ┌───────────────┼─────────────────────────────────┼────────────────┐
//!  │               │          SASS CORE              │                │
//!  │   ┌───────────┴──────┐              ┌───────────┴────────────┐   │
//!  │   │  PersonaBackend  │◀─────────────│    ChatController      │   │
//!  │   │  (prompt, params)│  ChatRequest │  send / interrupt /    │   │
//!  │   └───────────┬──────┘              │  retry / stop          │   │
//!  │               │                     └──┬──────────────┬──────┘   │
//!  │   ┌───────────┴──────┐                 │              │          │
//!  │   │   LlmBackend     │   tokens ┌──────┴───────┐ ┌────┴───────┐  │
//!  │   │ OpenAI / Scripted│─────────▶│ContentBatcher│▶│ Transcript │  │
//!  │   └──────────────────┘          └──────┬───────┘ └────────────┘  │
//!  │                                        │ grown content           │
//!  │                                 ┌──────┴───────┐                 │
//!  │                                 │  Typewriter  │ (RevealEngine)  │
//!  │                                 └──────────────┘                 │
//!  └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ChatController`]: one chat view, with interruption handling
//! - [`Typewriter`] / [`RevealEngine`]: character-by-character reveal at a
//!   persona-dependent cadence
//! - [`Transcript`]: the shared message log
//! - [`relay`]: provider tokens as an ordered, cancellable byte stream
//! - [`Persona`] / [`PersonaTable`]: the four characters and their tables
//! - [`SassConfig`]: layered configuration (CLI > env > file > defaults)
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use sass_core::{
//!     ChatController, ControllerConfig, PersonaBackend, PersonaTable, Script,
//!     ScriptedBackend, Typewriter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = Arc::new(ScriptedBackend::new(Script::reply(["Hi", "."])));
//!     let backend = PersonaBackend::new(provider, PersonaTable::default(), "gpt-4o");
//!     let typewriter = Typewriter::new(PersonaTable::default());
//!
//!     let (mut chat, mut events) =
//!         ChatController::new(Arc::new(backend), typewriter, ControllerConfig::default());
//!     let mut view = chat.typewriter().subscribe();
//!
//!     chat.send("hello").await?;
//!     while view.changed().await.is_ok() {
//!         println!("{}", view.borrow().text);
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod controller;
pub mod messages;
pub mod persona;
pub mod reveal;
pub mod streaming;
pub mod transcript;
pub mod validation;

// Re-export commonly used types
pub use backend::{
    ChatBackend, ChatRequest, CompletionRequest, LlmBackend, OpenAiBackend, PersonaBackend,
    RelayClient, Script, ScriptedBackend, StreamingToken,
};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, SassConfig,
};
pub use controller::{ChatController, ChatError, ChatEvent, ControllerConfig};
pub use messages::{ChatMessage, Message, MessageId, MessageRole};
pub use persona::{GenerationParams, Persona, PersonaProfile, PersonaTable, UnknownPersona};
pub use reveal::{DelayProfile, RevealEngine, RevealPhase, RevealView, Typewriter};
pub use streaming::{cancel_pair, relay, CancelHandle, CancelSignal, RelayError};
pub use transcript::{SharedTranscript, Transcript, TranscriptError};
pub use validation::{ChatLimits, InputValidator, ValidationError};
