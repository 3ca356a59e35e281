//! Persona request shaping
//!
//! Turns a [`ChatRequest`] into a provider [`CompletionRequest`]: persona
//! system prompt, persona sampling parameters, and the interruption markers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::traits::{ChatBackend, ChatRequest, CompletionRequest, LlmBackend, StreamingToken};
use crate::persona::{mark_interrupted, system_prompt, PersonaTable};

/// [`ChatBackend`] that shapes requests locally and calls a provider
#[derive(Debug)]
pub struct PersonaBackend<B: LlmBackend> {
    backend: Arc<B>,
    personas: PersonaTable,
    model: String,
}

impl<B: LlmBackend> PersonaBackend<B> {
    /// Create a persona backend over a provider
    pub fn new(backend: Arc<B>, personas: PersonaTable, model: impl Into<String>) -> Self {
        Self {
            backend,
            personas,
            model: model.into(),
        }
    }

    /// The wrapped provider
    #[must_use]
    pub fn provider(&self) -> &Arc<B> {
        &self.backend
    }

    /// Build the provider request for a chat request
    #[must_use]
    pub fn shape(&self, request: &ChatRequest) -> CompletionRequest {
        let mut messages = request.messages.clone();
        if request.interruption && mark_interrupted(&mut messages) {
            tracing::debug!(persona = %request.persona, "Marked last user message as interrupting");
        }
        CompletionRequest::new(self.model.clone(), messages)
            .with_system(system_prompt(request.persona, request.interruption))
            .with_generation(&self.personas.get(request.persona).generation)
    }
}

#[async_trait]
impl<B: LlmBackend> ChatBackend for PersonaBackend<B> {
    fn name(&self) -> &str {
        self.backend.name()
    }

    async fn health_check(&self) -> bool {
        self.backend.health_check().await
    }

    async fn send_chat(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let completion = self.shape(request);
        tracing::info!(
            persona = %request.persona,
            backend = self.backend.name(),
            interruption = request.interruption,
            history = completion.messages.len(),
            "Starting persona reply"
        );
        self.backend.send_streaming(&completion).await
    }
}
