//! Chat Controller
//!
//! Drives one chat view: appends messages to the transcript, starts provider
//! exchanges, feeds the typewriter and handles interruptions.
//!
//! # Interruption order
//!
//! Interrupting an in-flight exchange always runs these steps in order:
//!
//! 1. cancel the exchange, so the batcher stops consuming fragments
//! 2. mark the old assistant message complete (later writes are rejected)
//! 3. detach the typewriter from the old message
//! 4. wait for the batcher task to finish
//! 5. append the new user message and a fresh assistant target
//!
//! The host talks to the controller through method calls and hears back
//! through [`ChatEvent`]s.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{ChatBackend, ChatRequest, StreamingToken};
use crate::messages::{ChatMessage, Message, MessageId, MessageRole};
use crate::persona::Persona;
use crate::reveal::Typewriter;
use crate::streaming::{
    cancel_pair, BatchOutcome, CancelHandle, CancelSignal, ContentBatcher, DEFAULT_FLUSH_INTERVAL,
};
use crate::transcript::{SharedTranscript, Transcript, TranscriptError};
use crate::validation::{ChatLimits, InputValidator, ValidationError};

/// Controller configuration
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Persona for the first exchange
    pub persona: Persona,
    /// Minimum time between transcript writes
    pub flush_interval: Duration,
    /// Input limits
    pub limits: ChatLimits,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            persona: Persona::default(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            limits: ChatLimits::default(),
            event_capacity: 100,
        }
    }
}

/// Events sent to the host
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    /// A message was added to the transcript
    MessageAppended {
        /// New message
        id: MessageId,
        /// Its author
        role: MessageRole,
    },
    /// The provider accepted the request and is streaming
    ResponseStarted {
        /// Assistant message receiving the reply
        id: MessageId,
    },
    /// The reply finished normally
    ResponseCompleted {
        /// Assistant message
        id: MessageId,
    },
    /// The exchange failed; committed content stays in the transcript
    ResponseFailed {
        /// Assistant message, if it survived
        id: Option<MessageId>,
        /// What went wrong
        error: String,
        /// Whether [`ChatController::retry`] can help
        retryable: bool,
    },
    /// An in-flight reply was cut off
    Interrupted {
        /// The abandoned assistant message
        id: MessageId,
    },
    /// The transcript was cleared
    TranscriptReset {
        /// Persona now active
        persona: Persona,
    },
}

/// Errors returned before an exchange starts
#[derive(Debug, Error)]
pub enum ChatError {
    /// Input rejected; retrying the same input cannot succeed
    #[error("Invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// Transcript bookkeeping failed
    #[error("Transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    /// `retry` with no user message to resend
    #[error("Nothing to retry")]
    NothingToRetry,
}

struct Exchange {
    assistant_id: MessageId,
    cancel: CancelHandle,
    task: JoinHandle<()>,
}

/// Interruption-aware chat controller
pub struct ChatController {
    backend: Arc<dyn ChatBackend>,
    transcript: SharedTranscript,
    typewriter: Typewriter,
    persona: Persona,
    validator: InputValidator,
    flush_interval: Duration,
    tx: mpsc::Sender<ChatEvent>,
    active: Option<Exchange>,
}

impl std::fmt::Debug for ChatController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatController")
            .field("backend", &self.backend.name())
            .field("persona", &self.persona)
            .field(
                "active",
                &self.active.as_ref().map(|e| e.assistant_id.clone()),
            )
            .finish_non_exhaustive()
    }
}

impl ChatController {
    /// Create a controller and the receiver for its events
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        typewriter: Typewriter,
        config: ControllerConfig,
    ) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let controller = Self {
            backend,
            transcript: Transcript::shared(),
            typewriter,
            persona: config.persona,
            validator: InputValidator::new(config.limits),
            flush_interval: config.flush_interval,
            tx,
            active: None,
        };
        (controller, rx)
    }

    /// Shared transcript
    #[must_use]
    pub fn transcript(&self) -> SharedTranscript {
        Arc::clone(&self.transcript)
    }

    /// Typewriter revealing assistant replies
    #[must_use]
    pub fn typewriter(&self) -> &Typewriter {
        &self.typewriter
    }

    /// Active persona
    #[must_use]
    pub fn persona(&self) -> Persona {
        self.persona
    }

    /// Whether a reply is streaming or still being revealed
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.exchange_in_flight() || self.typewriter.is_revealing()
    }

    fn exchange_in_flight(&self) -> bool {
        self.active.as_ref().is_some_and(|e| !e.task.is_finished())
    }

    /// Send a user message. While busy this interrupts the current reply.
    pub async fn send(&mut self, content: &str) -> Result<(), ChatError> {
        if self.is_busy() {
            return self.interrupt(content).await;
        }
        self.validator.validate_message(content)?;
        self.finish_previous().await;
        self.start_exchange(content, false).await
    }

    /// Cut off the current reply and send `content` in its place
    pub async fn interrupt(&mut self, content: &str) -> Result<(), ChatError> {
        self.validator.validate_message(content)?;
        let interrupted = self.cancel_active().await;
        if let Some(id) = &interrupted {
            tracing::info!(message_id = %id, persona = %self.persona, "Reply interrupted");
            self.emit(ChatEvent::Interrupted { id: id.clone() }).await;
        }
        self.start_exchange(content, interrupted.is_some()).await
    }

    /// Resend the last user message, dropping everything after it
    pub async fn retry(&mut self) -> Result<(), ChatError> {
        self.cancel_active().await;
        let (user_id, content) = {
            let transcript = self.transcript.read();
            let last = transcript
                .last_user_message()
                .ok_or(ChatError::NothingToRetry)?;
            (last.id.clone(), last.content.clone())
        };
        {
            let mut transcript = self.transcript.write();
            let dropped = transcript.truncate_after(&user_id)?;
            transcript.remove(&user_id);
            tracing::debug!(dropped, "Retrying last user message");
        }
        self.start_exchange(&content, false).await
    }

    /// Stop the current reply without sending anything new
    pub async fn stop(&mut self) {
        if let Some(id) = self.cancel_active().await {
            self.emit(ChatEvent::Interrupted { id }).await;
        }
    }

    /// Switch persona and start a fresh conversation
    pub async fn switch_persona(&mut self, persona: Persona) {
        self.cancel_active().await;
        self.typewriter.detach();
        self.transcript.write().reset();
        self.persona = persona;
        tracing::info!(persona = %persona, "Persona switched");
        self.emit(ChatEvent::TranscriptReset { persona }).await;
    }

    /// Reap a finished exchange
    async fn finish_previous(&mut self) {
        if let Some(exchange) = self.active.take() {
            if let Err(e) = exchange.task.await {
                tracing::warn!(error = %e, "Exchange task failed");
            }
        }
    }

    /// Cancel whatever is in flight. Returns the assistant message that was
    /// cut off, if any.
    async fn cancel_active(&mut self) -> Option<MessageId> {
        let Some(exchange) = self.active.take() else {
            return self.cut_reveal();
        };
        let in_flight = !exchange.task.is_finished();

        exchange.cancel.cancel();
        {
            let mut transcript = self.transcript.write();
            if let Err(e) = transcript.mark_complete(&exchange.assistant_id) {
                tracing::debug!(error = %e, "Interrupted message already gone");
            }
        }
        let revealing = self.typewriter.is_revealing();
        self.typewriter.detach();
        if let Err(e) = exchange.task.await {
            tracing::warn!(error = %e, "Exchange task failed");
        }

        {
            let mut transcript = self.transcript.write();
            if transcript
                .get(&exchange.assistant_id)
                .is_some_and(|m| m.content.is_empty())
            {
                transcript.remove(&exchange.assistant_id);
            }
        }

        (in_flight || revealing).then_some(exchange.assistant_id)
    }

    /// Stop a reveal that outlived its exchange
    fn cut_reveal(&self) -> Option<MessageId> {
        if !self.typewriter.is_revealing() {
            return None;
        }
        let id = self.typewriter.message_id();
        self.typewriter.detach();
        id
    }

    async fn start_exchange(&mut self, content: &str, interruption: bool) -> Result<(), ChatError> {
        let mut history = self.transcript.read().history();
        history.push(ChatMessage::user(content));
        let dropped = self.validator.trim_history(&mut history);
        if dropped > 0 {
            tracing::debug!(dropped, "Oldest turns left out of the request");
        }
        let request = ChatRequest::new(self.persona, history).interrupting(interruption);
        self.validator.validate_request(&request)?;

        let user_id = self
            .transcript
            .write()
            .append(Message::new(MessageRole::User, content));
        self.emit(ChatEvent::MessageAppended {
            id: user_id,
            role: MessageRole::User,
        })
        .await;

        let assistant_id = self.transcript.write().append(Message::streaming());
        self.emit(ChatEvent::MessageAppended {
            id: assistant_id.clone(),
            role: MessageRole::Assistant,
        })
        .await;
        self.typewriter
            .attach(assistant_id.clone(), String::new(), self.persona);

        let tokens = match self.backend.send_chat(&request).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    persona = %self.persona,
                    error = %e,
                    "Chat request failed before streaming"
                );
                self.transcript.write().remove(&assistant_id);
                self.typewriter.detach();
                self.emit(ChatEvent::ResponseFailed {
                    id: None,
                    error: e.to_string(),
                    retryable: true,
                })
                .await;
                return Ok(());
            }
        };

        tracing::debug!(
            message_id = %assistant_id,
            persona = %self.persona,
            interruption,
            "Response started"
        );
        self.emit(ChatEvent::ResponseStarted {
            id: assistant_id.clone(),
        })
        .await;

        let (cancel, signal) = cancel_pair();
        let typewriter = self.typewriter.clone();
        let batcher = ContentBatcher::new(Arc::clone(&self.transcript), assistant_id.clone())
            .with_flush_interval(self.flush_interval)
            .with_listener(Box::new(move |id: &MessageId, content: &str| {
                typewriter.update_if_current(id, content);
            }));

        let task = tokio::spawn(run_exchange(
            batcher,
            tokens,
            signal,
            Arc::clone(&self.transcript),
            self.typewriter.clone(),
            assistant_id.clone(),
            self.tx.clone(),
        ));

        self.active = Some(Exchange {
            assistant_id,
            cancel,
            task,
        });
        Ok(())
    }

    async fn emit(&self, event: ChatEvent) {
        if let Err(e) = self.tx.send(event).await {
            tracing::debug!("Event receiver gone: {}", e);
        }
    }
}

/// Body of the spawned exchange task
async fn run_exchange(
    batcher: ContentBatcher,
    tokens: mpsc::Receiver<StreamingToken>,
    signal: CancelSignal,
    transcript: SharedTranscript,
    typewriter: Typewriter,
    id: MessageId,
    tx: mpsc::Sender<ChatEvent>,
) {
    let event = match batcher.run(tokens, signal.clone()).await {
        BatchOutcome::Completed { .. } => {
            settle(&transcript, &id);
            ChatEvent::ResponseCompleted { id }
        }
        BatchOutcome::Failed { content, error } => {
            settle(&transcript, &id);
            let survived = if content.is_empty() {
                transcript.write().remove(&id);
                if typewriter.message_id().as_ref() == Some(&id) {
                    typewriter.detach();
                }
                None
            } else {
                Some(id)
            };
            ChatEvent::ResponseFailed {
                id: survived,
                error,
                retryable: true,
            }
        }
        // the controller reports interruptions itself
        BatchOutcome::Cancelled { .. } => return,
    };

    tokio::select! {
        biased;
        () = signal.cancelled() => {}
        result = tx.send(event) => {
            if let Err(e) = result {
                tracing::debug!("Event receiver gone: {}", e);
            }
        }
    }
}

fn settle(transcript: &SharedTranscript, id: &MessageId) {
    if let Err(e) = transcript.write().mark_complete(id) {
        // transcript was reset underneath us
        tracing::debug!(error = %e, "Finished message no longer in transcript");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PersonaBackend, Script, ScriptedBackend};
    use crate::persona::PersonaTable;
    use pretty_assertions::assert_eq;

    fn controller(script: Script) -> (ChatController, mpsc::Receiver<ChatEvent>, Arc<ScriptedBackend>) {
        let provider = Arc::new(ScriptedBackend::new(script));
        let backend = PersonaBackend::new(Arc::clone(&provider), PersonaTable::default(), "gpt-4o");
        let config = ControllerConfig {
            persona: Persona::Exec,
            ..ControllerConfig::default()
        };
        let (ctl, rx) = ChatController::new(
            Arc::new(backend),
            Typewriter::with_seed(PersonaTable::default(), 1),
            config,
        );
        (ctl, rx, provider)
    }

    fn drain(rx: &mut mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_message_rejected_without_request() {
        let (mut ctl, mut rx, provider) = controller(Script::reply(["hi"]));
        let err = ctl.send("   ").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(ValidationError::BlankMessage)));
        assert!(provider.requests().is_empty());
        assert!(ctl.transcript().read().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_call_removes_placeholder() {
        let (mut ctl, mut rx, _) = controller(Script::rejected("401"));
        ctl.send("hello").await.unwrap();

        let transcript = ctl.transcript();
        assert_eq!(transcript.read().len(), 1);
        assert!(!ctl.is_busy());
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(ChatEvent::ResponseFailed { id: None, retryable: true, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_without_history() {
        let (mut ctl, _rx, _) = controller(Script::reply(["x"]));
        assert!(matches!(ctl.retry().await, Err(ChatError::NothingToRetry)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_persona_resets() {
        let (mut ctl, mut rx, _) = controller(Script::reply(["ok"]));
        ctl.send("hi").await.unwrap();
        ctl.switch_persona(Persona::Grandma).await;

        assert!(ctl.transcript().read().is_empty());
        assert_eq!(ctl.persona(), Persona::Grandma);
        assert!(!ctl.typewriter().is_revealing());
        assert_eq!(
            drain(&mut rx).last(),
            Some(&ChatEvent::TranscriptReset {
                persona: Persona::Grandma
            })
        );
    }
}
