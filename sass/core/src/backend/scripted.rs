//! Scripted backend
//!
//! A fake provider that replays canned fragments. Tests use it to drive the
//! controller and the server without a network, and `sass-chat --offline`
//! uses it as a stand-in provider.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::traits::{CompletionRequest, LlmBackend, StreamingToken};

/// What the backend does for one request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Script {
    /// Fragments to emit in order
    pub fragments: Vec<String>,
    /// Pause before each fragment
    pub fragment_delay: Duration,
    /// Emit this error after the fragments instead of completing
    pub error: Option<String>,
    /// Fail the call itself, before any fragment
    pub reject: Option<String>,
    /// After the fragments, keep the stream open until the receiver goes away
    pub hold_open: bool,
}

impl Script {
    /// Emit `fragments` then complete
    pub fn reply<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            fragment_delay: Duration::ZERO,
            error: None,
            reject: None,
            hold_open: false,
        }
    }

    /// Fail the call before streaming starts
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            reject: Some(message.into()),
            ..Self::reply(Vec::<String>::new())
        }
    }

    /// Pause before every fragment
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    /// End with a stream error instead of completing
    #[must_use]
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Never complete; wait for the consumer to hang up
    #[must_use]
    pub fn then_hang(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

/// Fake provider replaying [`Script`]s
///
/// Queued scripts are used one per request; once the queue is empty every
/// request gets the fallback script.
#[derive(Debug)]
pub struct ScriptedBackend {
    queue: Mutex<VecDeque<Script>>,
    fallback: Script,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    /// Backend answering every request with `script`
    #[must_use]
    pub fn new(script: Script) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: script,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Backend for offline demos: a word-by-word canned answer
    #[must_use]
    pub fn offline() -> Self {
        let text = "I'm running offline, so this is a rehearsed answer. \
                    Point me at a server, or set an API key, and I'll improvise.";
        let words: Vec<String> = text.split_inclusive(' ').map(str::to_string).collect();
        Self::new(Script::reply(words).with_delay(Duration::from_millis(60)))
    }

    /// Queue a script for the next unanswered request
    pub fn push_script(&self, script: Script) {
        self.queue.lock().push_back(script);
    }

    /// Requests received so far
    #[must_use]
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    fn next_script(&self) -> Script {
        self.queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn send_streaming(
        &self,
        request: &CompletionRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        self.requests.lock().push(request.clone());
        let script = self.next_script();

        if let Some(reason) = script.reject {
            anyhow::bail!("Scripted backend rejected request: {reason}");
        }

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            for fragment in script.fragments {
                if !script.fragment_delay.is_zero() {
                    tokio::time::sleep(script.fragment_delay).await;
                }
                if tx.send(StreamingToken::Token(fragment)).await.is_err() {
                    return;
                }
            }
            if let Some(message) = script.error {
                let _ = tx.send(StreamingToken::Error(message)).await;
            } else if script.hold_open {
                tx.closed().await;
            } else {
                let _ = tx
                    .send(StreamingToken::Complete {
                        finish_reason: Some("stop".to_string()),
                    })
                    .await;
            }
        });

        Ok(rx)
    }
}
