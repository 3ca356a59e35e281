//! Content batcher
//!
//! Accumulates a reply's fragments and writes them into the transcript as
//! wholesale content replacements, at most once per flush interval.
//!
//! # Flush rules
//!
//! - The first fragment is written immediately.
//! - Later fragments are written when the interval since the last write has
//!   elapsed, either on arrival or by a trailing timer, so content never sits
//!   unwritten while the stream stalls.
//! - Completion and stream errors flush unconditionally, so the last
//!   fragment is never dropped.
//! - After cancellation nothing is written. A write that loses the race with
//!   an interruption is rejected by the transcript, because the interrupted
//!   message is already complete.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::cancel::CancelSignal;
use crate::backend::StreamingToken;
use crate::messages::MessageId;
use crate::transcript::{SharedTranscript, TranscriptError};

/// Default minimum time between transcript writes
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Called with the committed content after every successful write
pub type ContentListener = Box<dyn FnMut(&MessageId, &str) + Send>;

/// How a batch run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The provider finished the reply
    Completed {
        /// Final committed content
        content: String,
    },
    /// The provider failed mid-reply; committed content is kept
    Failed {
        /// Content committed before the failure
        content: String,
        /// Provider error
        error: String,
    },
    /// The exchange was cancelled
    Cancelled {
        /// Content committed before cancellation
        content: String,
    },
}

impl BatchOutcome {
    /// Content committed to the transcript
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Completed { content }
            | Self::Failed { content, .. }
            | Self::Cancelled { content } => content,
        }
    }
}

enum Flush {
    Written,
    Refused,
}

/// Batches one reply into the transcript
pub struct ContentBatcher {
    transcript: SharedTranscript,
    message_id: MessageId,
    flush_interval: Duration,
    listener: Option<ContentListener>,
    buffer: String,
    committed: String,
    writes: usize,
    last_flush: Option<Instant>,
}

impl ContentBatcher {
    /// Create a batcher for `message_id`
    #[must_use]
    pub fn new(transcript: SharedTranscript, message_id: MessageId) -> Self {
        Self {
            transcript,
            message_id,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            listener: None,
            buffer: String::new(),
            committed: String::new(),
            writes: 0,
            last_flush: None,
        }
    }

    /// Override the flush interval
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Observe every committed write
    #[must_use]
    pub fn with_listener(mut self, listener: ContentListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Consume `tokens` until the reply ends or `cancel` fires
    pub async fn run(
        mut self,
        mut tokens: mpsc::Receiver<StreamingToken>,
        cancel: CancelSignal,
    ) -> BatchOutcome {
        loop {
            let dirty = self.buffer.len() != self.committed.len();
            let deadline = self.next_deadline();

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return self.cancelled("cancel signal");
                }
                () = tokio::time::sleep_until(deadline), if dirty => {
                    if let Flush::Refused = self.flush(&cancel) {
                        return self.cancelled("transcript refused write");
                    }
                }
                token = tokens.recv() => match token {
                    Some(StreamingToken::Token(text)) => {
                        self.buffer.push_str(&text);
                        if self.interval_elapsed() {
                            if let Flush::Refused = self.flush(&cancel) {
                                return self.cancelled("transcript refused write");
                            }
                        }
                    }
                    Some(StreamingToken::Complete { .. }) | None => {
                        if let Flush::Refused = self.flush(&cancel) {
                            return self.cancelled("transcript refused final write");
                        }
                        tracing::debug!(
                            message_id = %self.message_id,
                            writes = self.writes,
                            bytes = self.committed.len(),
                            "Batch completed"
                        );
                        return BatchOutcome::Completed { content: self.committed };
                    }
                    Some(StreamingToken::Error(error)) => {
                        if let Flush::Refused = self.flush(&cancel) {
                            return self.cancelled("transcript refused final write");
                        }
                        tracing::warn!(
                            message_id = %self.message_id,
                            bytes = self.committed.len(),
                            error = %error,
                            "Batch failed, keeping committed content"
                        );
                        return BatchOutcome::Failed { content: self.committed, error };
                    }
                },
            }
        }
    }

    fn interval_elapsed(&self) -> bool {
        self.last_flush
            .map_or(true, |at| at.elapsed() >= self.flush_interval)
    }

    fn next_deadline(&self) -> Instant {
        self.last_flush
            .map_or_else(Instant::now, |at| at + self.flush_interval)
    }

    /// Write the buffer if it holds anything new
    fn flush(&mut self, cancel: &CancelSignal) -> Flush {
        if self.buffer.len() == self.committed.len() {
            return Flush::Written;
        }
        {
            let mut transcript = self.transcript.write();
            if cancel.is_cancelled() {
                return Flush::Refused;
            }
            match transcript.update_content(&self.message_id, self.buffer.clone()) {
                Ok(()) => {}
                Err(TranscriptError::Completed(_) | TranscriptError::NotFound(_)) => {
                    return Flush::Refused;
                }
            }
        }
        self.committed.clone_from(&self.buffer);
        self.writes += 1;
        self.last_flush = Some(Instant::now());
        if let Some(listener) = self.listener.as_mut() {
            listener(&self.message_id, &self.committed);
        }
        Flush::Written
    }

    fn cancelled(self, reason: &'static str) -> BatchOutcome {
        tracing::debug!(
            message_id = %self.message_id,
            writes = self.writes,
            bytes = self.committed.len(),
            reason,
            "Batch cancelled"
        );
        BatchOutcome::Cancelled {
            content: self.committed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;
    use crate::streaming::cancel_pair;
    use crate::transcript::Transcript;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn setup() -> (SharedTranscript, MessageId) {
        let transcript = Transcript::shared();
        let id = transcript.write().append(Message::streaming());
        (transcript, id)
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, ContentListener) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&writes);
        (
            writes,
            Box::new(move |_: &MessageId, content: &str| sink.lock().push(content.to_string())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced_and_final_flush_lands() {
        let (transcript, id) = setup();
        let (writes, listener) = recorder();
        let (tx, rx) = mpsc::channel(16);
        for t in ["a", "b", "c", "d"] {
            tx.send(StreamingToken::Token(t.into())).await.unwrap();
        }
        tx.send(StreamingToken::Complete { finish_reason: None })
            .await
            .unwrap();

        let outcome = ContentBatcher::new(Arc::clone(&transcript), id.clone())
            .with_listener(listener)
            .run(rx, CancelSignal::never())
            .await;

        assert_eq!(outcome, BatchOutcome::Completed { content: "abcd".into() });
        assert_eq!(*writes.lock(), vec!["a".to_string(), "abcd".to_string()]);
        assert_eq!(transcript.read().content(&id).as_deref(), Some("abcd"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_flush_while_stream_stalls() {
        let (transcript, id) = setup();
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(
            ContentBatcher::new(Arc::clone(&transcript), id.clone())
                .run(rx, CancelSignal::never()),
        );

        tx.send(StreamingToken::Token("Sor".into())).await.unwrap();
        tx.send(StreamingToken::Token("ry".into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transcript.read().content(&id).as_deref(), Some("Sor"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(transcript.read().content(&id).as_deref(), Some("Sorry"));

        drop(tx);
        assert_eq!(task.await.unwrap().content(), "Sorry");
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_keeps_committed_content() {
        let (transcript, id) = setup();
        let (tx, rx) = mpsc::channel(16);
        tx.send(StreamingToken::Token("Sor".into())).await.unwrap();
        tx.send(StreamingToken::Token("ry".into())).await.unwrap();
        tx.send(StreamingToken::Error("connection reset".into()))
            .await
            .unwrap();

        let outcome = ContentBatcher::new(Arc::clone(&transcript), id.clone())
            .run(rx, CancelSignal::never())
            .await;

        assert_eq!(
            outcome,
            BatchOutcome::Failed {
                content: "Sorry".into(),
                error: "connection reset".into()
            }
        );
        assert_eq!(transcript.read().content(&id).as_deref(), Some("Sorry"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_write_after_cancel() {
        let (transcript, id) = setup();
        let (tx, rx) = mpsc::channel(16);
        let (handle, signal) = cancel_pair();
        let task = tokio::spawn(ContentBatcher::new(Arc::clone(&transcript), id.clone()).run(rx, signal));

        tx.send(StreamingToken::Token("keep".into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.cancel();
        let _ = tx.send(StreamingToken::Token(" drop".into())).await;

        assert_eq!(
            task.await.unwrap(),
            BatchOutcome::Cancelled { content: "keep".into() }
        );
        assert_eq!(transcript.read().content(&id).as_deref(), Some("keep"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_message_refuses_late_write() {
        let (transcript, id) = setup();
        let (tx, rx) = mpsc::channel(16);
        transcript.write().mark_complete(&id).unwrap();
        tx.send(StreamingToken::Token("late".into())).await.unwrap();

        let outcome = ContentBatcher::new(Arc::clone(&transcript), id.clone())
            .run(rx, CancelSignal::never())
            .await;

        assert_eq!(outcome, BatchOutcome::Cancelled { content: String::new() });
        assert_eq!(transcript.read().content(&id).as_deref(), Some(""));
    }
}
