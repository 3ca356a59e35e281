//! Stream relay
//!
//! Re-emits a backend token channel as an ordered byte stream, one item per
//! fragment, as soon as each fragment arrives. The stream ends exactly once:
//! after the completion marker, after the source is exhausted, after
//! cancellation, or immediately after the single error item it yields.

use futures::stream::{self, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;

use super::cancel::CancelSignal;
use crate::backend::StreamingToken;

/// Terminal relay failure
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The upstream provider reported an error mid-stream
    #[error("upstream stream failed: {0}")]
    Upstream(String),
}

struct RelayState {
    source: mpsc::Receiver<StreamingToken>,
    cancel: CancelSignal,
    fragments: usize,
    bytes: usize,
}

/// Relay `source` as bytes until it finishes, fails or `cancel` fires.
///
/// Dropping the returned stream drops the source receiver, which tells the
/// producing backend task to stop.
pub fn relay(
    source: mpsc::Receiver<StreamingToken>,
    cancel: CancelSignal,
) -> impl Stream<Item = Result<Vec<u8>, RelayError>> + Send + 'static {
    let state = RelayState {
        source,
        cancel,
        fragments: 0,
        bytes: 0,
    };

    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        let token = tokio::select! {
            biased;
            () = state.cancel.cancelled() => {
                tracing::debug!(fragments = state.fragments, bytes = state.bytes, "Relay cancelled");
                return None;
            }
            token = state.source.recv() => token,
        };

        match token {
            Some(StreamingToken::Token(text)) => {
                state.fragments += 1;
                state.bytes += text.len();
                Some((Ok(text.into_bytes()), Some(state)))
            }
            Some(StreamingToken::Complete { finish_reason }) => {
                tracing::debug!(
                    fragments = state.fragments,
                    bytes = state.bytes,
                    finish_reason = ?finish_reason,
                    "Relay complete"
                );
                None
            }
            None => {
                tracing::debug!(fragments = state.fragments, "Relay source exhausted");
                None
            }
            Some(StreamingToken::Error(error)) => {
                tracing::warn!(fragments = state.fragments, error = %error, "Relay upstream error");
                Some((Err(RelayError::Upstream(error)), None))
            }
        }
    })
    .fuse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::cancel_pair;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    fn tokens(items: Vec<StreamingToken>) -> mpsc::Receiver<StreamingToken> {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.try_send(item).unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn test_relays_in_order_until_complete() {
        let rx = tokens(vec![
            StreamingToken::Token("Hel".into()),
            StreamingToken::Token("lo".into()),
            StreamingToken::Complete { finish_reason: None },
            StreamingToken::Token("ignored".into()),
        ]);
        let out: Vec<_> = relay(rx, CancelSignal::never()).collect().await;
        assert_eq!(out, vec![Ok(b"Hel".to_vec()), Ok(b"lo".to_vec())]);
    }

    #[tokio::test]
    async fn test_exhausted_source_ends_cleanly() {
        let rx = tokens(vec![StreamingToken::Token("a".into())]);
        let out: Vec<_> = relay(rx, CancelSignal::never()).collect().await;
        assert_eq!(out, vec![Ok(b"a".to_vec())]);
    }

    #[tokio::test]
    async fn test_error_is_single_terminal_item() {
        let rx = tokens(vec![
            StreamingToken::Token("Sor".into()),
            StreamingToken::Token("ry".into()),
            StreamingToken::Error("reset by peer".into()),
            StreamingToken::Token("late".into()),
        ]);
        let mut stream = Box::pin(relay(rx, CancelSignal::never()));
        assert_eq!(stream.next().await, Some(Ok(b"Sor".to_vec())));
        assert_eq!(stream.next().await, Some(Ok(b"ry".to_vec())));
        assert_eq!(
            stream.next().await,
            Some(Err(RelayError::Upstream("reset by peer".into())))
        );
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_cancel_stops_output() {
        let (tx, rx) = mpsc::channel(8);
        let (handle, signal) = cancel_pair();
        let mut stream = Box::pin(relay(rx, signal));

        tx.send(StreamingToken::Token("one".into())).await.unwrap();
        assert_eq!(stream.next().await, Some(Ok(b"one".to_vec())));

        handle.cancel();
        tx.send(StreamingToken::Token("two".into())).await.unwrap();
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_dropping_relay_closes_source() {
        let (tx, rx) = mpsc::channel(8);
        let stream = relay(rx, CancelSignal::never());
        drop(stream);
        assert!(tx.is_closed());
    }
}
