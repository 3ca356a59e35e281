//! Relay client
//!
//! [`ChatBackend`] that forwards chat requests to a running `sass-server`
//! and turns its plain-text streaming body back into [`StreamingToken`]s.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::traits::{ChatBackend, ChatRequest, StreamingToken};

/// Incremental UTF-8 decoder
///
/// Holds back an incomplete trailing sequence until the rest of it arrives.
/// Invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    /// Feed bytes, returning every complete character decoded so far
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // incomplete sequence at the end, wait for more
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush at end of stream; a dangling partial sequence becomes U+FFFD
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

/// Client for a `sass-server` instance
#[derive(Clone, Debug)]
pub struct RelayClient {
    server_url: String,
    http_client: reqwest::Client,
}

impl RelayClient {
    /// Create a client for a server root such as `http://127.0.0.1:3000`
    pub fn new(server_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn chat_url(&self, request: &ChatRequest) -> String {
        format!("{}/api/chat/{}", self.server_url, request.persona.slug())
    }
}

#[async_trait]
impl ChatBackend for RelayClient {
    fn name(&self) -> &str {
        "Relay"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(format!("{}/healthz", self.server_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send_chat(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let response = self
            .http_client
            .post(self.chat_url(request))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            match serde_json::from_str::<ErrorBody>(&text) {
                Ok(ErrorBody {
                    error,
                    details: Some(details),
                }) => anyhow::bail!("server returned {status}: {error} ({details})"),
                Ok(ErrorBody { error, details: None }) => {
                    anyhow::bail!("server returned {status}: {error}")
                }
                Err(_) => anyhow::bail!("server returned {status}: {text}"),
            }
        }

        let (tx, rx) = mpsc::channel(100);
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = Utf8Accumulator::default();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        let text = decoder.push(&bytes);
                        if !text.is_empty() && tx.send(StreamingToken::Token(text)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Relay stream failed");
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                }
            }
            let tail = decoder.finish();
            if !tail.is_empty() && tx.send(StreamingToken::Token(tail)).await.is_err() {
                return;
            }
            let _ = tx
                .send(StreamingToken::Complete {
                    finish_reason: None,
                })
                .await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::Persona;

    #[test]
    fn test_accumulator_passes_ascii() {
        let mut acc = Utf8Accumulator::default();
        assert_eq!(acc.push(b"hello"), "hello");
        assert_eq!(acc.finish(), "");
    }

    #[test]
    fn test_accumulator_joins_split_sequence() {
        let bytes = "a☕b".as_bytes();
        let mut acc = Utf8Accumulator::default();
        assert_eq!(acc.push(&bytes[..2]), "a");
        assert_eq!(acc.push(&bytes[2..3]), "");
        assert_eq!(acc.push(&bytes[3..]), "☕b");
    }

    #[test]
    fn test_accumulator_replaces_invalid_bytes() {
        let mut acc = Utf8Accumulator::default();
        assert_eq!(acc.push(&[b'x', 0xff, b'y']), "x\u{fffd}y");
        assert_eq!(acc.push(&[0xe2, 0x98]), "");
        assert_eq!(acc.finish(), "\u{fffd}");
    }

    #[test]
    fn test_chat_url() {
        let client = RelayClient::new("http://127.0.0.1:3000/", Duration::from_secs(1)).unwrap();
        let request = ChatRequest::new(Persona::Grandma, Vec::new());
        assert_eq!(client.chat_url(&request), "http://127.0.0.1:3000/api/chat/grandma");
    }
}
