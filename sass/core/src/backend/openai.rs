//! OpenAI Backend Implementation
//!
//! Chat completions against any OpenAI-compatible endpoint, streamed over
//! server-sent events.
//!
//! # Wire format
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}
//! data: {"choices":[{"delta":{"content":"lo"},"finish_reason":null}]}
//! data: {"choices":[{"delta":{},"finish_reason":"stop"}]}
//! data: [DONE]
//! ```
//!
//! A `data: {"error": {...}}` payload in place of a chunk ends the stream with
//! [`StreamingToken::Error`].
//!
//! Lines are reassembled from raw bytes before decoding, so a multi-byte
//! character split across network chunks survives intact.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::traits::{CompletionRequest, LlmBackend, StreamingToken};
use crate::config::ProviderConfig;

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible backend client
#[derive(Clone, Debug)]
pub struct OpenAiBackend {
    api_key: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl OpenAiBackend {
    /// Create a backend for an API root such as `https://api.openai.com/v1`
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Create from the `[provider]` config section
    pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Self> {
        Self::new(
            config.api_key.clone().unwrap_or_default(),
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    fn build_body(request: &CompletionRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(
            request
                .messages
                .iter()
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content })),
        );

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "top_p": request.top_p,
            "stream": request.stream,
        });
        if request.max_tokens > 0 {
            body["max_tokens"] = json!(request.max_tokens);
        }
        body
    }
}

/// One decoded `data:` payload
#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta {
        content: Option<String>,
        finish_reason: Option<String>,
    },
    Done,
    /// The provider reported an error in place of a chunk
    Failed(String),
    Ignored,
}

fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.strip_prefix("data:") else {
        // comments, event names, keep-alives
        return SseEvent::Ignored;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    let Ok(v) = serde_json::from_str::<Value>(data) else {
        tracing::warn!(payload = %data, "Unparsable SSE payload skipped");
        return SseEvent::Ignored;
    };
    if let Some(error) = v.get("error").filter(|e| !e.is_null()) {
        let message = error["message"]
            .as_str()
            .or_else(|| error.as_str())
            .unwrap_or("provider reported an error")
            .to_string();
        return SseEvent::Failed(message);
    }
    let Some(choice) = v["choices"].get(0) else {
        return SseEvent::Ignored;
    };
    SseEvent::Delta {
        content: choice["delta"]["content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
    }
}

/// Byte buffer that yields complete lines
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.bytes.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=pos).collect();
        Some(
            String::from_utf8_lossy(&line)
                .trim_end_matches(['\n', '\r'])
                .to_string(),
        )
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.models_url())
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send_streaming(
        &self,
        request: &CompletionRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let (tx, rx) = mpsc::channel(100);

        tracing::debug!(
            model = %request.model,
            history = request.messages.len(),
            temperature = request.temperature,
            "Sending chat completion"
        );

        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&Self::build_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI returned {status}: {body}");
        }

        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut lines = LineBuffer::default();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(error = %e, "Provider stream failed");
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                };
                lines.push(&bytes);

                while let Some(line) = lines.next_line() {
                    match parse_sse_line(&line) {
                        SseEvent::Delta {
                            content,
                            finish_reason,
                        } => {
                            if let Some(text) = content {
                                if tx.send(StreamingToken::Token(text)).await.is_err() {
                                    // Receiver dropped, stop streaming
                                    return;
                                }
                            }
                            if finish_reason.is_some() {
                                let _ = tx.send(StreamingToken::Complete { finish_reason }).await;
                                return;
                            }
                        }
                        SseEvent::Done => {
                            let _ = tx
                                .send(StreamingToken::Complete {
                                    finish_reason: None,
                                })
                                .await;
                            return;
                        }
                        SseEvent::Failed(message) => {
                            tracing::warn!(error = %message, "Provider sent an error mid-stream");
                            let _ = tx.send(StreamingToken::Error(message)).await;
                            return;
                        }
                        SseEvent::Ignored => {}
                    }
                }
            }

            // Body ended without an end marker
            let _ = tx
                .send(StreamingToken::Complete {
                    finish_reason: None,
                })
                .await;
        });

        Ok(rx)
    }
}
