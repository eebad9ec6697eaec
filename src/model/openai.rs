//! OpenAI-compatible streaming backend.
//!
//! Posts to `{base_url}/v1/chat/completions` with `"stream": true` and turns
//! the SSE `data:` lines into [`ModelDelta`]s. Works with any provider that
//! speaks the same wire format (OpenAI, OpenRouter, Groq, local servers).

use std::future::Future;
use std::pin::Pin;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ChatMessage, DeltaStream, ModelBackend, ModelDelta, Role, DELTA_CHANNEL_CAPACITY};
use crate::config::ModelConfig;
use crate::{AppError, Result};

/// Streaming client for `chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    config: ModelConfig,
    api_key: String,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl OpenAiBackend {
    /// Build a backend; `api_key` is resolved by the caller.
    #[must_use]
    pub fn new(config: ModelConfig, api_key: String) -> Self {
        Self {
            config,
            api_key,
            http: reqwest::Client::new(),
        }
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        let wire: Vec<WireMessage<'_>> = messages
            .iter()
            .map(|m| WireMessage {
                // Tool output is replayed as user content: the model sees it
                // as context, not as a native tool-call response.
                role: match m.role {
                    Role::System => "system",
                    Role::User | Role::Tool => "user",
                    Role::Assistant => "assistant",
                },
                content: &m.content,
            })
            .collect();

        serde_json::json!({
            "model": self.config.model_id,
            "messages": wire,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": true,
        })
    }
}

impl ModelBackend for OpenAiBackend {
    fn stream<'a>(
        &'a self,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!(
                "{}/v1/chat/completions",
                self.config.base_url.trim_end_matches('/')
            );
            let body = self.request_body(messages);

            let resp = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| AppError::Model(format!("request failed: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                let error_body = resp
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_owned());
                return Err(AppError::Model(format!("provider error {status}: {error_body}")));
            }

            let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);
            let mut bytes = resp.bytes_stream();

            tokio::spawn(async move {
                // Bytes, not text: a UTF-8 sequence may straddle two chunks.
                let mut buffer: Vec<u8> = Vec::new();

                while let Some(chunk) = bytes.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            let _ = tx
                                .send(ModelDelta::Error(format!("stream read error: {e}")))
                                .await;
                            return;
                        }
                    };
                    buffer.extend_from_slice(&chunk);

                    while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                        let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                        let line = String::from_utf8_lossy(&raw);

                        for delta in parse_sse_line(line.trim()) {
                            let done = matches!(delta, ModelDelta::Finish(_));
                            if tx.send(delta).await.is_err() {
                                debug!("openai backend: receiver dropped, abandoning stream");
                                return;
                            }
                            if done {
                                return;
                            }
                        }
                    }
                }

                warn!("openai backend: stream ended without a finish reason");
                let _ = tx.send(ModelDelta::Finish("eof".into())).await;
            });

            Ok(rx)
        })
    }
}

/// Translate one SSE line into zero or more deltas.
fn parse_sse_line(line: &str) -> Vec<ModelDelta> {
    if line.is_empty() || line.starts_with(':') {
        return Vec::new();
    }
    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
        return Vec::new();
    };
    if data == "[DONE]" {
        return vec![ModelDelta::Finish("stop".into())];
    }

    let event: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "openai backend: skipping unparsable event");
            return Vec::new();
        }
    };

    if let Some(message) = event["error"]["message"].as_str() {
        return vec![ModelDelta::Error(message.to_owned())];
    }

    let choice = &event["choices"][0];
    let mut out = Vec::new();
    if let Some(content) = choice["delta"]["content"].as_str() {
        if !content.is_empty() {
            out.push(ModelDelta::Text(content.to_owned()));
        }
    }
    if let Some(reason) = choice["finish_reason"].as_str() {
        out.push(ModelDelta::Finish(reason.to_owned()));
    }
    out
}
