// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP client backend against a large-context hosted model API
//! (Anthropic-Messages-API-shaped streaming SSE endpoint). This is the
//! spec's "large-context hosted backend" (§4.5, `budget_for`'s hosted
//! branch, `cp_knowledge::HOSTED_BACKEND_NAME`).

#![deny(unsafe_code)]

use async_trait::async_trait;
use cp_backend::{Backend, BackendError, ChunkResult, ChunkStream};
use cp_core::{BackendConfig, ConversationMessage, Role};
use serde::Serialize;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::warn;

/// Registration name, matching `cp_knowledge::HOSTED_BACKEND_NAME`.
pub const BACKEND_NAME: &str = "claude_code";

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-opus-4";

pub struct HostedBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    models: Vec<String>,
}

impl HostedBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            models: vec![DEFAULT_MODEL.to_string()],
        }
    }

    #[must_use]
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }
}

#[derive(Serialize)]
struct HostedMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct HostedRequest {
    model: String,
    messages: Vec<HostedMessage>,
    system: Option<String>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        // The hosted API has no distinct "system" message role; the system
        // prompt travels in the request's top-level `system` field instead.
        Role::Assistant | Role::System => "assistant",
    }
}

fn build_request(messages: &[ConversationMessage], config: &BackendConfig) -> HostedRequest {
    HostedRequest {
        model: config
            .model_identifier
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        messages: messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| HostedMessage {
                role: role_str(m.role),
                content: m.content.clone(),
            })
            .collect(),
        system: config.system_prompt.clone(),
        max_tokens: config.max_output_tokens,
        temperature: config.temperature,
        stream: true,
    }
}

#[async_trait]
impl Backend for HostedBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn display_name(&self) -> &str {
        "Hosted Model"
    }

    fn supported_models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn query(&self, messages: Vec<ConversationMessage>, config: BackendConfig) -> ChunkStream {
        let client = self.client.clone();
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let api_key = self.api_key.clone();
        let body = build_request(&messages, &config);

        let (tx, rx) = tokio::sync::mpsc::channel::<ChunkResult>(32);
        tokio::spawn(async move {
            if api_key.is_empty() {
                let _ = tx.send(Err(BackendError::Unavailable)).await;
                return;
            }

            let response = match client
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    let _ = tx.send(Err(BackendError::Request(err.to_string()))).await;
                    return;
                }
            };

            if !response.status().is_success() {
                let _ = tx
                    .send(Err(BackendError::Request(format!(
                        "hosted model API returned {}",
                        response.status()
                    ))))
                    .await;
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(next) = byte_stream.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        let _ = tx.send(Err(BackendError::Stream(err.to_string()))).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                while let Some(boundary) = find_event_boundary(&buffer) {
                    let event: Vec<u8> = buffer.drain(..boundary.0).collect();
                    buffer.drain(..boundary.1 - boundary.0);
                    if !forward_sse_event(&event, &tx).await {
                        return;
                    }
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// SSE events are separated by a blank line (`\n\n` or `\r\n\r\n`). Returns
/// `(event_end, consumed_end)` — the event's byte range and how much of the
/// buffer (including the separator) to drop.
fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let needle = b"\n\n";
    buffer
        .windows(2)
        .position(|w| w == needle)
        .map(|pos| (pos, pos + 2))
}

/// Parse one SSE event block, forwarding a `content_block_delta` text delta
/// if present. Returns `false` once `message_stop` is observed or the
/// receiver has hung up.
async fn forward_sse_event(event: &[u8], tx: &tokio::sync::mpsc::Sender<ChunkResult>) -> bool {
    let text = String::from_utf8_lossy(event);
    let mut event_type: Option<&str> = None;
    let mut data: Option<&str> = None;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_type = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data = Some(rest.trim());
        }
    }

    let Some(data) = data else {
        return true;
    };

    if event_type == Some("message_stop") {
        return false;
    }

    let parsed: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "skipping unparseable hosted SSE data line");
            return true;
        }
    };

    if let Some(text) = parsed
        .get("delta")
        .and_then(|d| d.get("text"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        if tx.send(Ok(text.to_string())).await.is_err() {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn is_available_requires_an_api_key() {
        let backend = HostedBackend::new("http://example.invalid", "");
        assert!(!backend.is_available().await);
        let backend = HostedBackend::new("http://example.invalid", "secret");
        assert!(backend.is_available().await);
    }

    #[tokio::test]
    async fn query_streams_text_deltas_from_sse() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: content_block_delta\n",
            "data: {\"delta\":{\"text\":\"hello \"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"delta\":{\"text\":\"world\"}}\n\n",
            "event: message_stop\n",
            "data: {}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let backend = HostedBackend::new(server.uri(), "secret");
        let mut stream = backend.query(vec![], BackendConfig::default());
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            collected.push_str(&chunk.unwrap());
        }
        assert_eq!(collected, "hello world");
    }

    #[tokio::test]
    async fn query_without_api_key_yields_unavailable_error() {
        let backend = HostedBackend::new("http://example.invalid", "");
        let mut stream = backend.query(vec![], BackendConfig::default());
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(BackendError::Unavailable)));
    }

    #[tokio::test]
    async fn query_surfaces_non_2xx_as_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let backend = HostedBackend::new(server.uri(), "secret");
        let mut stream = backend.query(vec![], BackendConfig::default());
        let first = stream.next().await.unwrap();
        assert!(first.is_err());
    }
}
