// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP client backend against a local, Ollama-compatible model server
//! (`POST /api/chat`, newline-delimited JSON streaming). This is the
//! spec's "local-model backend" (§4.5, §4.4).

#![deny(unsafe_code)]

use async_trait::async_trait;
use cp_backend::{Backend, ChunkResult, ChunkStream};
use cp_core::{BackendConfig, ConversationMessage, Role};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::warn;

/// Registration name, matching `cp_knowledge::LOCAL_MODEL_BACKEND_NAME`.
pub const BACKEND_NAME: &str = "ollama";

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(2);

pub struct LocalBackend {
    client: reqwest::Client,
    base_url: String,
    models: Vec<String>,
}

impl LocalBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            models: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn build_request(messages: &[ConversationMessage], config: &BackendConfig) -> ChatRequest {
    let mut chat_messages: Vec<ChatMessage> = Vec::with_capacity(messages.len() + 1);
    if let Some(system_prompt) = &config.system_prompt {
        chat_messages.push(ChatMessage {
            role: "system",
            content: system_prompt.clone(),
        });
    }
    chat_messages.extend(messages.iter().map(|m| ChatMessage {
        role: role_str(m.role),
        content: m.content.clone(),
    }));

    ChatRequest {
        model: config.model_identifier.clone().unwrap_or_default(),
        messages: chat_messages,
        stream: true,
        options: ChatOptions {
            temperature: config.temperature,
            num_predict: config.max_output_tokens,
        },
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn display_name(&self) -> &str {
        "Local Model (Ollama)"
    }

    fn supported_models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url.trim_end_matches('/'));
        self.client
            .get(url)
            .timeout(AVAILABILITY_TIMEOUT)
            .send()
            .await
            .map(|resp| resp.status().is_success())
            .unwrap_or(false)
    }

    fn query(&self, messages: Vec<ConversationMessage>, config: BackendConfig) -> ChunkStream {
        let client = self.client.clone();
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = build_request(&messages, &config);

        let (tx, rx) = tokio::sync::mpsc::channel::<ChunkResult>(32);
        tokio::spawn(async move {
            let response = match client.post(&url).json(&body).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    let _ = tx
                        .send(Err(cp_backend::BackendError::Request(err.to_string())))
                        .await;
                    return;
                }
            };

            if !response.status().is_success() {
                let _ = tx
                    .send(Err(cp_backend::BackendError::Request(format!(
                        "local model server returned {}",
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
                        let _ = tx
                            .send(Err(cp_backend::BackendError::Stream(err.to_string())))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = &line[..line.len().saturating_sub(1)];
                    if line.is_empty() {
                        continue;
                    }
                    if !forward_ndjson_line(line, &tx).await {
                        return;
                    }
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// Parse one NDJSON line from `/api/chat` and forward its text delta, if
/// any. Returns `false` if the stream is finished or the receiver hung up.
async fn forward_ndjson_line(line: &[u8], tx: &tokio::sync::mpsc::Sender<ChunkResult>) -> bool {
    let parsed: Value = match serde_json::from_slice(line) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "skipping unparseable ollama chat line");
            return true;
        }
    };

    if let Some(text) = parsed
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        if tx.send(Ok(text.to_string())).await.is_err() {
            return false;
        }
    }

    if parsed.get("done").and_then(Value::as_bool) == Some(true) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn is_available_reflects_tags_endpoint_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let backend = LocalBackend::new(server.uri());
        assert!(backend.is_available().await);
    }

    #[tokio::test]
    async fn query_streams_text_deltas_from_ndjson() {
        let server = MockServer::start().await;
        let body = "{\"message\":{\"content\":\"hello \"},\"done\":false}\n{\"message\":{\"content\":\"world\"},\"done\":false}\n{\"message\":{\"content\":\"\"},\"done\":true}\n";
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let backend = LocalBackend::new(server.uri());
        let mut stream = backend.query(vec![], BackendConfig::default());
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            collected.push_str(&chunk.unwrap());
        }
        assert_eq!(collected, "hello world");
    }

    #[tokio::test]
    async fn query_surfaces_non_2xx_as_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let backend = LocalBackend::new(server.uri());
        let mut stream = backend.query(vec![], BackendConfig::default());
        let first = stream.next().await.unwrap();
        assert!(first.is_err());
    }
}
