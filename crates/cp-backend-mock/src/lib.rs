// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic scripted [`Backend`] used by orchestrator and daemon
//! tests — no network, no model, just a queue of canned replies.

#![deny(unsafe_code)]

use async_trait::async_trait;
use cp_backend::{Backend, ChunkResult, ChunkStream};
use cp_core::{BackendConfig, ConversationMessage};
use std::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;

/// A backend whose `query` replays a pre-scripted queue of responses, one
/// per call, each response being a sequence of chunks streamed in order.
/// Once the queue is exhausted, further calls repeat the last response (or
/// an empty stream if none were ever scripted).
pub struct MockBackend {
    name: String,
    display_name: String,
    models: Vec<String>,
    available: bool,
    replies: Mutex<Vec<Vec<String>>>,
}

impl MockBackend {
    /// A mock registered as `name`/`display_name` that will never produce a
    /// scripted reply until [`Self::push_reply`] is called.
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            models: vec!["mock-model".to_string()],
            available: true,
            replies: Mutex::new(Vec::new()),
        }
    }

    /// Report `available` from `is_available`.
    #[must_use]
    pub fn with_availability(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Override the advertised model list.
    #[must_use]
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    /// Queue one full response, as a sequence of chunks, for the next
    /// `query` call.
    pub fn push_reply(&self, chunks: Vec<String>) {
        self.replies.lock().expect("mock lock poisoned").push(chunks);
    }

    /// Convenience for a single-chunk reply.
    pub fn push_reply_text(&self, text: impl Into<String>) {
        self.push_reply(vec![text.into()]);
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn supported_models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    fn query(&self, _messages: Vec<ConversationMessage>, _config: BackendConfig) -> ChunkStream {
        let mut replies = self.replies.lock().expect("mock lock poisoned");
        let chunks = if replies.len() > 1 {
            replies.remove(0)
        } else {
            replies.first().cloned().unwrap_or_default()
        };
        drop(replies);

        let (tx, rx) = tokio::sync::mpsc::channel::<ChunkResult>(chunks.len().max(1));
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
        });
        Box::pin(ReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn streams_scripted_chunks_in_order() {
        let backend = MockBackend::new("mock", "Mock");
        backend.push_reply(vec!["hello ".to_string(), "world".to_string()]);

        let mut stream = backend.query(vec![], BackendConfig::default());
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            collected.push_str(&chunk.unwrap());
        }
        assert_eq!(collected, "hello world");
    }

    #[tokio::test]
    async fn successive_queries_consume_the_queue_then_repeat_the_last() {
        let backend = MockBackend::new("mock", "Mock");
        backend.push_reply_text("first");
        backend.push_reply_text("second");

        let mut first = backend.query(vec![], BackendConfig::default());
        assert_eq!(first.next().await.unwrap().unwrap(), "first");

        let mut second = backend.query(vec![], BackendConfig::default());
        assert_eq!(second.next().await.unwrap().unwrap(), "second");

        let mut third = backend.query(vec![], BackendConfig::default());
        assert_eq!(third.next().await.unwrap().unwrap(), "second");
    }

    #[tokio::test]
    async fn availability_is_configurable() {
        let backend = MockBackend::new("mock", "Mock").with_availability(false);
        assert!(!backend.is_available().await);
    }
}
