// SPDX-License-Identifier: MIT OR Apache-2.0
//! Uniform interface over heterogeneous LLM backends (§4.5), plus a
//! process-wide [`BackendRegistry`] populated at startup — the "dynamic
//! subclass registry → explicit registration" redesign of §9.

#![deny(unsafe_code)]

use async_trait::async_trait;
use cp_core::{BackendConfig, ConversationMessage};
use futures_core::Stream;
use indexmap::IndexMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// A single streamed chunk, or the error that ended the stream early.
pub type ChunkResult = Result<String, BackendError>;

/// A finite, non-restartable sequence of text chunks (§4.5, §9).
pub type ChunkStream = Pin<Box<dyn Stream<Item = ChunkResult> + Send>>;

/// Failure modes a [`Backend`] can surface. Propagation policy (§7): these
/// never abort a chat stream — the orchestrator writes them into the
/// already-open response body instead.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend is not available")]
    Unavailable,
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("backend stream failed: {0}")]
    Stream(String),
}

/// Contract uniform across backends (§4.5).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable registration key (e.g. `"ollama"`, `"claude_code"`).
    fn name(&self) -> &str;
    /// Human-readable label for UI surfaces.
    fn display_name(&self) -> &str;
    /// Models this backend can be asked to use, in display order.
    fn supported_models(&self) -> Vec<String>;
    /// Cheap liveness check; may perform lightweight probing I/O but must
    /// not be expensive enough to gate every chat request meaningfully.
    async fn is_available(&self) -> bool;
    /// Stream a reply to `messages` under `config`. Each chunk is forwarded
    /// to the client byte-for-byte as it arrives.
    fn query(&self, messages: Vec<ConversationMessage>, config: BackendConfig) -> ChunkStream;
}

/// Availability snapshot returned by [`BackendRegistry::available`] and
/// rendered at `GET /comfy-pilot/agents`.
#[derive(Debug, Clone)]
pub struct BackendAvailability {
    pub available: bool,
    pub display_name: String,
    pub models: Vec<String>,
}

/// Process-wide map of backend name → instance, populated once at startup
/// and read for the remainder of the process's life (§5: "Knowledge
/// documents are loaded once at startup and treated as immutable" — the
/// registry follows the same shape).
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<IndexMap<String, Arc<dyn Backend>>>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(IndexMap::new()),
        }
    }

    /// Register a backend under its own [`Backend::name`], replacing any
    /// prior registration with the same name.
    pub fn register(&self, backend: Arc<dyn Backend>) {
        let mut backends = self.backends.write().expect("backend registry lock poisoned");
        backends.insert(backend.name().to_string(), backend);
    }

    /// Look up a backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends
            .read()
            .expect("backend registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Every registered backend, in registration order.
    pub fn all(&self) -> Vec<Arc<dyn Backend>> {
        self.backends
            .read()
            .expect("backend registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Probe every registered backend and report its availability,
    /// display name, and supported models.
    pub async fn available(&self) -> IndexMap<String, BackendAvailability> {
        let backends = self.all();
        let mut out = IndexMap::new();
        for backend in backends {
            let availability = BackendAvailability {
                available: backend.is_available().await,
                display_name: backend.display_name().to_string(),
                models: backend.supported_models(),
            };
            out.insert(backend.name().to_string(), availability);
        }
        out
    }
}
