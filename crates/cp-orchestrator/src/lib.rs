// SPDX-License-Identifier: MIT OR Apache-2.0
//! System prompt composition, transcript assembly, and the
//! generate → extract → validate → correct loop (§4.6).

#![deny(unsafe_code)]

pub mod host_snapshot;
pub mod workflow_context;

pub use host_snapshot::{
    build_host_snapshot, CustomNodeInventory, GpuDevice, GpuInfo, HostInfoProvider,
    ModelInventory, NodeCapabilities,
};
pub use workflow_context::build_workflow_context;

use cp_backend::BackendRegistry;
use cp_core::{BackendConfig, ConversationMessage, Workflow};
use cp_knowledge::{ContextMode, KnowledgeStore};
use cp_registry::OperatorRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_stream::StreamExt;

/// Default retry budget for the correction loop (§6: tunable, default 3).
pub const DEFAULT_MAX_CORRECTION_RETRIES: u32 = 3;

const BASE_SYSTEM_PROMPT: &str = "You are an expert assistant for building and repairing \
image and video generation pipelines for a node-based execution host. When a user asks for \
a pipeline, respond with a complete workflow as a fenced ```json code block containing an \
object that maps node ids to nodes. Each node has a class_type, an inputs map, and may carry \
a meta.title. Always use operator classes and parameter names you are confident exist on the \
host; when unsure, prefer the documented defaults over invented values.";

/// Pre-stream failures (§7): returned before any bytes are written.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("agent '{0}' not found")]
    AgentNotFound(String),
    #[error("agent '{0}' is not available")]
    AgentUnavailable(String),
}

/// The body of `POST /comfy-pilot/chat` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub agent: String,
    pub message: String,
    #[serde(default)]
    pub history: Vec<ConversationMessage>,
    #[serde(default)]
    pub current_workflow: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub context_mode: Option<ContextMode>,
    #[serde(default)]
    pub knowledge_categories: Option<Vec<String>>,
}

/// The streamed chat response body: plain text chunks, already including
/// any correction-loop notices and `\n\nError: ...` suffixes (§7) — nothing
/// further needs to be caught by the HTTP layer.
pub type ResponseStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Wires together the subsystems a chat request touches and drives the
/// correction loop. One instance is constructed at startup and shared
/// behind an `Arc` across requests (§9: "global controller singleton" →
/// one constructed instance with no further hidden state).
pub struct Orchestrator {
    backends: Arc<BackendRegistry>,
    operator_registry: Arc<OperatorRegistry>,
    knowledge: Arc<KnowledgeStore>,
    host_info: Arc<dyn HostInfoProvider>,
    max_correction_retries: u32,
}

impl Orchestrator {
    pub fn new(
        backends: Arc<BackendRegistry>,
        operator_registry: Arc<OperatorRegistry>,
        knowledge: Arc<KnowledgeStore>,
        host_info: Arc<dyn HostInfoProvider>,
    ) -> Self {
        Self {
            backends,
            operator_registry,
            knowledge,
            host_info,
            max_correction_retries: DEFAULT_MAX_CORRECTION_RETRIES,
        }
    }

    #[must_use]
    pub fn with_max_correction_retries(mut self, max_correction_retries: u32) -> Self {
        self.max_correction_retries = max_correction_retries;
        self
    }

    /// Drive one chat request (§4.6 steps 1-7). Resolves and checks the
    /// backend synchronously so `agent_not_found`/`agent_unavailable` can be
    /// reported before any streaming begins; everything after that runs in
    /// a background task feeding the returned stream.
    pub async fn run_chat(&self, request: ChatRequest) -> Result<ResponseStream, OrchestratorError> {
        let backend = self
            .backends
            .get(&request.agent)
            .ok_or_else(|| OrchestratorError::AgentNotFound(request.agent.clone()))?;

        if !backend.is_available().await {
            return Err(OrchestratorError::AgentUnavailable(request.agent.clone()));
        }

        let budget = cp_knowledge::budget_for(backend.name(), request.model.as_deref(), request.context_mode);
        let allowed_categories: Option<HashSet<String>> =
            request.knowledge_categories.map(|cats| cats.into_iter().collect());
        let knowledge_docs = self
            .knowledge
            .select_relevant(&request.message, budget, allowed_categories.as_ref());
        let knowledge_text = cp_knowledge::build_knowledge_text(&knowledge_docs);

        let host_snapshot = build_host_snapshot(self.host_info.as_ref()).await;

        let workflow_context = request
            .current_workflow
            .as_ref()
            .and_then(|value| serde_json::from_value::<Workflow>(value.clone()).ok())
            .map(|workflow| build_workflow_context(&workflow, request.context_mode));

        let system_prompt = compose_system_prompt(
            BASE_SYSTEM_PROMPT,
            &knowledge_text,
            &host_snapshot,
            workflow_context.as_deref().unwrap_or(""),
        );

        let mut config = BackendConfig::with_system_prompt(system_prompt);
        config.model_identifier = request.model.clone();

        let mut transcript = request.history.clone();
        transcript.push(ConversationMessage::user(request.message.clone()));

        let (tx, rx) = tokio::sync::mpsc::channel::<String>(32);
        let operator_registry = Arc::clone(&self.operator_registry);
        let max_retries = self.max_correction_retries;

        tokio::spawn(async move {
            drive_correction_loop(backend, transcript, config, operator_registry, max_retries, tx).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Compose base template ∥ knowledge text ∥ host snapshot ∥ workflow
/// context, blank-line separated, omitting empty sections (§4.6 step 3).
pub fn compose_system_prompt(base: &str, knowledge: &str, host_snapshot: &str, workflow_context: &str) -> String {
    [base, knowledge, host_snapshot, workflow_context]
        .into_iter()
        .filter(|section| !section.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

async fn drive_correction_loop(
    backend: Arc<dyn cp_backend::Backend>,
    mut transcript: Vec<ConversationMessage>,
    config: BackendConfig,
    operator_registry: Arc<OperatorRegistry>,
    max_retries: u32,
    tx: tokio::sync::mpsc::Sender<String>,
) {
    let Some(full_response) = stream_to_client(backend.as_ref(), transcript.clone(), config.clone(), &tx).await
    else {
        return;
    };

    if !operator_registry.is_loaded() {
        return;
    }

    let Some(raw) = cp_manipulator::extract_workflow_from_response(&full_response) else {
        return;
    };

    let mut validation = cp_validate::validate(&raw_workflow_to_value(raw), Some(&operator_registry));
    if validation.valid() {
        return;
    }

    let mut last_response = full_response;
    let mut resolved = false;

    for attempt in 1..=max_retries {
        let error_count = validation.errors().count();
        let noun = if error_count == 1 { "error" } else { "errors" };
        let notice = format!(
            "\n\n---\nValidation found {error_count} {noun}. Correcting (attempt {attempt}/{max_retries})...\n\n"
        );
        if tx.send(notice).await.is_err() {
            return;
        }

        transcript.push(ConversationMessage::assistant(last_response.clone()));
        transcript.push(ConversationMessage::user(validation.format_for_agent()));

        let Some(new_response) = stream_to_client(backend.as_ref(), transcript.clone(), config.clone(), &tx).await
        else {
            return;
        };

        let Some(raw) = cp_manipulator::extract_workflow_from_response(&new_response) else {
            // The model likely explained the fix in prose instead of re-emitting a
            // workflow; a retry budget isn't consumed for a no-workflow attempt (§9
            // open question, resolved: exit early without a further notice).
            resolved = true;
            break;
        };

        validation = cp_validate::validate(&raw_workflow_to_value(raw), Some(&operator_registry));
        last_response = new_response;

        if validation.valid() {
            let _ = tx.send("\n\n---\nValidation passed after correction.\n\n".to_string()).await;
            resolved = true;
            break;
        }
    }

    if !resolved {
        let notice = format!(
            "\n\n---\nCorrection attempts exhausted ({max_retries}/{max_retries}). Residual issues:\n\n{}",
            validation.format_for_agent()
        );
        let _ = tx.send(notice).await;
    }
}

/// Stream one backend turn to the client, accumulating the full reply.
/// Returns `None` if a backend error was surfaced (already written into the
/// stream as an `Error: ...` suffix) or the client disconnected — either
/// way the caller must stop, not attempt a further turn.
async fn stream_to_client(
    backend: &dyn cp_backend::Backend,
    messages: Vec<ConversationMessage>,
    config: BackendConfig,
    tx: &tokio::sync::mpsc::Sender<String>,
) -> Option<String> {
    let mut stream = backend.query(messages, config);
    let mut full_response = String::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(text) => {
                full_response.push_str(&text);
                if tx.send(text).await.is_err() {
                    return None;
                }
            }
            Err(err) => {
                let _ = tx.send(format!("\n\nError: {err}")).await;
                return None;
            }
        }
    }

    Some(full_response)
}

fn raw_workflow_to_value(raw: cp_manipulator::RawWorkflow) -> Value {
    Value::Object(raw.into_iter().collect())
}
