// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP surface for comfy-pilot (§6): wires the already-built core crates
//! (registry, validator, knowledge store, backend registry, orchestrator)
//! behind the routes external collaborators are expected to call.

#![deny(unsafe_code)]

pub mod host_client;

pub use host_client::{HostClient, HostClientError};

use axum::body::Body;
use bytes::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cp_backend::BackendRegistry;
use cp_knowledge::KnowledgeStore;
use cp_orchestrator::{ChatRequest, HostInfoProvider, Orchestrator, OrchestratorError};
use cp_registry::OperatorRegistry;
use cp_validate::validate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::info;

/// Shared state behind every route; constructed once at startup.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub operator_registry: Arc<OperatorRegistry>,
    pub knowledge: Arc<KnowledgeStore>,
    pub backends: Arc<BackendRegistry>,
    pub host_client: Arc<HostClient>,
}

/// Uniform error body: `{"error": "..."}` at the given status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::AgentNotFound(_) => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
            OrchestratorError::AgentUnavailable(_) => ApiError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        }
    }
}

/// Build the Axum router with all comfy-pilot routes (§6).
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/comfy-pilot/agents", get(get_agents))
        .route("/comfy-pilot/system", get(get_system))
        .route("/comfy-pilot/models", get(get_models))
        .route("/comfy-pilot/custom-nodes", get(get_custom_nodes))
        .route("/comfy-pilot/knowledge-categories", get(get_knowledge_categories))
        .route("/comfy-pilot/node-info", get(get_node_info))
        .route("/comfy-pilot/validate-workflow", post(post_validate_workflow))
        .route("/comfy-pilot/apply-workflow", post(post_apply_workflow))
        .route("/comfy-pilot/chat", post(post_chat))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct AgentInfo {
    available: bool,
    display_name: String,
    models: Vec<String>,
}

async fn get_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.backends.available().await;
    let out: indexmap::IndexMap<String, AgentInfo> = snapshot
        .into_iter()
        .map(|(name, a)| {
            (
                name,
                AgentInfo {
                    available: a.available,
                    display_name: a.display_name,
                    models: a.models,
                },
            )
        })
        .collect();
    Json(out)
}

async fn get_system(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.host_client.gpu_info().await)
}

async fn get_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.host_client.available_models().await)
}

async fn get_custom_nodes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.host_client.installed_custom_nodes().await)
}

async fn get_knowledge_categories(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.knowledge.get_all_categories())
}

#[derive(Debug, Serialize)]
struct NodeInfoResponse {
    loaded: bool,
    node_count: usize,
    class_types: Vec<String>,
}

const NODE_INFO_CLASS_LIMIT: usize = 200;

async fn get_node_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.operator_registry.fetch().await;
    let mut class_types = state.operator_registry.all_class_names();
    class_types.sort();
    let node_count = class_types.len();
    class_types.truncate(NODE_INFO_CLASS_LIMIT);

    Json(NodeInfoResponse {
        loaded: state.operator_registry.is_loaded(),
        node_count,
        class_types,
    })
}

#[derive(Debug, Deserialize)]
struct WorkflowBody {
    workflow: Value,
}

#[derive(Debug, Serialize)]
struct IssueView {
    check: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
}

impl From<&cp_core::ValidationIssue> for IssueView {
    fn from(issue: &cp_core::ValidationIssue) -> Self {
        Self {
            check: issue.check_id.clone(),
            node_id: issue.node_id.clone(),
            message: issue.message.clone(),
            suggestion: issue.suggestion.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ValidateWorkflowResponse {
    valid: bool,
    node_count: usize,
    validated_against_registry: bool,
    errors: Vec<IssueView>,
    warnings: Vec<IssueView>,
}

async fn post_validate_workflow(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WorkflowBody>,
) -> impl IntoResponse {
    state.operator_registry.fetch().await;
    let registry = state.operator_registry.is_loaded().then_some(state.operator_registry.as_ref());
    let result = validate(&body.workflow, registry);

    Json(ValidateWorkflowResponse {
        valid: result.valid(),
        node_count: result.node_count,
        validated_against_registry: result.validated_against_registry,
        errors: result.errors().map(IssueView::from).collect(),
        warnings: result.warnings().map(IssueView::from).collect(),
    })
}

#[derive(Debug, Serialize)]
struct ApplyWorkflowResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    workflow: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
}

async fn post_apply_workflow(State(state): State<Arc<AppState>>, Json(body): Json<WorkflowBody>) -> Response {
    state.operator_registry.fetch().await;
    let registry = state.operator_registry.is_loaded().then_some(state.operator_registry.as_ref());
    let result = validate(&body.workflow, registry);

    if result.valid() {
        Json(ApplyWorkflowResponse {
            success: true,
            workflow: Some(body.workflow),
            node_count: Some(result.node_count),
            errors: None,
            warnings: None,
        })
        .into_response()
    } else {
        let response = ApplyWorkflowResponse {
            success: false,
            workflow: None,
            node_count: None,
            errors: Some(result.errors().map(|i| i.message.clone()).collect()),
            warnings: Some(result.warnings().map(|i| i.message.clone()).collect()),
        };
        (StatusCode::BAD_REQUEST, Json(response)).into_response()
    }
}

async fn post_chat(State(state): State<Arc<AppState>>, Json(request): Json<ChatRequest>) -> Result<Response, ApiError> {
    let agent = request.agent.clone();
    let stream = state.orchestrator.run_chat(request).await?;
    info!(%agent, "chat stream opened");

    let body_stream = stream.map(|chunk| Ok::<Bytes, Infallible>(Bytes::from(chunk)));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(body_stream))
        .expect("building the chat response never fails"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_backend_mock::MockBackend;
    use cp_orchestrator::{CustomNodeInventory, GpuInfo, HostInfoProvider, ModelInventory};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct NoHostInfo;

    #[async_trait::async_trait]
    impl HostInfoProvider for NoHostInfo {
        async fn gpu_info(&self) -> GpuInfo {
            GpuInfo::default()
        }
        async fn available_models(&self) -> ModelInventory {
            ModelInventory::default()
        }
        async fn installed_custom_nodes(&self) -> CustomNodeInventory {
            CustomNodeInventory::default()
        }
    }

    fn test_state() -> Arc<AppState> {
        let backends = Arc::new(BackendRegistry::new());
        backends.register(Arc::new(MockBackend::new("mock", "Mock")));

        let registry = Arc::new(OperatorRegistry::new("http://127.0.0.1:0"));
        let dir = tempfile::tempdir().unwrap();
        let knowledge = Arc::new(KnowledgeStore::new(dir.keep()));

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&backends),
            Arc::clone(&registry),
            Arc::clone(&knowledge),
            Arc::new(NoHostInfo),
        ));

        let host_client = Arc::new(HostClient::new("http://127.0.0.1:0", Arc::clone(&registry)));

        Arc::new(AppState {
            orchestrator,
            operator_registry: registry,
            knowledge,
            backends,
            host_client,
        })
    }

    #[tokio::test]
    async fn agents_lists_registered_backends() {
        let app = build_app(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/comfy-pilot/agents")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body.get("mock").is_some());
    }

    #[tokio::test]
    async fn node_info_reports_unloaded_registry() {
        let app = build_app(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/comfy-pilot/node-info")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["loaded"], false);
        assert_eq!(body["node_count"], 0);
    }

    #[tokio::test]
    async fn validate_workflow_rejects_empty_mapping() {
        let app = build_app(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/comfy-pilot/validate-workflow")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"workflow":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["valid"], false);
        assert!(!body["errors"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn apply_workflow_returns_400_on_failure() {
        let app = build_app(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/comfy-pilot/apply-workflow")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"workflow":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_returns_404_for_unknown_agent() {
        let app = build_app(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/comfy-pilot/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"agent":"nope","message":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chat_streams_backend_reply() {
        let backends = Arc::new(BackendRegistry::new());
        let mock = Arc::new(MockBackend::new("mock", "Mock"));
        mock.push_reply_text("hello from the model");
        backends.register(mock);

        let registry = Arc::new(OperatorRegistry::new("http://127.0.0.1:0"));
        let dir = tempfile::tempdir().unwrap();
        let knowledge = Arc::new(KnowledgeStore::new(dir.keep()));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&backends),
            Arc::clone(&registry),
            Arc::clone(&knowledge),
            Arc::new(NoHostInfo),
        ));
        let host_client = Arc::new(HostClient::new("http://127.0.0.1:0", Arc::clone(&registry)));
        let state = Arc::new(AppState {
            orchestrator,
            operator_registry: registry,
            knowledge,
            backends,
            host_client,
        });

        let app = build_app(Arc::clone(&state));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/comfy-pilot/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"agent":"mock","message":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache"
        );
    }
}
