//! HTTP routes.
//!
//! - `GET /health`
//! - `POST /workflows`, `GET /workflows/{id}`
//! - `POST /workflows/{id}/execute`
//! - `GET /executions`, `GET /executions/{id}`, `GET /executions/{id}/status`
//! - `POST /executions/{id}/resume`, `POST /executions/{id}/cancel`

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use lantern_core::{ExecutionId, WorkflowId};
use lantern_workflow::store::DEFAULT_LIST_LIMIT;
use lantern_workflow::{
    ExecutionFilter, ExecutionProgress, ExecutionSnapshot, ExecutionSummary, GraphDocument,
    Output, Workflow, WorkflowGraph, WorkflowMetadata,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tower_http::trace::TraceLayer;

/// Upper bound on `limit` for execution listings.
const MAX_LIST_LIMIT: usize = 500;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workflows", post(create_workflow))
        .route("/workflows/{id}", get(get_workflow))
        .route("/workflows/{id}/execute", post(execute_workflow))
        .route("/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/status", get(execution_status))
        .route("/executions/{id}/resume", post(resume_execution))
        .route("/executions/{id}/cancel", post(cancel_execution))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn parse_workflow_id(raw: &str) -> Result<WorkflowId, ApiError> {
    raw.parse::<WorkflowId>().map_err(|e| ApiError::BadRequest {
        message: e.to_string(),
    })
}

fn parse_execution_id(raw: &str) -> Result<ExecutionId, ApiError> {
    raw.parse::<ExecutionId>().map_err(|e| ApiError::BadRequest {
        message: e.to_string(),
    })
}

/// Body of `POST /workflows`.
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub graph: GraphDocument,
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(request): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let graph = WorkflowGraph::try_from(request.graph).map_err(|e| ApiError::Unprocessable {
        message: e.to_string(),
    })?;
    let mut metadata = WorkflowMetadata::new(request.name);
    if let Some(description) = request.description {
        metadata = metadata.with_description(description);
    }

    let workflow = Workflow::new(metadata, graph);
    state.workflows.put(&workflow).await?;

    tracing::info!(workflow_id = %workflow.id, name = %workflow.name(), "workflow created");
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    let id = parse_workflow_id(&id)?;
    Ok(Json(state.workflows.get(id).await?))
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Output::new())
}

/// Body of `POST /workflows/{id}/execute`.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default = "empty_object")]
    pub input: JsonValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub execution_id: ExecutionId,
}

async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<ExecuteResponse>), ApiError> {
    let id = parse_workflow_id(&id)?;
    let workflow = state.workflows.get(id).await?;

    let execution = state
        .engine
        .start_execution(workflow.id, workflow.graph, request.input)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ExecuteResponse {
            execution_id: execution.id,
        }),
    ))
}

/// Query of `GET /executions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExecutionsQuery {
    pub workflow_id: Option<String>,
    pub limit: Option<usize>,
}

async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<Vec<ExecutionSummary>>, ApiError> {
    let workflow_id = query
        .workflow_id
        .as_deref()
        .map(parse_workflow_id)
        .transpose()?;
    let filter = ExecutionFilter {
        workflow_id,
        limit: query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT),
    };
    Ok(Json(state.engine.list_executions(filter).await?))
}

async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionSnapshot>, ApiError> {
    let id = parse_execution_id(&id)?;
    let execution = state.engine.get_execution(id).await?;
    Ok(Json(execution.into()))
}

async fn execution_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionProgress>, ApiError> {
    let id = parse_execution_id(&id)?;
    Ok(Json(state.engine.execution_status(id).await?))
}

/// Body of `POST /executions/{id}/resume`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    #[serde(default)]
    pub client_data: JsonValue,
}

async fn resume_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResumeRequest>,
) -> Result<Json<ExecutionSnapshot>, ApiError> {
    let id = parse_execution_id(&id)?;
    let client_data = match request.client_data {
        JsonValue::Null => Output::new(),
        JsonValue::Object(map) => map,
        _ => {
            return Err(ApiError::Unprocessable {
                message: "clientData must be an object".to_string(),
            });
        }
    };

    let execution = state.engine.resume(id, client_data).await?;
    Ok(Json(execution.into()))
}

async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionSnapshot>, ApiError> {
    let id = parse_execution_id(&id)?;
    let execution = state.engine.cancel(id).await?;
    Ok(Json(execution.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, header};
    use lantern_workflow::{
        Engine, EngineConfig, InMemoryExecutionStore, InMemoryWorkQueue, InMemoryWorkflowStore,
        NodeRegistry,
    };
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        engine: Engine,
        queue: InMemoryWorkQueue,
    }

    impl TestApp {
        fn new() -> Self {
            let queue = InMemoryWorkQueue::new();
            let engine = Engine::new(
                Arc::new(InMemoryExecutionStore::new()),
                Arc::new(queue.clone()),
                Arc::new(NodeRegistry::with_builtins()),
                EngineConfig::default(),
            );
            let state = AppState::new(engine.clone(), Arc::new(InMemoryWorkflowStore::new()));
            Self {
                router: router(state),
                engine,
                queue,
            }
        }

        async fn send(
            &self,
            method: Method,
            uri: &str,
            body: Option<JsonValue>,
        ) -> (StatusCode, JsonValue) {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
                .unwrap();
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()));
            (status, json)
        }

        /// Runs queued jobs until none are left.
        async fn drain(&self) {
            while let Some(job) = self.queue.try_next() {
                self.engine.process_job(job).await.unwrap();
            }
        }

        async fn create_workflow(&self, graph: JsonValue) -> String {
            let (status, body) = self
                .send(
                    Method::POST,
                    "/workflows",
                    Some(json!({"name": "Onboarding", "graph": graph})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            body["id"].as_str().unwrap().to_string()
        }

        async fn execute(&self, workflow_id: &str) -> String {
            let (status, body) = self
                .send(
                    Method::POST,
                    &format!("/workflows/{workflow_id}/execute"),
                    Some(json!({"input": {"email": "ada@example.com"}})),
                )
                .await;
            assert_eq!(status, StatusCode::ACCEPTED);
            body["executionId"].as_str().unwrap().to_string()
        }
    }

    fn signup_graph() -> JsonValue {
        json!({
            "nodes": [
                {"id": "1", "type": "trigger"},
                {"id": "2", "type": "banner-form", "environment": "client",
                 "data": {"title": "Welcome {{1.email}}"}},
                {"id": "3", "type": "transform", "data": {"name": "{{2.name}}"}}
            ],
            "edges": [
                {"source": "1", "target": "2"},
                {"source": "2", "target": "3"}
            ]
        })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = TestApp::new();
        let (status, body) = app.send(Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn created_workflow_can_be_fetched() {
        let app = TestApp::new();
        let id = app.create_workflow(signup_graph()).await;

        let (status, body) = app.send(Method::GET, &format!("/workflows/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"]["name"], "Onboarding");
        assert_eq!(body["graph"]["nodes"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn dangling_edge_is_unprocessable() {
        let app = TestApp::new();
        let (status, body) = app
            .send(
                Method::POST,
                "/workflows",
                Some(json!({
                    "name": "Broken",
                    "graph": {
                        "nodes": [{"id": "1", "type": "trigger"}],
                        "edges": [{"source": "1", "target": "9"}]
                    }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("missing node 9"));
    }

    #[tokio::test]
    async fn execute_unknown_workflow_is_not_found() {
        let app = TestApp::new();
        let (status, _) = app
            .send(
                Method::POST,
                &format!("/workflows/{}/execute", WorkflowId::new()),
                Some(json!({})),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn execute_empty_graph_is_unprocessable() {
        let app = TestApp::new();
        let id = app.create_workflow(json!({"nodes": [], "edges": []})).await;
        let (status, _) = app
            .send(Method::POST, &format!("/workflows/{id}/execute"), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn malformed_id_is_bad_request() {
        let app = TestApp::new();
        let (status, _) = app.send(Method::GET, "/executions/not-an-id", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn suspend_and_resume_over_http() {
        let app = TestApp::new();
        let workflow_id = app.create_workflow(signup_graph()).await;
        let execution_id = app.execute(&workflow_id).await;
        app.drain().await;

        let (status, body) = app
            .send(Method::GET, &format!("/executions/{execution_id}"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "suspended");
        assert_eq!(body["suspendedNodeId"], "2");
        assert_eq!(body["completedNodes"], json!(["1"]));
        assert_eq!(
            body["steps"]["2"]["output"]["_clientMessage"]["title"],
            "Welcome ada@example.com"
        );

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/executions/{execution_id}/resume"),
                Some(json!({"clientData": {"name": "Ada"}})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        app.drain().await;

        let (status, body) = app
            .send(Method::GET, &format!("/executions/{execution_id}/status"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["progress"], 100.0);

        let (_, body) = app
            .send(Method::GET, &format!("/executions/{execution_id}"), None)
            .await;
        assert_eq!(body["steps"]["3"]["output"]["name"], "Ada");

        let (status, _) = app
            .send(
                Method::POST,
                &format!("/executions/{execution_id}/resume"),
                Some(json!({"clientData": {}})),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn resume_rejects_non_object_client_data() {
        let app = TestApp::new();
        let workflow_id = app.create_workflow(signup_graph()).await;
        let execution_id = app.execute(&workflow_id).await;
        app.drain().await;

        let (status, _) = app
            .send(
                Method::POST,
                &format!("/executions/{execution_id}/resume"),
                Some(json!({"clientData": [1, 2]})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn list_filters_by_workflow() {
        let app = TestApp::new();
        let first = app.create_workflow(signup_graph()).await;
        let second = app.create_workflow(signup_graph()).await;
        app.execute(&first).await;
        app.execute(&first).await;
        app.execute(&second).await;

        let (status, body) = app
            .send(Method::GET, &format!("/executions?workflowId={first}"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item["workflowId"] == first.as_str()));

        let (_, body) = app.send(Method::GET, "/executions?limit=1", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_then_conflict() {
        let app = TestApp::new();
        let workflow_id = app.create_workflow(signup_graph()).await;
        let execution_id = app.execute(&workflow_id).await;

        let uri = format!("/executions/{execution_id}/cancel");
        let (status, body) = app.send(Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["error"], "cancelled");

        let (status, _) = app.send(Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
