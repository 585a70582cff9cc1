//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.
//! The store emits a watch event for every write, so nothing here talks to
//! the reconciler directly.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::info;

use pgsource_core::PipelineSpec;
use pgsource_state::{BindingReport, ReceiverReport, StateError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn state_error(e: StateError) -> Response {
    let status = match &e {
        StateError::Invalid(_) => StatusCode::BAD_REQUEST,
        StateError::Conflict(_) => StatusCode::CONFLICT,
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

// ── Pipelines ──────────────────────────────────────────────────

/// Apply request body.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ApplyPipelineRequest {
    pub namespace: String,
    pub name: String,
    pub spec: PipelineSpec,
}

/// GET /api/v1/pipelines
pub async fn list_pipelines(State(state): State<ApiState>) -> Response {
    match state.store.list_pipelines() {
        Ok(pipelines) => ApiResponse::ok(pipelines).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/pipelines
pub async fn apply_pipeline(
    State(state): State<ApiState>,
    Json(req): Json<ApplyPipelineRequest>,
) -> Response {
    let existed = match state.store.get_pipeline(&key(&req.namespace, &req.name)) {
        Ok(p) => p.is_some(),
        Err(e) => return state_error(e),
    };
    match state.store.apply_pipeline(&req.namespace, &req.name, req.spec) {
        Ok(pipeline) => {
            info!(key = %pipeline.key(), generation = pipeline.metadata.generation, "pipeline applied via API");
            let status = if existed {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (status, ApiResponse::ok(pipeline)).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/pipelines/{namespace}/{name}
pub async fn get_pipeline(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    match state.store.get_pipeline(&key(&namespace, &name)) {
        Ok(Some(pipeline)) => ApiResponse::ok(pipeline).into_response(),
        Ok(None) => error_response("pipeline not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(e),
    }
}

/// DELETE /api/v1/pipelines/{namespace}/{name}
///
/// Only marks the pipeline; it is removed once its database objects are gone.
pub async fn delete_pipeline(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let key = key(&namespace, &name);
    match state.store.request_deletion(&key) {
        Ok(true) => {
            info!(%key, "pipeline deletion requested via API");
            (StatusCode::ACCEPTED, ApiResponse::ok("deletion requested")).into_response()
        }
        Ok(false) => error_response("pipeline not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_error(e),
    }
}

// ── Receivers ──────────────────────────────────────────────────

/// GET /api/v1/receivers
pub async fn list_receivers(State(state): State<ApiState>) -> Response {
    match state.store.list_receivers() {
        Ok(receivers) => ApiResponse::ok(receivers).into_response(),
        Err(e) => state_error(e),
    }
}

/// PUT /api/v1/receivers/{namespace}/{name}/status
pub async fn report_receiver(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(report): Json<ReceiverReport>,
) -> Response {
    match state.store.report_receiver(&key(&namespace, &name), report) {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => state_error(e),
    }
}

// ── Bindings ───────────────────────────────────────────────────

/// GET /api/v1/bindings
pub async fn list_bindings(State(state): State<ApiState>) -> Response {
    match state.store.list_bindings() {
        Ok(bindings) => ApiResponse::ok(bindings).into_response(),
        Err(e) => state_error(e),
    }
}

/// PUT /api/v1/bindings/{namespace}/{name}/status
pub async fn report_binding(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(report): Json<BindingReport>,
) -> Response {
    match state.store.report_binding(&key(&namespace, &name), report) {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => state_error(e),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgsource_core::{CredentialRef, SinkRef, TableSpec};
    use pgsource_state::StateStore;

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        ApiState { store }
    }

    fn test_request(tables: &[&str]) -> ApplyPipelineRequest {
        ApplyPipelineRequest {
            namespace: "default".to_string(),
            name: "pg".to_string(),
            spec: PipelineSpec {
                tables: tables.iter().map(|t| TableSpec::new(t)).collect(),
                credentials: CredentialRef {
                    secret: "pg-creds".to_string(),
                },
                sink: SinkRef::Uri {
                    uri: "http://sink.default.svc".to_string(),
                },
            },
        }
    }

    fn path(ns: &str, name: &str) -> Path<(String, String)> {
        Path((ns.to_string(), name.to_string()))
    }

    #[tokio::test]
    async fn list_pipelines_empty() {
        let resp = list_pipelines(State(test_state())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn apply_creates_then_updates() {
        let state = test_state();
        let resp = apply_pipeline(State(state.clone()), Json(test_request(&["orders"]))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp =
            apply_pipeline(State(state.clone()), Json(test_request(&["orders", "users"]))).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let p = state.store.get_pipeline("default/pg").unwrap().unwrap();
        assert_eq!(p.metadata.generation, 2);
    }

    #[tokio::test]
    async fn apply_rejects_duplicate_tables() {
        let resp =
            apply_pipeline(State(test_state()), Json(test_request(&["orders", "orders"]))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_nonexistent_pipeline() {
        let resp = get_pipeline(State(test_state()), path("default", "nope")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_marks_pipeline() {
        let state = test_state();
        apply_pipeline(State(state.clone()), Json(test_request(&[]))).await;

        let resp = delete_pipeline(State(state.clone()), path("default", "pg")).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let p = state.store.get_pipeline("default/pg").unwrap().unwrap();
        assert!(p.metadata.is_deleting());

        let resp = apply_pipeline(State(state), Json(test_request(&["orders"]))).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn delete_nonexistent_pipeline() {
        let resp = delete_pipeline(State(test_state()), path("default", "nope")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn report_for_unrequested_receiver() {
        let report = ReceiverReport {
            available_replicas: 1,
            address: Some("10.0.0.7:8080".to_string()),
            updated_at: 0,
        };
        let resp = report_receiver(State(test_state()), path("default", "pg-receiver"), Json(report)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn healthz_ok() {
        let resp = healthz().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
