use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tp_core::error::{ErrorKind, TestProbeError};
use tp_core::types::TestId;

use crate::error::ApiError;
use crate::state::ApiState;

/// `POST /api/v1/test/initialize` (spec §6.1).
pub async fn initialize_test(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, ApiError> {
    let queue = state.ctx.guardian.get_queue_actor().await?;
    let test_id = queue.initialize_test().await;
    Ok(Json(serde_json::json!({ "test-id": test_id })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartTestRequest {
    #[serde(rename = "test-id")]
    test_id: TestId,
    #[serde(rename = "block-storage-path")]
    block_storage_path: String,
    #[serde(rename = "test-type")]
    test_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct StartTestResponse {
    #[serde(rename = "test-id")]
    test_id: TestId,
    accepted: bool,
    #[serde(rename = "test-type", skip_serializing_if = "Option::is_none")]
    test_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// `POST /api/v1/test/start` (spec §6.1). Admission only — the actual
/// Loading/Testing pipeline runs on a detached task so the HTTP handler
/// returns as soon as the request is accepted.
pub async fn start_test(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<StartTestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = state.ctx.guardian.get_queue_actor().await?;

    queue
        .start_test(req.test_id, req.block_storage_path.into(), req.test_type.clone())
        .await
        .map_err(ApiError::from)?;

    let queue = queue.clone();
    let driver = state.driver.clone();
    let test_id = req.test_id;
    tracing::info!(test_id = %test_id, "test admitted");
    tokio::spawn(async move {
        queue.drive(test_id, &driver).await;
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(StartTestResponse {
            test_id: req.test_id,
            accepted: true,
            test_type: req.test_type,
            message: None,
        }),
    ))
}

/// `GET /api/v1/test/{testId}/status` (spec §6.1, §6.2).
pub async fn test_status(
    State(state): State<Arc<ApiState>>,
    Path(test_id): Path<TestId>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = state.ctx.guardian.get_queue_actor().await?;
    let snapshot = queue.test_status(test_id).await?;
    Ok(Json(snapshot))
}

/// `GET /api/v1/queue/status` (spec §6.1, §9 degraded-mode surfacing).
pub async fn queue_status(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, ApiError> {
    let queue = state.ctx.guardian.get_queue_actor().await?;
    let counts = queue.queue_status().await;
    let degraded = state.ctx.guardian.is_degraded().await;
    Ok(Json(serde_json::json!({
        "setup": counts.setup,
        "loading": counts.loading,
        "loaded": counts.loaded,
        "testing": counts.testing,
        "completed": counts.completed,
        "exception": counts.exception,
        "shutting-down": counts.shutting_down,
        "currently-testing": counts.currently_testing,
        "degraded": degraded,
    })))
}

/// `DELETE /api/v1/test/{testId}` (spec §6.1, §4.3 cancellation matrix).
pub async fn cancel_test(
    State(state): State<Arc<ApiState>>,
    Path(test_id): Path<TestId>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = state.ctx.guardian.get_queue_actor().await?;
    let outcome = queue.cancel(test_id).await?;
    if outcome.cancelled {
        queue.test_stopping(test_id).await;
    }
    Ok(Json(serde_json::json!({
        "test-id": test_id,
        "cancelled": outcome.cancelled,
        "message": outcome.reason,
    })))
}

/// Liveness probe: 200 once the Guardian has completed `Initialize`, 503
/// beforehand (added — complement to §6.1's `ActorSystemNotReady`).
pub async fn healthz(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match state.ctx.guardian.get_queue_actor().await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))),
        Err(TestProbeError { kind: ErrorKind::ActorSystemNotReady, .. }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not-ready" })),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "degraded" })),
        ),
    }
}
