//! The REST surface (spec §6.1) as an axum router over a shared
//! `tp_builder::ServiceContext`.

mod error;
mod handlers;
mod state;

pub use error::ApiError;
pub use state::ApiState;

use axum::middleware as axum_middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the full Test-Probe API router.
pub fn api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/test/initialize", post(handlers::initialize_test))
        .route("/api/v1/test/start", post(handlers::start_test))
        .route("/api/v1/test/:test_id/status", get(handlers::test_status))
        .route("/api/v1/test/:test_id", delete(handlers::cancel_test))
        .route("/api/v1/queue/status", get(handlers::queue_status))
        .route("/healthz", get(handlers::healthz))
        .layer(axum_middleware::from_fn(tp_telemetry::request_id::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
