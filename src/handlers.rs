// ---------------------------------------------------------------------------
// handlers.rs: public health and readiness checks (no API key required)
// ---------------------------------------------------------------------------

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.shutdown.is_cancelled() {
        "shutting_down"
    } else if state.is_ready() {
        "ok"
    } else {
        "starting"
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: state.config.server_version.clone(),
        app: state.config.server_name.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        tools: state.registry().len(),
        sse_sessions: state.sessions.sse_count(),
    })
}

/// GET /health/ready: 503 until the listener is bound, and again once
/// shutdown has begun.
pub async fn readiness(State(state): State<AppState>) -> Response {
    let ready = state.is_ready() && !state.shutdown.is_cancelled();
    let body = json!({ "ready": ready, "uptime_seconds": state.start_time.elapsed().as_secs() });
    if ready {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}
