// Streamable HTTP binding: `/mcp`.
//
// One POSTed JSON-RPC message per request. `initialize` opens a session whose
// id is returned in the `Mcp-Session-Id` header; later requests may present
// it. Authentication already happened in the `require_api_key` layer.

use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use crate::auth::Caller;
use crate::mcp::protocol::{
    handle_message, Origin, INVALID_REQUEST, PARSE_ERROR, SESSION_NOT_FOUND,
};
use crate::mcp::rpc_error;
use crate::models::Transport;
use crate::state::AppState;

pub const MCP_SESSION_ID: &str = "mcp-session-id";

pub async fn mcp_post(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return rpc_error(StatusCode::BAD_REQUEST, PARSE_ERROR, &format!("Parse error: {}", e));
        }
    };
    if message.is_array() {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            INVALID_REQUEST,
            "Batch requests are not supported",
        );
    }

    let session_id = headers.get(MCP_SESSION_ID).and_then(|v| v.to_str().ok());
    if let Some(sid) = session_id {
        if !state.sessions.http_session_valid(sid, &caller.role) {
            return rpc_error(StatusCode::NOT_FOUND, SESSION_NOT_FOUND, "Session not found");
        }
    }

    let is_initialize = message.get("method").and_then(Value::as_str) == Some("initialize");
    let origin = Origin {
        role: &caller.role,
        transport: Transport::StreamableHttp,
        session_id,
    };

    let Some(reply) = handle_message(&state, &message, &origin).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    let opened = (is_initialize && reply.get("result").is_some())
        .then(|| state.sessions.open_http(caller.role.clone()));

    let mut response = Json(reply).into_response();
    if let Some(sid) = opened {
        if let Ok(value) = HeaderValue::from_str(&sid) {
            response.headers_mut().insert(MCP_SESSION_ID, value);
        }
    }
    response
}

pub async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(sid) = headers.get(MCP_SESSION_ID).and_then(|v| v.to_str().ok()) else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            INVALID_REQUEST,
            "Mcp-Session-Id header is required",
        );
    };
    if state.sessions.close_http(sid) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        rpc_error(StatusCode::NOT_FOUND, SESSION_NOT_FOUND, "Session not found")
    }
}

/// No server-initiated stream on this binding.
pub async fn mcp_get() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST, DELETE")],
    )
        .into_response()
}
