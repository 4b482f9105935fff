//! MCP (Model Context Protocol) transport bindings.
//!
//! **Protocol** (`protocol`): JSON-RPC 2.0 method layer shared by both bindings.
//!
//! **Streamable HTTP** (`http`): `POST /mcp`, one message per request.
//!
//! **Legacy SSE** (`sse`): `GET /sse` event stream + `POST /messages`.
//!
//! **Sessions** (`session`): per-connection state for both bindings.
//!
//! Protocol reference: <https://modelcontextprotocol.io/specification/2024-11-05>

pub mod http;
pub mod protocol;
pub mod session;
pub mod sse;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

/// HTTP response carrying a JSON-RPC error with a null id.
pub(crate) fn rpc_error(status: StatusCode, code: i32, message: &str) -> Response {
    (status, Json(protocol::json_rpc_error(Value::Null, code, message))).into_response()
}

/// Rewrite the rate limiter's plain-text 429 as a JSON-RPC error, keeping
/// its retry headers.
pub async fn rate_limited_as_rpc(response: Response) -> Response {
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return response;
    }
    let (parts, _) = response.into_parts();
    let mut rpc = rpc_error(
        StatusCode::TOO_MANY_REQUESTS,
        protocol::RATE_LIMITED,
        "Rate limit exceeded",
    );
    for (name, value) in &parts.headers {
        if name != header::CONTENT_TYPE && name != header::CONTENT_LENGTH {
            rpc.headers_mut().append(name.clone(), value.clone());
        }
    }
    rpc
}
