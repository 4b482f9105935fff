// MCP JSON-RPC method layer shared by both transport bindings.
//
// Supported methods:
// - `initialize`: server info + capabilities
// - `notifications/initialized`: client ack (no-op)
// - `ping`: health check
// - `tools/list`: tools the caller's role may invoke
// - `tools/call`: invoke a tool through the dispatcher

use serde_json::{json, Value};

use crate::models::{CallContext, Outcome, Role, Transport};
use crate::state::AppState;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const UNAUTHENTICATED: i32 = -32001;
pub const SESSION_NOT_FOUND: i32 = -32002;
pub const RATE_LIMITED: i32 = -32003;

/// Who is calling and over which binding; fixed for one inbound message.
#[derive(Debug, Clone)]
pub struct Origin<'a> {
    pub role: &'a Role,
    pub transport: Transport,
    pub session_id: Option<&'a str>,
}

/// `true` for JSON-RPC notifications (no `id` member), which get no response.
pub fn is_notification(message: &Value) -> bool {
    message.is_object() && message.get("id").is_none()
}

/// Handle one JSON-RPC message. Returns `None` for notifications.
pub async fn handle_message(state: &AppState, message: &Value, origin: &Origin<'_>) -> Option<Value> {
    let id = message.get("id").cloned().unwrap_or(Value::Null);

    let method = match (message.get("jsonrpc").and_then(Value::as_str), message.get("method")) {
        (Some("2.0"), Some(Value::String(m))) => m.as_str(),
        _ => return Some(json_rpc_error(id, INVALID_REQUEST, "Invalid JSON-RPC request")),
    };

    tracing::debug!(method = %method, transport = %origin.transport, "mcp: incoming message");

    if is_notification(message) {
        if method != "notifications/initialized" {
            tracing::debug!(method = %method, "mcp: ignoring notification");
        }
        return None;
    }

    let response = match method {
        "initialize" => handle_initialize(state, &id),
        "ping" => json_rpc_result(&id, json!({})),
        "tools/list" => handle_tools_list(state, origin, &id),
        "tools/call" => handle_tools_call(state, message, origin, &id).await,
        _ => json_rpc_error(id, METHOD_NOT_FOUND, &format!("Method not found: {}", method)),
    };
    Some(response)
}

// ── initialize ──────────────────────────────────────────────────────────────

fn handle_initialize(state: &AppState, id: &Value) -> Value {
    json_rpc_result(
        id,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": state.config.server_name,
                "version": state.config.server_version,
            },
            "instructions": format!(
                "{} exposes {} tools; call tools/list to discover them.",
                state.config.server_name,
                state.registry().len()
            ),
        }),
    )
}

// ── tools/list ──────────────────────────────────────────────────────────────

fn handle_tools_list(state: &AppState, origin: &Origin<'_>, id: &Value) -> Value {
    let tools: Vec<Value> = state
        .registry()
        .list_tools()
        .filter(|t| t.permits(origin.role))
        .map(|t| t.to_mcp_json())
        .collect();

    json_rpc_result(id, json!({ "tools": tools }))
}

// ── tools/call ──────────────────────────────────────────────────────────────

async fn handle_tools_call(state: &AppState, request: &Value, origin: &Origin<'_>, id: &Value) -> Value {
    let params = request.get("params").cloned().unwrap_or(json!({}));
    let tool_name = match params.get("name").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => name,
        _ => return json_rpc_error(id.clone(), INVALID_PARAMS, "Missing 'name' in params"),
    };
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    let ctx = CallContext::new(
        origin.role.clone(),
        origin.transport,
        origin.session_id.map(String::from),
    );
    let outcome = state.dispatcher.invoke_outcome(tool_name, arguments, &ctx).await;

    json_rpc_result(id, call_tool_result(&outcome))
}

/// MCP `CallToolResult` carrying the outcome both as text and as
/// structured content.
pub fn call_tool_result(outcome: &Outcome) -> Value {
    json!({
        "content": [{ "type": "text", "text": outcome.summary() }],
        "structuredContent": outcome,
        "isError": outcome.is_error(),
    })
}

// ── JSON-RPC helpers ────────────────────────────────────────────────────────

pub fn json_rpc_result(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn json_rpc_error(id: Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}
