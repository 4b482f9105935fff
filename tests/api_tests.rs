use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::future::BoxFuture;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use dynamic_mcp_server::config::Config;
use dynamic_mcp_server::lifecycle::{self, Bootstrap};
use dynamic_mcp_server::models::{CallContext, Outcome, Role};
use dynamic_mcp_server::registry::{
    HandlerModule, HandlerRef, InputSchema, ToolAnnotations, ToolDescriptor, ToolHandler,
};
use dynamic_mcp_server::state::AppState;

const USER_KEY: &str = "user-test-key";

/// Admin-only tool used to exercise role checks end to end.
struct Purge;

impl ToolHandler for Purge {
    fn dispatch<'a>(
        &'a self,
        _args: Value,
        _ctx: &'a CallContext,
        _config: &'a Value,
    ) -> BoxFuture<'a, anyhow::Result<Outcome>> {
        Box::pin(async { Ok(Outcome::success(json!({ "purged": true }), "purged")) })
    }
}

fn admin_module() -> HandlerModule {
    HandlerModule::new("admin-tools", Arc::new(Purge)).with_tool(ToolDescriptor {
        name: "purge".into(),
        description: "Drop cached state".into(),
        input_schema: InputSchema::new(),
        annotations: ToolAnnotations {
            destructive_hint: true,
            ..ToolAnnotations::default()
        },
        handler: HandlerRef {
            module: "admin-tools".into(),
            config: json!({}),
        },
        roles_permitted: vec![Role::admin()],
    })
}

/// Helper: fully bootstrapped state with one user key and the admin key.
fn test_state() -> (AppState, String) {
    let config = Config {
        user_api_keys: vec![USER_KEY.into()],
        ..Config::default()
    };
    let mut modules = lifecycle::default_modules();
    modules.push(admin_module());
    let Bootstrap { state, admin_key } = lifecycle::bootstrap(config, modules).unwrap();
    (state, admin_key)
}

/// Helper: build a router from a test state.
fn app(state: AppState) -> axum::Router {
    dynamic_mcp_server::create_router(state)
}

/// Helper: collect a response body into a serde_json::Value.
async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn rpc(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

fn post_mcp(key: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("x-api-key", key)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn call_tool(state: AppState, key: &str, tool: &str, arguments: Value) -> Value {
    let request = rpc(7, "tools/call", json!({ "name": tool, "arguments": arguments }));
    let response = app(state).oneshot(post_mcp(key, &request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

// ═══════════════════════════════════════════════════════════════════════════
//  GET /health
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn health_is_public_and_reports_tools() {
    let (state, _) = test_state();
    state.mark_ready();
    let response = app(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["tools"], 4);
    assert_eq!(json["sse_sessions"], 0);
}

#[tokio::test]
async fn readiness_is_503_until_marked_ready() {
    let (state, _) = test_state();
    let response = app(state.clone())
        .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    state.mark_ready();
    let response = app(state)
        .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Authentication
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn mcp_without_key_is_401() {
    let (state, _) = test_state();
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(rpc(1, "tools/list", json!({})).to_string()))
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], -32001);
    assert_eq!(json["error"]["message"], "Unauthenticated");
}

#[tokio::test]
async fn mcp_with_wrong_key_is_401() {
    let (state, _) = test_state();
    let response = app(state)
        .oneshot(post_mcp("mcp_not-a-real-key", &rpc(1, "ping", json!({}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sse_without_key_is_401() {
    let (state, _) = test_state();
    let response = app(state.clone())
        .oneshot(Request::builder().uri("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(state.sessions.sse_count(), 0);
}

#[tokio::test]
async fn key_accepted_as_query_and_bearer() {
    let (state, admin_key) = test_state();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/mcp?apiKey={}", admin_key))
        .header("content-type", "application/json")
        .body(Body::from(rpc(1, "ping", json!({})).to_string()))
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", USER_KEY))
        .body(Body::from(rpc(2, "ping", json!({})).to_string()))
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["result"], json!({}));
}

// ═══════════════════════════════════════════════════════════════════════════
//  POST /mcp
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn initialize_opens_session() {
    let (state, _) = test_state();
    let request = rpc(
        1,
        "initialize",
        json!({ "protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": { "name": "test", "version": "0" } }),
    );
    let response = app(state.clone()).oneshot(post_mcp(USER_KEY, &request)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .expect("session header")
        .to_str()
        .unwrap()
        .to_string();
    let json = body_json(response).await;
    assert_eq!(json["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(json["result"]["serverInfo"]["name"], "dynamic-mcp-server");
    assert_eq!(state.sessions.http_count(), 1);

    // The session id is honoured on follow-up requests.
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("x-api-key", USER_KEY)
        .header("mcp-session-id", &session_id)
        .body(Body::from(rpc(2, "ping", json!({})).to_string()))
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // DELETE terminates it; a second DELETE finds nothing.
    for expected in [StatusCode::NO_CONTENT, StatusCode::NOT_FOUND] {
        let request = Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .header("x-api-key", USER_KEY)
            .header("mcp-session-id", &session_id)
            .body(Body::empty())
            .unwrap();
        let response = app(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), expected);
    }
    assert_eq!(state.sessions.http_count(), 0);
}

#[tokio::test]
async fn abandoned_initialize_sessions_are_capped() {
    let config = Config {
        user_api_keys: vec![USER_KEY.into()],
        max_http_sessions_per_role: 16,
        ..Config::default()
    };
    let Bootstrap { state, .. } = lifecycle::bootstrap(config, lifecycle::default_modules()).unwrap();
    let request = rpc(1, "initialize", json!({}));

    let mut last = String::new();
    for _ in 0..300 {
        let response = app(state.clone()).oneshot(post_mcp(USER_KEY, &request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        last = response.headers()["mcp-session-id"].to_str().unwrap().to_string();
    }
    assert_eq!(state.sessions.http_count(), 16);

    // The newest session survives eviction.
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("x-api-key", USER_KEY)
        .header("mcp-session-id", &last)
        .body(Body::from(rpc(2, "ping", json!({})).to_string()))
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_session_header_is_404() {
    let (state, _) = test_state();
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("x-api-key", USER_KEY)
        .header("mcp-session-id", "no-such-session")
        .body(Body::from(rpc(1, "ping", json!({})).to_string()))
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], -32002);
}

#[tokio::test]
async fn malformed_body_is_parse_error() {
    let (state, _) = test_state();
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("x-api-key", USER_KEY)
        .body(Body::from("{not json"))
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], -32700);
}

#[tokio::test]
async fn notification_is_accepted_without_body() {
    let (state, _) = test_state();
    let notification = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    let response = app(state).oneshot(post_mcp(USER_KEY, &notification)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn get_mcp_is_method_not_allowed() {
    let (state, _) = test_state();
    let request = Request::builder()
        .uri("/mcp")
        .header("x-api-key", USER_KEY)
        .body(Body::empty())
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let (state, _) = test_state();
    let response = app(state)
        .oneshot(post_mcp(USER_KEY, &rpc(3, "resources/list", json!({}))))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["id"], 3);
    assert_eq!(json["error"]["code"], -32601);
}

// ═══════════════════════════════════════════════════════════════════════════
//  tools/list + tools/call
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn tools_list_is_filtered_by_role() {
    let (state, admin_key) = test_state();

    let names = |json: &Value| -> Vec<String> {
        json["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect()
    };

    let response = app(state.clone())
        .oneshot(post_mcp(USER_KEY, &rpc(1, "tools/list", json!({}))))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(names(&json), ["echo", "current-time", "calculate"]);
    let echo = &json["result"]["tools"][0];
    assert_eq!(echo["inputSchema"]["required"], json!(["message"]));
    assert_eq!(echo["annotations"]["readOnlyHint"], true);

    let response = app(state)
        .oneshot(post_mcp(&admin_key, &rpc(2, "tools/list", json!({}))))
        .await
        .unwrap();
    assert_eq!(
        names(&body_json(response).await),
        ["echo", "current-time", "calculate", "purge"]
    );
}

#[tokio::test]
async fn echo_round_trip() {
    let (state, _) = test_state();
    let json = call_tool(state, USER_KEY, "echo", json!({ "message": "hello" })).await;

    assert_eq!(json["id"], 7);
    let result = &json["result"];
    assert_eq!(result["isError"], false);
    assert_eq!(result["content"][0]["text"], "Echo: hello");
    assert_eq!(result["structuredContent"]["result"]["message"], "hello");
}

#[tokio::test]
async fn calculate_reports_errors_as_outcome() {
    let (state, _) = test_state();
    let json = call_tool(state.clone(), USER_KEY, "calculate", json!({ "expression": "1 / 0" })).await;
    assert_eq!(json["result"]["isError"], true);
    assert!(
        json["result"]["structuredContent"]["error"]
            .as_str()
            .unwrap()
            .starts_with("Calculation error:")
    );

    let json = call_tool(state, USER_KEY, "calculate", json!({ "expression": "(1 + 2) * 3" })).await;
    assert_eq!(json["result"]["structuredContent"]["result"]["result"], 9);
}

#[tokio::test]
async fn missing_argument_is_rejected() {
    let (state, _) = test_state();
    let json = call_tool(state, USER_KEY, "echo", json!({})).await;
    assert_eq!(json["result"]["isError"], true);
    assert_eq!(
        json["result"]["structuredContent"]["error"],
        "Invalid arguments: 'message' is required"
    );
}

#[tokio::test]
async fn unknown_tool_is_reported() {
    let (state, _) = test_state();
    let json = call_tool(state, USER_KEY, "nope", json!({})).await;
    assert_eq!(json["result"]["structuredContent"]["error"], "Unknown tool: nope");
}

#[tokio::test]
async fn role_gated_tool() {
    let (state, admin_key) = test_state();

    let json = call_tool(state.clone(), USER_KEY, "purge", json!({})).await;
    assert_eq!(json["result"]["isError"], true);
    assert_eq!(
        json["result"]["structuredContent"]["error"],
        "Forbidden: role 'user' may not call 'purge'"
    );

    let json = call_tool(state, &admin_key, "purge", json!({})).await;
    assert_eq!(json["result"]["isError"], false);
    assert_eq!(json["result"]["structuredContent"]["result"]["purged"], true);
}

// ═══════════════════════════════════════════════════════════════════════════
//  POST /messages
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn messages_for_unknown_session_is_404() {
    let (state, _) = test_state();
    let request = Request::builder()
        .method("POST")
        .uri("/messages?sessionId=does-not-exist")
        .header("content-type", "application/json")
        .body(Body::from(rpc(1, "ping", json!({})).to_string()))
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn messages_without_session_id_is_400() {
    let (state, _) = test_state();
    let request = Request::builder()
        .method("POST")
        .uri("/messages")
        .header("content-type", "application/json")
        .body(Body::from(rpc(1, "ping", json!({})).to_string()))
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
