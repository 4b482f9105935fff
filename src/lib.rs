pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod mcp;
pub mod models;
pub mod registry;
pub mod schema;
pub mod state;
pub mod tools;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use state::AppState;

/// Build the application router with the given state.
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a network port.
pub fn create_router(state: AppState) -> Router {
    // ── Protected transport endpoints ───────────────────────────────────
    // Every request must present an API key; the resolved role travels in
    // a `Caller` extension.
    let protected = Router::new()
        .route(
            "/mcp",
            post(mcp::http::mcp_post)
                .get(mcp::http::mcp_get)
                .delete(mcp::http::mcp_delete),
        )
        .route("/sse", get(mcp::sse::sse_connect))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    // ── Public endpoints ────────────────────────────────────────────────
    // `/messages` is addressed by the session id issued to an authenticated
    // `/sse` stream.
    let public = Router::new()
        .route("/health", get(handlers::health))
        .route("/health/ready", get(handlers::readiness))
        .route(mcp::sse::MESSAGES_PATH, post(mcp::sse::sse_message));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
}
