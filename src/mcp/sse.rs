// Legacy SSE binding: `GET /sse` + `POST /messages?sessionId=`.
//
// The client authenticates once when opening the event stream. The first
// event (`endpoint`) tells it where to POST messages; every JSON-RPC response
// then arrives as a `message` event on the same stream. Each session has one
// worker processing its inbox FIFO, so responses keep invocation order.

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::auth::Caller;
use crate::mcp::protocol::{
    handle_message, Origin, INVALID_REQUEST, PARSE_ERROR, SESSION_NOT_FOUND,
};
use crate::mcp::rpc_error;
use crate::mcp::session::{EnqueueError, SseGuard, SSE_INBOX_CAPACITY};
use crate::models::{Role, Transport};
use crate::state::AppState;

pub const MESSAGES_PATH: &str = "/messages";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

// ── GET /sse ────────────────────────────────────────────────────────────────

pub async fn sse_connect(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (guard, inbox) = state.sessions.open_sse(caller.role.clone());
    let (tx, rx) = mpsc::channel::<Event>(SSE_INBOX_CAPACITY);

    let endpoint = format!("{}?sessionId={}", MESSAGES_PATH, guard.id());
    // Capacity is fresh, so the first event cannot be rejected.
    let _ = tx.try_send(Event::default().event("endpoint").data(endpoint));

    tokio::spawn(session_worker(state.clone(), caller.role, guard, inbox, tx));

    let stream = ReceiverStream::new(rx)
        .map(Ok::<_, Infallible>)
        .take_until(state.shutdown.clone().cancelled_owned());
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

/// Drains one session's inbox in FIFO order. Owns the session guard, so the
/// session is removed as soon as the client stream goes away.
async fn session_worker(
    state: AppState,
    role: Role,
    guard: SseGuard,
    mut inbox: mpsc::Receiver<Value>,
    outbox: mpsc::Sender<Event>,
) {
    let session_id = guard.id().to_string();
    loop {
        let message = tokio::select! {
            next = inbox.recv() => match next {
                Some(message) => message,
                None => break,
            },
            _ = outbox.closed() => break,
        };
        let origin = Origin {
            role: &role,
            transport: Transport::Sse,
            session_id: Some(&session_id),
        };
        let Some(reply) = handle_message(&state, &message, &origin).await else {
            continue;
        };
        let event = Event::default().event("message").data(reply.to_string());
        if outbox.send(event).await.is_err() {
            tracing::debug!(session_id = %session_id, "sse: client gone, discarding response");
            break;
        }
    }
    drop(guard);
    tracing::debug!(session_id = %session_id, "sse: worker stopped");
}

// ── POST /messages ──────────────────────────────────────────────────────────

pub async fn sse_message(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let Some(session_id) = params.get("sessionId") else {
        return rpc_error(StatusCode::BAD_REQUEST, INVALID_REQUEST, "Missing sessionId");
    };

    let message: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return rpc_error(StatusCode::BAD_REQUEST, PARSE_ERROR, &format!("Parse error: {}", e));
        }
    };

    match state.sessions.enqueue(session_id, message) {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(e @ EnqueueError::UnknownSession) => {
            rpc_error(StatusCode::NOT_FOUND, SESSION_NOT_FOUND, &e.to_string())
        }
        Err(e @ EnqueueError::QueueFull) => {
            tracing::warn!(session_id = %session_id, "sse: inbox full, rejecting message");
            rpc_error(StatusCode::SERVICE_UNAVAILABLE, INVALID_REQUEST, &e.to_string())
        }
    }
}
