//! Per-connection session state for both transport bindings.
//!
//! SSE sessions own an inbox feeding the connection's worker task. The
//! [`SseGuard`] returned on open lives in that worker and removes the session
//! when the worker exits, so no message can be queued for a dead stream.
//! HTTP sessions are an id bound to the role that initialized them. They
//! expire after an idle TTL and are capped per role, so clients that never
//! send `DELETE /mcp` cannot grow the table without bound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::models::Role;

/// Messages a single SSE session may have queued before POSTs are refused.
pub const SSE_INBOX_CAPACITY: usize = 64;

/// Idle time after which an HTTP session is forgotten.
pub const DEFAULT_HTTP_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Live HTTP sessions kept per role; opening one more evicts the least
/// recently used.
pub const MAX_HTTP_SESSIONS_PER_ROLE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("Session not found")]
    UnknownSession,
    #[error("Session queue is full")]
    QueueFull,
}

struct SseSession {
    role: Role,
    inbox: mpsc::Sender<Value>,
}

struct HttpSession {
    role: Role,
    opened_at: Instant,
    last_seen: Instant,
}

pub struct SessionStore {
    sse: Mutex<HashMap<String, SseSession>>,
    http: Mutex<HashMap<String, HttpSession>>,
    http_ttl: Duration,
    http_max_per_role: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_http_limits(DEFAULT_HTTP_SESSION_TTL, MAX_HTTP_SESSIONS_PER_ROLE)
    }
}

impl SessionStore {
    pub fn with_http_limits(ttl: Duration, max_per_role: usize) -> Self {
        Self {
            sse: Mutex::new(HashMap::new()),
            http: Mutex::new(HashMap::new()),
            http_ttl: ttl,
            http_max_per_role: max_per_role.max(1),
        }
    }

    // ── SSE ─────────────────────────────────────────────────────────────────

    /// Register a new SSE session. The caller owns the inbox receiver and
    /// keeps the guard alive for as long as the connection is open.
    pub fn open_sse(self: &Arc<Self>, role: Role) -> (SseGuard, mpsc::Receiver<Value>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(SSE_INBOX_CAPACITY);
        lock(&self.sse).insert(id.clone(), SseSession { role, inbox: tx });
        tracing::info!(session_id = %id, "sse: session opened");
        (
            SseGuard {
                store: Arc::clone(self),
                id,
            },
            rx,
        )
    }

    /// Queue a JSON-RPC message for the session's worker.
    pub fn enqueue(&self, id: &str, message: Value) -> Result<(), EnqueueError> {
        let inbox = lock(&self.sse)
            .get(id)
            .map(|s| s.inbox.clone())
            .ok_or(EnqueueError::UnknownSession)?;
        inbox.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::UnknownSession,
        })
    }

    pub fn close_sse(&self, id: &str) -> bool {
        let removed = lock(&self.sse).remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, "sse: session closed");
        }
        removed
    }

    pub fn sse_count(&self) -> usize {
        lock(&self.sse).len()
    }

    // ── Streamable HTTP ─────────────────────────────────────────────────────

    pub fn open_http(&self, role: Role) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();
        let mut sessions = lock(&self.http);

        let expired = self.remove_expired(&mut sessions, now);
        if expired > 0 {
            tracing::debug!(expired, "mcp: expired idle http sessions");
        }

        // At the per-role cap, the least recently used session of this role goes.
        let in_role = sessions.values().filter(|s| s.role == role).count();
        if in_role >= self.http_max_per_role {
            let oldest = sessions
                .iter()
                .filter(|(_, s)| s.role == role)
                .min_by_key(|(_, s)| s.last_seen)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                sessions.remove(&oldest);
                tracing::debug!(session_id = %oldest, "mcp: evicted http session at per-role cap");
            }
        }

        sessions.insert(
            id.clone(),
            HttpSession {
                role,
                opened_at: now,
                last_seen: now,
            },
        );
        tracing::debug!(session_id = %id, "mcp: http session opened");
        id
    }

    /// `true` if `id` is a live HTTP session opened under `role`. A hit
    /// refreshes the session's idle timer; an expired entry is dropped.
    pub fn http_session_valid(&self, id: &str, role: &Role) -> bool {
        let now = Instant::now();
        let mut sessions = lock(&self.http);
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        if now.duration_since(session.last_seen) >= self.http_ttl {
            sessions.remove(id);
            return false;
        }
        if &session.role != role {
            return false;
        }
        session.last_seen = now;
        true
    }

    /// Drop every HTTP session idle for longer than the TTL.
    pub fn sweep_expired_http(&self) -> usize {
        let mut sessions = lock(&self.http);
        self.remove_expired(&mut sessions, Instant::now())
    }

    fn remove_expired(&self, sessions: &mut HashMap<String, HttpSession>, now: Instant) -> usize {
        let before = sessions.len();
        sessions.retain(|_, s| now.duration_since(s.last_seen) < self.http_ttl);
        before - sessions.len()
    }

    pub fn close_http(&self, id: &str) -> bool {
        match lock(&self.http).remove(id) {
            Some(session) => {
                tracing::debug!(
                    session_id = %id,
                    age_secs = session.opened_at.elapsed().as_secs(),
                    "mcp: http session closed"
                );
                true
            }
            None => false,
        }
    }

    pub fn http_count(&self) -> usize {
        lock(&self.http).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Removes its SSE session from the store when dropped.
pub struct SseGuard {
    store: Arc<SessionStore>,
    id: String,
}

impl SseGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SseGuard {
    fn drop(&mut self) {
        self.store.close_sse(&self.id);
    }
}
