// Shared server handle passed to every transport binding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthGateway;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::mcp::session::SessionStore;
use crate::registry::Registry;

/// Central server state. Cheap to clone: every field is an `Arc` or cheap
/// handle. Built once by the lifecycle after registration has finished, so
/// the registry inside is already frozen.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthGateway>,
    pub dispatcher: Dispatcher,
    pub sessions: Arc<SessionStore>,
    /// Cancelled on SIGINT/SIGTERM; observed by the listener and every SSE stream.
    pub shutdown: CancellationToken,
    pub start_time: Instant,
    pub ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: Config, auth: Arc<AuthGateway>, registry: Registry) -> Self {
        let dispatcher = Dispatcher::new(Arc::new(registry)).with_timeout(config.tool_timeout);
        let sessions = Arc::new(SessionStore::with_http_limits(
            config.http_session_ttl,
            config.max_http_sessions_per_role,
        ));
        Self {
            config: Arc::new(config),
            auth,
            dispatcher,
            sessions,
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registry(&self) -> &Registry {
        self.dispatcher.registry()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
        tracing::info!("Server marked as READY");
    }
}
