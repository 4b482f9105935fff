// Startup ordering and graceful shutdown.
//
// Order is fixed: configuration, auth gateway + admin key, registry, handler
// module registration, listener bind, readiness summary. Registration errors
// abort startup before anything is served.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AuthGateway;
use crate::config::Config;
use crate::mcp::http::MCP_SESSION_ID;
use crate::models::Role;
use crate::registry::{HandlerModule, Registry};
use crate::state::AppState;
use crate::tools;

const HTTP_SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Server state plus the one plaintext copy of the admin key.
pub struct Bootstrap {
    pub state: AppState,
    pub admin_key: String,
}

/// Handler modules compiled into this binary.
pub fn default_modules() -> Vec<HandlerModule> {
    vec![tools::basic_tools()]
}

/// Auth gateway + admin key, then registry, then module registration.
pub fn bootstrap(config: Config, modules: Vec<HandlerModule>) -> anyhow::Result<Bootstrap> {
    let auth = Arc::new(AuthGateway::new());
    let admin_key = auth
        .generate_admin_key()
        .context("generating admin key")?;
    for key in &config.user_api_keys {
        auth.register_key(key, Role::user());
    }
    if !config.user_api_keys.is_empty() {
        tracing::info!(count = config.user_api_keys.len(), "auth: user keys loaded from USER_API_KEYS");
    }

    let mut registry = Registry::new();
    for module in modules {
        let name = module.name.clone();
        registry
            .register(module)
            .with_context(|| format!("registering handler module '{}'", name))?;
    }

    Ok(Bootstrap {
        state: AppState::new(config, auth, registry),
        admin_key,
    })
}

/// Wrap the router with the HTTP hardening layers used in production.
pub fn build_app(state: AppState) -> anyhow::Result<axum::Router> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static(MCP_SESSION_ID),
        ])
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID)])
        .max_age(Duration::from_secs(86_400));

    let nosniff: SetResponseHeaderLayer<HeaderValue> = SetResponseHeaderLayer::overriding(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    // Per-IP rate limiting: 200 req burst, replenish one every 20ms (50 req/s).
    let governor_conf = GovernorConfigBuilder::default()
        .per_millisecond(20)
        .burst_size(200)
        .finish()
        .context("invalid rate limit configuration")?;

    let max_body = state.config.max_body_bytes;
    Ok(crate::create_router(state)
        .layer(GovernorLayer::new(governor_conf))
        .layer(axum::middleware::map_response(crate::mcp::rate_limited_as_rpc))
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(cors)
        .layer(nosniff)
        .layer(
            // Path only: the query string may carry an API key.
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        ))
}

/// Step (f): the readiness summary at `info`, then the admin key on its own
/// `warn` line so it still shows under `RUST_LOG=warn`. The key is surfaced
/// there and nowhere else.
pub fn log_readiness(state: &AppState, addr: SocketAddr, admin_key: &str) {
    tracing::info!("{}", readiness_summary(state, addr));
    tracing::warn!("{}", admin_key_notice(admin_key));
}

fn readiness_summary(state: &AppState, addr: SocketAddr) -> String {
    let registry = state.registry();
    format!(
        "{} v{} listening on http://{} | transports: streamable HTTP /mcp, legacy SSE /sse (+ {}) | modules: [{}] | tools: [{}] | api keys: {}",
        state.config.server_name,
        state.config.server_version,
        addr,
        crate::mcp::sse::MESSAGES_PATH,
        registry.module_names().join(", "),
        registry.tool_names().join(", "),
        state.auth.key_count(),
    )
}

fn admin_key_notice(admin_key: &str) -> String {
    format!(
        "admin API key: {} (pass as ?apiKey=, x-api-key or Bearer; regenerated on every start)",
        admin_key
    )
}

/// Periodically drop idle streamable HTTP sessions until shutdown.
async fn sweep_http_sessions(state: AppState) {
    let mut interval = tokio::time::interval(HTTP_SESSION_SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = interval.tick() => {
                let expired = state.sessions.sweep_expired_http();
                if expired > 0 {
                    tracing::debug!(expired, "mcp: swept idle http sessions");
                }
            }
        }
    }
}

/// Run the whole lifecycle until a termination signal has been handled.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = config.listen_addr();
    let grace = config.shutdown_grace;

    let Bootstrap { state, admin_key } = bootstrap(config, default_modules())?;
    let app = build_app(state.clone())?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    let local_addr = listener.local_addr().unwrap_or(addr);

    log_readiness(&state, local_addr, &admin_key);
    drop(admin_key);
    state.mark_ready();
    tokio::spawn(sweep_http_sessions(state.clone()));

    let shutdown = state.shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    });

    tokio::select! {
        res = &mut server => {
            // Listener stopped without a signal.
            res.context("server task failed")?.context("server error")?;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    state.shutdown.cancel();
    match tokio::time::timeout(grace, server).await {
        Ok(res) => {
            res.context("server task failed")?.context("server error")?;
            tracing::info!("Shutdown complete");
        }
        Err(_) => tracing::warn!(
            "Shutdown grace period of {}s elapsed, abandoning in-flight requests",
            grace.as_secs()
        ),
    }
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    #[test]
    fn bootstrap_registers_default_modules_and_admin_key() {
        let boot = bootstrap(Config::default(), default_modules()).unwrap();
        assert_eq!(
            boot.state.registry().tool_names(),
            vec!["echo", "current-time", "calculate"]
        );
        assert_eq!(boot.state.auth.authenticate(&boot.admin_key), Ok(Role::admin()));
        assert!(!boot.state.is_ready());
    }

    #[test]
    fn readiness_summary_lists_modules_and_tools_but_not_the_admin_key() {
        let boot = bootstrap(Config::default(), default_modules()).unwrap();
        let addr: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        let summary = readiness_summary(&boot.state, addr);

        assert!(summary.contains("listening on http://127.0.0.1:4001"));
        assert!(summary.contains("modules: [basic-tools]"));
        assert!(summary.contains("tools: [echo, current-time, calculate]"));
        assert!(summary.contains("api keys: 1"));
        assert!(!summary.contains(&boot.admin_key));
        assert!(admin_key_notice(&boot.admin_key).contains(&boot.admin_key));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_drops_idle_sessions_and_stops_on_shutdown() {
        let config = Config {
            http_session_ttl: Duration::from_secs(30),
            ..Config::default()
        };
        let boot = bootstrap(config, vec![]).unwrap();
        let state = boot.state;
        state.sessions.open_http(Role::user());
        let sweeper = tokio::spawn(sweep_http_sessions(state.clone()));

        tokio::time::sleep(HTTP_SESSION_SWEEP_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(state.sessions.http_count(), 0);

        state.shutdown.cancel();
        sweeper.await.unwrap();
    }

    #[test]
    fn bootstrap_loads_configured_user_keys() {
        let config = Config {
            user_api_keys: vec!["team-key".into()],
            ..Config::default()
        };
        let boot = bootstrap(config, vec![]).unwrap();
        assert_eq!(boot.state.auth.authenticate("team-key"), Ok(Role::user()));
    }

    #[test]
    fn duplicate_module_aborts_startup() {
        let err = bootstrap(
            Config::default(),
            vec![tools::basic_tools(), tools::basic_tools()],
        )
        .err()
        .expect("duplicate registration must fail");
        assert_eq!(
            err.downcast_ref::<RegistryError>(),
            Some(&RegistryError::DuplicateToolName {
                tool: "echo".into(),
                module: "basic-tools".into()
            })
        );
    }
}
