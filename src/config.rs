// Runtime configuration from environment variables (`.env` honoured via dotenvy).

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::mcp::session::{DEFAULT_HTTP_SESSION_TTL, MAX_HTTP_SESSIONS_PER_ROLE};

pub const DEFAULT_PORT: u16 = 4001;
pub const DEFAULT_SERVER_NAME: &str = "dynamic-mcp-server";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub server_name: String,
    pub server_version: String,
    /// Extra keys bound to the `user` role (`USER_API_KEYS`, comma-separated).
    pub user_api_keys: Vec<String>,
    pub tool_timeout: Duration,
    pub shutdown_grace: Duration,
    pub max_body_bytes: usize,
    /// Idle time after which a streamable HTTP session is forgotten.
    pub http_session_ttl: Duration,
    pub max_http_sessions_per_role: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            user_api_keys: Vec::new(),
            tool_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
            max_body_bytes: 1024 * 1024,
            http_session_ttl: DEFAULT_HTTP_SESSION_TTL,
            max_http_sessions_per_role: MAX_HTTP_SESSIONS_PER_ROLE,
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup; unset or empty variables
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let user_api_keys = get("USER_API_KEYS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: parse_var("HOST", get("HOST"), defaults.host)?,
            port: parse_var("PORT", get("PORT"), defaults.port)?,
            server_name: get("MCP_SERVER_NAME").unwrap_or(defaults.server_name),
            server_version: defaults.server_version,
            user_api_keys,
            tool_timeout: secs_var("TOOL_TIMEOUT_SECS", get("TOOL_TIMEOUT_SECS"), defaults.tool_timeout)?,
            shutdown_grace: secs_var(
                "SHUTDOWN_GRACE_SECS",
                get("SHUTDOWN_GRACE_SECS"),
                defaults.shutdown_grace,
            )?,
            max_body_bytes: parse_var("MAX_BODY_BYTES", get("MAX_BODY_BYTES"), defaults.max_body_bytes)?,
            http_session_ttl: secs_var(
                "HTTP_SESSION_TTL_SECS",
                get("HTTP_SESSION_TTL_SECS"),
                defaults.http_session_ttl,
            )?,
            max_http_sessions_per_role: parse_var(
                "MAX_HTTP_SESSIONS_PER_ROLE",
                get("MAX_HTTP_SESSIONS_PER_ROLE"),
                defaults.max_http_sessions_per_role,
            )?,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_var<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn secs_var(var: &'static str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_var(var, raw, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            var,
            value: "0".into(),
            reason: "must be at least 1 second".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}
