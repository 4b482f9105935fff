use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Authorization label attached to an API key and checked against a tool's
/// permitted set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub const ADMIN: &'static str = "admin";
    pub const USER: &'static str = "user";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn admin() -> Self {
        Self::new(Self::ADMIN)
    }

    pub fn user() -> Self {
        Self::new(Self::USER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Call context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    StreamableHttp,
    Sse,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::StreamableHttp => f.write_str("streamable_http"),
            Transport::Sse => f.write_str("sse"),
        }
    }
}

/// Per-request context handed to a handler's dispatch function.
/// Created once per inbound request and dropped when the call finishes.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub role: Role,
    pub session_id: Option<String>,
    pub request_id: String,
    pub transport: Transport,
}

impl CallContext {
    pub fn new(role: Role, transport: Transport, session_id: Option<String>) -> Self {
        Self {
            role,
            session_id,
            request_id: uuid::Uuid::new_v4().to_string(),
            transport,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Normalized result of one tool invocation. Serialized untagged, so callers
/// see either `{ "result", "message" }` or `{ "error" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Success { result: Value, message: String },
    Error { error: String },
}

impl Outcome {
    pub fn success(result: Value, message: impl Into<String>) -> Self {
        Outcome::Success {
            result,
            message: message.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Outcome::Error {
            error: error.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }

    /// Human-readable summary: the success message or the error text.
    pub fn summary(&self) -> &str {
        match self {
            Outcome::Success { message, .. } => message,
            Outcome::Error { error } => error,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub app: String,
    pub uptime_seconds: u64,
    pub tools: usize,
    pub sse_sessions: usize,
}
