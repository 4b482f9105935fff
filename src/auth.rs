// API-key authentication at the transport boundary.
//
// Keys are kept only as SHA-256 digests. `authenticate` compares the digest
// of the presented key against every stored record in constant time and
// never exits early, so a miss costs the same as a hit.
// Authorization (a tool's permitted roles) is checked later by the dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode, Uri},
    middleware::Next,
    response::Response,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::{ConditionallySelectable, ConstantTimeEq};

use crate::error::AuthError;
use crate::mcp::protocol::UNAUTHENTICATED;
use crate::mcp::rpc_error;
use crate::models::Role;
use crate::state::AppState;

const KEY_BYTES: usize = 32;
const KEY_PREFIX: &str = "mcp_";
const NO_MATCH: u32 = u32::MAX;

struct ApiKeyRecord {
    digest: [u8; 32],
    role: Role,
}

/// Issues and validates API keys, mapping each key to a single role.
pub struct AuthGateway {
    keys: RwLock<Vec<ApiKeyRecord>>,
    admin_issued: AtomicBool,
}

impl Default for AuthGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthGateway {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(Vec::new()),
            admin_issued: AtomicBool::new(false),
        }
    }

    /// Generate the admin key. Allowed exactly once per process; the returned
    /// plaintext is the only copy.
    pub fn generate_admin_key(&self) -> Result<String, AuthError> {
        if self.admin_issued.swap(true, Ordering::AcqRel) {
            return Err(AuthError::AdminKeyAlreadyIssued);
        }
        Ok(self.issue_key(Role::admin()))
    }

    /// Mint a fresh random key bound to `role`.
    pub fn issue_key(&self, role: Role) -> String {
        let key = random_key();
        self.register_key(&key, role);
        key
    }

    /// Bind an externally supplied key (e.g. from configuration) to `role`.
    pub fn register_key(&self, key: &str, role: Role) {
        let record = ApiKeyRecord {
            digest: digest(key),
            role,
        };
        self.keys
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(record);
    }

    pub fn authenticate(&self, presented: &str) -> Result<Role, AuthError> {
        let presented = digest(presented);
        let keys = self.keys.read().unwrap_or_else(|p| p.into_inner());

        let mut found = NO_MATCH;
        for (i, record) in keys.iter().enumerate() {
            let hit = record.digest[..].ct_eq(&presented[..]);
            found = u32::conditional_select(&found, &(i as u32), hit);
        }

        keys.get(found as usize)
            .map(|r| r.role.clone())
            .ok_or(AuthError::Unauthenticated)
    }

    pub fn key_count(&self) -> usize {
        self.keys.read().unwrap_or_else(|p| p.into_inner()).len()
    }
}

fn random_key() -> String {
    let mut buf = [0u8; KEY_BYTES];
    OsRng.fill_bytes(&mut buf);
    format!("{}{}", KEY_PREFIX, URL_SAFE_NO_PAD.encode(buf))
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

// ── Credential extraction ───────────────────────────────────────────────────

/// Find the presented API key: `?apiKey=` / `?api_key=` query parameter,
/// then the `x-api-key` header, then `Authorization: Bearer`.
pub fn extract_api_key(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Ok(Query(params)) = Query::<HashMap<String, String>>::try_from_uri(uri) {
        if let Some(key) = params.get("apiKey").or_else(|| params.get("api_key")) {
            return Some(key.clone());
        }
    }

    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }

    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

// ── Middleware ──────────────────────────────────────────────────────────────

/// Role resolved by [`require_api_key`], available to handlers as an
/// `Extension<Caller>`.
#[derive(Debug, Clone)]
pub struct Caller {
    pub role: Role,
}

/// Reject requests without a valid API key before any tool logic runs.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let presented = extract_api_key(request.headers(), request.uri());
    // A missing key still goes through the full comparison.
    match state.auth.authenticate(presented.as_deref().unwrap_or_default()) {
        Ok(role) => {
            request.extensions_mut().insert(Caller { role });
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!(
                path = %request.uri().path(),
                key_present = presented.is_some(),
                "auth: {}",
                e
            );
            unauthenticated()
        }
    }
}

pub fn unauthenticated() -> Response {
    rpc_error(
        StatusCode::UNAUTHORIZED,
        UNAUTHENTICATED,
        &AuthError::Unauthenticated.to_string(),
    )
}
