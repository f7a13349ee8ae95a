//! Request gate: access codes and credential injection
//!
//! Precedence for each inbound request:
//! 1. A caller-supplied `token` header always passes through untouched.
//! 2. Otherwise, if access codes are configured, the MD5 of the `access-code`
//!    header must be one of them, or the request is rejected (401,
//!    `needAccessCode: true`).
//! 3. Otherwise a system token is resolved from the provider and written to
//!    the `token` header; no token means 401 "Empty Api Key".
//!
//! The gate touches no header other than `token`.

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use provider::Provider;
use tracing::{debug, info, warn};

use crate::metrics;

/// Raw access code supplied by the end user.
pub const ACCESS_CODE_HEADER: &str = "access-code";

/// Caller's own credential, or the injected system token.
pub const TOKEN_HEADER: &str = "token";

/// MD5 hex digest of an access code.
pub fn hash_access_code(code: &str) -> String {
    format!("{:x}", md5::compute(code.as_bytes()))
}

/// Allow-set of hashed access codes. Empty means the gate is open.
#[derive(Debug, Clone, Default)]
pub struct AccessCodes(HashSet<String>);

impl AccessCodes {
    /// Build from MD5 hex digests (case-insensitive).
    pub fn new(hashed: impl IntoIterator<Item = String>) -> Self {
        Self(
            hashed
                .into_iter()
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether `code` hashes into the allow-set. A missing code hashes as "".
    pub fn allows(&self, code: Option<&str>) -> bool {
        self.0.contains(&hash_access_code(code.unwrap_or_default()))
    }
}

/// What the gate does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Access code missing or wrong and no caller token.
    RejectAccess,
    /// Resolve a system token and inject it.
    InjectSystemToken,
    /// Forward with the caller's own token.
    UseCallerToken,
}

/// Pure gate decision from the access-code check and caller token presence.
pub fn decide(codes: &AccessCodes, access_code: Option<&str>, has_user_token: bool) -> Decision {
    if has_user_token {
        return Decision::UseCallerToken;
    }
    if !codes.is_empty() && !codes.allows(access_code) {
        return Decision::RejectAccess;
    }
    Decision::InjectSystemToken
}

/// Terminal gate outcomes, rendered as 401 JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("access code missing or invalid")]
    NeedAccessCode,

    #[error("no api key available")]
    EmptyApiKey,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = match self {
            Rejection::NeedAccessCode => serde_json::json!({
                "error": true,
                "needAccessCode": true,
                "msg": "Please go settings page and fill your access code.",
            }),
            Rejection::EmptyApiKey => serde_json::json!({
                "error": true,
                "msg": "Empty Api Key",
            }),
        };
        (
            StatusCode::UNAUTHORIZED,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

/// Gate shared by all proxied routes.
pub struct Gate {
    access_codes: AccessCodes,
    provider: Arc<dyn Provider>,
}

impl Gate {
    pub fn new(access_codes: AccessCodes, provider: Arc<dyn Provider>) -> Self {
        Self {
            access_codes,
            provider,
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Apply the gate to an inbound request's headers.
    ///
    /// On success the `token` header holds the credential to use upstream.
    pub async fn authorize(&self, headers: &mut HeaderMap) -> Result<Decision, Rejection> {
        let has_user_token = headers
            .get(TOKEN_HEADER)
            .is_some_and(|v| !v.as_bytes().trim_ascii().is_empty());
        let access_code = headers
            .get(ACCESS_CODE_HEADER)
            .and_then(|v| v.to_str().ok());
        debug!(
            allowed_codes = self.access_codes.len(),
            access_code_supplied = access_code.is_some(),
            has_user_token,
            "evaluating gate"
        );

        match decide(&self.access_codes, access_code, has_user_token) {
            Decision::RejectAccess => {
                warn!("rejected request: access code missing or invalid");
                metrics::record_gate_decision("need_access_code");
                Err(Rejection::NeedAccessCode)
            }
            Decision::UseCallerToken => {
                info!("set user token");
                metrics::record_gate_decision("user_token");
                Ok(Decision::UseCallerToken)
            }
            Decision::InjectSystemToken => {
                let token = match self.provider.resolve_token().await {
                    Ok(token) => token,
                    Err(e) => {
                        warn!(provider = self.provider.id(), error = %e, "no system token available");
                        metrics::record_gate_decision("empty_api_key");
                        return Err(Rejection::EmptyApiKey);
                    }
                };
                let mut value = HeaderValue::from_str(token.expose()).map_err(|e| {
                    warn!(token = %token.masked(), error = %e, "system token is not a valid header value");
                    metrics::record_gate_decision("empty_api_key");
                    Rejection::EmptyApiKey
                })?;
                value.set_sensitive(true);
                headers.insert(TOKEN_HEADER, value);
                info!(provider = self.provider.id(), token = %token.masked(), "set system token");
                metrics::record_gate_decision("system_token");
                Ok(Decision::InjectSystemToken)
            }
        }
    }
}
