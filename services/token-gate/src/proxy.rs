//! HTTP proxy logic
//!
//! Forwards gated requests to the upstream API. The `token` header set (or
//! passed through) by the gate becomes `Authorization: Bearer`; gate headers,
//! `host` and hop-by-hop headers never reach upstream. Upstream responses,
//! including error statuses, are returned verbatim.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};

use crate::gate::{ACCESS_CODE_HEADER, TOKEN_HEADER};
use crate::metrics;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request body limit.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Up to 2 retries on upstream timeout.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    /// `{protocol}://{base_url}` without trailing slash
    pub upstream_url: String,
    pub timeout: Duration,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
}

/// Decrements `in_flight` when the request finishes, however it finishes.
struct InFlightGuard(Arc<AtomicU64>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// JSON error body: {"error":{"type":"proxy_error","message":"...","request_id":"req_..."}}
pub fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "proxy_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Proxy a gated request to upstream, retrying timeouts.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let _in_flight = InFlightGuard::enter(&state.in_flight);
    let started = Instant::now();
    let method = request.method().clone();

    let response = forward(state, request, &request_id).await;

    if response.status().is_client_error() || response.status().is_server_error() {
        state.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: &str,
) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let method = request.method().clone();
    let upstream_url = match request.uri().path_and_query() {
        Some(pq) => format!("{}{}", state.upstream_url, pq),
        None => state.upstream_url.clone(),
    };
    let headers = upstream_headers(request.headers());

    let body_bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
                request_id,
            );
        }
    };

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            warn!(attempt, "retrying after upstream timeout");
            tokio::time::sleep(RETRY_DELAY).await;
        }

        let req = state
            .client
            .request(method.clone(), &upstream_url)
            .headers(headers.clone())
            .timeout(state.timeout)
            .body(body_bytes.clone());

        match req.send().await {
            Ok(upstream_response) => {
                let status = upstream_response.status();
                let resp_headers = upstream_response.headers().clone();

                return match upstream_response.bytes().await {
                    Ok(resp_body) => {
                        let mut response = Response::builder().status(status);
                        for (name, value) in &resp_headers {
                            if !is_hop_by_hop(name.as_str()) {
                                response = response.header(name, value);
                            }
                        }
                        response
                            .body(axum::body::Body::from(resp_body))
                            .unwrap_or_else(|e| {
                                error_response(
                                    StatusCode::INTERNAL_SERVER_ERROR,
                                    &format!("response build error: {e}"),
                                    request_id,
                                )
                            })
                    }
                    Err(e) => {
                        metrics::record_upstream_error("body_read");
                        error!(error = %e, "failed to read upstream response body");
                        error_response(
                            StatusCode::BAD_GATEWAY,
                            &format!("upstream response read error: {e}"),
                            request_id,
                        )
                    }
                };
            }
            Err(e) if e.is_timeout() && attempt < MAX_ATTEMPTS - 1 => continue,
            Err(e) if e.is_timeout() => {
                metrics::record_upstream_error("timeout");
                error!(error = %e, attempts = MAX_ATTEMPTS, "upstream timeout after all retries");
                return error_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    &format!(
                        "upstream timeout after {}s ({MAX_ATTEMPTS} attempts)",
                        state.timeout.as_secs()
                    ),
                    request_id,
                );
            }
            Err(e) => {
                metrics::record_upstream_error("connection");
                error!(error = %e, "upstream request failed");
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    &format!("upstream error: {e}"),
                    request_id,
                );
            }
        }
    }

    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "unexpected retry exhaustion",
        request_id,
    )
}

/// Copy inbound headers for upstream, turning the gated `token` into
/// `Authorization: Bearer`.
fn upstream_headers(inbound: &axum::http::HeaderMap) -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in inbound {
        let name_str = name.as_str();
        if is_hop_by_hop(name_str)
            || *name == axum::http::header::HOST
            || *name == axum::http::header::AUTHORIZATION
            || name_str == ACCESS_CODE_HEADER
            || name_str == TOKEN_HEADER
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let token = inbound
        .get(TOKEN_HEADER)
        .map(|v| v.as_bytes().trim_ascii())
        .filter(|t| !t.is_empty());
    if let Some(token) = token {
        let mut bearer = b"Bearer ".to_vec();
        bearer.extend_from_slice(token);
        match HeaderValue::from_bytes(&bearer) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
            Err(e) => warn!(error = %e, "dropping token that is not a valid header value"),
        }
    }
    headers
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn test_hop_by_hop_detection() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(is_hop_by_hop("keep-alive"));
        assert!(is_hop_by_hop("Proxy-Authorization"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("Authorization"));
        assert!(!is_hop_by_hop("Token"));
    }

    #[test]
    fn token_becomes_bearer_authorization() {
        let mut inbound = HeaderMap::new();
        inbound.insert("token", HeaderValue::from_static("sk-abc"));
        inbound.insert("access-code", HeaderValue::from_static("abc"));
        inbound.insert("authorization", HeaderValue::from_static("Bearer sk-caller"));
        inbound.insert("host", HeaderValue::from_static("gate.local"));
        inbound.insert("content-type", HeaderValue::from_static("application/json"));

        let out = upstream_headers(&inbound);
        assert_eq!(out.get("authorization").unwrap(), "Bearer sk-abc");
        assert!(out.get("authorization").unwrap().is_sensitive());
        assert!(out.get("token").is_none());
        assert!(out.get("access-code").is_none());
        assert!(out.get("host").is_none());
        assert_eq!(out.get("content-type").unwrap(), "application/json");
    }

    #[test]
    fn missing_token_sends_no_authorization() {
        let mut inbound = HeaderMap::new();
        inbound.insert("authorization", HeaderValue::from_static("Bearer sk-caller"));
        inbound.insert("token", HeaderValue::from_static("  "));

        let out = upstream_headers(&inbound);
        assert!(out.get("authorization").is_none());
    }

    #[test]
    fn repeated_headers_are_preserved() {
        let mut inbound = HeaderMap::new();
        inbound.append("x-multi", HeaderValue::from_static("a"));
        inbound.append("x-multi", HeaderValue::from_static("b"));

        let out = upstream_headers(&inbound);
        let values: Vec<_> = out.get_all("x-multi").iter().collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_error_response_format() {
        let resp = error_response(
            StatusCode::GATEWAY_TIMEOUT,
            "upstream timeout after 60s",
            "req_abc123",
        );
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "proxy_error");
        assert_eq!(json["error"]["request_id"], "req_abc123");
    }
}
