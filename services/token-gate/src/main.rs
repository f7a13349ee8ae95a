//! Free Token Gate
//!
//! Single-binary Rust service that:
//! 1. Checks the caller's access code against the configured allow-set
//! 2. Injects a system token (static key or a live free token) when the
//!    caller brings none
//! 3. Proxies the request to the OpenAI-compatible upstream

mod config;
mod gate;
mod metrics;
mod provider_impl;
mod proxy;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use free_tokens::{Fetcher, Prober, Resolver};
use metrics_exporter_prometheus::PrometheusHandle;
use provider::{Provider, StaticKeyProvider};

use crate::config::Config;
use crate::gate::{AccessCodes, Gate};
use crate::metrics::ServiceMetrics;
use crate::provider_impl::FreeTokenProvider;
use crate::proxy::ProxyState;

/// How long in-flight requests may take to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    gate: Arc<Gate>,
    proxy: ProxyState,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit layer caps simultaneous requests at `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(gated_proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Pick the system credential source: a static key wins over free tokens.
fn build_provider(config: &Config, client: &reqwest::Client) -> Arc<dyn Provider> {
    if let Some(key) = &config.gate.api_key {
        info!(key = %key.masked(), "using static api key");
        return Arc::new(StaticKeyProvider::new(key.clone()));
    }

    let ft = &config.free_tokens;
    let fetcher = Fetcher::new(
        client.clone(),
        ft.provider_url.clone(),
        Duration::from_millis(ft.response_cache_ms),
        ft.strict,
    );
    let prober = Prober::new(
        client.clone(),
        &config.upstream.protocol,
        config.upstream.base_url.trim_end_matches('/'),
        Duration::from_secs(ft.probe_timeout_secs),
    );
    info!(
        provider_url = %fetcher.url(),
        probe_endpoint = %prober.endpoint(),
        policy = ft.policy.label(),
        "using free tokens"
    );
    let resolver = Resolver::new(
        Arc::new(fetcher),
        Arc::new(prober),
        ft.policy,
        Duration::from_millis(ft.validity_ms),
    );
    Arc::new(FreeTokenProvider::new(Arc::new(resolver)))
}

/// Assemble the application state from a loaded config.
fn app_state(config: &Config, metrics: ServiceMetrics, prometheus: PrometheusHandle) -> AppState {
    let client = reqwest::Client::new();
    let provider = build_provider(config, &client);
    let gate = Gate::new(
        AccessCodes::new(config.gate.access_codes.iter().cloned()),
        provider,
    );

    AppState {
        gate: Arc::new(gate),
        proxy: ProxyState {
            client,
            upstream_url: config.upstream.url(),
            timeout: Duration::from_secs(config.upstream.timeout_secs),
            requests_total: metrics.requests_total.clone(),
            errors_total: metrics.errors_total.clone(),
            in_flight: metrics.in_flight.clone(),
        },
        metrics,
        prometheus,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting free-token-gate");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    match &config_path {
        Some(path) => info!(path = %path.display(), "loading configuration"),
        None => info!("no config file, using environment and defaults"),
    }

    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;

    info!(
        listen_addr = %config.server.listen_addr,
        upstream_url = %config.upstream.url(),
        access_codes = config.gate.access_codes.len(),
        static_key = config.gate.api_key.is_some(),
        "configuration loaded"
    );

    let metrics = ServiceMetrics::new();
    let in_flight = metrics.in_flight.clone();
    let app = build_router(
        app_state(&config, metrics, prometheus_handle),
        config.server.max_connections,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: service counters plus provider health.
/// 200 while the provider is healthy or degraded, 503 when unhealthy.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);
    let provider = state.gate.provider();
    let health = provider.health().await;

    let status_code = if health.status == "unhealthy" {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };
    let body = serde_json::json!({
        "status": health.status,
        "provider": provider.id(),
        "pool": health.pool,
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler: gate the request, then proxy it upstream.
async fn gated_proxy_handler(
    State(state): State<AppState>,
    mut request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let started = Instant::now();

    if let Err(rejection) = state.gate.authorize(request.headers_mut()).await {
        state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
        let response = rejection.into_response();
        metrics::record_request(
            response.status().as_u16(),
            request.method().as_str(),
            started.elapsed().as_secs_f64(),
        );
        return response;
    }

    proxy::proxy_request(&state.proxy, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
