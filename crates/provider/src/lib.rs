//! System credential providers for the request gate
//!
//! Defines the `Provider` trait that decouples the gate from where a system
//! token comes from. `StaticKeyProvider` hands out a configured API key;
//! the free-token provider in the service resolves one from a remote pool of
//! candidates. The gate only consults a provider when the caller did not
//! bring a token of their own.

pub mod static_key;

pub use static_key::StaticKeyProvider;

use common::Secret;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

/// Health status reported by a provider for the /health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    /// Overall status: "healthy", "degraded", or "unhealthy"
    pub status: String,
    /// Provider-specific details (e.g. retained pool size in free-token mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<serde_json::Value>,
}

/// Errors from credential resolution.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// No usable credential right now. Surfaced to clients as "Empty Api Key".
    #[error("no credential available: {0}")]
    NoCredential(String),
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Source of the system token injected for callers without their own.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Provider>`).
pub trait Provider: Send + Sync {
    /// Identifier for logging and health reporting (e.g. "static", "free-tokens")
    fn id(&self) -> &str;

    /// Resolve one token to inject into the outgoing request.
    ///
    /// Returns `NoCredential` when nothing usable is available; the gate turns
    /// that into a 401 rejection.
    fn resolve_token(&self) -> Pin<Box<dyn Future<Output = Result<Secret<String>>> + Send + '_>>;

    /// Provider health for the /health endpoint.
    fn health(&self) -> Pin<Box<dyn Future<Output = ProviderHealth> + Send + '_>>;
}
