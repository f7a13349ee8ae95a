//! Static key provider: a fixed API key from configuration.
//!
//! Takes precedence over the free-token pool whenever `OPENAI_API_KEY` is set.

use crate::{Provider, ProviderError, ProviderHealth};
use common::Secret;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// Hands out the same configured key for every request.
pub struct StaticKeyProvider {
    key: Secret<String>,
}

impl StaticKeyProvider {
    pub fn new(key: Secret<String>) -> Self {
        Self { key }
    }
}

impl Provider for StaticKeyProvider {
    fn id(&self) -> &str {
        "static"
    }

    fn resolve_token(
        &self,
    ) -> Pin<Box<dyn Future<Output = crate::Result<Secret<String>>> + Send + '_>> {
        Box::pin(async move {
            if self.key.expose().trim().is_empty() {
                return Err(ProviderError::NoCredential(
                    "static api key is empty".into(),
                ));
            }
            debug!(token = %self.key.masked(), "using static api key");
            Ok(self.key.clone())
        })
    }

    fn health(&self) -> Pin<Box<dyn Future<Output = ProviderHealth> + Send + '_>> {
        Box::pin(async {
            ProviderHealth {
                status: "healthy".to_string(),
                pool: None,
            }
        })
    }
}
