//! Free-token provider backed by the resolver.
//!
//! Every call runs one resolution cycle; there is no token stickiness between
//! requests beyond what the resolver itself retains.

use common::Secret;
use free_tokens::Resolver;
use provider::{Provider, ProviderError, ProviderHealth};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

pub struct FreeTokenProvider {
    resolver: Arc<Resolver>,
}

impl FreeTokenProvider {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }
}

impl Provider for FreeTokenProvider {
    fn id(&self) -> &str {
        "free-tokens"
    }

    fn resolve_token(
        &self,
    ) -> Pin<Box<dyn Future<Output = provider::Result<Secret<String>>> + Send + '_>> {
        Box::pin(async move {
            match self.resolver.resolve().await {
                Some(token) => Ok(Secret::new(token)),
                None => {
                    debug!(policy = self.resolver.policy().label(), "resolution cycle found nothing");
                    Err(ProviderError::NoCredential(
                        "no usable free token in the current pool".into(),
                    ))
                }
            }
        })
    }

    fn health(&self) -> Pin<Box<dyn Future<Output = ProviderHealth> + Send + '_>> {
        Box::pin(async move {
            let pool = self.resolver.health();
            let status = pool["status"].as_str().unwrap_or("healthy").to_string();
            ProviderHealth {
                status,
                pool: Some(pool),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use free_tokens::{CandidateSource, Policy, Probe, Verdict};
    use std::time::Duration;

    struct ListSource(Option<Vec<String>>);

    impl CandidateSource for ListSource {
        fn fetch_candidates(
            &self,
        ) -> Pin<Box<dyn Future<Output = Option<Vec<String>>> + Send + '_>> {
            let list = self.0.clone();
            Box::pin(async move { list })
        }
    }

    /// Only `sk-live` is usable.
    struct LiveOnly;

    impl Probe for LiveOnly {
        fn probe<'a>(&'a self, token: &'a str) -> Pin<Box<dyn Future<Output = Verdict> + Send + 'a>> {
            Box::pin(async move {
                if token == "sk-live" {
                    Verdict::Usable
                } else {
                    Verdict::Unusable
                }
            })
        }
    }

    fn provider(list: Option<Vec<&str>>, policy: Policy) -> FreeTokenProvider {
        let list = list.map(|l| l.into_iter().map(String::from).collect());
        let resolver = Resolver::new(
            Arc::new(ListSource(list)),
            Arc::new(LiveOnly),
            policy,
            Duration::from_secs(3600),
        );
        FreeTokenProvider::new(Arc::new(resolver))
    }

    #[tokio::test]
    async fn resolves_usable_token() {
        for policy in [Policy::Race, Policy::ProbeAll] {
            let p = provider(Some(vec!["sk-dead", "sk-live"]), policy);
            let token = p.resolve_token().await.unwrap();
            assert_eq!(token.expose(), "sk-live");
        }
    }

    #[tokio::test]
    async fn no_usable_token_is_no_credential() {
        let p = provider(Some(vec!["sk-dead"]), Policy::Race);
        assert!(matches!(
            p.resolve_token().await,
            Err(ProviderError::NoCredential(_))
        ));
    }

    #[tokio::test]
    async fn health_reflects_last_cycle() {
        let p = provider(None, Policy::ProbeAll);
        assert_eq!(p.health().await.status, "healthy");

        let _ = p.resolve_token().await;
        let health = p.health().await;
        assert_eq!(health.status, "degraded");
        let pool = health.pool.unwrap();
        assert_eq!(pool["policy"], "probe_all");
        assert_eq!(pool["last_cycle"]["resolved"], false);
    }
}
