//! Candidate token list retrieval
//!
//! The provider serves a `text/plain` body with one token per line. A
//! successful body is cached for the configured TTL so that back-to-back
//! resolution cycles don't hammer the provider. Failures are logged and
//! reported as `None`, never as errors.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Anything that can produce a list of candidate tokens.
///
/// `None` means the list could not be obtained at all; `Some(vec![])` means
/// the list was fetched but nothing in it looked like a token.
pub trait CandidateSource: Send + Sync {
    fn fetch_candidates(&self) -> Pin<Box<dyn Future<Output = Option<Vec<String>>> + Send + '_>>;
}

/// Body of the last successful fetch.
struct CachedList {
    body: String,
    fetched_at: Instant,
}

/// HTTP fetcher for the remote token list.
pub struct Fetcher {
    client: reqwest::Client,
    url: String,
    cache_ttl: Duration,
    strict: bool,
    cache: Mutex<Option<CachedList>>,
}

impl Fetcher {
    /// Create a fetcher for `url`.
    ///
    /// `cache_ttl` of zero disables response caching. `strict` keeps only
    /// `word-word` shaped lines; otherwise any non-empty line is a candidate.
    pub fn new(client: reqwest::Client, url: impl Into<String>, cache_ttl: Duration, strict: bool) -> Self {
        Self {
            client,
            url: url.into(),
            cache_ttl,
            strict,
            cache: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch and parse the candidate list. Returns `None` on any failure.
    pub async fn fetch(&self) -> Option<Vec<String>> {
        match self.fetch_body().await {
            Ok(body) => {
                let candidates = parse_candidates(&body, self.strict);
                info!(amount = candidates.len(), "obtained free token candidates");
                Some(candidates)
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "failed to obtain free token list");
                None
            }
        }
    }

    /// Return the list body, from cache when still fresh.
    async fn fetch_body(&self) -> Result<String> {
        if let Some(cached) = self.cache.lock().await.as_ref()
            && cached.fetched_at.elapsed() < self.cache_ttl
        {
            debug!(url = %self.url, "using cached token list");
            return Ok(cached.body.clone());
        }

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("token list returned {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Fetch(format!("unreadable body: {e}")))?;
        if body.trim().is_empty() {
            return Err(Error::Fetch("token list is empty".into()));
        }

        if !self.cache_ttl.is_zero() {
            *self.cache.lock().await = Some(CachedList {
                body: body.clone(),
                fetched_at: Instant::now(),
            });
        }
        Ok(body)
    }
}

impl CandidateSource for Fetcher {
    fn fetch_candidates(&self) -> Pin<Box<dyn Future<Output = Option<Vec<String>>> + Send + '_>> {
        Box::pin(self.fetch())
    }
}

/// Split a list body into trimmed candidate tokens.
pub fn parse_candidates(body: &str, strict: bool) -> Vec<String> {
    body.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !strict || is_token_shaped(line))
        .map(str::to_owned)
        .collect()
}

/// `word-word`: two non-empty runs of `[A-Za-z0-9_]` joined by a single `-`.
fn is_token_shaped(line: &str) -> bool {
    let is_word = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    match line.split_once('-') {
        Some((head, tail)) => is_word(head) && is_word(tail),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    /// Serve `body` with `status` on a local port, counting hits.
    async fn start_list_server(status: StatusCode, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api.txt", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().route(
            "/api.txt",
            axum::routing::get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (status, body)
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (url, hits)
    }

    #[test]
    fn strict_parse_keeps_word_dash_word() {
        let body = "sk-abc123\n  sk-Def_456  \nnot a token\nsk-\n-abc\nsk-a-b\nplain\n\n";
        assert_eq!(parse_candidates(body, true), vec!["sk-abc123", "sk-Def_456"]);
    }

    #[test]
    fn loose_parse_keeps_any_non_empty_line() {
        let body = "sk-abc123\n  not a token \n\n\r\nsk-a-b\n";
        assert_eq!(
            parse_candidates(body, false),
            vec!["sk-abc123", "not a token", "sk-a-b"]
        );
    }

    #[test]
    fn parse_handles_crlf_line_endings() {
        let body = "sk-one\r\nsk-two\r\n";
        assert_eq!(parse_candidates(body, true), vec!["sk-one", "sk-two"]);
    }

    #[test]
    fn strict_parse_rejects_non_ascii_words() {
        assert!(parse_candidates("sk-ключ", true).is_empty());
    }

    #[tokio::test]
    async fn fetch_parses_remote_list() {
        let (url, _) = start_list_server(StatusCode::OK, "sk-first\ngarbage line\nsk-second\n").await;
        let fetcher = Fetcher::new(reqwest::Client::new(), url, Duration::ZERO, true);

        let candidates = fetcher.fetch().await.unwrap();
        assert_eq!(candidates, vec!["sk-first", "sk-second"]);
    }

    #[tokio::test]
    async fn fetch_empty_body_is_failure() {
        let (url, _) = start_list_server(StatusCode::OK, "  \n").await;
        let fetcher = Fetcher::new(reqwest::Client::new(), url, Duration::ZERO, true);
        assert!(fetcher.fetch().await.is_none());
    }

    #[tokio::test]
    async fn fetch_non_success_status_is_failure() {
        let (url, _) = start_list_server(StatusCode::INTERNAL_SERVER_ERROR, "sk-hidden").await;
        let fetcher = Fetcher::new(reqwest::Client::new(), url, Duration::ZERO, true);
        assert!(fetcher.fetch().await.is_none());
    }

    #[tokio::test]
    async fn fetch_unreachable_provider_is_failure() {
        let fetcher = Fetcher::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/api.txt",
            Duration::ZERO,
            true,
        );
        assert!(fetcher.fetch().await.is_none());
    }

    #[tokio::test]
    async fn fetch_list_without_tokens_is_empty_not_failure() {
        let (url, _) = start_list_server(StatusCode::OK, "nothing useful here\n").await;
        let fetcher = Fetcher::new(reqwest::Client::new(), url, Duration::ZERO, true);
        assert_eq!(fetcher.fetch().await, Some(vec![]));
    }

    #[tokio::test]
    async fn cached_body_is_reused_within_ttl() {
        let (url, hits) = start_list_server(StatusCode::OK, "sk-cached\n").await;
        let fetcher = Fetcher::new(reqwest::Client::new(), url, Duration::from_secs(300), true);

        assert_eq!(fetcher.fetch().await.unwrap(), vec!["sk-cached"]);
        assert_eq!(fetcher.fetch().await.unwrap(), vec!["sk-cached"]);
        assert_eq!(hits.load(Ordering::SeqCst), 1, "second fetch must hit the cache");
    }

    #[tokio::test]
    async fn zero_ttl_disables_cache() {
        let (url, hits) = start_list_server(StatusCode::OK, "sk-fresh\n").await;
        let fetcher = Fetcher::new(reqwest::Client::new(), url, Duration::ZERO, true);

        fetcher.fetch().await.unwrap();
        fetcher.fetch().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let (url, hits) = start_list_server(StatusCode::BAD_GATEWAY, "").await;
        let fetcher = Fetcher::new(reqwest::Client::new(), url, Duration::from_secs(300), true);

        assert!(fetcher.fetch().await.is_none());
        assert!(fetcher.fetch().await.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn strict_fetch_drops_multi_dash_lines() {
        let (url, _) = start_list_server(StatusCode::OK, "sk-two-dashes\nsk-onedash\n").await;

        let strict = Fetcher::new(reqwest::Client::new(), url.clone(), Duration::ZERO, true);
        assert_eq!(strict.fetch().await.unwrap(), vec!["sk-onedash"]);

        let loose = Fetcher::new(reqwest::Client::new(), url, Duration::ZERO, false);
        assert_eq!(loose.fetch().await.unwrap(), vec!["sk-two-dashes", "sk-onedash"]);
    }

    #[tokio::test]
    async fn candidate_source_delegates_to_fetch() {
        let (url, _) = start_list_server(StatusCode::OK, "sk-viatrait\n").await;
        let source: Arc<dyn CandidateSource> =
            Arc::new(Fetcher::new(reqwest::Client::new(), url, Duration::ZERO, true));
        assert_eq!(source.fetch_candidates().await.unwrap(), vec!["sk-viatrait"]);
    }
}
