//! Token availability probe
//!
//! Sends one tiny completion request with the candidate as bearer token. A
//! token is usable only if the API answers 2xx with a non-empty `choices`
//! array; every other outcome, including transport errors, is `Unusable`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::mask_token;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::{COMPLETIONS_PATH, PROBE_MAX_TOKENS, PROBE_MODEL, PROBE_PROMPT};
use crate::error::{Error, Result};

/// Availability verdict for one candidate token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Usable,
    Unusable,
}

impl Verdict {
    pub fn is_usable(self) -> bool {
        matches!(self, Verdict::Usable)
    }

    /// Label for logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Usable => "available",
            Verdict::Unusable => "not_available",
        }
    }
}

/// Classifies a single token. Implementations must not fail or panic on
/// expected errors; anything that goes wrong is `Unusable`.
///
/// Uses `Pin<Box<dyn Future>>` so the resolver can hold an `Arc<dyn Probe>`.
pub trait Probe: Send + Sync {
    fn probe<'a>(&'a self, token: &'a str) -> Pin<Box<dyn Future<Output = Verdict> + Send + 'a>>;
}

#[derive(Serialize)]
struct ProbeRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ProbeResponse {
    #[serde(default)]
    choices: Vec<serde_json::Value>,
}

/// HTTP prober against `{protocol}://{base_url}/v1/completions`.
pub struct Prober {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl Prober {
    pub fn new(client: reqwest::Client, protocol: &str, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: format!("{protocol}://{base_url}{COMPLETIONS_PATH}"),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issue the probe request. `Ok(false)` means the API answered but
    /// offered no choices.
    async fn check(&self, token: &str) -> Result<bool> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&ProbeRequest {
                model: PROBE_MODEL,
                prompt: PROBE_PROMPT,
                max_tokens: PROBE_MAX_TOKENS,
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Probe(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Probe(format!("completions returned {status}")));
        }

        let body = response
            .json::<ProbeResponse>()
            .await
            .map_err(|e| Error::Probe(format!("invalid completions response: {e}")))?;
        Ok(!body.choices.is_empty())
    }
}

impl Probe for Prober {
    fn probe<'a>(&'a self, token: &'a str) -> Pin<Box<dyn Future<Output = Verdict> + Send + 'a>> {
        Box::pin(async move {
            let masked = mask_token(token);
            let verdict = match self.check(token).await {
                Ok(true) => Verdict::Usable,
                Ok(false) => {
                    debug!(token = %masked, "completions response has no choices");
                    Verdict::Unusable
                }
                Err(e) => {
                    debug!(token = %masked, error = %e, "probe failed");
                    Verdict::Unusable
                }
            };
            info!(token = %masked, verdict = verdict.label(), "probed free token");
            metrics::counter!("token_probes_total", "verdict" => verdict.label()).increment(1);
            verdict
        })
    }
}
