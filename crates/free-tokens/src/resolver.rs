//! Resolution cycles over the candidate pool
//!
//! One cycle fetches the candidate list, probes every distinct candidate on
//! its own task, and returns at most one usable token. Two selection policies:
//!
//! - `Race`: shuffle, probe concurrently, return the first usable token. A
//!   negative result is only returned once every probe has settled. Losing
//!   probes are detached and left to finish on their own.
//! - `ProbeAll`: merge with the tokens retained from the previous cycle,
//!   wait for every probe, pick one usable token at random, retain the usable
//!   subset. A retained token validated less than `validity` ago counts as
//!   usable without a new probe.
//!
//! Cycles are serialized: the retained pool mutex is held for the whole cycle.
//! Health reads a snapshot published at the end of each cycle and never waits
//! on that mutex.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::{IndexedRandom, SliceRandom};
use serde::Deserialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::fetch::CandidateSource;
use crate::probe::{Probe, Verdict};

/// Selection policy for a resolution cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// First usable probe wins.
    #[default]
    Race,
    /// Probe everything, choose at random among usable tokens.
    ProbeAll,
}

impl Policy {
    pub fn label(self) -> &'static str {
        match self {
            Policy::Race => "race",
            Policy::ProbeAll => "probe_all",
        }
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "race" => Ok(Policy::Race),
            "probe_all" | "probe-all" => Ok(Policy::ProbeAll),
            other => Err(format!("unknown token policy: {other}")),
        }
    }
}

/// Summary of the most recent cycle, for health reporting.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub candidates: usize,
    pub probed: usize,
    pub usable: usize,
    pub resolved: bool,
    pub finished_at: Instant,
}

/// Outcome of the probing phase of one cycle.
struct Selection {
    token: Option<String>,
    probed: usize,
    usable: usize,
}

/// State published after every cycle.
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    /// Tokens retained for the next `ProbeAll` cycle.
    pub retained: usize,
    pub last_cycle: Option<CycleReport>,
}

/// Owns the retained pool and runs resolution cycles one at a time.
pub struct Resolver {
    source: Arc<dyn CandidateSource>,
    probe: Arc<dyn Probe>,
    policy: Policy,
    validity: Duration,
    /// Usable tokens from the last `ProbeAll` cycle, with their validation time.
    retained: Mutex<HashMap<String, Instant>>,
    snapshot: watch::Sender<PoolSnapshot>,
}

impl Resolver {
    /// `validity` only matters for `Policy::ProbeAll`; zero disables verdict reuse.
    pub fn new(
        source: Arc<dyn CandidateSource>,
        probe: Arc<dyn Probe>,
        policy: Policy,
        validity: Duration,
    ) -> Self {
        info!(policy = policy.label(), validity_secs = validity.as_secs(), "free token resolver initialized");
        Self {
            source,
            probe,
            policy,
            validity,
            retained: Mutex::new(HashMap::new()),
            snapshot: watch::Sender::new(PoolSnapshot::default()),
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Run one resolution cycle. Returns `None` when no usable token exists.
    pub async fn resolve(&self) -> Option<String> {
        let mut retained = self.retained.lock().await;
        let started = Instant::now();

        let candidates = match self.source.fetch_candidates().await {
            Some(c) if !c.is_empty() => c,
            Some(_) => {
                debug!("candidate list is empty, nothing to probe");
                self.finish(&retained, started, 0, Selection { token: None, probed: 0, usable: 0 });
                return None;
            }
            None => {
                self.finish(&retained, started, 0, Selection { token: None, probed: 0, usable: 0 });
                return None;
            }
        };
        let candidate_count = candidates.len();

        let selection = match self.policy {
            Policy::Race => self.race(candidates).await,
            Policy::ProbeAll => self.probe_all(candidates, &mut retained).await,
        };
        let token = selection.token.clone();
        self.finish(&retained, started, candidate_count, selection);
        token
    }

    /// State as of the last finished cycle. Does not wait for a running cycle.
    pub fn snapshot(&self) -> PoolSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Pool summary for the health endpoint.
    pub fn health(&self) -> serde_json::Value {
        let snapshot = self.snapshot();
        let (status, last_cycle) = match &snapshot.last_cycle {
            None => ("healthy", serde_json::Value::Null),
            Some(report) => (
                if report.resolved { "healthy" } else { "degraded" },
                serde_json::json!({
                    "candidates": report.candidates,
                    "probed": report.probed,
                    "usable": report.usable,
                    "resolved": report.resolved,
                    "secs_ago": report.finished_at.elapsed().as_secs(),
                }),
            ),
        };
        serde_json::json!({
            "status": status,
            "policy": self.policy.label(),
            "retained": snapshot.retained,
            "last_cycle": last_cycle,
        })
    }

    /// Probe in random order and return the first usable token.
    ///
    /// `join_next` only yields `None` once every task has completed, so a
    /// negative result can never overtake a slow positive one.
    async fn race(&self, candidates: Vec<String>) -> Selection {
        let mut tokens: Vec<String> = candidates
            .into_iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        tokens.shuffle(&mut rand::rng());

        let mut probes = self.spawn_probes(tokens);
        let probed = probes.len();

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((token, Verdict::Usable)) => {
                    // Losers keep running; their verdicts are only logged.
                    probes.detach_all();
                    return Selection {
                        token: Some(token),
                        probed,
                        usable: 1,
                    };
                }
                Ok((_, Verdict::Unusable)) => {}
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }

        Selection {
            token: None,
            probed,
            usable: 0,
        }
    }

    /// Probe the merged pool to completion, then choose among usable tokens.
    async fn probe_all(
        &self,
        candidates: Vec<String>,
        retained: &mut HashMap<String, Instant>,
    ) -> Selection {
        let mut pool: HashMap<String, Verdict> = candidates
            .into_iter()
            .chain(retained.keys().cloned())
            .map(|token| (token, Verdict::Unusable))
            .collect();

        let mut validated: HashMap<String, Instant> = HashMap::new();
        let mut to_probe = Vec::new();
        for token in pool.keys() {
            match retained.get(token) {
                Some(at) if at.elapsed() < self.validity => {
                    validated.insert(token.clone(), *at);
                }
                _ => to_probe.push(token.clone()),
            }
        }
        for token in validated.keys() {
            pool.insert(token.clone(), Verdict::Usable);
        }
        debug!(
            pool = pool.len(),
            reused = validated.len(),
            probing = to_probe.len(),
            "probing merged token pool"
        );

        let mut probes = self.spawn_probes(to_probe);
        let probed = probes.len();

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((token, verdict)) => {
                    if verdict.is_usable() {
                        validated.insert(token.clone(), Instant::now());
                    }
                    pool.insert(token, verdict);
                }
                // The token stays Unusable
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }

        let usable: Vec<&String> = pool
            .iter()
            .filter(|(_, verdict)| verdict.is_usable())
            .map(|(token, _)| token)
            .collect();
        let token = usable.choose(&mut rand::rng()).map(|t| (*t).clone());
        let usable_count = usable.len();

        *retained = validated;

        Selection {
            token,
            probed,
            usable: usable_count,
        }
    }

    /// One task per token, each yielding `(token, verdict)`.
    fn spawn_probes(&self, tokens: Vec<String>) -> JoinSet<(String, Verdict)> {
        let mut probes = JoinSet::new();
        for token in tokens {
            let probe = Arc::clone(&self.probe);
            probes.spawn(async move {
                let verdict = probe.probe(&token).await;
                (token, verdict)
            });
        }
        probes
    }

    fn finish(&self, retained: &HashMap<String, Instant>, started: Instant, candidates: usize, selection: Selection) {
        let resolved = selection.token.is_some();
        let outcome = if resolved { "resolved" } else { "none_available" };
        info!(
            policy = self.policy.label(),
            candidates,
            probed = selection.probed,
            usable = selection.usable,
            outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "free token resolution finished"
        );
        metrics::counter!(
            "token_resolutions_total",
            "policy" => self.policy.label(),
            "outcome" => outcome
        )
        .increment(1);

        self.snapshot.send_replace(PoolSnapshot {
            retained: retained.len(),
            last_cycle: Some(CycleReport {
                candidates,
                probed: selection.probed,
                usable: selection.usable,
                resolved,
                finished_at: Instant::now(),
            }),
        });
    }
}
