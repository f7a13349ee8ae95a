//! Free token acquisition and validation
//!
//! Fetches a newline-delimited list of candidate bearer tokens from a remote
//! provider, probes each candidate against the completions API, and resolves
//! at most one usable token per cycle.
//!
//! Resolution cycle:
//! 1. `Fetcher` downloads (or reuses a cached copy of) the candidate list
//! 2. Empty or failed fetch → no token, no probes
//! 3. `Resolver` spawns one probe task per distinct candidate
//! 4. `Policy::Race` returns the first usable token; `Policy::ProbeAll` waits
//!    for every probe and picks one usable token at random
//! 5. Under `ProbeAll` the usable subset is retained and merged into the next cycle
//!
//! Fetch and probe failures never escape: they degrade to "no candidates" and
//! `Verdict::Unusable` respectively.

pub mod constants;
pub mod error;
pub mod fetch;
pub mod probe;
pub mod resolver;

pub use constants::*;
pub use error::{Error, Result};
pub use fetch::{CandidateSource, Fetcher, parse_candidates};
pub use probe::{Probe, Prober, Verdict};
pub use resolver::{CycleReport, Policy, PoolSnapshot, Resolver};
