//! Free token provider and probe constants
//!
//! The probe payload is a short fixed prompt against the cheapest completion
//! model, capped at a handful of output tokens.

use std::time::Duration;

/// Public list of shared free tokens, one per line.
pub const DEFAULT_PROVIDER_URL: &str = "https://freeopenai.xyz/api.txt";

/// Path appended to `{protocol}://{base_url}` for availability probes.
pub const COMPLETIONS_PATH: &str = "/v1/completions";

/// Model used for availability probes.
pub const PROBE_MODEL: &str = "text-ada-001";

/// Prompt sent with every availability probe.
pub const PROBE_PROMPT: &str = "This is a test";

/// Output cap for availability probes.
pub const PROBE_MAX_TOKENS: u32 = 5;

/// How long a fetched candidate list is reused.
pub const DEFAULT_RESPONSE_CACHE_TIME: Duration = Duration::from_secs(5 * 60);

/// How long a usable verdict stays valid for a retained token.
pub const DEFAULT_VALIDITY_TIME: Duration = Duration::from_secs(60 * 60);
