//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The config file is
//! optional; without one the service runs purely from the environment.
//! `OPENAI_API_KEY` and plain access codes (`CODE`) are only read from the
//! environment so secrets never live in the TOML.

use common::Secret;
use free_tokens::Policy;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::gate::hash_access_code;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub free_tokens: FreeTokenConfig,
    #[serde(default)]
    pub gate: GateConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Target API: probes and proxied requests both go here
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Free token list and resolution settings
#[derive(Debug, Deserialize)]
pub struct FreeTokenConfig {
    #[serde(default = "default_provider_url")]
    pub provider_url: String,
    /// How long a fetched token list is reused, in milliseconds (0 disables)
    #[serde(default = "default_response_cache_ms")]
    pub response_cache_ms: u64,
    /// How long a usable verdict is trusted under `probe_all`, in milliseconds
    #[serde(default = "default_validity_ms")]
    pub validity_ms: u64,
    #[serde(default)]
    pub policy: Policy,
    /// Only accept `word-word` shaped lines from the list
    #[serde(default = "default_strict")]
    pub strict: bool,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

/// Request gate settings
#[derive(Debug, Default, Deserialize)]
pub struct GateConfig {
    /// MD5 hex digests of accepted access codes
    #[serde(default)]
    pub access_codes: Vec<String>,
    /// Static key from `OPENAI_API_KEY`; disables free token resolution
    #[serde(skip)]
    pub api_key: Option<Secret<String>>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_max_connections() -> usize {
    1000
}

fn default_protocol() -> String {
    "https".into()
}

fn default_base_url() -> String {
    "api.openai.com".into()
}

fn default_timeout() -> u64 {
    60
}

fn default_provider_url() -> String {
    free_tokens::DEFAULT_PROVIDER_URL.into()
}

fn default_response_cache_ms() -> u64 {
    free_tokens::DEFAULT_RESPONSE_CACHE_TIME.as_millis() as u64
}

fn default_validity_ms() -> u64 {
    free_tokens::DEFAULT_VALIDITY_TIME.as_millis() as u64
}

fn default_strict() -> bool {
    true
}

fn default_probe_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for FreeTokenConfig {
    fn default() -> Self {
        Self {
            provider_url: default_provider_url(),
            response_cache_ms: default_response_cache_ms(),
            validity_ms: default_validity_ms(),
            policy: Policy::default(),
            strict: default_strict(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl UpstreamConfig {
    /// `{protocol}://{base_url}` without a trailing slash.
    pub fn url(&self) -> String {
        format!("{}://{}", self.protocol, self.base_url.trim_end_matches('/'))
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then overlay environment variables.
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        let contents = match path {
            Some(p) => std::fs::read_to_string(p)?,
            None => String::new(),
        };
        let mut config: Config = toml::from_str(&contents)?;

        config.apply_env()?;
        config.gate.access_codes = config
            .gate
            .access_codes
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        config.validate()?;

        Ok(config)
    }

    /// Overlay environment variables on top of file values.
    fn apply_env(&mut self) -> common::Result<()> {
        if let Some(addr) = env_var("LISTEN_ADDR") {
            self.server.listen_addr = parse_env("LISTEN_ADDR", &addr)?;
        }
        if let Some(protocol) = env_var("PROTOCOL") {
            self.upstream.protocol = protocol;
        }
        if let Some(base_url) = env_var("BASE_URL") {
            self.upstream.base_url = base_url;
        }
        if let Some(url) = env_var("FREE_TOKEN_PROVIDER") {
            self.free_tokens.provider_url = url;
        }
        if let Some(ms) = env_var("TOKEN_RESPONSE_CACHE_TIME") {
            self.free_tokens.response_cache_ms = parse_env("TOKEN_RESPONSE_CACHE_TIME", &ms)?;
        }
        if let Some(ms) = env_var("TOKEN_VALIDITY_TIME") {
            self.free_tokens.validity_ms = parse_env("TOKEN_VALIDITY_TIME", &ms)?;
        }
        if let Some(policy) = env_var("TOKEN_POLICY") {
            self.free_tokens.policy = Policy::from_str(&policy).map_err(common::Error::Config)?;
        }
        if let Some(key) = env_var("OPENAI_API_KEY") {
            self.gate.api_key = Some(Secret::new(key));
        }
        // Plain codes, comma separated, hashed before they are stored
        if let Some(codes) = env_var("CODE") {
            self.gate.access_codes.extend(
                codes
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(hash_access_code),
            );
        }
        Ok(())
    }

    fn validate(&self) -> common::Result<()> {
        if self.upstream.protocol != "http" && self.upstream.protocol != "https" {
            return Err(common::Error::Config(format!(
                "protocol must be http or https, got: {}",
                self.upstream.protocol
            )));
        }
        if self.upstream.base_url.trim().is_empty() {
            return Err(common::Error::Config("base_url must not be empty".into()));
        }
        if !self.free_tokens.provider_url.starts_with("http://")
            && !self.free_tokens.provider_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "provider_url must start with http:// or https://, got: {}",
                self.free_tokens.provider_url
            )));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.free_tokens.probe_timeout_secs == 0 {
            return Err(common::Error::Config(
                "probe_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if let Some(bad) = self
            .gate
            .access_codes
            .iter()
            .find(|c| c.len() != 32 || !c.chars().all(|ch| ch.is_ascii_hexdigit()))
        {
            return Err(common::Error::Config(format!(
                "access_codes must be MD5 hex digests, got: {bad}"
            )));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    ///
    /// `None` means no file: defaults plus environment.
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(PathBuf::from(p));
        }
        env_var("CONFIG_PATH").map(PathBuf::from)
    }
}

/// Non-empty environment variable value.
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> common::Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| common::Error::Config(format!("invalid {key}={value}: {e}")))
}
