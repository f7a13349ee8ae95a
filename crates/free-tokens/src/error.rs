//! Error types for fetch and probe operations
//!
//! Neither variant crosses the crate boundary: the fetcher turns `Fetch` into
//! an empty candidate set and the prober turns `Probe` into `Verdict::Unusable`.

/// Errors from talking to the token list or the probe endpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("token list fetch failed: {0}")]
    Fetch(String),

    #[error("token probe failed: {0}")]
    Probe(String),
}

/// Result alias for free token operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_the_stage() {
        assert_eq!(
            Error::Fetch("connection refused".into()).to_string(),
            "token list fetch failed: connection refused"
        );
        assert_eq!(
            Error::Probe("401 Unauthorized".into()).to_string(),
            "token probe failed: 401 Unauthorized"
        );
    }
}
