//! Secret wrapper for sensitive values

use std::fmt;
use zeroize::Zeroize;

/// Tokens at least this long keep a head and a tail in their masked form.
const MASK_MIN_LEN: usize = 25;
const MASK_HEAD: usize = 15;
const MASK_TAIL: usize = 10;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Masked preview suitable for logs, see [`mask_token`].
    pub fn masked(&self) -> String {
        mask_token(&self.0)
    }
}

/// Mask a bearer token for logging.
///
/// Tokens of 25 chars or more keep their first 15 and last 10 chars around
/// `...`. Shorter tokens keep only their first third. The result never equals
/// the input.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let len = chars.len();
    let head_only = |n: usize| format!("{}...", chars[..n].iter().collect::<String>());

    if len < MASK_MIN_LEN {
        return head_only(len / 3);
    }

    let masked = format!(
        "{}...{}",
        chars[..MASK_HEAD].iter().collect::<String>(),
        chars[len - MASK_TAIL..].iter().collect::<String>()
    );
    // Only possible when the token itself carries "..." at the cut point
    if masked == token {
        return head_only(MASK_HEAD);
    }
    masked
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_redacts_debug() {
        let secret = Secret::new(String::from("sk-static-key"));
        let debug = format!("{:?}", secret);
        assert_eq!(debug, "[REDACTED]");
        assert!(!debug.contains("sk-static-key"));
    }

    #[test]
    fn test_secret_exposes_value() {
        let secret = Secret::new(String::from("sk-static-key"));
        assert_eq!(secret.expose(), "sk-static-key");
    }

    #[test]
    fn mask_long_token_keeps_head_and_tail() {
        let token = "sk-abcdefghijklmnopqrstuvwxyz0123456789";
        let masked = mask_token(token);
        assert_eq!(masked, "sk-abcdefghijkl...0123456789");
        assert_ne!(masked, token);
    }

    #[test]
    fn mask_exactly_25_chars() {
        let token = "abcdefghijklmnopqrstuvwxy";
        assert_eq!(token.len(), 25);
        assert_eq!(mask_token(token), "abcdefghijklmno...pqrstuvwxy");
    }

    #[test]
    fn mask_short_token_hides_most_of_it() {
        assert_eq!(mask_token("sk-123456"), "sk-...");
        assert_eq!(mask_token(""), "...");
        assert!(!mask_token("ab").contains("ab"));
    }

    #[test]
    fn mask_never_returns_the_token_itself() {
        let token = "abcdefghijklmno...pqrstuvwxy";
        assert_ne!(mask_token(token), token);
    }

    #[test]
    fn mask_handles_multibyte_chars() {
        let token = "ключ-".repeat(6);
        let masked = mask_token(&token);
        assert!(masked.contains("..."));
        assert_ne!(masked, token);
    }

    #[test]
    fn secret_masked_preview() {
        let secret = Secret::new(String::from("sk-abcdefghijklmnopqrstuvwxyz0123456789"));
        assert_eq!(secret.masked(), "sk-abcdefghijkl...0123456789");
    }
}
