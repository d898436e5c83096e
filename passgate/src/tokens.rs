//! QR token generation and verification links.

use crate::types::QrToken;
use base64::Engine;
use rand::RngCore;

/// Number of random bytes behind every token (43 base64url characters)
pub const TOKEN_BYTES: usize = 32;

/// Source of fresh, unique QR tokens
///
/// Generation has no side effects: a token that is minted but never attached
/// is simply discarded.
pub trait TokenGenerator: Send + Sync {
    /// Mint a new token
    fn generate(&self) -> QrToken;
}

/// Cryptographically random tokens from the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> QrToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        QrToken::new(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }
}

/// Builds the public URLs a QR code points at
#[derive(Debug, Clone)]
pub struct VerifyLinks {
    origin: String,
}

impl VerifyLinks {
    /// `origin` is the public scheme and host, for example `https://club.example`
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        let origin = origin.into();
        Self {
            origin: origin.trim_end_matches('/').to_string(),
        }
    }

    /// `{origin}/verify?token={token}`
    #[must_use]
    pub fn verify_url(&self, token: &QrToken) -> String {
        format!(
            "{}/verify?token={}",
            self.origin,
            urlencoding::encode(token.as_str())
        )
    }

    /// `{origin}/ticket?token={token}`
    #[must_use]
    pub fn ticket_url(&self, token: &QrToken) -> String {
        format!(
            "{}/ticket?token={}",
            self.origin,
            urlencoding::encode(token.as_str())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_43_url_safe_chars() {
        let token = RandomTokenGenerator.generate();
        assert_eq!(token.as_str().len(), 43);
        assert!(
            token
                .as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn tokens_do_not_repeat() {
        let generator = RandomTokenGenerator;
        let tokens: HashSet<_> = (0..1000).map(|_| generator.generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn links_strip_trailing_slash() {
        let links = VerifyLinks::new("https://club.example/");
        let token = QrToken::new("abc_DEF-123");
        assert_eq!(
            links.verify_url(&token),
            "https://club.example/verify?token=abc_DEF-123"
        );
        assert_eq!(
            links.ticket_url(&token),
            "https://club.example/ticket?token=abc_DEF-123"
        );
    }

    #[test]
    fn links_percent_encode_foreign_tokens() {
        let links = VerifyLinks::new("http://localhost:8080");
        let token = QrToken::new("a b&c=d");
        assert_eq!(
            links.verify_url(&token),
            "http://localhost:8080/verify?token=a%20b%26c%3Dd"
        );
    }
}
