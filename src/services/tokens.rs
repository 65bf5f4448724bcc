//! Pickup token authority: generation, hashing and verification
//!
//! A token is 32 bytes from the OS CSPRNG, base64url without padding. Only its
//! SHA-256 (hex) is stored; the plaintext exists in the approval notification
//! and in the borrower's hands.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const TOKEN_BYTES: usize = 32;

/// Plaintext bearer token. Debug output is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlainToken(String);

impl PlainToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PlainToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlainToken(***)")
    }
}

/// Value derived from a token (such as a link embedding it). Debug output is redacted.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Sensitive<T>(pub T);

impl<T> std::fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone)]
pub struct TokenAuthority {
    ttl: Duration,
}

impl TokenAuthority {
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    /// Fresh random token
    pub fn generate(&self) -> PlainToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        PlainToken(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Lower-case hex SHA-256 of the token text
    pub fn hash(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    /// Recompute the hash and compare in constant time
    pub fn verify(token: &str, stored_hash: &str) -> bool {
        let computed = Self::hash(token);
        computed.as_bytes().ct_eq(stored_hash.as_bytes()).into()
    }

    /// Expiry of a token issued at `now`
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.ttl
    }
}

impl Default for TokenAuthority {
    fn default() -> Self {
        Self::new(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_matches_own_hash_only() {
        let authority = TokenAuthority::default();
        for _ in 0..32 {
            let plain = authority.generate();
            let other = authority.generate();
            assert_ne!(plain, other);
            assert!(TokenAuthority::verify(plain.expose(), &TokenAuthority::hash(plain.expose())));
            assert!(!TokenAuthority::verify(plain.expose(), &TokenAuthority::hash(other.expose())));
        }
    }

    #[test]
    fn test_token_is_url_safe_and_unpadded() {
        let token = TokenAuthority::default().generate();
        // 32 bytes -> 43 base64 characters without padding
        assert_eq!(token.expose().len(), 43);
        assert!(token
            .expose()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        assert_eq!(
            TokenAuthority::hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_malformed_input_is_not_equal() {
        assert!(!TokenAuthority::verify("", ""));
        assert!(!TokenAuthority::verify("abc", "short"));
        assert!(!TokenAuthority::verify("abc", &"z".repeat(200)));
    }

    #[test]
    fn test_default_expiry_is_thirty_minutes() {
        let now = Utc::now();
        assert_eq!(TokenAuthority::default().expiry_from(now) - now, Duration::minutes(30));
        assert_eq!(TokenAuthority::new(45).expiry_from(now) - now, Duration::minutes(45));
    }

    #[test]
    fn test_debug_is_redacted() {
        let token = PlainToken::new("secret-value");
        assert_eq!(format!("{:?}", token), "PlainToken(***)");
    }
}
