//! Time-bucketed tunnel tokens
//!
//! `token = hex(sha256(tunnel_id || secret || bucket))` where
//! `bucket = floor(unix_seconds / 10)`. A token is accepted for the bucket
//! it was minted in and the neighbouring ones, so a fresh token stays valid
//! for roughly 20 seconds and peers may disagree on the clock by ~10s.

use hooktunnel_proto::{to_hex, TUNNEL_PROXY_PROTOCOL};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::{Choice, ConstantTimeEq};
use thiserror::Error;
use tracing::debug;

/// Width of one time bucket in seconds
pub const TIME_SPAN_SECS: u64 = 10;

/// Length of a token in hex characters (SHA-256)
pub const TOKEN_LEN: usize = 64;

/// Token validation errors
///
/// Deliberately coarse: callers surface every variant as the same 401.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Missing token")]
    Missing,

    #[error("Invalid token")]
    Invalid,
}

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn unix_seconds(&self) -> u64;
}

/// Reads the system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Clock pinned to a fixed instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn unix_seconds(&self) -> u64 {
        self.0
    }
}

/// Time bucket for a unix timestamp
pub fn time_bucket(unix_seconds: u64) -> u64 {
    unix_seconds / TIME_SPAN_SECS
}

/// Derive the token for an explicit bucket
pub fn derive_token(tunnel_id: &str, secret: &str, bucket: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tunnel_id.as_bytes());
    hasher.update(secret.as_bytes());
    hasher.update(bucket.to_string().as_bytes());
    to_hex(&hasher.finalize())
}

/// Token for the current bucket
pub fn generate_token(tunnel_id: &str, secret: &str) -> String {
    generate_token_at(tunnel_id, secret, SystemClock.unix_seconds())
}

fn generate_token_at(tunnel_id: &str, secret: &str, unix_seconds: u64) -> String {
    derive_token(tunnel_id, secret, time_bucket(unix_seconds))
}

/// Check a token against the current, previous and next bucket
pub fn is_valid_token(secret: &str, tunnel_id: &str, token: &str) -> bool {
    is_valid_token_at(secret, tunnel_id, token, SystemClock.unix_seconds())
}

fn is_valid_token_at(secret: &str, tunnel_id: &str, token: &str, unix_seconds: u64) -> bool {
    if token.len() != TOKEN_LEN {
        return false;
    }

    let bucket = time_bucket(unix_seconds);
    let candidates = [bucket.checked_sub(1), Some(bucket), bucket.checked_add(1)];

    // All candidates are compared, so the work done does not depend on
    // which bucket (if any) matched.
    let mut matched = Choice::from(0u8);
    for candidate in candidates.into_iter().flatten() {
        let expected = derive_token(tunnel_id, secret, candidate);
        matched |= expected.as_bytes().ct_eq(token.as_bytes());
    }
    matched.into()
}

/// Extract the token from a `Sec-WebSocket-Protocol` header value
///
/// Agents announce `webhooks-proxy-tunnel,<token>` (browsers and most
/// clients add a space after the comma). Returns `None` if the tunnel
/// protocol is not the first entry or no token follows it.
pub fn parse_subprotocol_header(value: &str) -> Option<String> {
    let mut parts = value.split(',').map(str::trim);
    if parts.next()? != TUNNEL_PROXY_PROTOCOL {
        return None;
    }
    parts
        .next()
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Validates agent tokens against the relay's shared secret
///
/// Without a secret every agent is admitted; the relay warns about that
/// at startup.
#[derive(Clone)]
pub struct TokenAuthenticator {
    secret: Option<String>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}

impl TokenAuthenticator {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn requires_token(&self) -> bool {
        self.secret.is_some()
    }

    /// Validate the token an agent presented for `tunnel_id`
    pub fn validate(&self, tunnel_id: &str, token: Option<&str>) -> Result<(), TokenError> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        let token = token.ok_or(TokenError::Missing)?;

        if is_valid_token_at(secret, tunnel_id, token, self.clock.unix_seconds()) {
            Ok(())
        } else {
            debug!(tunnel_id = %tunnel_id, "Rejected agent token");
            Err(TokenError::Invalid)
        }
    }

    /// Mint a token for `tunnel_id` with this authenticator's clock
    pub fn generate(&self, tunnel_id: &str) -> Option<String> {
        self.secret
            .as_ref()
            .map(|secret| generate_token_at(tunnel_id, secret, self.clock.unix_seconds()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "00000000-0000-0000-0000-000000000000";
    const SECRET: &str = "s3cret";
    // Middle of a bucket, so +-5s stays in the same bucket
    const NOW: u64 = 1_700_000_005;

    #[test]
    fn test_derive_token_shape() {
        let token = derive_token(ID, SECRET, 170_000_000);
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(token, derive_token(ID, SECRET, 170_000_000));
        assert_ne!(token, derive_token(ID, SECRET, 170_000_001));
    }

    #[test]
    fn test_derive_token_matches_concatenation() {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}{}{}", ID, SECRET, 42).as_bytes());
        assert_eq!(derive_token(ID, SECRET, 42), to_hex(&hasher.finalize()));
    }

    #[test]
    fn test_valid_at_generation() {
        let token = generate_token_at(ID, SECRET, NOW);
        assert!(is_valid_token_at(SECRET, ID, &token, NOW));
    }

    #[test]
    fn test_valid_within_neighbouring_buckets() {
        let token = generate_token_at(ID, SECRET, NOW);
        assert!(is_valid_token_at(SECRET, ID, &token, NOW - 10));
        assert!(is_valid_token_at(SECRET, ID, &token, NOW + 10));
        assert!(is_valid_token_at(SECRET, ID, &token, NOW + 14));
    }

    #[test]
    fn test_invalid_outside_window() {
        let token = generate_token_at(ID, SECRET, NOW);
        assert!(!is_valid_token_at(SECRET, ID, &token, NOW + 20));
        assert!(!is_valid_token_at(SECRET, ID, &token, NOW - 20));
    }

    #[test]
    fn test_invalid_for_other_id_or_secret() {
        let token = generate_token_at(ID, SECRET, NOW);
        assert!(!is_valid_token_at(
            SECRET,
            "11111111-1111-1111-1111-111111111111",
            &token,
            NOW
        ));
        assert!(!is_valid_token_at("other", ID, &token, NOW));
    }

    #[test]
    fn test_invalid_length() {
        let token = generate_token_at(ID, SECRET, NOW);
        assert!(!is_valid_token_at(SECRET, ID, &token[..63], NOW));
        assert!(!is_valid_token_at(SECRET, ID, &format!("{}0", token), NOW));
        assert!(!is_valid_token_at(SECRET, ID, "", NOW));
    }

    #[test]
    fn test_system_clock_round_trip() {
        let token = generate_token(ID, SECRET);
        assert!(is_valid_token(SECRET, ID, &token));
    }

    #[test]
    fn test_parse_subprotocol_header() {
        assert_eq!(
            parse_subprotocol_header("webhooks-proxy-tunnel,abc"),
            Some("abc".to_string())
        );
        assert_eq!(
            parse_subprotocol_header("webhooks-proxy-tunnel, abc"),
            Some("abc".to_string())
        );
        assert_eq!(parse_subprotocol_header("webhooks-proxy-tunnel"), None);
        assert_eq!(parse_subprotocol_header("webhooks-proxy-tunnel, "), None);
        assert_eq!(parse_subprotocol_header("chat, abc"), None);
    }

    #[test]
    fn test_authenticator_without_secret_admits_everyone() {
        let auth = TokenAuthenticator::new(None);
        assert!(!auth.requires_token());
        assert_eq!(auth.validate(ID, None), Ok(()));
        assert_eq!(auth.validate(ID, Some("no-secret")), Ok(()));
        assert_eq!(auth.generate(ID), None);
    }

    #[test]
    fn test_empty_secret_counts_as_unset() {
        assert!(!TokenAuthenticator::new(Some(String::new())).requires_token());
    }

    #[test]
    fn test_authenticator_with_secret() {
        let auth =
            TokenAuthenticator::new(Some(SECRET.to_string())).with_clock(Arc::new(FixedClock(NOW)));
        let token = auth.generate(ID).unwrap();

        assert_eq!(auth.validate(ID, Some(&token)), Ok(()));
        assert_eq!(auth.validate(ID, None), Err(TokenError::Missing));
        assert_eq!(auth.validate(ID, Some("no-secret")), Err(TokenError::Invalid));
    }

    #[test]
    fn test_authenticator_debug_hides_secret() {
        let auth = TokenAuthenticator::new(Some(SECRET.to_string()));
        assert!(!format!("{:?}", auth).contains(SECRET));
    }
}
