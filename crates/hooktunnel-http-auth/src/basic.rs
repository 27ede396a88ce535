//! HTTP Basic Authentication provider (RFC 7617)
//!
//! ```text
//! Authorization: Basic <base64(username:password)>
//! ```
//!
//! Missing and wrong credentials get the same 401 so callers cannot probe
//! which part was wrong.

use crate::{AuthResult, HttpAuthProvider};
use base64::Engine;
use hooktunnel_proto::{header_value, ProxyResponse};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

const UNAUTHORIZED_BODY: &str = "Unauthorized. Please provide the correct Basic Auth credentials.";

/// HTTP Basic Authentication provider for a single user
pub struct BasicAuthProvider {
    username: String,
    password: String,
}

impl BasicAuthProvider {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Extract and decode `(username, password)` from an Authorization header
    fn extract_credentials(auth_header: &str) -> Option<(String, String)> {
        let encoded = auth_header.strip_prefix("Basic ")?.trim();

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;

        let (username, password) = decoded.split_once(':')?;
        Some((username.to_string(), password.to_string()))
    }

    fn validate_credentials(&self, username: &str, password: &str) -> bool {
        let user_ok = username.as_bytes().ct_eq(self.username.as_bytes());
        let pass_ok = password.as_bytes().ct_eq(self.password.as_bytes());
        (user_ok & pass_ok).into()
    }

    /// 401 with a Basic challenge so browsers prompt for credentials
    fn unauthorized_response(&self) -> ProxyResponse {
        ProxyResponse::text(401, "Unauthorized", UNAUTHORIZED_BODY)
            .with_header("www-authenticate", "Basic")
    }
}

impl HttpAuthProvider for BasicAuthProvider {
    fn authenticate(&self, headers: &[(String, String)]) -> AuthResult {
        let Some(header) = header_value(headers, "authorization") else {
            warn!("Basic auth is enabled, but no credentials were provided");
            return AuthResult::Unauthorized(self.unauthorized_response());
        };

        match Self::extract_credentials(header) {
            Some((username, password)) if self.validate_credentials(&username, &password) => {
                debug!(username = %self.username, "Basic auth: credentials verified");
                AuthResult::Authenticated
            }
            Some(_) => {
                warn!("Basic auth credentials provided, but they are incorrect");
                AuthResult::Unauthorized(self.unauthorized_response())
            }
            None => {
                warn!("Basic auth: could not decode Authorization header");
                AuthResult::Unauthorized(self.unauthorized_response())
            }
        }
    }

    fn auth_type(&self) -> &'static str {
        "basic"
    }
}
