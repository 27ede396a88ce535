//! HTTP authentication for tunnelled requests
//!
//! The agent can require callers of the public URL to authenticate before
//! anything is forwarded to the target server. Rejections are answered by
//! the agent itself with a ready-made [`ProxyResponse`], so the relay never
//! needs to know that authentication happened.
//!
//! ```ignore
//! use hooktunnel_http_auth::{AuthResult, HttpAuthConfig, HttpAuthenticator};
//!
//! let config = HttpAuthConfig::basic("user:password")?;
//! let authenticator = HttpAuthenticator::from_config(&config);
//!
//! match authenticator.authenticate(&request.headers) {
//!     AuthResult::Authenticated => { /* forward */ }
//!     AuthResult::Unauthorized(response) => { /* send back */ }
//! }
//! ```

mod basic;

pub use basic::BasicAuthProvider;

use hooktunnel_proto::ProxyResponse;
use thiserror::Error;

/// Authentication result
#[derive(Debug, Clone)]
pub enum AuthResult {
    /// Request may proceed (no auth required or valid credentials)
    Authenticated,
    /// Request was rejected; the response to send back instead
    Unauthorized(ProxyResponse),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials format: expected user:password")]
    InvalidFormat,
}

/// Authentication settings for the agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HttpAuthConfig {
    #[default]
    None,
    Basic { username: String, password: String },
}

impl HttpAuthConfig {
    /// Parse a `user:password` pair
    ///
    /// The password may itself contain colons; only the first one splits.
    pub fn basic(credentials: &str) -> Result<Self, AuthError> {
        let (username, password) = credentials
            .split_once(':')
            .ok_or(AuthError::InvalidFormat)?;
        if username.is_empty() {
            return Err(AuthError::InvalidFormat);
        }
        Ok(Self::Basic {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Trait for HTTP authentication providers
pub trait HttpAuthProvider: Send + Sync {
    /// Authenticate the request based on its headers
    fn authenticate(&self, headers: &[(String, String)]) -> AuthResult;

    /// Authentication type name, for logging
    fn auth_type(&self) -> &'static str;
}

/// Provider that lets every request through
pub struct NoAuthProvider;

impl HttpAuthProvider for NoAuthProvider {
    fn authenticate(&self, _headers: &[(String, String)]) -> AuthResult {
        AuthResult::Authenticated
    }

    fn auth_type(&self) -> &'static str {
        "none"
    }
}

/// Authenticator wrapping the configured provider
pub struct HttpAuthenticator {
    provider: Box<dyn HttpAuthProvider>,
}

impl HttpAuthenticator {
    pub fn from_config(config: &HttpAuthConfig) -> Self {
        let provider: Box<dyn HttpAuthProvider> = match config {
            HttpAuthConfig::None => Box::new(NoAuthProvider),
            HttpAuthConfig::Basic { username, password } => {
                Box::new(BasicAuthProvider::new(username.clone(), password.clone()))
            }
        };

        Self { provider }
    }

    pub fn with_provider(provider: Box<dyn HttpAuthProvider>) -> Self {
        Self { provider }
    }

    pub fn authenticate(&self, headers: &[(String, String)]) -> AuthResult {
        self.provider.authenticate(headers)
    }

    pub fn auth_type(&self) -> &'static str {
        self.provider.auth_type()
    }

    pub fn requires_auth(&self) -> bool {
        self.provider.auth_type() != "none"
    }
}

impl Default for HttpAuthenticator {
    fn default() -> Self {
        Self::from_config(&HttpAuthConfig::None)
    }
}

impl std::fmt::Debug for HttpAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuthenticator")
            .field("auth_type", &self.auth_type())
            .finish()
    }
}
