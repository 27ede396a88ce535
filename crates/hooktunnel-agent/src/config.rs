//! Agent configuration

use crate::error::AgentError;
use crate::urls::tunnel_id_from_url;
use hooktunnel_http_auth::HttpAuthConfig;
use std::time::Duration;
use url::Url;

/// Default total lifetime of an agent run
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default time without inbound frames before the agent stops
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default number of connection attempts
pub const DEFAULT_RETRY_COUNT: u32 = 5;

/// Default pause between connection attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Header carrying the caller's address, as set by the relay's edge
pub const DEFAULT_CLIENT_IP_HEADER: &str = "cf-connecting-ip";

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay endpoint, `http(s)://` or `ws(s)://.../connect/<tunnel-id>`
    pub tunnel_url: Url,
    /// Local server requests are forwarded to
    pub target_url: Url,
    /// Shared secret for the relay token
    pub secret: Option<String>,
    /// Authentication required from public callers
    pub http_auth: HttpAuthConfig,
    /// Stop after this long regardless of traffic (`None` disables)
    pub total_timeout: Option<Duration>,
    /// Stop after this long without inbound frames (`None` disables)
    pub inactivity_timeout: Option<Duration>,
    pub retry_count: u32,
    pub retry_delay: Duration,
    /// Inbound header copied to `x-forwarded-for` (`None` disables)
    pub client_ip_header: Option<String>,
}

impl AgentConfig {
    pub fn new(tunnel_url: &str, target_url: &str) -> Result<Self, AgentError> {
        let tunnel = Url::parse(tunnel_url).map_err(|e| AgentError::InvalidTunnelUrl {
            url: tunnel_url.to_string(),
            reason: e.to_string(),
        })?;
        tunnel_id_from_url(&tunnel)?;

        let target = Url::parse(target_url).map_err(|e| AgentError::InvalidTargetUrl {
            url: target_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(AgentError::InvalidTargetUrl {
                url: target_url.to_string(),
                reason: "scheme must be http or https".to_string(),
            });
        }

        Ok(Self {
            tunnel_url: tunnel,
            target_url: target,
            secret: None,
            http_auth: HttpAuthConfig::None,
            total_timeout: Some(DEFAULT_TOTAL_TIMEOUT),
            inactivity_timeout: Some(DEFAULT_INACTIVITY_TIMEOUT),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
            client_ip_header: Some(DEFAULT_CLIENT_IP_HEADER.to_string()),
        })
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// Require `user:password` Basic Auth from public callers
    pub fn with_basic_auth(mut self, credentials: &str) -> Result<Self, AgentError> {
        self.http_auth = HttpAuthConfig::basic(credentials)?;
        Ok(self)
    }

    pub fn with_total_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.total_timeout = timeout;
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, count: u32, delay: Duration) -> Self {
        self.retry_count = count;
        self.retry_delay = delay;
        self
    }

    pub fn with_client_ip_header(mut self, header: Option<String>) -> Self {
        self.client_ip_header = header;
        self
    }
}

/// Timeout from a number of minutes; zero or negative disables it
pub fn minutes(value: i64) -> Option<Duration> {
    u64::try_from(value)
        .ok()
        .filter(|m| *m > 0)
        .map(|m| Duration::from_secs(m * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TUNNEL: &str = "https://relay.example.com/connect/00000000-0000-0000-0000-000000000000";

    #[test]
    fn test_defaults() {
        let config = AgentConfig::new(TUNNEL, "http://localhost:3000").unwrap();
        assert_eq!(config.total_timeout, Some(Duration::from_secs(3600)));
        assert_eq!(config.inactivity_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.client_ip_header.as_deref(), Some("cf-connecting-ip"));
        assert_eq!(config.http_auth, HttpAuthConfig::None);
        assert!(config.secret.is_none());
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(
            AgentConfig::new("not a url", "http://localhost:3000"),
            Err(AgentError::InvalidTunnelUrl { .. })
        ));
        assert!(matches!(
            AgentConfig::new("https://relay.example.com/connect/nope", "http://localhost:3000"),
            Err(AgentError::InvalidTunnelUrl { .. })
        ));
        assert!(matches!(
            AgentConfig::new(TUNNEL, "localhost:3000"),
            Err(AgentError::InvalidTargetUrl { .. })
        ));
    }

    #[test]
    fn test_basic_auth() {
        let config = AgentConfig::new(TUNNEL, "http://localhost:3000")
            .unwrap()
            .with_basic_auth("user:pass")
            .unwrap();
        assert!(matches!(config.http_auth, HttpAuthConfig::Basic { .. }));

        assert!(AgentConfig::new(TUNNEL, "http://localhost:3000")
            .unwrap()
            .with_basic_auth("nopass")
            .is_err());
    }

    #[test]
    fn test_empty_secret_is_no_secret() {
        let config = AgentConfig::new(TUNNEL, "http://localhost:3000")
            .unwrap()
            .with_secret("");
        assert!(config.secret.is_none());
    }

    #[test]
    fn test_minutes() {
        assert_eq!(minutes(60), Some(Duration::from_secs(3600)));
        assert_eq!(minutes(0), None);
        assert_eq!(minutes(-5), None);
    }
}
