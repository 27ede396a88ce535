//! Tunnel identifiers

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Length of a hyphenated UUID, the only accepted tunnel id form
pub const TUNNEL_ID_LEN: usize = 36;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TunnelIdError {
    #[error("Invalid tunnel ID: {0:?} (expected a UUID like 00000000-0000-0000-0000-000000000000)")]
    Invalid(String),
}

/// Identifier selecting one relay session
///
/// Always stored in lowercase hyphenated form so that the same tunnel
/// typed with different casing maps to the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelId(String);

impl TunnelId {
    pub fn parse(raw: &str) -> Result<Self, TunnelIdError> {
        if raw.len() != TUNNEL_ID_LEN {
            return Err(TunnelIdError::Invalid(raw.to_string()));
        }
        let uuid = Uuid::try_parse(raw).map_err(|_| TunnelIdError::Invalid(raw.to_string()))?;
        Ok(Self(uuid.hyphenated().to_string()))
    }

    /// A fresh random tunnel id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TunnelId {
    type Err = TunnelIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let id = TunnelId::parse("6F9619FF-8B86-D011-B42D-00C04FC964FF").unwrap();
        assert_eq!(id.as_str(), "6f9619ff-8b86-d011-b42d-00c04fc964ff");
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(TunnelId::parse("").is_err());
        assert!(TunnelId::parse("foo").is_err());
        // Simple (unhyphenated) form has the wrong length
        assert!(TunnelId::parse("6f9619ff8b86d011b42d00c04fc964ff").is_err());
        assert!(TunnelId::parse("6f9619ff-8b86-d011-b42d-00c04fc964fz").is_err());
    }

    #[test]
    fn test_generate_round_trips() {
        let id = TunnelId::generate();
        assert_eq!(id.as_str().len(), TUNNEL_ID_LEN);
        assert_eq!(TunnelId::parse(id.as_str()).unwrap(), id);
    }
}
