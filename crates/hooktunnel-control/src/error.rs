//! Session errors

use thiserror::Error;

/// Why a proxied request did not produce an agent response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no proxy connection")]
    NoAgent,

    #[error("waiting for response from the tunnel client timed out")]
    Timeout,

    #[error("tunnel client disconnected: {0}")]
    ConnectionLost(String),

    #[error("tunnel client sent an invalid frame: {0}")]
    Protocol(String),

    #[error("another request is waiting for the tunnel client")]
    Busy,

    #[error("tunnel session is no longer running")]
    SessionGone,
}

impl SessionError {
    /// HTTP status returned to the public caller
    pub fn status_code(&self) -> u16 {
        match self {
            SessionError::NoAgent
            | SessionError::ConnectionLost(_)
            | SessionError::Protocol(_) => 502,
            SessionError::Busy => 503,
            SessionError::Timeout => 504,
            SessionError::SessionGone => 500,
        }
    }
}
