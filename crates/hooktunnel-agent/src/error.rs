//! Agent errors

use hooktunnel_http_auth::AuthError;
use hooktunnel_proto::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid tunnel URL {url:?}: {reason}")]
    InvalidTunnelUrl { url: String, reason: String },

    #[error("Invalid target URL {url:?}: {reason}")]
    InvalidTargetUrl { url: String, reason: String },

    #[error("Invalid Basic Auth setting: {0}")]
    InvalidBasicAuth(#[from] AuthError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The relay answered the preflight check with a non-2xx status
    #[error("Received status code {status} ({status_text}) from the tunnel: {body}")]
    Preflight {
        status: u16,
        status_text: String,
        /// Response body, JSON-quoted so it cannot garble the terminal
        body: String,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Failed to connect to the tunnel at {url} after {attempts} attempts. Please check if the tunnel is running.")]
    RetriesExhausted { url: String, attempts: u32 },
}
