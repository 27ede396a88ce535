//! Tunnel Protocol Definitions
//!
//! This crate defines the wire frames exchanged between the relay and the
//! agent over the control WebSocket, the hex codec used to carry binary
//! bodies inside text frames, and the tunnel identifier type.

pub mod hex;
pub mod messages;
pub mod tunnel_id;

pub use hex::{from_hex, to_hex, HexError};
pub use messages::*;
pub use tunnel_id::{TunnelId, TunnelIdError, TUNNEL_ID_LEN};

use std::time::Duration;

/// WebSocket sub-protocol name announced by agents
pub const TUNNEL_PROXY_PROTOCOL: &str = "webhooks-proxy-tunnel";

/// Header marking a preflight request (answered without upgrading)
pub const PREFLIGHT_HEADER: &str = "x-webhooks-proxy-tunnel-preflight";

/// Token sent by agents that have no shared secret configured
pub const NO_SECRET_TOKEN: &str = "no-secret";

/// How long the relay waits for the agent to answer a proxied request
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Close code sent to an agent that was replaced by a newer connection
pub const CLOSE_SUPERSEDED: u16 = 4101;

/// Close code sent to an agent evicted through the admin endpoint
pub const CLOSE_MANUAL: u16 = 4102;

/// Close code for a connection that sent a frame we cannot understand
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Path prefix of the public ingress
pub const PROXY_PATH_PREFIX: &str = "/proxy/";
