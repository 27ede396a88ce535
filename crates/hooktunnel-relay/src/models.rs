//! Response bodies of the relay's JSON endpoints

use hooktunnel_control::SessionStats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}

/// Stats of one tunnel in the `/stats` listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStats {
    pub tunnel_id: String,
    pub is_connected: bool,
    pub request_count: u64,
}

impl TunnelStats {
    pub fn new(tunnel_id: String, stats: SessionStats) -> Self {
        Self {
            tunnel_id,
            is_connected: stats.is_connected,
            request_count: stats.request_count,
        }
    }
}
