//! Session registry
//!
//! Maps tunnel ids to their session. Sessions are created when an agent
//! attaches and live for the rest of the process.

use crate::session::{SessionHandle, SessionStats};
use dashmap::DashMap;
use hooktunnel_proto::{TunnelId, RESPONSE_TIMEOUT};
use std::time::Duration;
use tracing::debug;

pub struct SessionRegistry {
    sessions: DashMap<TunnelId, SessionHandle>,
    response_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(response_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            response_timeout,
        }
    }

    /// Session for `tunnel_id`, spawning it if needed
    ///
    /// Must be called from within a tokio runtime.
    pub fn get_or_create(&self, tunnel_id: &TunnelId) -> SessionHandle {
        self.sessions
            .entry(tunnel_id.clone())
            .or_insert_with(|| {
                debug!(tunnel_id = %tunnel_id, "Creating session");
                SessionHandle::spawn(tunnel_id.clone(), self.response_timeout)
            })
            .clone()
    }

    /// Existing session for `tunnel_id`
    pub fn get(&self, tunnel_id: &TunnelId) -> Option<SessionHandle> {
        self.sessions.get(tunnel_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stats of every known session, ordered by tunnel id
    pub async fn stats_all(&self) -> Vec<(TunnelId, SessionStats)> {
        // Collect first: map guards must not be held across an await.
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut stats = Vec::with_capacity(handles.len());
        for handle in handles {
            stats.push((handle.tunnel_id().clone(), handle.stats().await));
        }
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RESPONSE_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_reuses_session() {
        let registry = SessionRegistry::default();
        let id = TunnelId::generate();

        assert!(registry.get(&id).is_none());
        let first = registry.get_or_create(&id);
        let second = registry.get_or_create(&id);

        assert_eq!(registry.len(), 1);
        assert_eq!(first.tunnel_id(), second.tunnel_id());
        assert!(registry.get(&id).is_some());
    }

    #[tokio::test]
    async fn test_stats_all() {
        let registry = SessionRegistry::default();
        assert!(registry.stats_all().await.is_empty());

        let a = TunnelId::parse("00000000-0000-0000-0000-00000000000a").unwrap();
        let b = TunnelId::parse("00000000-0000-0000-0000-00000000000b").unwrap();
        registry.get_or_create(&b);
        registry.get_or_create(&a);

        let stats = registry.stats_all().await;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].0, a);
        assert_eq!(stats[1].0, b);
        assert!(!stats[0].1.is_connected);
    }
}
