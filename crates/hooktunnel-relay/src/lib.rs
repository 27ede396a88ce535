//! hooktunnel relay
//!
//! Public HTTP side of the tunnel. Requests to `/proxy/{tunnelId}/...` are
//! handed to the tunnel's session and answered with whatever the attached
//! agent returns; agents attach through a WebSocket upgrade on
//! `/connect/{tunnelId}`.

mod agent_socket;
mod forward;
pub mod handlers;
pub mod models;

use axum::{
    routing::{any, get},
    Router,
};
use hooktunnel_auth::TokenAuthenticator;
use hooktunnel_control::SessionRegistry;
use hooktunnel_proto::RESPONSE_TIMEOUT;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Default cap on buffered request bodies
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub authenticator: TokenAuthenticator,
    pub max_body_size: usize,
}

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the relay
    pub bind_addr: SocketAddr,
    /// Shared secret agents derive their tokens from; `None` admits anyone
    pub secret: Option<String>,
    /// How long a proxied request waits for the agent
    pub response_timeout: Duration,
    /// Largest request body accepted on the public ingress
    pub max_body_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            secret: None,
            response_timeout: RESPONSE_TIMEOUT,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl RelayConfig {
    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }
}

/// Relay server
pub struct RelayServer {
    config: RelayConfig,
    state: Arc<AppState>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let state = Arc::new(AppState {
            registry: Arc::new(SessionRegistry::new(config.response_timeout)),
            authenticator: TokenAuthenticator::new(config.secret.clone()),
            max_body_size: config.max_body_size,
        });

        Self { config, state }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/proxy/{tunnel_id}", any(handlers::proxy))
            .route("/proxy/{tunnel_id}/", any(handlers::proxy))
            .route("/proxy/{tunnel_id}/{*rest}", any(handlers::proxy))
            .route("/connect/{tunnel_id}", get(handlers::connect))
            .route("/close/{tunnel_id}", get(handlers::close))
            .route("/stats", get(handlers::list_stats))
            .route("/stats/{tunnel_id}", get(handlers::stats))
            .route("/health", get(handlers::health_check))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until the process ends
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: tokio::net::TcpListener) -> Result<(), anyhow::Error> {
        let router = self.build_router();
        let addr = listener.local_addr()?;

        info!("Relay listening on http://{}", addr);
        info!("  Ingress: http://{}/proxy/<tunnel-id>/", addr);
        info!("  Agents:  ws://{}/connect/<tunnel-id>", addr);
        if !self.state.authenticator.requires_token() {
            warn!("No tunnel secret configured. Anyone can connect to any tunnel.");
        }

        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}
