//! Relay HTTP handlers

use crate::agent_socket::serve_agent;
use crate::forward::{to_http_response, to_proxy_request};
use crate::models::{HealthResponse, TunnelStats};
use crate::AppState;
use axum::{
    extract::{ws::rejection::WebSocketUpgradeRejection, Path, Request, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hooktunnel_auth::parse_subprotocol_header;
use hooktunnel_control::SessionError;
use hooktunnel_proto::{TunnelId, PREFLIGHT_HEADER, TUNNEL_PROXY_PROTOCOL};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Path parameters shared by all per-tunnel routes
#[derive(Debug, Deserialize)]
pub struct TunnelPath {
    tunnel_id: String,
}

impl TunnelPath {
    fn parse(&self) -> Result<TunnelId, Response> {
        TunnelId::parse(&self.tunnel_id)
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())
    }
}

/// Public ingress: forward the request to the tunnel's agent
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    Path(path): Path<TunnelPath>,
    request: Request,
) -> Response {
    let tunnel_id = match path.parse() {
        Ok(id) => id,
        Err(response) => return response,
    };

    let proxied = match to_proxy_request(request, state.max_body_size).await {
        Ok(proxied) => proxied,
        Err(e) => return e.into_response(),
    };
    debug!(tunnel_id = %tunnel_id, method = %proxied.method, url = %proxied.url, "Proxying request");

    // Sessions only come into being when an authenticated agent attaches.
    let result = match state.registry.get(&tunnel_id) {
        Some(session) => session.proxy(proxied).await,
        None => Err(SessionError::NoAgent),
    };
    match result {
        Ok(response) => to_http_response(response),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, e.to_string()).into_response()
        }
    }
}

/// Agent endpoint: authenticate, then upgrade to the control WebSocket
///
/// A request carrying the preflight header is only authenticated and
/// answered with 200, so agents can check reachability and credentials
/// with a plain HTTP client before upgrading.
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Path(path): Path<TunnelPath>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let tunnel_id = match path.parse() {
        Ok(id) => id,
        Err(response) => return response,
    };

    let token = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_subprotocol_header);
    if let Err(e) = state
        .authenticator
        .validate(tunnel_id.as_str(), token.as_deref())
    {
        warn!(tunnel_id = %tunnel_id, error = %e, "Rejected agent connection");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    if headers.contains_key(PREFLIGHT_HEADER) {
        debug!(tunnel_id = %tunnel_id, "Preflight check passed");
        return (StatusCode::OK, "ok").into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(_) => {
            return (StatusCode::UPGRADE_REQUIRED, "Expected `Upgrade: websocket`").into_response()
        }
    };

    info!(tunnel_id = %tunnel_id, "Agent connecting");
    let session = state.registry.get_or_create(&tunnel_id);
    ws.protocols([TUNNEL_PROXY_PROTOCOL])
        .on_upgrade(move |socket| {
            serve_agent(socket, session).instrument(info_span!("agent", tunnel_id = %tunnel_id))
        })
}

/// Evict the tunnel's agent
pub async fn close(State(state): State<Arc<AppState>>, Path(path): Path<TunnelPath>) -> Response {
    let tunnel_id = match path.parse() {
        Ok(id) => id,
        Err(response) => return response,
    };

    let closed = match state.registry.get(&tunnel_id) {
        Some(session) => session.close().await,
        None => false,
    };

    if closed {
        "Closed connection".into_response()
    } else {
        "No proxy connection".into_response()
    }
}

/// Stats of one tunnel
pub async fn stats(State(state): State<Arc<AppState>>, Path(path): Path<TunnelPath>) -> Response {
    let tunnel_id = match path.parse() {
        Ok(id) => id,
        Err(response) => return response,
    };

    let stats = match state.registry.get(&tunnel_id) {
        Some(session) => session.stats().await,
        None => Default::default(),
    };
    Json(stats).into_response()
}

/// Stats of every tunnel seen since startup
pub async fn list_stats(State(state): State<Arc<AppState>>) -> Json<Vec<TunnelStats>> {
    let stats = state
        .registry
        .stats_all()
        .await
        .into_iter()
        .map(|(id, stats)| TunnelStats::new(id.to_string(), stats))
        .collect();
    Json(stats)
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
