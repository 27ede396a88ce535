//! Tunnel and target URL handling

use crate::error::AgentError;
use hooktunnel_proto::{TunnelId, PROXY_PATH_PREFIX, TUNNEL_ID_LEN};
use url::Url;

/// Length of `/proxy/<tunnel-id>` at the start of every forwarded path
const PROXY_PREFIX_LEN: usize = PROXY_PATH_PREFIX.len() + TUNNEL_ID_LEN;

/// Tunnel id from the second path segment (`/connect/<id>`)
pub fn tunnel_id_from_url(url: &Url) -> Result<TunnelId, AgentError> {
    let invalid = |reason: String| AgentError::InvalidTunnelUrl {
        url: url.to_string(),
        reason,
    };

    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.nth(1))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("expected a path like /connect/<tunnel-id>".to_string()))?;

    TunnelId::parse(segment).map_err(|e| invalid(e.to_string()))
}

/// URL for the WebSocket upgrade
pub fn websocket_url(url: &Url) -> Result<Url, AgentError> {
    with_scheme(url, |scheme| match scheme {
        "http" | "ws" => Some("ws"),
        "https" | "wss" => Some("wss"),
        _ => None,
    })
}

/// URL for the plain HTTP preflight request
pub fn http_url(url: &Url) -> Result<Url, AgentError> {
    with_scheme(url, |scheme| match scheme {
        "http" | "ws" => Some("http"),
        "https" | "wss" => Some("https"),
        _ => None,
    })
}

fn with_scheme(url: &Url, map: impl Fn(&str) -> Option<&'static str>) -> Result<Url, AgentError> {
    let invalid = || AgentError::InvalidTunnelUrl {
        url: url.to_string(),
        reason: "scheme must be http, https, ws or wss".to_string(),
    };

    let scheme = map(url.scheme()).ok_or_else(invalid)?;
    // Url refuses to switch between special and non-special schemes, so
    // rebuild from the string instead of calling set_scheme.
    let rest = &url.as_str()[url.scheme().len()..];
    Url::parse(&format!("{}{}", scheme, rest)).map_err(|_| invalid())
}

/// Local URL for a forwarded request
///
/// The `/proxy/<tunnel-id>` prefix is removed from the request path and the
/// remainder appended to the target's path. Query parameters of the target
/// act as defaults; parameters of the request replace them by name.
pub fn merge_url(target: &Url, request_url: &str) -> Result<Url, url::ParseError> {
    let request = Url::parse(request_url)?;
    let proxy_path = request.path().get(PROXY_PREFIX_LEN..).unwrap_or("");

    let mut merged = target.clone();
    let path = if target.path() == "/" {
        proxy_path.to_string()
    } else if target.path().ends_with('/') && proxy_path.starts_with('/') {
        format!("{}{}", target.path(), &proxy_path[1..])
    } else {
        format!("{}{}", target.path(), proxy_path)
    };
    merged.set_path(&path);

    let mut params: Vec<(String, String)> = Vec::new();
    for (key, value) in target.query_pairs().chain(request.query_pairs()) {
        set_param(&mut params, &key, &value);
    }
    if params.is_empty() {
        merged.set_query(None);
    } else {
        merged.query_pairs_mut().clear().extend_pairs(params);
    }
    merged.set_fragment(None);

    Ok(merged)
}

/// Replace the first `key` entry and drop later ones, or append
fn set_param(params: &mut Vec<(String, String)>, key: &str, value: &str) {
    match params.iter().position(|(k, _)| k == key) {
        Some(first) => {
            params[first].1 = value.to_string();
            let mut index = 0;
            params.retain(|(k, _)| {
                let keep = index <= first || k != key;
                index += 1;
                keep
            });
        }
        None => params.push((key.to_string(), value.to_string())),
    }
}
