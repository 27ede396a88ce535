//! Conversion between public HTTP traffic and tunnel frames

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use hooktunnel_proto::{HeaderList, ProxyRequest, ProxyResponse};
use http_body_util::LengthLimitError;
use tracing::debug;

/// Agent response headers that describe the agent's own connection
const SKIPPED_RESPONSE_HEADERS: &[&str] = &[
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
];

pub(crate) enum IngressError {
    BodyTooLarge,
    BodyUnreadable(String),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        match self {
            IngressError::BodyTooLarge => {
                (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
            }
            IngressError::BodyUnreadable(reason) => (
                StatusCode::BAD_REQUEST,
                format!("could not read request body: {}", reason),
            )
                .into_response(),
        }
    }
}

/// Buffer a public request into a [`ProxyRequest`]
///
/// A body is only carried when the caller announced one with
/// `content-length` or `transfer-encoding`.
pub(crate) async fn to_proxy_request(
    request: Request,
    max_body_size: usize,
) -> Result<ProxyRequest, IngressError> {
    let (parts, body) = request.into_parts();

    let url = absolute_url(&parts.headers, &parts.uri);
    let headers: HeaderList = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let has_body = parts.headers.contains_key(header::CONTENT_LENGTH)
        || parts.headers.contains_key(header::TRANSFER_ENCODING);
    let body = if has_body {
        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > max_body_size) {
            return Err(IngressError::BodyTooLarge);
        }

        let bytes = axum::body::to_bytes(body, max_body_size)
            .await
            .map_err(|e| {
                if is_length_limit(&e) {
                    IngressError::BodyTooLarge
                } else {
                    IngressError::BodyUnreadable(e.to_string())
                }
            })?;
        Some(bytes.to_vec())
    } else {
        None
    };

    Ok(ProxyRequest {
        method: parts.method.as_str().to_string(),
        url,
        headers,
        body,
    })
}

fn is_length_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = source {
        if err.is::<LengthLimitError>() {
            return true;
        }
        source = err.source();
    }
    false
}

/// Reconstruct the URL the caller used
fn absolute_url(headers: &HeaderMap, uri: &axum::http::Uri) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .or(uri.scheme_str())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or(uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    format!("{}://{}{}", scheme, host, path_and_query)
}

/// Turn the agent's answer into the public response
pub(crate) fn to_http_response(response: ProxyResponse) -> Response {
    let status = match StatusCode::from_u16(response.status) {
        Ok(status) if !status.is_informational() => status,
        _ => {
            debug!(status = response.status, "Agent returned an unusable status");
            return (
                StatusCode::BAD_GATEWAY,
                "tunnel client returned an invalid status code",
            )
                .into_response();
        }
    };

    let mut out = Response::new(Body::from(response.body.unwrap_or_default()));
    *out.status_mut() = status;

    let headers = out.headers_mut();
    for (name, value) in &response.headers {
        if SKIPPED_RESPONSE_HEADERS
            .iter()
            .any(|skipped| name.eq_ignore_ascii_case(skipped))
        {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(header = %name, "Dropping invalid response header"),
        }
    }

    out
}
