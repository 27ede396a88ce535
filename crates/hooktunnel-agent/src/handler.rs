//! Request frame handling
//!
//! Turns one [`ProxyRequest`] into a call against the local target and the
//! answer into a [`ProxyResponse`]. Every request gets a response: local
//! failures become a 500 with a diagnostic body.

use crate::urls::merge_url;
use hooktunnel_http_auth::{AuthResult, HttpAuthConfig, HttpAuthenticator};
use hooktunnel_proto::{ProxyRequest, ProxyResponse};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

/// Request headers describing the relay's hop, never sent to the target
const STRIPPED_REQUEST_HEADERS: &[&str] = &["content-length", "transfer-encoding", "keep-alive", "host"];

/// Failure to obtain a response from the local target
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid request method: {0:?}")]
    InvalidMethod(String),

    #[error("Request to target failed: {0}")]
    Request(#[from] reqwest::Error),
}

pub struct RequestHandler {
    client: reqwest::Client,
    target_url: Url,
    authenticator: HttpAuthenticator,
    client_ip_header: Option<String>,
}

impl RequestHandler {
    pub fn new(
        target_url: Url,
        http_auth: &HttpAuthConfig,
        client_ip_header: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        // Redirects and encodings are the caller's business: pass them through.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            target_url,
            authenticator: HttpAuthenticator::from_config(http_auth),
            client_ip_header,
        })
    }

    /// Answer one request frame
    pub async fn handle(&self, request: ProxyRequest) -> ProxyResponse {
        info!(method = %request.method, url = %request.url, "Received request");

        if let AuthResult::Unauthorized(response) = self.authenticator.authenticate(&request.headers)
        {
            return response;
        }

        match self.fetch(request).await {
            Ok(response) => {
                debug!(status = response.status, "Target responded");
                response
            }
            Err(e) => {
                error!(error = %e, target = %self.target_url, "Error while fetching");
                self.fetch_error_response()
            }
        }
    }

    async fn fetch(&self, request: ProxyRequest) -> Result<ProxyResponse, FetchError> {
        let url = merge_url(&self.target_url, &request.url)?;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| FetchError::InvalidMethod(request.method.clone()))?;

        let mut headers = HeaderMap::new();
        let mut client_ip = None;
        for (name, value) in &request.headers {
            if STRIPPED_REQUEST_HEADERS
                .iter()
                .any(|stripped| name.eq_ignore_ascii_case(stripped))
            {
                continue;
            }
            if self
                .client_ip_header
                .as_deref()
                .is_some_and(|h| name.eq_ignore_ascii_case(h))
            {
                client_ip = Some(value.clone());
            }

            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => debug!(header = %name, "Skipping invalid request header"),
            }
        }
        if let Some(ip) = client_ip.and_then(|ip| HeaderValue::from_str(&ip).ok()) {
            headers.insert("x-forwarded-for", ip);
        }

        debug!(method = %method, url = %url, "Forwarding to target");
        let mut builder = self.client.request(method.clone(), url).headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().await?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let bytes = response.bytes().await?;
        let body = response_has_body(&method, status).then(|| bytes.to_vec());

        Ok(ProxyResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }

    fn fetch_error_response(&self) -> ProxyResponse {
        ProxyResponse::text(
            500,
            "Internal Server Error",
            format!(
                "Error while fetching the target URL.\n\
                 Please check if the target server is running on \"{}\".\n\
                 For more information check the tunnel client logs.\n",
                self.target_url
            ),
        )
    }
}

/// Whether a response to `method` with `status` can carry a body at all
fn response_has_body(method: &Method, status: StatusCode) -> bool {
    !(*method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}
