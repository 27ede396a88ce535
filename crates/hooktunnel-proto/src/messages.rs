//! Protocol message types

use crate::hex::hex_body;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ordered list of header pairs; duplicate names are allowed
pub type HeaderList = Vec<(String, String)>;

/// A frame that could not be understood by the receiver
///
/// Always fatal for the connection it arrived on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unexpected {0} frame")]
    Unexpected(&'static str),

    #[error("Binary frames are not supported")]
    Binary,
}

/// An HTTP request forwarded from the relay to the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyRequest {
    pub method: String,
    pub url: String,
    pub headers: HeaderList,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_body")]
    pub body: Option<Vec<u8>>,
}

/// The agent's answer to a [`ProxyRequest`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
    pub headers: HeaderList,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_body")]
    pub body: Option<Vec<u8>>,
}

impl ProxyResponse {
    /// Plain-text response, used for responses the agent synthesizes itself
    pub fn text(status: u16, status_text: &str, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: Some(body.into().into_bytes()),
        }
    }

    /// Append a header, keeping any existing ones with the same name
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// One message on the control connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Request { request: ProxyRequest },
    Response { response: ProxyResponse },
}

impl Frame {
    pub fn request(request: ProxyRequest) -> Self {
        Frame::Request { request }
    }

    pub fn response(response: ProxyResponse) -> Self {
        Frame::Response { response }
    }

    /// Frame kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Request { .. } => "request",
            Frame::Response { .. } => "response",
        }
    }

    /// Serialize to the JSON text sent on the wire
    pub fn encode(&self) -> String {
        // Frames hold only strings, integers and sequences of them.
        serde_json::to_string(self).expect("frame serialization is infallible")
    }

    /// Parse a text message received on the wire
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Find the first value of a header, comparing names case-insensitively
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
