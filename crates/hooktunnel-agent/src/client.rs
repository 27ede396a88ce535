//! Agent connection loop

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::handler::RequestHandler;
use crate::urls::{http_url, tunnel_id_from_url, websocket_url};
use crate::watchdog::{Watchdog, WatchdogExpiry};
use futures_util::{Sink, SinkExt, StreamExt};
use hooktunnel_auth::generate_token;
use hooktunnel_proto::{
    Frame, ProtocolError, TunnelId, CLOSE_PROTOCOL_ERROR, NO_SECRET_TOKEN, PREFLIGHT_HEADER,
    TUNNEL_PROXY_PROTOCOL,
};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type TunnelSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How an agent run ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The relay closed the connection
    Closed { code: Option<u16>, reason: String },
    /// The total lifetime elapsed
    TotalTimeout,
    /// No frame arrived within the inactivity timeout
    Inactivity,
}

pub struct Agent {
    config: AgentConfig,
    tunnel_id: TunnelId,
    ws_url: Url,
    preflight_url: Url,
    handler: Arc<RequestHandler>,
    http: reqwest::Client,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let tunnel_id = tunnel_id_from_url(&config.tunnel_url)?;
        let ws_url = websocket_url(&config.tunnel_url)?;
        let preflight_url = http_url(&config.tunnel_url)?;
        let handler = RequestHandler::new(
            config.target_url.clone(),
            &config.http_auth,
            config.client_ip_header.clone(),
        )?;

        Ok(Self {
            config,
            tunnel_id,
            ws_url,
            preflight_url,
            handler: Arc::new(handler),
            http: reqwest::Client::new(),
        })
    }

    pub fn tunnel_id(&self) -> &TunnelId {
        &self.tunnel_id
    }

    /// Token presented to the relay for the current time bucket
    fn token(&self) -> String {
        match &self.config.secret {
            Some(secret) => generate_token(self.tunnel_id.as_str(), secret),
            None => NO_SECRET_TOKEN.to_string(),
        }
    }

    /// Connect and serve until the relay closes the connection or a
    /// watchdog timer fires
    pub async fn run(&self) -> Result<RunOutcome, AgentError> {
        let watchdog = Watchdog::new(self.config.total_timeout, self.config.inactivity_timeout);

        tokio::select! {
            result = self.connect_and_serve(&watchdog) => result,
            expiry = watchdog.expired() => Ok(match expiry {
                WatchdogExpiry::Total => {
                    info!("Total timeout reached, shutting down");
                    RunOutcome::TotalTimeout
                }
                WatchdogExpiry::Inactivity => {
                    info!("Inactivity timeout reached, shutting down");
                    RunOutcome::Inactivity
                }
            }),
        }
    }

    async fn connect_and_serve(&self, watchdog: &Watchdog) -> Result<RunOutcome, AgentError> {
        let socket = self.connect_with_retry().await?;
        info!(
            tunnel = %self.config.tunnel_url,
            target = %self.config.target_url,
            "Proxying requests from tunnel to target"
        );
        self.serve(socket, watchdog).await
    }

    async fn connect_with_retry(&self) -> Result<TunnelSocket, AgentError> {
        let attempts = self.config.retry_count.max(1);

        for attempt in 1..=attempts {
            info!(url = %self.config.tunnel_url, "Connecting to the tunnel...");
            match self.connect_once().await {
                Ok(socket) => return Ok(socket),
                Err(e) => {
                    error!(error = %e, "Failed to connect");
                    if attempt < attempts {
                        info!(
                            "Retrying in {:?}... ({}/{})",
                            self.config.retry_delay, attempt, attempts
                        );
                        tokio::time::sleep(self.config.retry_delay).await;
                    } else {
                        error!("Max retries reached.");
                    }
                }
            }
        }

        Err(AgentError::RetriesExhausted {
            url: self.config.tunnel_url.to_string(),
            attempts,
        })
    }

    /// Preflight over plain HTTP, then open the WebSocket
    async fn connect_once(&self) -> Result<TunnelSocket, AgentError> {
        let token = self.token();

        let preflight = self
            .http
            .get(self.preflight_url.clone())
            .header(
                "sec-websocket-protocol",
                format!("{},{}", TUNNEL_PROXY_PROTOCOL, token),
            )
            .header(PREFLIGHT_HEADER, "yes")
            .send()
            .await?;
        let status = preflight.status();
        if !status.is_success() {
            let body = preflight.text().await.unwrap_or_default();
            return Err(AgentError::Preflight {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body: serde_json::to_string(&body).unwrap_or_default(),
            });
        }
        debug!("Preflight check passed");

        let mut request = self.ws_url.as_str().into_client_request()?;
        request.headers_mut().insert(
            "sec-websocket-protocol",
            HeaderValue::from_str(&format!("{}, {}", TUNNEL_PROXY_PROTOCOL, token))
                .map_err(tungstenite::Error::from)?,
        );
        let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
        info!(tunnel_id = %self.tunnel_id, "Connected to the tunnel");

        Ok(socket)
    }

    /// Answer request frames until the connection ends
    ///
    /// Requests are handled concurrently; responses are written back by
    /// this loop in completion order.
    async fn serve(
        &self,
        socket: TunnelSocket,
        watchdog: &Watchdog,
    ) -> Result<RunOutcome, AgentError> {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
        let mut tasks = JoinSet::new();

        let outcome = loop {
            tokio::select! {
                Some(frame) = rx.recv() => {
                    sink.send(Message::Text(frame.encode())).await?;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Request task failed");
                    }
                }
                message = stream.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => break Err(e.into()),
                        None => {
                            info!("Connection closed");
                            break Ok(RunOutcome::Closed { code: None, reason: String::new() });
                        }
                    };

                    let text = match message {
                        Message::Text(text) => {
                            watchdog.touch();
                            text
                        }
                        Message::Binary(_) => {
                            watchdog.touch();
                            break Err(reject(&mut sink, ProtocolError::Binary).await);
                        }
                        Message::Close(frame) => {
                            let (code, reason) = match frame {
                                Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                                None => (None, String::new()),
                            };
                            info!(code = ?code, reason = %reason, "Connection closed");
                            break Ok(RunOutcome::Closed { code, reason });
                        }
                        _ => continue,
                    };

                    let request = match Frame::decode(&text) {
                        Ok(Frame::Request { request }) => request,
                        Ok(frame) => {
                            break Err(reject(&mut sink, ProtocolError::Unexpected(frame.kind())).await);
                        }
                        Err(e) => break Err(reject(&mut sink, e).await),
                    };

                    let handler = Arc::clone(&self.handler);
                    let tx = tx.clone();
                    tasks.spawn(async move {
                        let response = handler.handle(request).await;
                        // Receiver gone means the connection already ended.
                        let _ = tx.send(Frame::response(response));
                    });
                }
            }
        };

        tasks.abort_all();
        outcome
    }
}

/// Close the connection after a frame we cannot understand
async fn reject<S>(sink: &mut S, error: ProtocolError) -> AgentError
where
    S: Sink<Message> + Unpin,
{
    warn!(error = %error, "Closing connection after protocol error");
    let close = Message::Close(Some(CloseFrame {
        code: CloseCode::from(CLOSE_PROTOCOL_ERROR),
        reason: "protocol error".into(),
    }));
    if sink.send(close).await.is_err() {
        debug!("Connection already gone");
    }
    AgentError::Protocol(error)
}
