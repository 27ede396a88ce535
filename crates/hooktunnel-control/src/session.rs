//! Tunnel session actor
//!
//! One task per tunnel id owns all mutable session state. Everything else
//! (the public ingress, the agent's WebSocket reader, admin endpoints) sends
//! commands through a [`SessionHandle`], so there is never more than one
//! writer and no locks around the connection or the pending request.
//!
//! State machine:
//!
//! ```text
//! Idle --connect--> Connected --proxy--> AwaitingResponse
//!  ^                  ^  |                  |   |
//!  |                  |  +<-- response -----+   |
//!  |                  +<----- timeout ----------+
//!  +---- close / disconnect / protocol error ---+
//! ```

use crate::connection::AgentConnection;
use crate::error::SessionError;
use hooktunnel_proto::{
    Frame, ProtocolError, ProxyRequest, ProxyResponse, TunnelId, CLOSE_MANUAL,
    CLOSE_PROTOCOL_ERROR, CLOSE_SUPERSEDED,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

type ProxyReply = oneshot::Sender<Result<ProxyResponse, SessionError>>;

/// Session counters exposed on the stats endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub is_connected: bool,
    pub request_count: u64,
}

enum Command {
    Connect {
        connection: AgentConnection,
    },
    Proxy {
        request: ProxyRequest,
        reply: ProxyReply,
    },
    Frame {
        connection_id: u64,
        text: String,
    },
    Violation {
        connection_id: u64,
        error: ProtocolError,
    },
    Disconnected {
        connection_id: u64,
    },
    Close {
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<SessionStats>,
    },
}

/// Cloneable front of a tunnel session
#[derive(Clone)]
pub struct SessionHandle {
    tunnel_id: TunnelId,
    commands: mpsc::UnboundedSender<Command>,
    // Serializes public callers so the single pending slot is never raced.
    gate: Arc<Mutex<()>>,
    response_timeout: Duration,
}

impl SessionHandle {
    /// Spawn the session task for `tunnel_id`
    pub fn spawn(tunnel_id: TunnelId, response_timeout: Duration) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let session = Session {
            tunnel_id: tunnel_id.clone(),
            connection: None,
            pending: None,
            request_count: 0,
            response_timeout,
        };
        tokio::spawn(session.run(rx));

        Self {
            tunnel_id,
            commands,
            gate: Arc::new(Mutex::new(())),
            response_timeout,
        }
    }

    pub fn tunnel_id(&self) -> &TunnelId {
        &self.tunnel_id
    }

    /// Attach an agent, evicting any previous one
    pub fn connect(&self, connection: AgentConnection) {
        self.send(Command::Connect { connection });
    }

    /// Forward a request to the attached agent and wait for its response
    ///
    /// Callers queue behind each other; a caller that cannot get its turn
    /// within the response timeout gets [`SessionError::Busy`].
    pub async fn proxy(&self, request: ProxyRequest) -> Result<ProxyResponse, SessionError> {
        let _turn = timeout(self.response_timeout, self.gate.lock())
            .await
            .map_err(|_| SessionError::Busy)?;

        let (reply, rx) = oneshot::channel();
        self.send(Command::Proxy { request, reply });
        rx.await.map_err(|_| SessionError::SessionGone)?
    }

    /// Text frame received from agent connection `connection_id`
    pub fn on_frame(&self, connection_id: u64, text: String) {
        self.send(Command::Frame {
            connection_id,
            text,
        });
    }

    /// Agent connection `connection_id` sent something that is not a frame
    pub fn on_protocol_error(&self, connection_id: u64, error: ProtocolError) {
        self.send(Command::Violation {
            connection_id,
            error,
        });
    }

    /// Agent connection `connection_id` closed or failed
    pub fn on_close(&self, connection_id: u64) {
        self.send(Command::Disconnected { connection_id });
    }

    /// Close the attached agent, if any
    pub async fn close(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Close { reply });
        rx.await.unwrap_or(false)
    }

    pub async fn stats(&self) -> SessionStats {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply });
        rx.await.unwrap_or_default()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!(tunnel_id = %self.tunnel_id, "Session task is not running");
        }
    }
}

struct Pending {
    reply: ProxyReply,
    deadline: Instant,
}

struct Session {
    tunnel_id: TunnelId,
    connection: Option<AgentConnection>,
    pending: Option<Pending>,
    request_count: u64,
    response_timeout: Duration,
}

impl Session {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!(tunnel_id = %self.tunnel_id, "Session started");

        loop {
            let deadline = self.pending.as_ref().map(|pending| pending.deadline);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = wait_until(deadline) => self.expire_pending(),
            }
        }

        if let Some(connection) = self.connection.take() {
            connection.close(CLOSE_MANUAL, "session stopped");
        }
        debug!(tunnel_id = %self.tunnel_id, "Session stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect { connection } => self.attach(connection),
            Command::Proxy { request, reply } => self.start_proxy(request, reply),
            Command::Frame {
                connection_id,
                text,
            } => self.on_frame(connection_id, &text),
            Command::Violation {
                connection_id,
                error,
            } => {
                if self.is_active(connection_id) {
                    self.protocol_failure(error);
                }
            }
            Command::Disconnected { connection_id } => self.on_disconnected(connection_id),
            Command::Close { reply } => {
                let _ = reply.send(self.close());
            }
            Command::Stats { reply } => {
                let _ = reply.send(SessionStats {
                    is_connected: self.connection.is_some(),
                    request_count: self.request_count,
                });
            }
        }
    }

    fn attach(&mut self, connection: AgentConnection) {
        if let Some(previous) = self.connection.take() {
            info!(
                tunnel_id = %self.tunnel_id,
                old_connection = previous.id(),
                new_connection = connection.id(),
                "Replacing agent connection"
            );
            previous.close(CLOSE_SUPERSEDED, "new tunnel client connected");
            self.fail_pending(SessionError::ConnectionLost(
                "new tunnel client connected".to_string(),
            ));
        } else {
            info!(tunnel_id = %self.tunnel_id, connection = connection.id(), "Agent connected");
        }
        self.connection = Some(connection);
    }

    fn start_proxy(&mut self, request: ProxyRequest, reply: ProxyReply) {
        let Some(connection) = &self.connection else {
            debug!(tunnel_id = %self.tunnel_id, "No agent attached");
            let _ = reply.send(Err(SessionError::NoAgent));
            return;
        };

        if let Some(pending) = &self.pending {
            if !pending.reply.is_closed() {
                let _ = reply.send(Err(SessionError::Busy));
                return;
            }
            debug!(tunnel_id = %self.tunnel_id, "Abandoning request whose caller went away");
            self.pending = None;
        }

        self.request_count += 1;
        debug!(
            tunnel_id = %self.tunnel_id,
            method = %request.method,
            url = %request.url,
            "Forwarding request to agent"
        );

        if !connection.send_text(Frame::request(request).encode()) {
            self.connection = None;
            let _ = reply.send(Err(SessionError::ConnectionLost(
                "connection writer closed".to_string(),
            )));
            return;
        }

        self.pending = Some(Pending {
            reply,
            deadline: Instant::now() + self.response_timeout,
        });
    }

    fn on_frame(&mut self, connection_id: u64, text: &str) {
        if !self.is_active(connection_id) {
            debug!(
                tunnel_id = %self.tunnel_id,
                connection = connection_id,
                "Ignoring frame from replaced connection"
            );
            return;
        }

        match Frame::decode(text) {
            Ok(Frame::Response { response }) => match self.pending.take() {
                Some(pending) => {
                    debug!(tunnel_id = %self.tunnel_id, status = response.status, "Agent responded");
                    let _ = pending.reply.send(Ok(response));
                }
                None => {
                    warn!(
                        tunnel_id = %self.tunnel_id,
                        status = response.status,
                        "Response arrived for timed-out or unknown request (dropped)"
                    );
                }
            },
            Ok(frame) => self.protocol_failure(ProtocolError::Unexpected(frame.kind())),
            Err(e) => self.protocol_failure(e),
        }
    }

    fn protocol_failure(&mut self, error: ProtocolError) {
        warn!(tunnel_id = %self.tunnel_id, error = %error, "Closing agent connection");
        if let Some(connection) = self.connection.take() {
            connection.close(CLOSE_PROTOCOL_ERROR, "protocol error");
        }
        self.fail_pending(SessionError::Protocol(error.to_string()));
    }

    fn on_disconnected(&mut self, connection_id: u64) {
        if !self.is_active(connection_id) {
            return;
        }
        info!(tunnel_id = %self.tunnel_id, connection = connection_id, "Agent disconnected");
        self.connection = None;
        self.fail_pending(SessionError::ConnectionLost(
            "connection closed".to_string(),
        ));
    }

    fn close(&mut self) -> bool {
        self.fail_pending(SessionError::ConnectionLost("manually closed".to_string()));
        match self.connection.take() {
            Some(connection) => {
                info!(tunnel_id = %self.tunnel_id, connection = connection.id(), "Closing agent connection on request");
                connection.close(CLOSE_MANUAL, "manually closed");
                true
            }
            None => false,
        }
    }

    fn expire_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            warn!(
                tunnel_id = %self.tunnel_id,
                timeout_secs = self.response_timeout.as_secs(),
                "Timed out waiting for agent response"
            );
            let _ = pending.reply.send(Err(SessionError::Timeout));
        }
    }

    fn fail_pending(&mut self, error: SessionError) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(error));
        }
    }

    fn is_active(&self, connection_id: u64) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.id() == connection_id)
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
