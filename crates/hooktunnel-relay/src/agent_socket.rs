//! Agent WebSocket pump
//!
//! Bridges one upgraded socket and the tunnel session: inbound text frames
//! go to the session, and a writer task drains the connection's outbound
//! queue into the socket.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use hooktunnel_control::{AgentConnection, Outbound, SessionHandle};
use hooktunnel_proto::ProtocolError;
use tracing::{debug, info, warn};

pub(crate) async fn serve_agent(socket: WebSocket, session: SessionHandle) {
    let (connection, mut outbound) = AgentConnection::new();
    let connection_id = connection.id();
    session.connect(connection);

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let (message, is_close) = match message {
                Outbound::Text(text) => (Message::Text(text.into()), false),
                Outbound::Close { code, reason } => {
                    debug!(connection = connection_id, code, reason = %reason, "Closing agent socket");
                    (
                        Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })),
                        true,
                    )
                }
            };

            if let Err(e) = sink.send(message).await {
                debug!(connection = connection_id, error = %e, "Agent socket write failed");
                break;
            }
            if is_close {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => session.on_frame(connection_id, text.as_str().to_owned()),
            Ok(Message::Binary(_)) => session.on_protocol_error(connection_id, ProtocolError::Binary),
            Ok(Message::Close(frame)) => {
                match frame {
                    Some(frame) => {
                        info!(connection = connection_id, code = frame.code, reason = %frame.reason, "Agent closed connection")
                    }
                    None => info!(connection = connection_id, "Agent closed connection"),
                }
                break;
            }
            // Pings are answered by axum
            Ok(_) => {}
            Err(e) => {
                warn!(connection = connection_id, error = %e, "Agent socket error");
                break;
            }
        }
    }

    session.on_close(connection_id);
    writer.abort();
}
