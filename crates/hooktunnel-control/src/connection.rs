//! Agent connection handle

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Message for the task writing to an agent's WebSocket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame carrying an encoded [`hooktunnel_proto::Frame`]
    Text(String),
    /// Close the socket with the given code and reason
    Close { code: u16, reason: String },
}

/// The relay's side of one attached agent
///
/// The socket itself is owned by the WebSocket handler; the session only
/// holds the sending half of the writer queue. Ids are unique for the life
/// of the process, so events from an evicted connection can be told apart
/// from the active one.
#[derive(Debug, Clone)]
pub struct AgentConnection {
    id: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl AgentConnection {
    /// Create a connection and the receiver its writer task drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, outbound }, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a text frame; false if the writer is gone
    pub fn send_text(&self, text: String) -> bool {
        self.outbound.send(Outbound::Text(text)).is_ok()
    }

    /// Ask the writer to close the socket
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let (a, _rx_a) = AgentConnection::new();
        let (b, _rx_b) = AgentConnection::new();
        assert!(b.id() > a.id());
    }

    #[tokio::test]
    async fn test_writer_queue() {
        let (conn, mut rx) = AgentConnection::new();
        assert!(conn.send_text("hello".to_string()));
        conn.close(4102, "manually closed");

        assert_eq!(rx.recv().await, Some(Outbound::Text("hello".to_string())));
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close {
                code: 4102,
                reason: "manually closed".to_string()
            })
        );

        drop(rx);
        assert!(conn.is_closed());
        assert!(!conn.send_text("lost".to_string()));
    }
}
