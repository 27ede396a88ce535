//! Relay-side tunnel sessions
//!
//! Each tunnel id owns one [`SessionHandle`]: a cloneable front for a
//! single-task actor that holds the attached agent connection, the one
//! outstanding proxied request and the request counter. The relay's HTTP
//! and WebSocket handlers only ever talk to the handle.

pub mod connection;
pub mod error;
pub mod registry;
pub mod session;

pub use connection::{AgentConnection, Outbound};
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{SessionHandle, SessionStats};
