//! hooktunnel agent
//!
//! Opens the control connection to a relay, then answers every request
//! frame by calling the local target server. The run ends when the relay
//! closes the connection or one of the watchdog timers fires.

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod urls;
pub mod watchdog;

pub use client::{Agent, RunOutcome};
pub use config::AgentConfig;
pub use error::AgentError;
pub use handler::{FetchError, RequestHandler};
pub use watchdog::{Watchdog, WatchdogExpiry};
