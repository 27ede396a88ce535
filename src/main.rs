//! hooktunnel CLI
//!
//! Runs either side of the tunnel: the public relay or the agent next to
//! the local server. The `token` subcommand prints the token an agent
//! would present right now, for testing a relay by hand.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hooktunnel_agent::{config, Agent, AgentConfig, RunOutcome};
use hooktunnel_auth::generate_token;
use hooktunnel_proto::TunnelId;
use hooktunnel_relay::{RelayConfig, RelayServer, DEFAULT_MAX_BODY_SIZE};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// hooktunnel - receive webhooks on a local server through a public relay
#[derive(Parser, Debug)]
#[command(name = "hooktunnel")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the public relay
    Relay {
        /// Address to listen on
        #[arg(long, env = "HOOKTUNNEL_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Shared secret agents derive their tokens from
        #[arg(long, env = "WEBHOOKS_PROXY_TUNNEL_SECRET", hide_env_values = true)]
        secret: Option<String>,

        /// Seconds a proxied request waits for the agent's response
        #[arg(long, default_value = "30")]
        response_timeout: u64,

        /// Largest accepted request body in bytes
        #[arg(long, default_value_t = DEFAULT_MAX_BODY_SIZE)]
        max_body_size: usize,
    },

    /// Connect to a relay and forward its requests to a local server
    #[command(long_about = r#"
Connect to a relay and forward every request it receives for the tunnel to
a local HTTP server.

EXAMPLES:
  hooktunnel agent https://relay.example.com/connect/<tunnel-id> http://localhost:3000

ENVIRONMENT VARIABLES:
  WEBHOOKS_PROXY_TUNNEL_SECRET               Shared secret (must match the relay)
  WEBHOOKS_PROXY_TUNNEL_BASIC_AUTH           user:password required from callers
  WEBHOOKS_PROXY_CLIENT_TOTAL_TIMEOUT_MIN    Stop after N minutes (default 60, 0 disables)
  WEBHOOKS_PROXY_CLIENT_INACTIVE_TIMEOUT_MIN Stop after N idle minutes (default 10, 0 disables)
    "#)]
    Agent(AgentArgs),

    /// Print the token an agent would present for a tunnel right now
    Token {
        /// Shared secret
        #[arg(long, env = "WEBHOOKS_PROXY_TUNNEL_SECRET", hide_env_values = true)]
        secret: String,

        /// Tunnel ID (a fresh one is generated if omitted)
        tunnel_id: Option<String>,
    },
}

#[derive(Args, Debug)]
struct AgentArgs {
    /// Relay endpoint, e.g. https://relay.example.com/connect/<tunnel-id>
    tunnel_url: String,

    /// Local server, e.g. http://localhost:3000
    target_url: String,

    /// Shared secret (must match the relay's)
    #[arg(long, env = "WEBHOOKS_PROXY_TUNNEL_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Require `user:password` Basic Auth from public callers
    #[arg(long, env = "WEBHOOKS_PROXY_TUNNEL_BASIC_AUTH", hide_env_values = true)]
    basic_auth: Option<String>,

    /// Stop after this many minutes (zero or less disables)
    #[arg(
        long,
        env = "WEBHOOKS_PROXY_CLIENT_TOTAL_TIMEOUT_MIN",
        default_value = "60",
        allow_negative_numbers = true
    )]
    total_timeout_min: i64,

    /// Stop after this many minutes without requests (zero or less disables)
    #[arg(
        long,
        env = "WEBHOOKS_PROXY_CLIENT_INACTIVE_TIMEOUT_MIN",
        default_value = "10",
        allow_negative_numbers = true
    )]
    inactive_timeout_min: i64,

    /// Connection attempts before giving up
    #[arg(long, default_value_t = config::DEFAULT_RETRY_COUNT)]
    retries: u32,

    /// Header holding the caller's IP, copied to x-forwarded-for
    #[arg(long, default_value = config::DEFAULT_CLIENT_IP_HEADER)]
    client_ip_header: String,
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

async fn run_relay(config: RelayConfig) -> Result<()> {
    let server = RelayServer::new(config);

    tokio::select! {
        result = server.start() => result.context("Relay server failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
    }
}

impl AgentArgs {
    fn into_config(self) -> Result<AgentConfig> {
        let mut agent_config = AgentConfig::new(&self.tunnel_url, &self.target_url)?
            .with_total_timeout(config::minutes(self.total_timeout_min))
            .with_inactivity_timeout(config::minutes(self.inactive_timeout_min))
            .with_retry(self.retries, config::DEFAULT_RETRY_DELAY)
            .with_client_ip_header(Some(self.client_ip_header).filter(|h| !h.is_empty()));

        match self.secret.filter(|s| !s.is_empty()) {
            Some(secret) => agent_config = agent_config.with_secret(secret),
            None => warn!("WEBHOOKS_PROXY_TUNNEL_SECRET is not set. Anyone can connect to the tunnel."),
        }

        if let Some(credentials) = self.basic_auth.filter(|c| !c.is_empty()) {
            agent_config = agent_config.with_basic_auth(&credentials)?;
            let user = credentials.split(':').next().unwrap_or_default();
            info!("Using basic auth for the tunnel: {}:***", user);
        }

        match agent_config.total_timeout {
            Some(timeout) => info!(
                "For increased security, the client will be terminated after {} minutes.",
                timeout.as_secs() / 60
            ),
            None => warn!("Total timeout is disabled. The client will run until the tunnel closes."),
        }
        match agent_config.inactivity_timeout {
            Some(timeout) => info!(
                "The client will be terminated after {} minutes of inactivity.",
                timeout.as_secs() / 60
            ),
            None => warn!("Inactivity timeout is disabled."),
        }

        Ok(agent_config)
    }
}

async fn run_agent(config: AgentConfig) -> Result<()> {
    let agent = Agent::new(config).context("Failed to create agent")?;
    info!(tunnel_id = %agent.tunnel_id(), "hooktunnel agent starting...");

    let outcome = tokio::select! {
        result = agent.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            return Ok(());
        }
    };

    match outcome {
        Ok(RunOutcome::Closed { code, reason }) => {
            info!(code = ?code, reason = %reason, "Tunnel closed, agent stopped");
            Ok(())
        }
        Ok(RunOutcome::TotalTimeout) | Ok(RunOutcome::Inactivity) => {
            info!("Agent stopped by its watchdog");
            Ok(())
        }
        Err(e) => {
            error!("Agent error: {}", e);
            Err(e.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    match cli.command {
        Commands::Relay {
            bind,
            secret,
            response_timeout,
            max_body_size,
        } => {
            let mut config = RelayConfig::default()
                .with_bind_addr(bind)
                .with_response_timeout(Duration::from_secs(response_timeout))
                .with_max_body_size(max_body_size);
            if let Some(secret) = secret.filter(|s| !s.is_empty()) {
                config = config.with_secret(secret);
            }
            run_relay(config).await
        }
        Commands::Agent(args) => {
            let config = args.into_config()?;
            run_agent(config).await
        }
        Commands::Token { secret, tunnel_id } => {
            let tunnel_id = match tunnel_id {
                Some(raw) => TunnelId::parse(&raw)?,
                None => TunnelId::generate(),
            };
            println!("tunnel id: {}", tunnel_id);
            println!("token:     {}", generate_token(tunnel_id.as_str(), &secret));
            Ok(())
        }
    }
}
