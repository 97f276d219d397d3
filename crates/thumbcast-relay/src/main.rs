//! Thumbcast Relay Server
//!
//! Subscribes to one pub/sub channel per connected client and streams every
//! message to that client as a server-sent event.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};

use thumbcast_core::config::load_config;
use thumbcast_core::tracing_init::init_tracing;
use thumbcast_core::{Channel, Config};

use thumbcast_relay::bus::{BusConnector, MemoryBus, RedisBus};
use thumbcast_relay::server::{AppState, build_router};
use thumbcast_relay::session::SessionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BusKind {
    /// Redis pub/sub
    Redis,
    /// In-process bus, for running without Redis
    Memory,
}

#[derive(Parser, Debug)]
#[command(name = "thumbcast-relay")]
#[command(
    version,
    about = "Thumbcast relay server - streams pub/sub channel messages to browsers"
)]
struct Args {
    /// Path to a JSON settings file.
    #[arg(long, env = "THUMBCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Path of the event-stream endpoint.
    #[arg(long)]
    path: Option<String>,

    /// Channel to relay.
    #[arg(long)]
    channel: Option<Channel>,

    /// Bus host.
    #[arg(long)]
    bus_host: Option<String>,

    /// Bus port.
    #[arg(long)]
    bus_port: Option<u16>,

    /// Bus username.
    #[arg(long)]
    bus_username: Option<String>,

    /// Bus password.
    #[arg(long, env = "THUMBCAST_BUS_PASSWORD", hide_env_values = true)]
    bus_password: Option<String>,

    /// Which bus implementation to use.
    #[arg(long, value_enum, default_value_t = BusKind::Redis)]
    bus: BusKind,

    /// Seconds between keep-alive comments (0 disables them).
    #[arg(long)]
    keep_alive_secs: Option<u64>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

impl Args {
    /// CLI flags override the settings file and environment.
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.relay.listen_addr = addr;
        }
        if let Some(path) = &self.path {
            config.relay.stream_path.clone_from(path);
        }
        if let Some(channel) = &self.channel {
            config.relay.channel = channel.clone();
        }
        if let Some(host) = &self.bus_host {
            config.bus.host.clone_from(host);
        }
        if let Some(port) = self.bus_port {
            config.bus.port = port;
        }
        if self.bus_username.is_some() {
            config.bus.username.clone_from(&self.bus_username);
        }
        if self.bus_password.is_some() {
            config.bus.password.clone_from(&self.bus_password);
        }
        if let Some(secs) = self.keep_alive_secs {
            config.relay.keep_alive_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("thumbcast_relay=info", args.log_json);

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.relay.listen_addr,
        path = %config.relay.stream_path,
        channel = %config.relay.channel,
        "Starting thumbcast-relay"
    );

    match args.bus {
        BusKind::Redis => {
            let bus = RedisBus::new(&config.bus)?;
            info!(bus = %bus.addr(), "Using Redis pub/sub");
            serve(bus, &config).await
        }
        BusKind::Memory => {
            warn!("Using in-process bus; only messages published inside this process are relayed");
            serve(MemoryBus::new(), &config).await
        }
    }
}

async fn serve<B: BusConnector>(connector: B, config: &Config) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let registry = SessionRegistry::new();
    let state = AppState::new(connector, &config.relay, registry.clone(), shutdown_rx);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.relay.listen_addr).await?;
    info!(addr = %config.relay.listen_addr, "Relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
            // Ends every open stream so graceful shutdown can finish.
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let grace = config.relay.shutdown_grace();
    if registry.wait_until_empty(grace).await {
        info!("All stream sessions closed");
    } else {
        warn!(
            open = registry.session_count().await,
            grace_secs = grace.as_secs(),
            "Stream sessions still open after shutdown grace period"
        );
    }

    info!("Relay stopped");
    Ok(())
}
