//! Thumbcast console subscriber.
//!
//! Prints every message published on the relay's channel, for checking a
//! deployment without a browser.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use thumbcast_core::config::load_config;
use thumbcast_core::tracing_init::init_tracing;
use thumbcast_core::{Channel, Config};
use thumbcast_relay::bus::RedisBus;
use thumbcast_relay::console::watch_channel;

#[derive(Parser, Debug)]
#[command(name = "thumbcast-subscriber")]
#[command(version, about = "Prints messages published on a Thumbcast channel")]
struct Args {
    /// Path to a JSON settings file (same format as the relay's).
    #[arg(long, env = "THUMBCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Channel to watch.
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

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
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
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn stop_signal() {
    #[cfg(unix)]
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                None
            }
        };

    #[cfg(unix)]
    let sigterm_future = async {
        match sigterm.as_mut() {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C shutdown signal"),
        () = sigterm_future => info!("Received SIGTERM shutdown signal"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("thumbcast_subscriber=info,thumbcast_relay=info", args.log_json);

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let bus = RedisBus::new(&config.bus)?;
    bus.ping().await?;
    info!(bus = %bus.addr(), channel = %config.relay.channel, "Connected");

    let mut stdout = std::io::stdout();
    let summary = watch_channel(&bus, &config.relay.channel, stop_signal(), &mut stdout).await?;

    info!(received = summary.received, end = ?summary.end, "Unsubscribed and exiting");
    Ok(())
}
