//! Thumbcast demo publisher.
//!
//! Every few seconds, publishes a random image link on the relay's channel.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use thumbcast_core::config::load_config;
use thumbcast_core::tracing_init::init_tracing;
use thumbcast_core::{Channel, Config};
use thumbcast_publisher::{DEFAULT_LINKS, ImagePublisher, limit_reached, pick_link};

#[derive(Parser, Debug)]
#[command(name = "thumbcast-publisher")]
#[command(version, about = "Publishes random image links for the Thumbcast relay")]
struct Args {
    /// Path to a JSON settings file (same format as the relay's).
    #[arg(long, env = "THUMBCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Channel to publish on.
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

    /// Seconds between publishes.
    #[arg(long, default_value_t = 3)]
    interval_secs: u64,

    /// Link to choose from (repeatable). Defaults to a built-in set.
    #[arg(long = "link")]
    links: Vec<String>,

    /// Stop after this many publishes.
    #[arg(long)]
    count: Option<u64>,

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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("thumbcast_publisher=info", args.log_json);

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let links: Vec<String> = if args.links.is_empty() {
        DEFAULT_LINKS.iter().map(ToString::to_string).collect()
    } else {
        args.links.clone()
    };
    let interval = Duration::from_secs(args.interval_secs.max(1));

    let mut publisher = ImagePublisher::connect(&config.bus, config.relay.channel.clone()).await?;
    info!(
        bus = %config.bus.display_addr(),
        channel = %publisher.channel(),
        links = links.len(),
        interval_secs = interval.as_secs(),
        "Publishing"
    );

    let mut ticker = tokio::time::interval(interval);
    let mut published: u64 = 0;
    while !limit_reached(args.count, published) {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }

        let Some(link) = pick_link(&links, &mut rand::rng()) else {
            break;
        };
        match publisher.publish(link).await {
            Ok(receivers) => info!(link = %link, receivers, "Published"),
            Err(e) => warn!(link = %link, error = %e, "Publish failed"),
        }

        published += 1;
    }

    info!(published, "Publisher stopped");
    Ok(())
}
