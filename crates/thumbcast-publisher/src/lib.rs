//! Thumbcast demo publisher.
//!
//! Publishes image links on the relay's channel so a browser connected to the
//! relay has something to display.

use rand::{Rng, RngExt};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use thiserror::Error;
use tracing::debug;

use thumbcast_core::{BusConfig, Channel};

/// Links published when none are given on the command line.
pub const DEFAULT_LINKS: [&str; 5] = [
    "https://cdn.pixabay.com/photo/2023/05/13/14/35/white-flower-7990645_960_720.jpg",
    "https://cdn.pixabay.com/photo/2019/09/02/11/00/frog-4446995_960_720.jpg",
    "https://cdn.pixabay.com/photo/2015/07/05/13/44/beach-832346_960_720.jpg",
    "https://cdn.pixabay.com/photo/2016/10/18/21/22/beach-1751455_960_720.jpg",
    "https://cdn.pixabay.com/photo/2015/04/23/22/00/tree-736885_960_720.jpg",
];

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(#[from] thumbcast_core::Error),

    #[error("Unexpected PING reply: {0}")]
    Ping(String),
}

/// Choose one link uniformly at random.
pub fn pick_link<'a, R: Rng + ?Sized>(links: &'a [String], rng: &mut R) -> Option<&'a str> {
    if links.is_empty() {
        return None;
    }
    Some(links[rng.random_range(0..links.len())].as_str())
}

/// Whether `published` has used up an optional publish `limit`.
pub const fn limit_reached(limit: Option<u64>, published: u64) -> bool {
    match limit {
        Some(max) => published >= max,
        None => false,
    }
}

/// Publishes payloads on one channel over a multiplexed Redis connection.
pub struct ImagePublisher {
    conn: MultiplexedConnection,
    channel: Channel,
}

impl ImagePublisher {
    /// Connect and verify the server answers PING.
    pub async fn connect(config: &BusConfig, channel: Channel) -> Result<Self, PublishError> {
        let client = Client::open(config.connection_url()?.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(PublishError::Ping(pong));
        }
        debug!(bus = %config.display_addr(), "Publisher connected");

        Ok(Self { conn, channel })
    }

    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Publish `payload`, returning how many subscribers received it.
    pub async fn publish(&mut self, payload: &str) -> Result<usize, PublishError> {
        let receivers: usize = self.conn.publish(self.channel.as_str(), payload).await?;
        Ok(receivers)
    }
}
