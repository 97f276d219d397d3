//! Redis pub/sub bus client.
//!
//! Every [`RedisBusClient`] holds its own dedicated pub/sub connection, so a
//! relay with N open streams keeps N Redis connections.

use std::pin::pin;
use std::time::Duration;

use futures_util::StreamExt;
use redis::Client;
use redis::aio::PubSub;
use tracing::debug;

use thumbcast_core::{BusConfig, Channel};

use super::{BusClient, BusConnector, BusMessage};
use crate::error::RelayError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connector for a Redis server.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    addr: String,
    connect_timeout: Duration,
}

impl RedisBus {
    /// Build a connector from bus settings. No connection is opened yet.
    pub fn new(config: &BusConfig) -> Result<Self, RelayError> {
        let url = config
            .connection_url()
            .map_err(|e| RelayError::Connection(e.to_string()))?;
        let client =
            Client::open(url.as_str()).map_err(|e| RelayError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            addr: config.display_addr(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Bound how long `connect` may wait for the server.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Check the server answers PING on a short-lived connection.
    pub async fn ping(&self) -> Result<(), RelayError> {
        let mut conn = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            RelayError::Connection(format!(
                "timed out after {:?} connecting to {}",
                self.connect_timeout, self.addr
            ))
        })?
        .map_err(|e| RelayError::Connection(format!("{}: {e}", self.addr)))?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| RelayError::Connection(format!("{}: {e}", self.addr)))?;
        if pong != "PONG" {
            return Err(RelayError::Connection(format!(
                "{}: unexpected PING reply {pong:?}",
                self.addr
            )));
        }
        Ok(())
    }
}

impl BusConnector for RedisBus {
    type Client = RedisBusClient;

    async fn connect(&self) -> Result<RedisBusClient, RelayError> {
        let pubsub = tokio::time::timeout(self.connect_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| {
                RelayError::Connection(format!(
                    "timed out after {:?} connecting to {}",
                    self.connect_timeout, self.addr
                ))
            })?
            .map_err(|e| RelayError::Connection(format!("{}: {e}", self.addr)))?;
        debug!(addr = %self.addr, "Opened Redis pub/sub connection");
        Ok(RedisBusClient {
            pubsub: Some(pubsub),
            subscribed: None,
        })
    }
}

/// A dedicated Redis pub/sub connection.
pub struct RedisBusClient {
    pubsub: Option<PubSub>,
    subscribed: Option<Channel>,
}

impl BusClient for RedisBusClient {
    async fn subscribe(&mut self, channel: &Channel) -> Result<(), RelayError> {
        if self.subscribed.as_ref() == Some(channel) {
            return Ok(());
        }
        let pubsub = self.pubsub.as_mut().ok_or_else(|| RelayError::Subscribe {
            channel: channel.to_string(),
            reason: "connection closed".into(),
        })?;
        pubsub
            .subscribe(channel.as_str())
            .await
            .map_err(|e| RelayError::Subscribe {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        self.subscribed = Some(channel.clone());
        Ok(())
    }

    async fn next_message(&mut self) -> Option<BusMessage> {
        let pubsub = self.pubsub.as_mut()?;
        let mut messages = pin!(pubsub.on_message());
        let msg = messages.next().await?;
        Some(BusMessage::new(
            msg.get_channel_name(),
            msg.get_payload_bytes(),
        ))
    }

    async fn unsubscribe(&mut self, channel: &Channel) -> Result<(), RelayError> {
        let Some(pubsub) = self.pubsub.as_mut() else {
            return Ok(());
        };
        if self.subscribed.as_ref() != Some(channel) {
            return Ok(());
        }
        self.subscribed = None;
        pubsub
            .unsubscribe(channel.as_str())
            .await
            .map_err(|e| RelayError::Unsubscribe {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        // Dropping the pub/sub handle shuts the connection down.
        if self.pubsub.take().is_some() {
            debug!("Closed Redis pub/sub connection");
        }
        self.subscribed = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_bus() -> RedisBus {
        // Port 1 on loopback refuses connections.
        let config = BusConfig {
            host: "127.0.0.1".into(),
            port: 1,
            ..BusConfig::default()
        };
        RedisBus::new(&config)
            .unwrap()
            .with_connect_timeout(Duration::from_secs(2))
    }

    #[test]
    fn new_does_not_connect() {
        let bus = unreachable_bus();
        assert_eq!(bus.addr(), "127.0.0.1:1");
    }

    #[tokio::test]
    async fn unreachable_bus_is_a_connection_error() {
        let result = unreachable_bus().connect().await;
        assert!(matches!(result, Err(RelayError::Connection(_))));
    }

    #[tokio::test]
    async fn ping_against_unreachable_bus_fails() {
        let result = unreachable_bus().ping().await;
        assert!(matches!(result, Err(RelayError::Connection(_))));
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on localhost:6379"]
    async fn ping_against_live_redis() {
        RedisBus::new(&BusConfig::default())
            .unwrap()
            .ping()
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on localhost:6379"]
    async fn subscribe_receive_unsubscribe_against_live_redis() {
        use redis::AsyncCommands;

        let config = BusConfig::default();
        let bus = RedisBus::new(&config).unwrap();
        let channel = Channel::new("thumbcast-test").unwrap();

        let mut client = bus.connect().await.unwrap();
        client.subscribe(&channel).await.unwrap();
        client.subscribe(&channel).await.unwrap();

        let publisher = Client::open(config.connection_url().unwrap().as_str()).unwrap();
        let mut conn = publisher.get_multiplexed_async_connection().await.unwrap();
        let receivers: usize = conn.publish(channel.as_str(), "image-42.jpg").await.unwrap();
        assert_eq!(receivers, 1);

        let message = client.next_message().await.unwrap();
        assert_eq!(message.channel, "thumbcast-test");
        assert_eq!(message.payload, b"image-42.jpg");

        client.unsubscribe(&channel).await.unwrap();
        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(client.next_message().await.is_none());
    }
}
