//! Publish/subscribe bus clients.
//!
//! A [`BusConnector`] is shared by every stream session and hands out a fresh
//! [`BusClient`] per session; clients are never shared or reused.
//!
//! Delivery is pull-based: the owning session is the single consumer of
//! [`BusClient::next_message`], which yields messages in the order the bus
//! delivered them to this client.

use std::future::Future;

use thumbcast_core::Channel;

use crate::error::RelayError;

pub mod memory;
pub mod redis_pubsub;

pub use memory::{MemoryBus, MemoryBusClient};
pub use redis_pubsub::{RedisBus, RedisBusClient};

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Opens bus connections.
pub trait BusConnector: Clone + Send + Sync + 'static {
    type Client: BusClient;

    /// Establish a new connection. Fails with [`RelayError::Connection`] when
    /// the bus is unreachable.
    fn connect(&self) -> impl Future<Output = Result<Self::Client, RelayError>> + Send;
}

/// One connection to the bus, owned by exactly one session.
pub trait BusClient: Send + 'static {
    /// Register interest in `channel`. Subscribing twice to the same channel
    /// is a no-op. Fails with [`RelayError::Subscribe`] on bus-side rejection.
    fn subscribe(&mut self, channel: &Channel)
    -> impl Future<Output = Result<(), RelayError>> + Send;

    /// Wait for the next message. `None` means the bus connection is gone
    /// (or the client was closed) and no further messages will arrive.
    ///
    /// Must be cancel-safe: dropping the future loses no message.
    fn next_message(&mut self) -> impl Future<Output = Option<BusMessage>> + Send;

    /// Drop interest in `channel`. Callers treat failures as best-effort.
    fn unsubscribe(
        &mut self,
        channel: &Channel,
    ) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// Release the underlying connection. Later calls are no-ops.
    fn close(&mut self) -> impl Future<Output = Result<(), RelayError>> + Send;
}
