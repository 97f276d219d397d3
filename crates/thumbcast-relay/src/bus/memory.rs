//! In-process bus.
//!
//! Behaves like a pub/sub server living inside the relay: each channel is a
//! `tokio::sync::broadcast` channel and every client gets its own receiver.
//! Used by the test suite and by `--bus memory` for running the relay without
//! Redis. Connect and subscribe failures can be switched on to exercise the
//! relay's error paths, and every client operation is counted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::warn;

use thumbcast_core::Channel;

use super::{BusClient, BusConnector, BusMessage};
use crate::error::RelayError;

const CHANNEL_CAPACITY: usize = 256;

/// Snapshot of client operations performed against a [`MemoryBus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryBusStats {
    pub connects: usize,
    pub subscribes: usize,
    pub unsubscribes: usize,
    pub closes: usize,
}

#[derive(Default)]
struct Inner {
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    fail_connect: AtomicBool,
    fail_subscribe: AtomicBool,
    connects: AtomicUsize,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    closes: AtomicUsize,
}

impl Inner {
    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Existing sender for `channel`, without creating one.
    fn existing(&self, channel: &str) -> Option<broadcast::Sender<Vec<u8>>> {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(channel).cloned()
    }
}

/// Handle to an in-process bus. Clones share the same bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `payload` on `channel`, returning how many subscribers got it.
    pub fn publish(&self, channel: &str, payload: impl Into<Vec<u8>>) -> usize {
        self.inner
            .existing(channel)
            .map_or(0, |sender| sender.send(payload.into()).unwrap_or(0))
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .existing(channel)
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Make subsequent `connect` calls fail as if the bus were unreachable.
    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `subscribe` calls be rejected.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Drop every channel, ending all open subscriptions as a lost
    /// connection would.
    pub fn shutdown(&self) {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn stats(&self) -> MemoryBusStats {
        MemoryBusStats {
            connects: self.inner.connects.load(Ordering::SeqCst),
            subscribes: self.inner.subscribes.load(Ordering::SeqCst),
            unsubscribes: self.inner.unsubscribes.load(Ordering::SeqCst),
            closes: self.inner.closes.load(Ordering::SeqCst),
        }
    }
}

impl BusConnector for MemoryBus {
    type Client = MemoryBusClient;

    async fn connect(&self) -> Result<MemoryBusClient, RelayError> {
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(RelayError::Connection("in-process bus unavailable".into()));
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryBusClient {
            bus: Some(Arc::clone(&self.inner)),
            subscription: None,
        })
    }
}

/// One client of a [`MemoryBus`].
pub struct MemoryBusClient {
    bus: Option<Arc<Inner>>,
    subscription: Option<(Channel, broadcast::Receiver<Vec<u8>>)>,
}

impl BusClient for MemoryBusClient {
    async fn subscribe(&mut self, channel: &Channel) -> Result<(), RelayError> {
        if matches!(&self.subscription, Some((current, _)) if current == channel) {
            return Ok(());
        }
        let bus = self.bus.as_ref().ok_or_else(|| RelayError::Subscribe {
            channel: channel.to_string(),
            reason: "connection closed".into(),
        })?;
        if bus.fail_subscribe.load(Ordering::SeqCst) {
            return Err(RelayError::Subscribe {
                channel: channel.to_string(),
                reason: "subscription rejected".into(),
            });
        }
        bus.subscribes.fetch_add(1, Ordering::SeqCst);
        let receiver = bus.sender(channel.as_str()).subscribe();
        self.subscription = Some((channel.clone(), receiver));
        Ok(())
    }

    async fn next_message(&mut self) -> Option<BusMessage> {
        let (channel, receiver) = self.subscription.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(payload) => return Some(BusMessage::new(channel.as_str(), payload)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %channel, skipped, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn unsubscribe(&mut self, channel: &Channel) -> Result<(), RelayError> {
        let Some(bus) = self.bus.as_ref() else {
            return Ok(());
        };
        bus.unsubscribes.fetch_add(1, Ordering::SeqCst);
        if matches!(&self.subscription, Some((current, _)) if current == channel) {
            self.subscription = None;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.subscription = None;
        if let Some(bus) = self.bus.take() {
            bus.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn thumbnail() -> Channel {
        Channel::new("thumbnail").unwrap()
    }

    #[tokio::test]
    async fn publish_without_subscribers_reaches_nobody() {
        let bus = MemoryBus::new();
        assert_eq!(bus.publish("thumbnail", "image-1.jpg"), 0);
    }

    #[tokio::test]
    async fn lookups_do_not_create_channels() {
        let bus = MemoryBus::new();
        assert_eq!(bus.publish("avatars", "ignored.png"), 0);
        assert_eq!(bus.subscriber_count("previews"), 0);

        let channels = bus.inner.channels.lock().unwrap();
        assert!(channels.is_empty());
    }

    #[tokio::test]
    async fn subscribed_client_receives_in_order() {
        let bus = MemoryBus::new();
        let mut client = bus.connect().await.unwrap();
        client.subscribe(&thumbnail()).await.unwrap();

        assert_eq!(bus.publish("thumbnail", "a"), 1);
        assert_eq!(bus.publish("thumbnail", "b"), 1);
        assert_eq!(bus.publish("other", "ignored"), 0);

        assert_eq!(client.next_message().await.unwrap().payload, b"a");
        assert_eq!(client.next_message().await.unwrap().payload, b"b");
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let bus = MemoryBus::new();
        let mut client = bus.connect().await.unwrap();
        client.subscribe(&thumbnail()).await.unwrap();
        client.subscribe(&thumbnail()).await.unwrap();

        assert_eq!(bus.stats().subscribes, 1);
        assert_eq!(bus.subscriber_count("thumbnail"), 1);
    }

    #[tokio::test]
    async fn unsubscribe_and_close_release_the_subscription() {
        let bus = MemoryBus::new();
        let mut client = bus.connect().await.unwrap();
        client.subscribe(&thumbnail()).await.unwrap();

        client.unsubscribe(&thumbnail()).await.unwrap();
        assert_eq!(bus.subscriber_count("thumbnail"), 0);

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert_eq!(bus.stats().closes, 1);
        assert!(client.next_message().await.is_none());
    }

    #[tokio::test]
    async fn failure_switches() {
        let bus = MemoryBus::new();
        bus.set_fail_connect(true);
        assert!(matches!(
            bus.connect().await,
            Err(RelayError::Connection(_))
        ));

        bus.set_fail_connect(false);
        bus.set_fail_subscribe(true);
        let mut client = bus.connect().await.unwrap();
        assert!(matches!(
            client.subscribe(&thumbnail()).await,
            Err(RelayError::Subscribe { .. })
        ));
    }

    #[tokio::test]
    async fn shutdown_ends_subscriptions() {
        let bus = MemoryBus::new();
        let mut client = bus.connect().await.unwrap();
        client.subscribe(&thumbnail()).await.unwrap();

        bus.shutdown();
        let next = tokio::time::timeout(Duration::from_secs(1), client.next_message())
            .await
            .unwrap();
        assert!(next.is_none());
    }
}
