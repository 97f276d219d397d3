//! Stream session: one client connection bound to one bus subscription.
//!
//! Lifecycle: `Opening -> Subscribed -> Closing -> Closed`. Any number of
//! deliveries happen while `Subscribed`. Teardown runs exactly once, whatever
//! ends the session first: client disconnect, process shutdown, loss of the
//! bus connection, or a failed write.

use std::fmt;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use thumbcast_core::Channel;

use crate::bus::{BusClient, BusConnector};
use crate::error::RelayError;

/// Unique id of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Subscribed,
    Closing,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away (connection dropped or a write failed).
    ClientDisconnected,
    /// The relay is shutting down.
    Shutdown,
    /// The bus connection ended.
    BusLost,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ClientDisconnected => "client disconnected",
            Self::Shutdown => "shutdown",
            Self::BusLost => "bus connection lost",
        };
        f.write_str(text)
    }
}

/// Owns one bus client and the write side of one client connection.
///
/// The sink carries event payloads; the HTTP layer frames each one as
/// `data: <payload>\n\n`. Dropping the receiving half is how the connection
/// signals a disconnect.
pub struct StreamSession<C: BusClient> {
    id: SessionId,
    channel: Channel,
    client: C,
    sink: Option<mpsc::Sender<String>>,
    state: SessionState,
    delivered: u64,
}

impl<C: BusClient> StreamSession<C> {
    /// Connect to the bus and subscribe to `channel`.
    ///
    /// On a subscribe failure the half-open client is torn down before the
    /// error is returned, so no connection is left without a cleanup path.
    pub async fn open<B>(
        connector: &B,
        channel: Channel,
        sink: mpsc::Sender<String>,
    ) -> Result<Self, RelayError>
    where
        B: BusConnector<Client = C>,
    {
        let id = SessionId::new();
        let client = connector.connect().await?;
        let mut session = Self {
            id,
            channel,
            client,
            sink: Some(sink),
            state: SessionState::Opening,
            delivered: 0,
        };

        if let Err(e) = session.client.subscribe(&session.channel).await {
            session.teardown().await;
            return Err(e);
        }

        session.state = SessionState::Subscribed;
        debug!(session_id = %session.id, channel = %session.channel, "Session subscribed");
        Ok(session)
    }

    pub const fn id(&self) -> SessionId {
        self.id
    }

    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Number of payloads written so far.
    pub const fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Write one payload to the client, waiting for buffer space.
    ///
    /// Fails with [`RelayError::DeliveryWrite`] once the client is gone or
    /// the session is no longer subscribed. Callers treat that as the signal
    /// to tear down.
    pub async fn forward(&mut self, payload: &[u8]) -> Result<(), RelayError> {
        if self.state != SessionState::Subscribed {
            return Err(RelayError::DeliveryWrite);
        }
        let sink = self.sink.as_ref().ok_or(RelayError::DeliveryWrite)?;
        let data = String::from_utf8_lossy(payload).into_owned();
        sink.send(data)
            .await
            .map_err(|_| RelayError::DeliveryWrite)?;
        self.delivered += 1;
        Ok(())
    }

    /// Relay bus messages to the client until something ends the session,
    /// then tear down. Teardown has completed when this returns.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> CloseReason {
        let reason = loop {
            let Some(sink) = self.sink.as_ref() else {
                break CloseReason::ClientDisconnected;
            };
            tokio::select! {
                biased;
                () = sink.closed() => break CloseReason::ClientDisconnected,
                () = shutdown_requested(&mut shutdown) => break CloseReason::Shutdown,
                message = self.client.next_message() => match message {
                    // A client that stops reading fills the sink; shutdown
                    // must still end the session while the write waits.
                    Some(message) => tokio::select! {
                        biased;
                        () = shutdown_requested(&mut shutdown) => break CloseReason::Shutdown,
                        written = self.forward(&message.payload) => {
                            if written.is_err() {
                                debug!(session_id = %self.id, "Write to closed stream, tearing down");
                                break CloseReason::ClientDisconnected;
                            }
                        }
                    },
                    None => break CloseReason::BusLost,
                },
            }
        };

        match reason {
            CloseReason::BusLost => {
                warn!(session_id = %self.id, channel = %self.channel, "Bus connection lost");
            }
            _ => debug!(session_id = %self.id, %reason, "Session ending"),
        }
        self.teardown().await;
        info!(
            session_id = %self.id,
            %reason,
            delivered = self.delivered,
            "Session closed"
        );
        reason
    }

    /// Unsubscribe, close the bus client, then release the sink.
    ///
    /// Runs at most once; returns `false` when teardown already happened.
    /// Failures are logged and the remaining steps still run.
    pub async fn teardown(&mut self) -> bool {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return false;
        }
        self.state = SessionState::Closing;

        if let Err(e) = self.client.unsubscribe(&self.channel).await {
            warn!(session_id = %self.id, error = %e, "Unsubscribe failed during teardown");
        }
        if let Err(e) = self.client.close().await {
            warn!(session_id = %self.id, error = %e, "Bus close failed during teardown");
        }
        self.sink = None;

        self.state = SessionState::Closed;
        true
    }
}

/// Resolves once shutdown is signalled. A dropped sender never signals.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::bus::{MemoryBus, MemoryBusClient};

    fn thumbnail() -> Channel {
        Channel::new("thumbnail").unwrap()
    }

    async fn open_session(
        bus: &MemoryBus,
    ) -> (StreamSession<MemoryBusClient>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        let session = StreamSession::open(bus, thumbnail(), tx).await.unwrap();
        (session, rx)
    }

    #[tokio::test]
    async fn open_subscribes_to_channel() {
        let bus = MemoryBus::new();
        let (session, _rx) = open_session(&bus).await;

        assert_eq!(session.state(), SessionState::Subscribed);
        assert_eq!(session.channel().as_str(), "thumbnail");
        assert_eq!(bus.subscriber_count("thumbnail"), 1);
    }

    #[tokio::test]
    async fn open_fails_when_bus_unreachable() {
        let bus = MemoryBus::new();
        bus.set_fail_connect(true);
        let (tx, rx) = mpsc::channel(8);

        let result = StreamSession::open(&bus, thumbnail(), tx).await;

        assert!(matches!(result, Err(RelayError::Connection(_))));
        assert!(rx.is_closed(), "sink must be released");
    }

    #[tokio::test]
    async fn subscribe_rejection_tears_down_before_returning() {
        let bus = MemoryBus::new();
        bus.set_fail_subscribe(true);
        let (tx, rx) = mpsc::channel(8);

        let result = StreamSession::open(&bus, thumbnail(), tx).await;

        assert!(matches!(result, Err(RelayError::Subscribe { .. })));
        let stats = bus.stats();
        assert_eq!(stats.unsubscribes, 1, "unsubscribe is attempted anyway");
        assert_eq!(stats.closes, 1);
        assert!(rx.is_closed());
    }

    #[tokio::test]
    async fn forward_writes_payloads_in_order() {
        let bus = MemoryBus::new();
        let (mut session, mut rx) = open_session(&bus).await;

        session.forward(b"image-1.jpg").await.unwrap();
        session.forward(b"image-2.jpg").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "image-1.jpg");
        assert_eq!(rx.recv().await.unwrap(), "image-2.jpg");
        assert_eq!(session.delivered(), 2);
    }

    #[tokio::test]
    async fn forward_after_disconnect_is_a_delivery_error() {
        let bus = MemoryBus::new();
        let (mut session, rx) = open_session(&bus).await;
        drop(rx);

        let result = session.forward(b"image-43.jpg").await;
        assert!(matches!(result, Err(RelayError::DeliveryWrite)));
    }

    #[tokio::test]
    async fn teardown_runs_once() {
        let bus = MemoryBus::new();
        let (mut session, _rx) = open_session(&bus).await;

        assert!(session.teardown().await);
        assert!(!session.teardown().await);

        let stats = bus.stats();
        assert_eq!(stats.unsubscribes, 1);
        assert_eq!(stats.closes, 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.forward(b"late").await,
            Err(RelayError::DeliveryWrite)
        ));
    }

    #[tokio::test]
    async fn run_relays_bus_messages() {
        let bus = MemoryBus::new();
        let (session, mut rx) = open_session(&bus).await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(session.run(shutdown_rx));

        bus.publish("thumbnail", "image-42.jpg");
        let got = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some("image-42.jpg"));

        drop(rx);
        let reason = timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::ClientDisconnected);
    }

    #[tokio::test]
    async fn client_disconnect_tears_down_without_a_publish() {
        let bus = MemoryBus::new();
        let (session, rx) = open_session(&bus).await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(session.run(shutdown_rx));

        drop(rx);
        let reason = timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reason, CloseReason::ClientDisconnected);
        assert_eq!(bus.stats().closes, 1);
        assert_eq!(bus.publish("thumbnail", "image-43.jpg"), 0);
    }

    #[tokio::test]
    async fn shutdown_signal_tears_down_and_ends_stream() {
        let bus = MemoryBus::new();
        let (session, mut rx) = open_session(&bus).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(session.run(shutdown_rx));

        shutdown_tx.send(true).unwrap();
        let reason = timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reason, CloseReason::Shutdown);
        assert_eq!(bus.stats().unsubscribes, 1);
        assert!(rx.recv().await.is_none(), "stream ends after teardown");
    }

    #[tokio::test]
    async fn shutdown_ends_session_blocked_on_a_stalled_client() {
        let bus = MemoryBus::new();
        let (tx, _unread) = mpsc::channel(1);
        let session = StreamSession::open(&bus, thumbnail(), tx).await.unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(session.run(shutdown_rx));

        for i in 0..3 {
            bus.publish("thumbnail", format!("image-{i}.jpg"));
        }
        // Let the session fill the sink and block on the next write.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        shutdown_tx.send(true).unwrap();
        let reason = timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reason, CloseReason::Shutdown);
        let stats = bus.stats();
        assert_eq!(stats.unsubscribes, 1);
        assert_eq!(stats.closes, 1);
    }

    #[tokio::test]
    async fn already_signalled_shutdown_ends_immediately() {
        let bus = MemoryBus::new();
        let (session, _rx) = open_session(&bus).await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);

        let reason = timeout(Duration::from_secs(1), session.run(shutdown_rx))
            .await
            .unwrap();
        assert_eq!(reason, CloseReason::Shutdown);
    }

    #[tokio::test]
    async fn bus_loss_ends_session() {
        let bus = MemoryBus::new();
        let (session, mut rx) = open_session(&bus).await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(session.run(shutdown_rx));

        bus.shutdown();
        let reason = timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reason, CloseReason::BusLost);
        assert_eq!(bus.stats().closes, 1);
        assert!(rx.recv().await.is_none());
    }
}
