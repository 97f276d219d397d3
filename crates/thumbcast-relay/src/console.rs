//! Console subscriber: prints every message on a channel until stopped.

use std::future::Future;
use std::io::Write;
use std::pin::pin;

use tracing::{debug, info, warn};

use thumbcast_core::Channel;

use crate::bus::{BusClient, BusConnector};
use crate::error::RelayError;

/// How a console watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    /// The stop signal fired.
    Stopped,
    /// The bus connection ended.
    BusLost,
    /// The output could not be written.
    OutputClosed,
}

/// Totals of one console watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSummary {
    pub received: u64,
    pub end: WatchEnd,
}

/// Subscribe to `channel` and write each payload to `out` as a
/// `Received: <payload>` line until `stop` resolves or the bus goes away.
///
/// The client is unsubscribed and closed before this returns, including when
/// the subscription is rejected.
pub async fn watch_channel<B, W>(
    connector: &B,
    channel: &Channel,
    stop: impl Future<Output = ()>,
    out: &mut W,
) -> Result<WatchSummary, RelayError>
where
    B: BusConnector,
    W: Write,
{
    let mut client = connector.connect().await?;
    if let Err(e) = client.subscribe(channel).await {
        release(&mut client, channel).await;
        return Err(e);
    }
    info!(channel = %channel, "Subscribed to channel");

    let mut stop = pin!(stop);
    let mut received = 0;
    let end = loop {
        tokio::select! {
            biased;
            () = &mut stop => break WatchEnd::Stopped,
            message = client.next_message() => {
                let Some(message) = message else {
                    break WatchEnd::BusLost;
                };
                let payload = String::from_utf8_lossy(&message.payload);
                if let Err(e) = writeln!(out, "Received: {payload}").and_then(|()| out.flush()) {
                    warn!(error = %e, "Failed to write message");
                    break WatchEnd::OutputClosed;
                }
                received += 1;
            }
        }
    };

    debug!(?end, received, "Unsubscribing");
    release(&mut client, channel).await;
    Ok(WatchSummary { received, end })
}

async fn release<C: BusClient>(client: &mut C, channel: &Channel) {
    if let Err(e) = client.unsubscribe(channel).await {
        warn!(error = %e, "Unsubscribe failed");
    }
    if let Err(e) = client.close().await {
        warn!(error = %e, "Bus close failed");
    }
}
