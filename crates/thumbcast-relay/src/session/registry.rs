//! In-memory registry of live stream sessions.
//!
//! Pure bookkeeping: delivery never goes through the registry. It backs the
//! health report and lets shutdown wait until every session has torn down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Notify, RwLock};
use tracing::{info, warn};

use thumbcast_core::Channel;

use super::stream::SessionId;

/// What the registry knows about one session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub channel: Channel,
    pub opened_at: Instant,
}

/// Thread-safe registry of open sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionInfo>>>,
    drained: Arc<Notify>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session that has finished subscribing.
    pub async fn register(&self, id: SessionId, channel: Channel) {
        let info = SessionInfo {
            id,
            channel,
            opened_at: Instant::now(),
        };
        let open = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id, info);
            sessions.len()
        };
        info!(session_id = %id, open, "Stream session registered");
    }

    /// Forget a session after its teardown completed.
    pub async fn unregister(&self, id: SessionId) -> Option<SessionInfo> {
        let (removed, now_empty) = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.remove(&id);
            (removed, sessions.is_empty())
        };
        match &removed {
            Some(info) => info!(
                session_id = %id,
                open_for_ms = info.opened_at.elapsed().as_millis(),
                "Stream session unregistered"
            ),
            None => warn!(session_id = %id, "Tried to unregister unknown session"),
        }
        if now_empty {
            self.drained.notify_waiters();
        }
        removed
    }

    pub async fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Count of open sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Wait until no session is open, or `timeout` passes.
    ///
    /// Returns `true` when the registry drained in time.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.drained.notified();
                if self.sessions.read().await.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
