//! Router and the event-stream endpoint.

use std::convert::Infallible;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{Method, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error};

use thumbcast_core::{Channel, RelayConfig};

use super::health;
use crate::bus::BusConnector;
use crate::error::RelayError;
use crate::session::{SessionRegistry, StreamSession};

/// Shared application state.
#[derive(Clone)]
pub struct AppState<B: BusConnector> {
    pub connector: B,
    pub channel: Channel,
    pub stream_path: String,
    pub registry: SessionRegistry,
    pub shutdown: watch::Receiver<bool>,
    pub keep_alive: Option<Duration>,
    pub session_buffer: usize,
}

impl<B: BusConnector> AppState<B> {
    pub fn new(
        connector: B,
        config: &RelayConfig,
        registry: SessionRegistry,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            connector,
            channel: config.channel.clone(),
            stream_path: config.stream_path.clone(),
            registry,
            shutdown,
            keep_alive: config.keep_alive(),
            session_buffer: config.session_buffer.max(1),
        }
    }
}

/// Build the relay's router: the event stream, the health check, and CORS.
pub fn build_router<B: BusConnector>(state: AppState<B>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route(&state.stream_path, get(subscribe::<B>))
        .route("/healthz", get(health::health::<B>))
        .layer(cors)
        .with_state(state)
}

/// `GET <stream_path>` -- open an event stream relaying the configured channel.
///
/// The session is connected and subscribed before any response is produced,
/// so a bus failure is answered with `502` instead of an empty stream. Setup
/// runs in the session task, so a client that disconnects mid-setup cannot
/// cancel it; the task still reaches teardown once it sees the closed sink.
pub async fn subscribe<B: BusConnector>(
    State(state): State<AppState<B>>,
) -> Result<Response, RelayError> {
    let (sink, frames) = mpsc::channel(state.session_buffer);
    let (ready_tx, ready_rx) = oneshot::channel();

    let AppState {
        connector,
        channel,
        registry,
        shutdown,
        ..
    } = state.clone();
    tokio::spawn(async move {
        let session = match StreamSession::open(&connector, channel.clone(), sink).await {
            Ok(session) => session,
            Err(e) => {
                error!(channel = %channel, error = %e, "Failed to open stream session");
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        let id = session.id();
        registry.register(id, channel).await;
        if ready_tx.send(Ok(())).is_err() {
            debug!(session_id = %id, "Client left during setup");
        }
        session.run(shutdown).await;
        registry.unregister(id).await;
    });

    ready_rx
        .await
        .map_err(|_| RelayError::Connection("session task ended during setup".into()))??;

    let events =
        ReceiverStream::new(frames).map(|data| Ok::<_, Infallible>(Event::default().data(data)));
    let sse = Sse::new(events);
    let headers = [(header::CONNECTION, "keep-alive")];

    Ok(match state.keep_alive {
        Some(interval) => {
            (headers, sse.keep_alive(KeepAlive::new().interval(interval))).into_response()
        }
        None => (headers, sse).into_response(),
    })
}
