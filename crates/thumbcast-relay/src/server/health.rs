//! `GET /healthz` for load balancers and deploy checks.
//!
//! Reports that the HTTP side is serving. It deliberately does not probe the
//! bus: each stream session connects on its own and reports bus failures to
//! its client.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::routes::AppState;
use crate::bus::BusConnector;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub channel: String,
    pub active_sessions: usize,
}

pub async fn health<B: BusConnector>(State(state): State<AppState<B>>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "serving",
        channel: state.channel.to_string(),
        active_sessions: state.registry.session_count().await,
    })
}
