//! HTTP server for the Thumbcast relay.

pub mod health;
pub mod routes;

pub use health::HealthReport;
pub use routes::{AppState, build_router, subscribe};
