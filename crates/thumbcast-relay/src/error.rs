//! Relay error taxonomy.
//!
//! Setup errors (`Connection`, `Subscribe`) end the session before it starts
//! and are reported to the client as `502 Bad Gateway`. The remaining variants
//! are produced during delivery or teardown and are only ever logged.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Bus unreachable when the session starts.
    #[error("Bus connection failed: {0}")]
    Connection(String),

    /// Bus rejected the subscription.
    #[error("Subscribe to channel '{channel}' rejected: {reason}")]
    Subscribe { channel: String, reason: String },

    /// Client connection already gone when a frame was written.
    #[error("Delivery failed: client stream closed")]
    DeliveryWrite,

    #[error("Unsubscribe from channel '{channel}' failed: {reason}")]
    Unsubscribe { channel: String, reason: String },

    #[error("Bus close failed: {0}")]
    Close(String),
}

impl RelayError {
    /// Whether this error happened while establishing a session.
    pub const fn is_setup_failure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Subscribe { .. })
    }

    pub const fn status_code(&self) -> StatusCode {
        if self.is_setup_failure() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = if self.is_setup_failure() {
            "Event stream unavailable: message bus unreachable".to_string()
        } else {
            self.to_string()
        };
        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_failures_map_to_bad_gateway() {
        assert_eq!(
            RelayError::Connection("refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        let rejected = RelayError::Subscribe {
            channel: "thumbnail".into(),
            reason: "NOPERM".into(),
        };
        assert_eq!(rejected.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn teardown_errors_are_not_setup_failures() {
        assert!(!RelayError::DeliveryWrite.is_setup_failure());
        assert!(!RelayError::Close("eof".into()).is_setup_failure());
        assert_eq!(
            RelayError::DeliveryWrite.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn setup_failure_body_hides_bus_details() {
        let response = RelayError::Connection("redis://:secret@host".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(!text.contains("secret"));
        assert!(text.contains("unavailable"));
    }
}
