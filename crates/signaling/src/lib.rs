//! Client side of the signaling relay.
//!
//! The relay is a dumb forwarder: peers `join` a room code and every
//! `signal` sent to that code is delivered to the other member. This crate
//! provides the WebSocket client used in production and an in-memory relay
//! (feature `test-util`) for tests.

mod client;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
mod pumps;
mod transport;

pub use client::WsSignalingClient;
pub use transport::{SignalStream, SignalingTransport};

/// Errors from the signaling client.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("signaling connection closed")]
    Closed,

    #[error("timed out connecting to signaling server")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(SignalingError::Closed.to_string(), "signaling connection closed");
        assert_eq!(
            SignalingError::Timeout.to_string(),
            "timed out connecting to signaling server"
        );
    }
}
