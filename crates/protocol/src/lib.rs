pub mod constants;
pub mod room;
pub mod signaling;
pub mod types;

// Re-export primary types for convenience.
pub use room::RoomCode;
pub use signaling::{IceCandidate, SdpType, SessionDescription, SignalData, SignalMessage};
pub use types::{TransferMetadata, TransferProgress};

/// Errors produced while parsing protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid room code: {0:?}")]
    InvalidRoomCode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
