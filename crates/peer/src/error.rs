use codedrop_signaling::SignalingError;
use codedrop_transfer::TransferError;

/// Errors from connection negotiation and peer sessions.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("WebRTC error: {0}")]
    Rtc(#[from] webrtc::Error),

    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("negotiation error: {0}")]
    Negotiation(String),

    #[error("data channel closed")]
    ChannelClosed,

    #[error("signaling stream closed")]
    SignalingClosed,

    #[error("session timed out after inactivity")]
    Timeout,

    #[error("session cancelled")]
    Cancelled,
}
