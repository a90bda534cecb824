//! Chunked file transfer over an ordered, reliable, message-based channel.
//!
//! A transfer is one text frame carrying [`TransferMetadata`] followed by
//! binary frames of [`CHUNK_SIZE`] bytes (the last one may be shorter).
//! There is no end marker: the receiver infers completion from the byte
//! count announced in the metadata.
//!
//! [`TransferMetadata`]: codedrop_protocol::TransferMetadata
//! [`CHUNK_SIZE`]: codedrop_protocol::constants::CHUNK_SIZE

mod channel;
mod chunked;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
mod progress;
mod receiver;
mod sender;
mod validation;

pub use channel::{ChannelFuture, DataChannel, Frame, FrameSource};
pub use chunked::{chunk_count, chunk_ranges, file_sha256, sha256_hex};
pub use progress::SpeedCalculator;
pub use receiver::{ChunkedReceiver, CompleteCallback, ProgressCallback, ReceivedFile};
pub use sender::{ChunkedSender, metadata_for_path};
pub use validation::{sanitize_filename, save_received};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("data channel is not open")]
    ChannelNotOpen,

    #[error("data channel closed")]
    ChannelClosed,

    #[error("send buffer still held data after {0:?}")]
    DrainTimeout(std::time::Duration),

    #[error("data channel error: {0}")]
    Channel(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),
}
