//! The data-channel seam.
//!
//! The transfer logic only needs four things from the underlying stack:
//! an open/closed flag, the number of bytes queued for sending, and the
//! ability to write text and binary messages. Implementations exist for
//! the WebRTC stack (in `codedrop-peer`) and for tests ([`crate::memory`]).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use codedrop_protocol::constants::BACKPRESSURE_POLL_INTERVAL;
use tokio::sync::mpsc;

use crate::TransferError;

/// A boxed future returned by channel operations.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransferError>> + Send + 'a>>;

/// One message on the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text message (transfer metadata).
    Text(String),
    /// Binary message (file content).
    Binary(Bytes),
}

impl Frame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(t) => t.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sending half of an ordered, reliable, message-oriented channel.
pub trait DataChannel: Send + Sync {
    /// Returns `true` while the channel accepts writes.
    fn is_open(&self) -> bool;

    /// Bytes queued by the transport but not yet sent.
    fn buffered_amount(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>>;

    /// Writes one text message.
    fn send_text(&self, text: String) -> ChannelFuture<'_, ()>;

    /// Writes one binary message.
    fn send_binary(&self, data: Bytes) -> ChannelFuture<'_, ()>;

    /// Resolves once at most `threshold` bytes are buffered.
    ///
    /// The default polls every [`BACKPRESSURE_POLL_INTERVAL`]. Channels
    /// with a native "buffered amount low" event should override this.
    fn wait_buffered_below(&self, threshold: usize) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            loop {
                if !self.is_open() {
                    return Err(TransferError::ChannelClosed);
                }
                if self.buffered_amount().await <= threshold {
                    return Ok(());
                }
                tokio::time::sleep(BACKPRESSURE_POLL_INTERVAL).await;
            }
        })
    }

    /// Resolves once nothing is buffered, so closing loses no data.
    ///
    /// Fails with [`TransferError::ChannelClosed`] if the channel closes
    /// with bytes still queued, and with [`TransferError::DrainTimeout`]
    /// after `limit`.
    fn drain(&self, limit: Duration) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            let empty = async {
                loop {
                    if self.buffered_amount().await == 0 {
                        return Ok(());
                    }
                    if !self.is_open() {
                        return Err(TransferError::ChannelClosed);
                    }
                    tokio::time::sleep(BACKPRESSURE_POLL_INTERVAL).await;
                }
            };
            tokio::time::timeout(limit, empty)
                .await
                .map_err(|_| TransferError::DrainTimeout(limit))?
        })
    }
}

/// Receiving half: yields frames in arrival order, `None` once closed.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Pin<Box<dyn Future<Output = Option<Frame>> + Send + '_>>;
}

impl FrameSource for mpsc::Receiver<Frame> {
    fn next_frame(&mut self) -> Pin<Box<dyn Future<Output = Option<Frame>> + Send + '_>> {
        Box::pin(self.recv())
    }
}

impl FrameSource for mpsc::UnboundedReceiver<Frame> {
    fn next_frame(&mut self) -> Pin<Box<dyn Future<Output = Option<Frame>> + Send + '_>> {
        Box::pin(self.recv())
    }
}
