//! In-memory [`DataChannel`] for tests.
//!
//! Frames written to a [`MemoryChannel`] count towards its buffered amount
//! until the paired [`MemoryFrames`] reads them, which makes backpressure
//! observable without a network stack.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::TransferError;
use crate::channel::{ChannelFuture, DataChannel, Frame, FrameSource};

#[derive(Default)]
struct Shared {
    open: AtomicBool,
    buffered: AtomicUsize,
    peak_at_write: AtomicUsize,
    writes: AtomicUsize,
}

/// Writing half of an in-memory channel.
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
}

/// Reading half of an in-memory channel.
pub struct MemoryFrames {
    rx: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
}

/// Creates an open in-memory channel.
pub fn memory_channel() -> (MemoryChannel, MemoryFrames) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());
    shared.open.store(true, Ordering::SeqCst);
    (
        MemoryChannel {
            tx,
            shared: Arc::clone(&shared),
        },
        MemoryFrames { rx, shared },
    )
}

impl MemoryChannel {
    /// Marks the channel closed. Later writes fail.
    pub fn close(&self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }

    /// Highest buffered amount observed at the moment of a write.
    pub fn peak_buffered_at_write(&self) -> usize {
        self.shared.peak_at_write.load(Ordering::SeqCst)
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> usize {
        self.shared.writes.load(Ordering::SeqCst)
    }

    fn write(&self, frame: Frame) -> Result<(), TransferError> {
        if !self.is_open() {
            return Err(TransferError::ChannelClosed);
        }
        let len = frame.len();
        let before = self.shared.buffered.fetch_add(len, Ordering::SeqCst);
        self.shared.peak_at_write.fetch_max(before, Ordering::SeqCst);
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        self.tx.send(frame).map_err(|_| {
            self.shared.open.store(false, Ordering::SeqCst);
            TransferError::ChannelClosed
        })
    }
}

impl DataChannel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn buffered_amount(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(std::future::ready(self.shared.buffered.load(Ordering::SeqCst)))
    }

    fn send_text(&self, text: String) -> ChannelFuture<'_, ()> {
        Box::pin(std::future::ready(self.write(Frame::Text(text))))
    }

    fn send_binary(&self, data: Bytes) -> ChannelFuture<'_, ()> {
        Box::pin(std::future::ready(self.write(Frame::Binary(data))))
    }
}

impl MemoryFrames {
    /// Closes the channel from the reading side.
    pub fn close(&self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }
}

impl FrameSource for MemoryFrames {
    fn next_frame(&mut self) -> Pin<Box<dyn Future<Output = Option<Frame>> + Send + '_>> {
        Box::pin(async move {
            let frame = self.rx.recv().await?;
            self.shared.buffered.fetch_sub(frame.len(), Ordering::SeqCst);
            Some(frame)
        })
    }
}

impl Drop for MemoryFrames {
    fn drop(&mut self) {
        self.close();
    }
}
