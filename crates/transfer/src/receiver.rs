//! Receiving side of a transfer.

use bytes::{Bytes, BytesMut};
use codedrop_protocol::{TransferMetadata, TransferProgress};
use tracing::{debug, info, trace, warn};

use crate::TransferError;
use crate::channel::{Frame, FrameSource};

/// Callback invoked after every accepted binary frame.
pub type ProgressCallback = Box<dyn FnMut(TransferProgress) + Send>;

/// Callback invoked once per completed transfer.
pub type CompleteCallback = Box<dyn FnMut(&ReceivedFile) + Send>;

/// A fully reassembled file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub metadata: TransferMetadata,
    pub content: Bytes,
}

impl ReceivedFile {
    pub fn mime_type(&self) -> &str {
        &self.metadata.mime_type
    }
}

/// Reassembles metadata and binary frames into files.
///
/// Completion is inferred from the size announced in the metadata frame;
/// there is no end marker. State resets after every completion so one
/// channel may carry several transfers back to back.
#[derive(Default)]
pub struct ChunkedReceiver {
    metadata: Option<TransferMetadata>,
    bytes_received: u64,
    buffers: Vec<Bytes>,
    on_progress: Option<ProgressCallback>,
    on_complete: Option<CompleteCallback>,
}

impl ChunkedReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the progress callback, replacing any previous one.
    pub fn on_progress(&mut self, callback: ProgressCallback) {
        self.on_progress = Some(callback);
    }

    /// Registers the completion callback, replacing any previous one.
    pub fn on_complete(&mut self, callback: CompleteCallback) {
        self.on_complete = Some(callback);
    }

    /// Metadata of the transfer in flight, if any.
    pub fn metadata(&self) -> Option<&TransferMetadata> {
        self.metadata.as_ref()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Feeds one frame. Returns the file once its last byte arrived.
    pub fn handle_frame(&mut self, frame: Frame) -> Result<Option<ReceivedFile>, TransferError> {
        match frame {
            Frame::Text(text) => self.handle_metadata(&text),
            Frame::Binary(data) => self.handle_chunk(data),
        }
    }

    /// Reads frames from `source` until one file is complete.
    pub async fn receive<S>(&mut self, source: &mut S) -> Result<ReceivedFile, TransferError>
    where
        S: FrameSource + ?Sized,
    {
        while let Some(frame) = source.next_frame().await {
            if let Some(file) = self.handle_frame(frame)? {
                return Ok(file);
            }
        }
        if let Some(meta) = &self.metadata {
            warn!(
                filename = %meta.filename,
                received = self.bytes_received,
                expected = meta.size,
                "channel closed mid-transfer"
            );
        }
        self.reset();
        Err(TransferError::ChannelClosed)
    }

    /// Discards any partial transfer.
    pub fn reset(&mut self) {
        self.metadata = None;
        self.bytes_received = 0;
        self.buffers.clear();
    }

    fn handle_metadata(&mut self, text: &str) -> Result<Option<ReceivedFile>, TransferError> {
        let metadata = match TransferMetadata::from_frame(text) {
            Ok(m) => m,
            Err(e) => {
                self.reset();
                return Err(TransferError::Protocol(format!("invalid metadata frame: {e}")));
            }
        };

        if let Some(previous) = &self.metadata {
            warn!(
                previous = %previous.filename,
                received = self.bytes_received,
                expected = previous.size,
                "new transfer announced mid-transfer, discarding partial data"
            );
            self.reset();
        }

        info!(
            filename = %metadata.filename,
            size = metadata.size,
            mime = %metadata.mime_type,
            "incoming transfer"
        );
        self.metadata = Some(metadata);

        if self.metadata.as_ref().is_some_and(|m| m.size == 0) {
            return Ok(self.complete());
        }
        Ok(None)
    }

    fn handle_chunk(&mut self, data: Bytes) -> Result<Option<ReceivedFile>, TransferError> {
        let Some(metadata) = &self.metadata else {
            warn!(bytes = data.len(), "binary frame before metadata, dropping");
            return Ok(None);
        };

        let total = metadata.size;
        let received = self.bytes_received + data.len() as u64;
        if received > total {
            let msg = format!(
                "{} overran its declared size: {received} > {total}",
                metadata.filename
            );
            self.reset();
            return Err(TransferError::Protocol(msg));
        }

        trace!(bytes = data.len(), received, total, "chunk");
        self.buffers.push(data);
        self.bytes_received = received;

        if let Some(cb) = self.on_progress.as_mut() {
            cb(TransferProgress::new(received, total));
        }

        if received == total {
            return Ok(self.complete());
        }
        Ok(None)
    }

    fn complete(&mut self) -> Option<ReceivedFile> {
        let metadata = self.metadata.take()?;
        let buffers = std::mem::take(&mut self.buffers);
        self.bytes_received = 0;

        let content = match buffers.len() {
            0 => Bytes::new(),
            1 => buffers.into_iter().next().unwrap_or_default(),
            _ => {
                let mut joined = BytesMut::with_capacity(metadata.size as usize);
                for b in &buffers {
                    joined.extend_from_slice(b);
                }
                joined.freeze()
            }
        };

        debug!(filename = %metadata.filename, bytes = content.len(), "transfer complete");
        let file = ReceivedFile { metadata, content };
        if let Some(cb) = self.on_complete.as_mut() {
            cb(&file);
        }
        Some(file)
    }
}
