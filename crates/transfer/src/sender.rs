//! Sending side of a transfer.

use std::path::Path;

use bytes::Bytes;
use codedrop_protocol::constants::{CHUNK_SIZE, MAX_BUFFERED_AMOUNT};
use codedrop_protocol::{TransferMetadata, TransferProgress};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, trace};

use crate::channel::DataChannel;
use crate::chunked::{chunk_count, chunk_ranges};
use crate::TransferError;

/// Streams one file over an open [`DataChannel`].
#[derive(Debug, Clone)]
pub struct ChunkedSender {
    chunk_size: usize,
    max_buffered: usize,
}

impl Default for ChunkedSender {
    fn default() -> Self {
        Self::new(CHUNK_SIZE, MAX_BUFFERED_AMOUNT)
    }
}

impl ChunkedSender {
    /// Creates a sender with custom limits.
    ///
    /// Zero values fall back to [`CHUNK_SIZE`] and [`MAX_BUFFERED_AMOUNT`].
    pub fn new(chunk_size: usize, max_buffered: usize) -> Self {
        Self {
            chunk_size: if chunk_size == 0 { CHUNK_SIZE } else { chunk_size },
            max_buffered: if max_buffered == 0 {
                MAX_BUFFERED_AMOUNT
            } else {
                max_buffered
            },
        }
    }

    /// Sends the file at `path`. Returns the metadata that was announced.
    pub async fn send_file<C, F>(
        &self,
        path: &Path,
        channel: &C,
        on_progress: F,
    ) -> Result<TransferMetadata, TransferError>
    where
        C: DataChannel + ?Sized,
        F: FnMut(TransferProgress),
    {
        if !channel.is_open() {
            return Err(TransferError::ChannelNotOpen);
        }
        let metadata = metadata_for_path(path).await?;
        let file = tokio::fs::File::open(path).await?;
        self.send(&metadata, file, channel, on_progress).await?;
        Ok(metadata)
    }

    /// Writes the metadata frame, then `metadata.size` bytes from `reader`
    /// as binary frames. Returns the number of content bytes written.
    ///
    /// Fails with [`TransferError::ChannelNotOpen`] before writing anything
    /// if the channel is not open.
    pub async fn send<R, C, F>(
        &self,
        metadata: &TransferMetadata,
        mut reader: R,
        channel: &C,
        mut on_progress: F,
    ) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin,
        C: DataChannel + ?Sized,
        F: FnMut(TransferProgress),
    {
        if !channel.is_open() {
            return Err(TransferError::ChannelNotOpen);
        }

        channel.send_text(metadata.to_frame()?).await?;
        info!(
            filename = %metadata.filename,
            size = metadata.size,
            mime = %metadata.mime_type,
            frames = chunk_count(metadata.size, self.chunk_size),
            "transfer started"
        );

        let mut buf = vec![0u8; self.chunk_size];
        let mut sent: u64 = 0;

        for range in chunk_ranges(metadata.size, self.chunk_size) {
            let len = (range.end - range.start) as usize;
            reader.read_exact(&mut buf[..len]).await?;

            let buffered = channel.buffered_amount().await;
            if buffered > self.max_buffered {
                trace!(buffered, ceiling = self.max_buffered, "waiting for channel to drain");
                channel.wait_buffered_below(self.max_buffered).await?;
            }
            if !channel.is_open() {
                return Err(TransferError::ChannelClosed);
            }

            channel
                .send_binary(Bytes::copy_from_slice(&buf[..len]))
                .await?;
            sent = range.end;
            on_progress(TransferProgress::new(sent, metadata.size));
        }

        debug!(bytes = sent, "all frames written");
        Ok(sent)
    }
}

/// Builds transfer metadata (name, size, guessed MIME type) for a local file.
pub async fn metadata_for_path(path: &Path) -> Result<TransferMetadata, TransferError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::InvalidFilename(path.display().to_string()))?;
    let size = tokio::fs::metadata(path).await?.len();
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    Ok(TransferMetadata::new(filename, size, mime_type))
}
