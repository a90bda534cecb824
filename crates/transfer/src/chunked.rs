//! Chunk partitioning and content digests.

use std::ops::Range;
use std::path::Path;

use codedrop_protocol::constants::CHUNK_SIZE;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::TransferError;

/// Splits `size` bytes into consecutive ranges of `chunk_size` bytes.
///
/// The last range is clamped to `size`. A zero-byte file yields no ranges.
pub fn chunk_ranges(size: u64, chunk_size: usize) -> impl Iterator<Item = Range<u64>> {
    let chunk = chunk_size.max(1) as u64;
    (0..size.div_ceil(chunk)).map(move |i| {
        let start = i * chunk;
        start..(start + chunk).min(size)
    })
}

/// Number of binary frames needed for `size` bytes: `ceil(size / chunk_size)`.
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size.max(1) as u64)
}

/// Hex SHA-256 of an in-memory payload.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex SHA-256 of a file on disk, read one chunk at a time.
pub async fn file_sha256(path: &Path) -> Result<String, TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
