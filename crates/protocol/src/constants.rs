use std::time::Duration;

/// Size of one binary frame on the data channel (64 KiB).
///
/// Every frame of a transfer carries exactly this many bytes except
/// possibly the last one.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Buffered-bytes ceiling for the sender (8 chunks, 512 KiB).
///
/// The sender never issues a write while the channel reports more than
/// this many bytes queued.
pub const MAX_BUFFERED_AMOUNT: usize = 8 * CHUNK_SIZE;

/// Poll interval used while waiting for the channel buffer to drain.
pub const BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Upper bound on waiting for the send buffer to empty once a transfer
/// has been written.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the sender waits for the receiver to close the channel after
/// the last chunk has left the buffer.
pub const CLOSE_WAIT: Duration = Duration::from_secs(5);

/// Number of digits in a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Inactivity window after which a session is abandoned.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Label of the single data channel created by the initiator.
pub const DATA_CHANNEL_LABEL: &str = "file-transfer";

/// How often the signaling client pings the relay.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(15);

/// Read deadline on the signaling socket.
///
/// Any incoming message resets it; if nothing arrives within this window
/// the relay connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(45);

/// Maximum signaling message size (session descriptions are small).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Timeout for establishing the signaling WebSocket.
pub const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
