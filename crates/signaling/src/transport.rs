use std::future::Future;
use std::pin::Pin;

use codedrop_protocol::SignalMessage;
use tokio::sync::mpsc;

use crate::SignalingError;

/// Incoming relay messages. The stream ends when the relay connection does.
pub type SignalStream = mpsc::Receiver<SignalMessage>;

/// Outbound half of a relay connection.
pub trait SignalingTransport: Send + Sync {
    /// Queues one message for the relay.
    fn send(
        &self,
        msg: SignalMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), SignalingError>> + Send + '_>>;
}
