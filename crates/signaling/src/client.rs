//! WebSocket client for the signaling relay.

use std::future::Future;
use std::pin::Pin;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use codedrop_protocol::SignalMessage;
use codedrop_protocol::constants::{WS_CONNECT_TIMEOUT, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD};

use crate::SignalingError;
use crate::pumps::{read::read_pump, write::write_pump};
use crate::transport::{SignalStream, SignalingTransport};

const QUEUE_DEPTH: usize = 64;

/// WebSocket connection to a signaling relay.
///
/// Two background tasks serve the socket: a write pump that serialises
/// outbound frames and pings an idle relay, and a read pump decoding
/// [`SignalMessage`]s into the returned [`SignalStream`].
pub struct WsSignalingClient {
    outgoing: mpsc::Sender<Message>,
    pumps: [JoinHandle<()>; 2],
    shutdown: CancellationToken,
}

impl WsSignalingClient {
    /// Connects to the relay at `url`.
    ///
    /// Returns the client and the stream of incoming messages; the stream
    /// ends when the relay disconnects or [`close`](Self::close) is called.
    pub async fn connect(url: &str) -> Result<(Self, SignalStream), SignalingError> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

        let (socket, _) = tokio::time::timeout(
            WS_CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async_with_config(url, Some(config), false),
        )
        .await
        .map_err(|_| SignalingError::Timeout)??;
        info!(url, "connected to signaling server");

        let (sink, stream) = socket.split();
        let (outgoing, outgoing_rx) = mpsc::channel(QUEUE_DEPTH);
        let (incoming, signals) = mpsc::channel(QUEUE_DEPTH);
        let shutdown = CancellationToken::new();

        let pumps = [
            tokio::spawn(write_pump(
                sink,
                outgoing_rx,
                WS_PING_PERIOD,
                shutdown.clone(),
            )),
            tokio::spawn(read_pump(
                stream,
                incoming,
                outgoing.clone(),
                shutdown.clone(),
            )),
        ];

        Ok((
            Self {
                outgoing,
                pumps,
                shutdown,
            },
            signals,
        ))
    }

    /// Sends one message to the relay.
    pub async fn send(&self, msg: SignalMessage) -> Result<(), SignalingError> {
        let json = msg.to_json()?;
        debug!(kind = msg.kind(), "signal sent");
        self.outgoing
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| SignalingError::Closed)
    }

    /// Asks the write pump to send a close frame, then stops both pumps.
    pub async fn close(&self) {
        let _ = self.outgoing.send(Message::Close(None)).await;
        self.shutdown.cancel();
    }
}

impl SignalingTransport for WsSignalingClient {
    fn send(
        &self,
        msg: SignalMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), SignalingError>> + Send + '_>> {
        Box::pin(WsSignalingClient::send(self, msg))
    }
}

impl Drop for WsSignalingClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for pump in &self.pumps {
            pump.abort();
        }
    }
}
