//! Owns the socket's write half: queued frames out, keepalive pings
//! while idle, and a close frame on the way out.

use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

pub(crate) async fn write_pump<S>(
    mut write: S,
    mut outgoing: mpsc::Receiver<Message>,
    ping_period: Duration,
    cancel: CancellationToken,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + ping_period,
        ping_period,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = outgoing.recv() => match msg {
                Some(Message::Close(_)) | None => break,
                Some(m) => m,
            },
            _ = keepalive.tick() => {
                trace!("signaling keepalive");
                Message::Ping(Default::default())
            }
        };
        if let Err(e) = write.send(msg).await {
            error!(error = %e, "signaling write failed");
            return;
        }
        // Any outbound traffic keeps the connection alive.
        keepalive.reset();
    }

    let _ = write.send(Message::Close(None)).await;
}
