//! Decodes relay frames into [`SignalMessage`]s.

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use codedrop_protocol::SignalMessage;
use codedrop_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};

/// What the pump does after one frame.
enum Next {
    Continue,
    Deliver(SignalMessage),
    Reply(Message),
    Stop,
}

/// Reads frames from the socket and forwards decoded messages.
///
/// Every frame pushes a [`WS_PONG_WAIT`] deadline forward; a relay that
/// stays silent past it is treated as gone. Dropping `incoming` on exit
/// ends the consumer's stream.
pub(crate) async fn read_pump<S>(
    mut read: S,
    incoming: mpsc::Sender<SignalMessage>,
    replies: mpsc::Sender<Message>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            () = &mut deadline => {
                warn!(wait_secs = WS_PONG_WAIT.as_secs(), "relay silent, dropping connection");
                return;
            }
            frame = read.next() => frame,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(error = %e, "signaling read failed");
                return;
            }
            None => {
                debug!("signaling socket ended");
                return;
            }
        };
        deadline.as_mut().reset(Instant::now() + WS_PONG_WAIT);

        match classify(frame) {
            Next::Continue => {}
            Next::Deliver(msg) => {
                if incoming.send(msg).await.is_err() {
                    debug!("signal consumer gone");
                    return;
                }
            }
            Next::Reply(reply) => {
                let _ = replies.send(reply).await;
            }
            Next::Stop => return,
        }
    }
}

fn classify(frame: Message) -> Next {
    match frame {
        Message::Text(text) => decode(&text).map_or(Next::Continue, Next::Deliver),
        Message::Ping(payload) => Next::Reply(Message::Pong(payload)),
        Message::Close(reason) => {
            debug!(?reason, "relay closed the connection");
            Next::Stop
        }
        Message::Binary(data) => {
            warn!(bytes = data.len(), "unexpected binary frame from relay");
            Next::Continue
        }
        Message::Pong(_) | Message::Frame(_) => Next::Continue,
    }
}

fn decode(text: &str) -> Option<SignalMessage> {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!(bytes = text.len(), "oversized signal dropped");
        return None;
    }
    match SignalMessage::from_json(text) {
        Ok(msg) => {
            trace!(kind = msg.kind(), "signal received");
            Some(msg)
        }
        Err(e) => {
            warn!(error = %e, "unparseable signal dropped");
            None
        }
    }
}
