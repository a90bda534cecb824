use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use codedrop_protocol::{TransferMetadata, TransferProgress};
use codedrop_transfer::{
    ChunkedReceiver, ChunkedSender, DataChannel, Frame, FrameSource, ReceivedFile, TransferError,
};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::PeerError;
use crate::connection::{LinkEvent, LinkEvents, PeerConnection};
use crate::types::NegotiationState;
use crate::watchdog::Activity;

/// A negotiated connection with exactly one open data channel.
///
/// Once the channel has closed the link is spent: every later transfer
/// fails with [`PeerError::ChannelClosed`].
pub struct PeerLink<P: PeerConnection> {
    conn: P,
    channel: Arc<P::Channel>,
    events: LinkEvents<P::Channel>,
    pending: VecDeque<Frame>,
    closed: bool,
    state: Arc<watch::Sender<NegotiationState>>,
    activity: Option<Activity>,
}

impl<P: PeerConnection> PeerLink<P> {
    pub(crate) fn new(
        conn: P,
        channel: Arc<P::Channel>,
        events: LinkEvents<P::Channel>,
        pending: VecDeque<Frame>,
        state: Arc<watch::Sender<NegotiationState>>,
        activity: Option<Activity>,
    ) -> Self {
        Self {
            conn,
            channel,
            events,
            pending,
            closed: false,
            state,
            activity,
        }
    }

    pub fn channel(&self) -> &Arc<P::Channel> {
        &self.channel
    }

    pub fn is_closed(&self) -> bool {
        self.closed || !self.channel.is_open()
    }

    /// Sends one file over the channel.
    pub async fn send_file<F>(
        &mut self,
        path: &Path,
        mut on_progress: F,
    ) -> Result<TransferMetadata, PeerError>
    where
        F: FnMut(TransferProgress),
    {
        if self.is_closed() {
            self.closed = true;
            return Err(PeerError::ChannelClosed);
        }

        let activity = self.activity.clone();
        let result = ChunkedSender::default()
            .send_file(path, &*self.channel, |p| {
                if let Some(a) = &activity {
                    a.touch();
                }
                on_progress(p);
            })
            .await;
        self.map_transfer(result)
    }

    /// Receives one file from the channel.
    pub async fn receive_file<F>(&mut self, on_progress: F) -> Result<ReceivedFile, PeerError>
    where
        F: FnMut(TransferProgress) + Send + 'static,
    {
        if self.closed {
            return Err(PeerError::ChannelClosed);
        }

        let mut receiver = ChunkedReceiver::new();
        receiver.on_progress(Box::new(on_progress));
        let result = receiver.receive(self).await;
        self.map_transfer(result)
    }

    /// Waits until every byte written so far has left the send buffer.
    ///
    /// Closing drops whatever the transport still holds, so the sending
    /// side calls this between the last chunk and [`close`](Self::close).
    pub async fn drain(&mut self, limit: Duration) -> Result<(), PeerError> {
        if self.closed {
            return Err(PeerError::ChannelClosed);
        }
        let result = self.channel.drain(limit).await;
        self.map_transfer(result)
    }

    /// Waits up to `limit` for the remote side to close the channel.
    ///
    /// Frames that arrive meanwhile are discarded. Returns `false` if the
    /// channel is still open when the time runs out.
    pub async fn wait_closed(&mut self, limit: Duration) -> bool {
        let closed = async {
            while let Some(frame) = self.next_event_frame().await {
                trace!(bytes = frame.len(), "discarding frame after transfer");
            }
        };
        tokio::time::timeout(limit, closed).await.is_ok()
    }

    /// Closes the connection. The link cannot be used afterwards.
    pub async fn close(&mut self) {
        self.closed = true;
        self.state.send_replace(NegotiationState::Closed);
        if let Err(e) = self.conn.close().await {
            warn!(error = %e, "error closing peer connection");
        }
    }

    fn map_transfer<T>(&mut self, result: Result<T, TransferError>) -> Result<T, PeerError> {
        match result {
            Ok(v) => Ok(v),
            Err(TransferError::ChannelClosed | TransferError::ChannelNotOpen) => {
                self.closed = true;
                Err(PeerError::ChannelClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn next_event_frame(&mut self) -> Option<Frame> {
        if let Some(frame) = self.pending.pop_front() {
            return Some(frame);
        }
        if self.closed {
            return None;
        }

        loop {
            let Some(event) = self.events.recv().await else {
                self.closed = true;
                return None;
            };
            match event {
                LinkEvent::Frame(frame) => {
                    if let Some(a) = &self.activity {
                        a.touch();
                    }
                    return Some(frame);
                }
                LinkEvent::ChannelClosed => {
                    debug!("data channel closed");
                    self.closed = true;
                    self.state.send_replace(NegotiationState::Closed);
                    return None;
                }
                LinkEvent::ChannelError(e) => warn!(error = %e, "data channel error"),
                LinkEvent::StateChanged(state) => debug!(connection = %state, "connection state"),
                LinkEvent::LocalCandidate(_) => trace!("late local candidate dropped"),
                LinkEvent::RemoteChannel(_) => {
                    warn!("second data channel announced, ignoring");
                }
                LinkEvent::ChannelOpen => {}
            }
        }
    }
}

impl<P: PeerConnection> FrameSource for PeerLink<P> {
    fn next_frame(&mut self) -> Pin<Box<dyn Future<Output = Option<Frame>> + Send + '_>> {
        Box::pin(self.next_event_frame())
    }
}
