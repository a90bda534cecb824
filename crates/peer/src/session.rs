//! One transfer attempt: room code, role, negotiation and an idle timeout.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use codedrop_protocol::{RoomCode, TransferMetadata, TransferProgress};
use codedrop_signaling::{SignalStream, SignalingTransport};
use codedrop_transfer::ReceivedFile;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::PeerError;
use crate::connection::{LinkEvents, PeerConnection};
use crate::link::PeerLink;
use crate::negotiator::Negotiator;
use crate::types::{NegotiationState, Role};
use crate::watchdog::{Activity, Watchdog};

/// A session owns the inactivity watchdog. Any operation still running
/// when the watchdog fires returns [`PeerError::Timeout`]; after
/// [`reset`](Self::reset) they return [`PeerError::Cancelled`].
pub struct Session {
    code: RoomCode,
    role: Role,
    cancel: CancellationToken,
    watchdog: Watchdog,
    state: Arc<watch::Sender<NegotiationState>>,
}

impl Session {
    /// Creates a session and starts its watchdog. Must be called inside a
    /// tokio runtime.
    pub fn new(code: RoomCode, role: Role, timeout: Duration) -> Self {
        let cancel = CancellationToken::new();
        let watchdog = Watchdog::spawn(timeout, cancel.clone());
        let (state, _) = watch::channel(NegotiationState::Idle);
        info!(code = %code, role = %role, timeout_secs = timeout.as_secs(), "session created");
        Self {
            code,
            role,
            cancel,
            watchdog,
            state: Arc::new(state),
        }
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Current connection state, updated as negotiation progresses.
    pub fn state(&self) -> watch::Receiver<NegotiationState> {
        self.state.subscribe()
    }

    pub fn activity(&self) -> Activity {
        self.watchdog.activity()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Negotiates a [`PeerLink`] over `conn`.
    pub async fn connect<P, T>(
        &self,
        conn: P,
        events: LinkEvents<P::Channel>,
        signaling: &T,
        signals: &mut SignalStream,
    ) -> Result<PeerLink<P>, PeerError>
    where
        P: PeerConnection,
        T: SignalingTransport + ?Sized,
    {
        let negotiator = Negotiator::new(conn, self.code.clone(), self.role)
            .with_state(Arc::clone(&self.state))
            .with_activity(self.activity());
        self.guard(negotiator.establish(signaling, signals, events))
            .await
    }

    pub async fn send_file<P, F>(
        &self,
        link: &mut PeerLink<P>,
        path: &Path,
        on_progress: F,
    ) -> Result<TransferMetadata, PeerError>
    where
        P: PeerConnection,
        F: FnMut(TransferProgress),
    {
        self.guard(link.send_file(path, on_progress)).await
    }

    pub async fn receive_file<P, F>(
        &self,
        link: &mut PeerLink<P>,
        on_progress: F,
    ) -> Result<ReceivedFile, PeerError>
    where
        P: PeerConnection,
        F: FnMut(TransferProgress) + Send + 'static,
    {
        self.guard(link.receive_file(on_progress)).await
    }

    /// Abandons the session. Pending operations return
    /// [`PeerError::Cancelled`].
    pub fn reset(&self) {
        info!(code = %self.code, "session reset");
        self.cancel.cancel();
        self.state.send_replace(NegotiationState::Closed);
    }

    async fn guard<F, T>(&self, fut: F) -> Result<T, PeerError>
    where
        F: Future<Output = Result<T, PeerError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(self.cancel_reason());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancel_reason()),
            result = fut => result,
        }
    }

    fn cancel_reason(&self) -> PeerError {
        if self.watchdog.timed_out() {
            PeerError::Timeout
        } else {
            PeerError::Cancelled
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
