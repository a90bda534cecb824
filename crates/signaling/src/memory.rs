//! In-process signaling relay for tests.
//!
//! Mirrors the production relay: `join` registers the endpoint in a room
//! and notifies members already present with `peer-joined`; `signal` is
//! forwarded to every other member of the addressed room.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use codedrop_protocol::SignalMessage;
use tokio::sync::mpsc;
use tracing::debug;

use crate::SignalingError;
use crate::transport::{SignalStream, SignalingTransport};

type EndpointId = u64;

#[derive(Default)]
struct RelayState {
    next_id: AtomicU64,
    inboxes: Mutex<HashMap<EndpointId, mpsc::Sender<SignalMessage>>>,
    rooms: Mutex<HashMap<String, Vec<EndpointId>>>,
}

/// Shared relay. Clones refer to the same rooms.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<RelayState>,
}

/// One client connection to a [`MemoryRelay`].
pub struct MemorySignaling {
    id: EndpointId,
    state: Arc<RelayState>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new client connection.
    pub fn connect(&self) -> (MemorySignaling, SignalStream) {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(256);
        self.state.inboxes.lock().unwrap().insert(id, tx);
        (
            MemorySignaling {
                id,
                state: Arc::clone(&self.state),
            },
            rx,
        )
    }

    /// Delivers `msg` to every member of room `code`, bypassing any sender.
    pub async fn inject(&self, code: &str, msg: SignalMessage) {
        for tx in self.state.members(code, None) {
            let _ = tx.send(msg.clone()).await;
        }
    }

    /// Number of endpoints currently in room `code`.
    pub fn room_size(&self, code: &str) -> usize {
        self.state
            .rooms
            .lock()
            .unwrap()
            .get(code)
            .map_or(0, Vec::len)
    }
}

impl RelayState {
    fn members(&self, code: &str, except: Option<EndpointId>) -> Vec<mpsc::Sender<SignalMessage>> {
        let ids: Vec<EndpointId> = self
            .rooms
            .lock()
            .unwrap()
            .get(code)
            .map(|ids| ids.iter().copied().filter(|id| Some(*id) != except).collect())
            .unwrap_or_default();
        let inboxes = self.inboxes.lock().unwrap();
        ids.iter().filter_map(|id| inboxes.get(id).cloned()).collect()
    }
}

impl MemorySignaling {
    async fn route(&self, msg: SignalMessage) -> Result<(), SignalingError> {
        if !self.state.inboxes.lock().unwrap().contains_key(&self.id) {
            return Err(SignalingError::Closed);
        }

        match &msg {
            SignalMessage::Join { code } => {
                let existing = self.state.members(code, Some(self.id));
                self.state
                    .rooms
                    .lock()
                    .unwrap()
                    .entry(code.clone())
                    .or_default()
                    .push(self.id);
                debug!(endpoint = self.id, code = %code, "relay join");
                for tx in existing {
                    let _ = tx.send(SignalMessage::PeerJoined).await;
                }
            }
            SignalMessage::Signal { code, .. } => {
                for tx in self.state.members(code, Some(self.id)) {
                    let _ = tx.send(msg.clone()).await;
                }
            }
            SignalMessage::PeerJoined => {
                debug!(endpoint = self.id, "relay ignores client-sent peer-joined");
            }
        }
        Ok(())
    }

    /// Disconnects from the relay. The endpoint's stream ends.
    pub fn close(&self) {
        self.state.inboxes.lock().unwrap().remove(&self.id);
        for members in self.state.rooms.lock().unwrap().values_mut() {
            members.retain(|id| *id != self.id);
        }
    }
}

impl SignalingTransport for MemorySignaling {
    fn send(
        &self,
        msg: SignalMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), SignalingError>> + Send + '_>> {
        Box::pin(self.route(msg))
    }
}

impl Drop for MemorySignaling {
    fn drop(&mut self) {
        self.close();
    }
}
