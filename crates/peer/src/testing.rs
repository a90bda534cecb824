//! Scripted in-memory peer connections.
//!
//! Two [`FakeConnection`]s share a [`FakeNet`]. Once both sides have a
//! local and a remote description the net "connects": the responder is
//! handed a remote channel, both channels open, and frames flow through
//! in-memory channels with real buffered-amount accounting.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use codedrop_protocol::{IceCandidate, RoomCode, SessionDescription};
use codedrop_signaling::SignalStream;
use codedrop_signaling::memory::{MemoryRelay, MemorySignaling};
use codedrop_transfer::memory::{MemoryChannel, MemoryFrames, memory_channel};
use codedrop_transfer::{ChannelFuture, DataChannel, FrameSource, TransferError};
use tokio::sync::mpsc;

use crate::connection::{LinkEvent, LinkEvents, PeerConnection, PeerFuture};
use crate::link::PeerLink;
use crate::negotiator::Negotiator;
use crate::types::Role;
use crate::PeerError;

type EventTx = mpsc::UnboundedSender<LinkEvent<FakeChannel>>;

pub(crate) fn code() -> RoomCode {
    RoomCode::parse("424242").unwrap()
}

/// Data channel whose outbound half is attached when the net connects.
#[derive(Default)]
pub(crate) struct FakeChannel {
    outbound: OnceLock<MemoryChannel>,
    open: AtomicBool,
}

impl FakeChannel {
    fn attach(&self, outbound: MemoryChannel) {
        let _ = self.outbound.set(outbound);
        self.open.store(true, Ordering::SeqCst);
    }

    fn shut(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(ch) = self.outbound.get() {
            ch.close();
        }
    }
}

impl DataChannel for FakeChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.outbound.get().is_some_and(|c| c.is_open())
    }

    fn buffered_amount(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        match self.outbound.get() {
            Some(ch) => ch.buffered_amount(),
            None => Box::pin(std::future::ready(0)),
        }
    }

    fn send_text(&self, text: String) -> ChannelFuture<'_, ()> {
        match self.outbound.get() {
            Some(ch) if self.is_open() => ch.send_text(text),
            _ => Box::pin(std::future::ready(Err(TransferError::ChannelClosed))),
        }
    }

    fn send_binary(&self, data: Bytes) -> ChannelFuture<'_, ()> {
        match self.outbound.get() {
            Some(ch) if self.is_open() => ch.send_binary(data),
            _ => Box::pin(std::future::ready(Err(TransferError::ChannelClosed))),
        }
    }
}

#[derive(Default)]
struct Side {
    events: Option<EventTx>,
    local: bool,
    remote: bool,
    offers: usize,
    candidates: Vec<String>,
    channel: Option<Arc<FakeChannel>>,
}

#[derive(Default)]
struct NetState {
    sides: [Side; 2],
    connected: bool,
}

#[derive(Clone, Default)]
pub(crate) struct FakeNet {
    state: Arc<Mutex<NetState>>,
}

pub(crate) struct FakeConnection {
    side: usize,
    net: FakeNet,
}

impl FakeNet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Opens side 0 or 1.
    pub(crate) fn connection(&self, side: usize) -> (FakeConnection, LinkEvents<FakeChannel>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().sides[side].events = Some(tx);
        (
            FakeConnection {
                side,
                net: self.clone(),
            },
            rx,
        )
    }

    /// Injects a raw event on `side`.
    pub(crate) fn emit(&self, side: usize, event: LinkEvent<FakeChannel>) {
        if let Some(tx) = &self.state.lock().unwrap().sides[side].events {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn offers_created(&self, side: usize) -> usize {
        self.state.lock().unwrap().sides[side].offers
    }

    pub(crate) fn remote_set(&self, side: usize) -> bool {
        self.state.lock().unwrap().sides[side].remote
    }

    pub(crate) fn candidates(&self, side: usize) -> Vec<String> {
        self.state.lock().unwrap().sides[side].candidates.clone()
    }

    /// Simulates the transport dropping: both channels close.
    pub(crate) fn disconnect(&self) {
        let state = self.state.lock().unwrap();
        for side in &state.sides {
            if let Some(ch) = &side.channel {
                ch.shut();
            }
            if let Some(tx) = &side.events {
                let _ = tx.send(LinkEvent::ChannelClosed);
            }
        }
    }

    fn maybe_connect(state: &mut NetState) {
        if state.connected || !state.sides.iter().all(|s| s.local && s.remote) {
            return;
        }
        let Some(init) = state.sides.iter().position(|s| s.channel.is_some()) else {
            return;
        };
        let resp = 1 - init;
        state.connected = true;

        let (init_out, resp_in) = memory_channel();
        let (resp_out, init_in) = memory_channel();

        let resp_channel = Arc::new(FakeChannel::default());
        resp_channel.attach(resp_out);
        if let Some(ch) = &state.sides[init].channel {
            ch.attach(init_out);
        }
        state.sides[resp].channel = Some(Arc::clone(&resp_channel));

        let init_tx = state.sides[init].events.clone();
        let resp_tx = state.sides[resp].events.clone();
        if let Some(tx) = &resp_tx {
            let _ = tx.send(LinkEvent::RemoteChannel(resp_channel));
            let _ = tx.send(LinkEvent::ChannelOpen);
        }
        if let Some(tx) = &init_tx {
            let _ = tx.send(LinkEvent::ChannelOpen);
        }
        if let Some(tx) = resp_tx {
            tokio::spawn(pump(resp_in, tx));
        }
        if let Some(tx) = init_tx {
            tokio::spawn(pump(init_in, tx));
        }
    }
}

async fn pump(mut frames: MemoryFrames, tx: EventTx) {
    while let Some(frame) = frames.next_frame().await {
        if tx.send(LinkEvent::Frame(frame)).is_err() {
            return;
        }
    }
    let _ = tx.send(LinkEvent::ChannelClosed);
}

impl FakeConnection {
    fn with_side<T>(&self, f: impl FnOnce(&mut NetState, usize) -> T) -> T {
        let mut state = self.net.state.lock().unwrap();
        f(&mut state, self.side)
    }
}

impl PeerConnection for FakeConnection {
    type Channel = FakeChannel;

    fn create_data_channel<'a>(&'a self, _label: &'a str) -> PeerFuture<'a, Arc<FakeChannel>> {
        let ch = Arc::new(FakeChannel::default());
        self.with_side(|s, side| s.sides[side].channel = Some(Arc::clone(&ch)));
        Box::pin(std::future::ready(Ok(ch)))
    }

    fn create_offer(&self) -> PeerFuture<'_, SessionDescription> {
        let side = self.with_side(|s, side| {
            s.sides[side].offers += 1;
            side
        });
        Box::pin(std::future::ready(Ok(SessionDescription::offer(format!(
            "fake-offer-{side}"
        )))))
    }

    fn create_answer(&self) -> PeerFuture<'_, SessionDescription> {
        let result = self.with_side(|s, side| {
            if s.sides[side].remote {
                Ok(SessionDescription::answer(format!("fake-answer-{side}")))
            } else {
                Err(PeerError::Negotiation("no remote offer".into()))
            }
        });
        Box::pin(std::future::ready(result))
    }

    fn set_local_description(&self, _desc: SessionDescription) -> PeerFuture<'_, ()> {
        self.with_side(|s, side| {
            s.sides[side].local = true;
            if let Some(tx) = &s.sides[side].events {
                let _ = tx.send(LinkEvent::LocalCandidate(IceCandidate {
                    candidate: format!("candidate:{side} 1 udp 1 127.0.0.1 5000{side} typ host"),
                    sdp_mid: Some("0".into()),
                    sdp_mline_index: Some(0),
                    username_fragment: None,
                }));
            }
            FakeNet::maybe_connect(s);
        });
        Box::pin(std::future::ready(Ok(())))
    }

    fn set_remote_description(&self, desc: SessionDescription) -> PeerFuture<'_, ()> {
        if desc.sdp == "garbage" {
            return Box::pin(std::future::ready(Err(PeerError::Negotiation(
                "malformed description".into(),
            ))));
        }
        self.with_side(|s, side| {
            s.sides[side].remote = true;
            FakeNet::maybe_connect(s);
        });
        Box::pin(std::future::ready(Ok(())))
    }

    fn add_ice_candidate(&self, candidate: IceCandidate) -> PeerFuture<'_, ()> {
        if !candidate.candidate.starts_with("candidate:") {
            return Box::pin(std::future::ready(Err(PeerError::Negotiation(
                "malformed candidate".into(),
            ))));
        }
        self.with_side(|s, side| s.sides[side].candidates.push(candidate.candidate));
        Box::pin(std::future::ready(Ok(())))
    }

    fn close(&self) -> PeerFuture<'_, ()> {
        self.net.disconnect();
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Everything one side needs to keep alive after negotiation.
pub(crate) struct Endpoint {
    pub link: PeerLink<FakeConnection>,
    pub signaling: MemorySignaling,
    pub signals: SignalStream,
}

/// Negotiates both sides over `relay`, initiator joining first.
pub(crate) async fn establish_pair(relay: &MemoryRelay, net: &FakeNet) -> (Endpoint, Endpoint) {
    let (a_conn, a_events) = net.connection(0);
    let (b_conn, b_events) = net.connection(1);
    let (a_sig, mut a_rx) = relay.connect();
    let (b_sig, mut b_rx) = relay.connect();

    let initiator = Negotiator::new(a_conn, code(), Role::Initiator);
    let mut a_state = initiator.state();
    let a = tokio::spawn(async move {
        let link = initiator.establish(&a_sig, &mut a_rx, a_events).await;
        (link, a_sig, a_rx)
    });
    a_state
        .wait_for(|s| *s == crate::NegotiationState::Joining)
        .await
        .unwrap();
    // Let the join reach the relay before the responder shows up.
    while relay.room_size(code().as_str()) == 0 {
        tokio::task::yield_now().await;
    }

    let responder = Negotiator::new(b_conn, code(), Role::Responder);
    let b = tokio::spawn(async move {
        let link = responder.establish(&b_sig, &mut b_rx, b_events).await;
        (link, b_sig, b_rx)
    });

    let (a_link, a_sig, a_rx) = a.await.unwrap();
    let (b_link, b_sig, b_rx) = b.await.unwrap();
    (
        Endpoint {
            link: a_link.unwrap(),
            signaling: a_sig,
            signals: a_rx,
        },
        Endpoint {
            link: b_link.unwrap(),
            signaling: b_sig,
            signals: b_rx,
        },
    )
}
