//! Offer/answer/ICE exchange that ends with one open data channel.

use std::collections::VecDeque;
use std::sync::Arc;

use codedrop_protocol::constants::DATA_CHANNEL_LABEL;
use codedrop_protocol::{IceCandidate, RoomCode, SessionDescription, SignalData, SignalMessage};
use codedrop_signaling::{SignalStream, SignalingTransport};
use codedrop_transfer::Frame;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::{LinkEvent, LinkEvents, PeerConnection};
use crate::link::PeerLink;
use crate::types::{NegotiationState, Role};
use crate::watchdog::Activity;
use crate::PeerError;

/// Callback invoked once, right before [`Negotiator::establish`] resolves.
pub type ReadyCallback = Box<dyn FnOnce() + Send + Sync>;

/// Drives one peer connection from `join` to an open data channel.
pub struct Negotiator<P: PeerConnection> {
    conn: P,
    code: RoomCode,
    role: Role,
    state: Arc<watch::Sender<NegotiationState>>,
    activity: Option<Activity>,
    on_ready: Option<ReadyCallback>,
}

impl<P: PeerConnection> Negotiator<P> {
    pub fn new(conn: P, code: RoomCode, role: Role) -> Self {
        let (state, _) = watch::channel(NegotiationState::Idle);
        Self {
            conn,
            code,
            role,
            state: Arc::new(state),
            activity: None,
            on_ready: None,
        }
    }

    /// Publishes state changes on an externally owned channel.
    pub fn with_state(mut self, state: Arc<watch::Sender<NegotiationState>>) -> Self {
        self.state = state;
        self
    }

    /// Reports every negotiation event to a session watchdog.
    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn on_ready(mut self, callback: ReadyCallback) -> Self {
        self.on_ready = Some(callback);
        self
    }

    pub fn state(&self) -> watch::Receiver<NegotiationState> {
        self.state.subscribe()
    }

    /// Joins the room and negotiates until the data channel is open.
    ///
    /// Description and candidate errors are logged and do not abort the
    /// exchange. Fails only when the signaling stream or the event stream
    /// ends, or the channel closes before opening.
    pub async fn establish<T>(
        mut self,
        signaling: &T,
        signals: &mut SignalStream,
        mut events: LinkEvents<P::Channel>,
    ) -> Result<PeerLink<P>, PeerError>
    where
        T: SignalingTransport + ?Sized,
    {
        self.set_state(NegotiationState::Joining);
        signaling.send(SignalMessage::join(&self.code)).await?;
        info!(code = %self.code, role = %self.role, "joined room");

        let mut channel: Option<Arc<P::Channel>> = None;
        match self.role {
            Role::Initiator => {
                channel = Some(self.conn.create_data_channel(DATA_CHANNEL_LABEL).await?);
            }
            Role::Responder => self.set_state(NegotiationState::AwaitingOffer),
        }

        let mut pending = VecDeque::new();

        loop {
            tokio::select! {
                msg = signals.recv() => {
                    let Some(msg) = msg else {
                        warn!(code = %self.code, "signaling stream ended during negotiation");
                        return Err(PeerError::SignalingClosed);
                    };
                    self.touch();
                    self.handle_signal(msg, signaling).await;
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        return Err(PeerError::ChannelClosed);
                    };
                    self.touch();
                    match event {
                        LinkEvent::LocalCandidate(candidate) => {
                            let msg = SignalMessage::signal(&self.code, SignalData::Ice(candidate));
                            if let Err(e) = signaling.send(msg).await {
                                warn!(code = %self.code, error = %e, "failed to relay local candidate");
                            }
                        }
                        LinkEvent::RemoteChannel(remote) => {
                            if channel.is_some() {
                                warn!(code = %self.code, "second data channel announced, ignoring");
                            } else {
                                debug!(code = %self.code, "acquired remote data channel");
                                channel = Some(remote);
                            }
                        }
                        LinkEvent::ChannelOpen => {
                            let Some(open) = channel.take() else {
                                warn!(code = %self.code, "open event without a data channel");
                                continue;
                            };
                            return Ok(self.finish(open, events, pending));
                        }
                        LinkEvent::Frame(frame) => {
                            debug!(bytes = frame.len(), "queueing frame received before open");
                            pending.push_back(frame);
                        }
                        LinkEvent::ChannelError(e) => {
                            warn!(code = %self.code, error = %e, "data channel error");
                        }
                        LinkEvent::ChannelClosed => {
                            warn!(code = %self.code, "data channel closed before opening");
                            self.set_state(NegotiationState::Closed);
                            return Err(PeerError::ChannelClosed);
                        }
                        LinkEvent::StateChanged(state) => {
                            debug!(code = %self.code, connection = %state, "connection state");
                        }
                    }
                }
            }
        }
    }

    fn finish(
        mut self,
        channel: Arc<P::Channel>,
        events: LinkEvents<P::Channel>,
        pending: VecDeque<Frame>,
    ) -> PeerLink<P> {
        self.set_state(NegotiationState::ChannelOpen);
        info!(code = %self.code, role = %self.role, "data channel open");
        if let Some(cb) = self.on_ready.take() {
            cb();
        }
        PeerLink::new(
            self.conn,
            channel,
            events,
            pending,
            self.state,
            self.activity,
        )
    }

    async fn handle_signal<T>(&self, msg: SignalMessage, signaling: &T)
    where
        T: SignalingTransport + ?Sized,
    {
        match msg {
            SignalMessage::PeerJoined => {
                let state = *self.state.borrow();
                if self.role != Role::Initiator || state != NegotiationState::Joining {
                    debug!(code = %self.code, ?state, "ignoring peer-joined");
                    return;
                }
                if let Err(e) = self.send_offer(signaling).await {
                    warn!(code = %self.code, error = %e, "failed to create offer");
                }
            }
            SignalMessage::Signal { code, data } => {
                if code != self.code.as_str() {
                    warn!(expected = %self.code, got = %code, "signal for another room, ignoring");
                    return;
                }
                let kind = data.kind();
                let result = match data {
                    SignalData::Offer(desc) => self.accept_offer(desc, signaling).await,
                    SignalData::Answer(desc) => self.accept_answer(desc).await,
                    SignalData::Ice(candidate) => self.add_candidate(candidate).await,
                };
                if let Err(e) = result {
                    warn!(code = %self.code, kind, error = %e, "failed to apply remote signal");
                }
            }
            SignalMessage::Join { .. } => {
                debug!(code = %self.code, "ignoring relayed join");
            }
        }
    }

    async fn send_offer<T>(&self, signaling: &T) -> Result<(), PeerError>
    where
        T: SignalingTransport + ?Sized,
    {
        let offer = self.conn.create_offer().await?;
        self.conn.set_local_description(offer.clone()).await?;
        signaling
            .send(SignalMessage::signal(&self.code, SignalData::Offer(offer)))
            .await?;
        self.set_state(NegotiationState::OfferSent);
        Ok(())
    }

    async fn accept_offer<T>(&self, offer: SessionDescription, signaling: &T) -> Result<(), PeerError>
    where
        T: SignalingTransport + ?Sized,
    {
        if self.role != Role::Responder {
            return Err(PeerError::Negotiation("initiator received an offer".into()));
        }
        self.conn.set_remote_description(offer).await?;
        let answer = self.conn.create_answer().await?;
        self.conn.set_local_description(answer.clone()).await?;
        signaling
            .send(SignalMessage::signal(&self.code, SignalData::Answer(answer)))
            .await?;
        self.set_state(NegotiationState::AnswerExchanged);
        Ok(())
    }

    async fn accept_answer(&self, answer: SessionDescription) -> Result<(), PeerError> {
        if self.role != Role::Initiator {
            return Err(PeerError::Negotiation("responder received an answer".into()));
        }
        self.conn.set_remote_description(answer).await?;
        self.set_state(NegotiationState::AnswerExchanged);
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.conn.add_ice_candidate(candidate).await?;
        if *self.state.borrow() == NegotiationState::AnswerExchanged {
            self.set_state(NegotiationState::IceExchanging);
        }
        Ok(())
    }

    fn set_state(&self, next: NegotiationState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(code = %self.code, from = ?prev, to = ?next, "negotiation state");
        }
    }

    fn touch(&self) {
        if let Some(activity) = &self.activity {
            activity.touch();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use codedrop_signaling::SignalingError;
    use codedrop_signaling::memory::MemoryRelay;
    use codedrop_transfer::{DataChannel, FrameSource};

    use crate::testing::{FakeChannel, FakeNet, code, establish_pair};

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn offer_deferred_until_peer_joined() {
        let relay = MemoryRelay::new();
        let net = FakeNet::new();
        let (conn, events) = net.connection(0);
        let (sig, mut rx) = relay.connect();

        let negotiator = Negotiator::new(conn, code(), Role::Initiator);
        let state = negotiator.state();
        let task = tokio::spawn(async move {
            let _ = negotiator.establish(&sig, &mut rx, events).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*state.borrow(), NegotiationState::Joining);
        assert_eq!(net.offers_created(0), 0, "no offer before peer-joined");

        relay.inject(code().as_str(), SignalMessage::PeerJoined).await;
        settle().await;
        assert_eq!(net.offers_created(0), 1);
        assert_eq!(*state.borrow(), NegotiationState::OfferSent);

        // A repeated peer-joined does not produce a second offer.
        relay.inject(code().as_str(), SignalMessage::PeerJoined).await;
        settle().await;
        assert_eq!(net.offers_created(0), 1);

        task.abort();
    }

    #[tokio::test]
    async fn both_sides_reach_channel_open() {
        let relay = MemoryRelay::new();
        let net = FakeNet::new();
        let (a, b) = establish_pair(&relay, &net).await;

        assert_eq!(net.offers_created(0), 1);
        assert_eq!(net.offers_created(1), 0, "responder never offers");
        assert!(a.link.channel().is_open());
        assert!(b.link.channel().is_open());
    }

    #[tokio::test]
    async fn on_ready_fires_once_with_open_state() {
        let relay = MemoryRelay::new();
        let net = FakeNet::new();
        let (a_conn, a_events) = net.connection(0);
        let (b_conn, b_events) = net.connection(1);
        let (a_sig, mut a_rx) = relay.connect();
        let (b_sig, mut b_rx) = relay.connect();

        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let initiator = Negotiator::new(a_conn, code(), Role::Initiator)
            .on_ready(Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }));
        let a_state = initiator.state();

        let a = tokio::spawn(async move {
            let link = initiator.establish(&a_sig, &mut a_rx, a_events).await;
            (link.map(|_| ()), a_sig, a_rx)
        });
        while relay.room_size(code().as_str()) == 0 {
            tokio::task::yield_now().await;
        }
        let responder = Negotiator::new(b_conn, code(), Role::Responder);
        let b = tokio::spawn(async move {
            let link = responder.establish(&b_sig, &mut b_rx, b_events).await;
            (link.map(|_| ()), b_sig, b_rx)
        });

        let (a_result, _a_sig, _a_rx) = a.await.unwrap();
        let (b_result, _b_sig, _b_rx) = b.await.unwrap();
        a_result.unwrap();
        b_result.unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(*a_state.borrow(), NegotiationState::ChannelOpen);
    }

    /// Relays everything except ICE candidates, which fail to send.
    struct DropsCandidates(codedrop_signaling::memory::MemorySignaling);

    impl SignalingTransport for DropsCandidates {
        fn send(
            &self,
            msg: SignalMessage,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<(), SignalingError>> + Send + '_>,
        > {
            if matches!(&msg, SignalMessage::Signal { data: SignalData::Ice(_), .. }) {
                return Box::pin(std::future::ready(Err(SignalingError::Closed)));
            }
            self.0.send(msg)
        }
    }

    #[tokio::test]
    async fn unsent_local_candidate_is_not_fatal() {
        let relay = MemoryRelay::new();
        let net = FakeNet::new();
        let (a_conn, a_events) = net.connection(0);
        let (b_conn, b_events) = net.connection(1);
        let (a_sig, mut a_rx) = relay.connect();
        let (b_sig, mut b_rx) = relay.connect();
        let a_sig = DropsCandidates(a_sig);

        let a = tokio::spawn(async move {
            let link = Negotiator::new(a_conn, code(), Role::Initiator)
                .establish(&a_sig, &mut a_rx, a_events)
                .await;
            (link.map(|_| ()), a_sig, a_rx)
        });
        while relay.room_size(code().as_str()) == 0 {
            tokio::task::yield_now().await;
        }
        let b = tokio::spawn(async move {
            let link = Negotiator::new(b_conn, code(), Role::Responder)
                .establish(&b_sig, &mut b_rx, b_events)
                .await;
            (link.map(|_| ()), b_sig, b_rx)
        });

        let (a_result, _a_sig, _a_rx) = a.await.unwrap();
        let (b_result, _b_sig, _b_rx) = b.await.unwrap();
        a_result.unwrap();
        b_result.unwrap();
        assert!(net.candidates(1).is_empty(), "initiator candidates never arrived");
    }

    #[tokio::test]
    async fn malformed_candidate_is_logged_not_fatal() {
        let relay = MemoryRelay::new();
        let net = FakeNet::new();
        let (conn, events) = net.connection(0);
        let (sig, mut rx) = relay.connect();

        let negotiator = Negotiator::new(conn, code(), Role::Initiator);
        let state = negotiator.state();
        let task = tokio::spawn(async move {
            let _ = negotiator.establish(&sig, &mut rx, events).await;
        });
        while relay.room_size(code().as_str()) == 0 {
            tokio::task::yield_now().await;
        }

        let garbage = IceCandidate {
            candidate: "garbage".into(),
            ..Default::default()
        };
        relay
            .inject(
                code().as_str(),
                SignalMessage::signal(&code(), SignalData::Ice(garbage)),
            )
            .await;
        let good = IceCandidate {
            candidate: "candidate:9 1 udp 1 192.0.2.9 9 typ host".into(),
            ..Default::default()
        };
        relay
            .inject(
                code().as_str(),
                SignalMessage::signal(&code(), SignalData::Ice(good)),
            )
            .await;
        settle().await;

        assert!(!task.is_finished(), "negotiation keeps going");
        assert_eq!(*state.borrow(), NegotiationState::Joining);
        assert_eq!(net.candidates(0), vec!["candidate:9 1 udp 1 192.0.2.9 9 typ host"]);
        task.abort();
    }

    #[tokio::test]
    async fn malformed_description_keeps_state() {
        let relay = MemoryRelay::new();
        let net = FakeNet::new();
        let (conn, events) = net.connection(1);
        let (sig, mut rx) = relay.connect();

        let negotiator = Negotiator::new(conn, code(), Role::Responder);
        let state = negotiator.state();
        let task = tokio::spawn(async move {
            let _ = negotiator.establish(&sig, &mut rx, events).await;
        });
        while relay.room_size(code().as_str()) == 0 {
            tokio::task::yield_now().await;
        }

        relay
            .inject(
                code().as_str(),
                SignalMessage::signal(&code(), SignalData::Offer(SessionDescription::offer("garbage"))),
            )
            .await;
        settle().await;

        assert_eq!(*state.borrow(), NegotiationState::AwaitingOffer);
        assert!(!net.remote_set(1));
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test]
    async fn signals_for_another_room_are_ignored() {
        let relay = MemoryRelay::new();
        let net = FakeNet::new();
        let (conn, events) = net.connection(1);
        let (sig, mut rx) = relay.connect();

        let negotiator = Negotiator::new(conn, code(), Role::Responder);
        let task = tokio::spawn(async move {
            let _ = negotiator.establish(&sig, &mut rx, events).await;
        });
        while relay.room_size(code().as_str()) == 0 {
            tokio::task::yield_now().await;
        }

        let other = RoomCode::parse("999999").unwrap();
        relay
            .inject(
                code().as_str(),
                SignalMessage::signal(&other, SignalData::Offer(SessionDescription::offer("v=0"))),
            )
            .await;
        settle().await;

        assert!(!net.remote_set(1), "foreign offer must not be applied");
        task.abort();
    }

    #[tokio::test]
    async fn frames_before_open_are_queued_and_second_channel_ignored() {
        let relay = MemoryRelay::new();
        let net = FakeNet::new();
        let (conn, events) = net.connection(1);
        let (sig, mut rx) = relay.connect();

        let first = Arc::new(FakeChannel::default());
        net.emit(1, LinkEvent::RemoteChannel(Arc::clone(&first)));
        net.emit(1, LinkEvent::Frame(Frame::Text("early".into())));
        net.emit(1, LinkEvent::RemoteChannel(Arc::new(FakeChannel::default())));
        net.emit(1, LinkEvent::ChannelOpen);

        let mut link = Negotiator::new(conn, code(), Role::Responder)
            .establish(&sig, &mut rx, events)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(link.channel(), &first));
        assert_eq!(link.next_frame().await, Some(Frame::Text("early".into())));
    }

    #[tokio::test]
    async fn channel_closed_before_open_fails() {
        let relay = MemoryRelay::new();
        let net = FakeNet::new();
        let (conn, events) = net.connection(1);
        let (sig, mut rx) = relay.connect();
        net.emit(1, LinkEvent::ChannelClosed);

        let result = Negotiator::new(conn, code(), Role::Responder)
            .establish(&sig, &mut rx, events)
            .await;
        assert!(matches!(result, Err(PeerError::ChannelClosed)));
    }

    #[tokio::test]
    async fn signaling_disconnect_fails() {
        let relay = MemoryRelay::new();
        let net = FakeNet::new();
        let (conn, events) = net.connection(0);
        let (sig, mut rx) = relay.connect();
        let sig = Arc::new(sig);

        let closer = Arc::clone(&sig);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let result = Negotiator::new(conn, code(), Role::Initiator)
            .establish(&*sig, &mut rx, events)
            .await;
        assert!(matches!(result, Err(PeerError::SignalingClosed)));
    }
}
