//! [`PeerConnection`] backed by the `webrtc` crate.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use codedrop_protocol::constants::{BACKPRESSURE_POLL_INTERVAL, CHUNK_SIZE, MAX_BUFFERED_AMOUNT};
use codedrop_protocol::{IceCandidate, SdpType, SessionDescription};
use codedrop_transfer::{ChannelFuture, DataChannel, Frame, TransferError};
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data::data_channel::DataChannel as DetachedChannel;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::PeerError;
use crate::connection::{LinkEvent, LinkEvents, PeerConnection, PeerFuture};

type EventTx = mpsc::UnboundedSender<LinkEvent<RtcDataChannel>>;

/// Largest message the channel reader accepts.
///
/// The stack's built-in reader stops at 65535 bytes, one short of a full
/// chunk, so channels are detached and read with this buffer instead.
const READ_BUFFER_SIZE: usize = 4 * CHUNK_SIZE;

#[derive(Default)]
struct CandidateQueue {
    remote_set: bool,
    pending: Vec<RTCIceCandidateInit>,
}

/// A WebRTC peer connection.
pub struct RtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    events: EventTx,
    candidates: Mutex<CandidateQueue>,
    has_channel: Arc<AtomicBool>,
}

impl RtcPeerConnection {
    /// Creates a connection using the given STUN/TURN URLs.
    pub async fn new(
        ice_servers: &[String],
    ) -> Result<(Self, LinkEvents<RtcDataChannel>), PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let mut settings = SettingEngine::default();
        settings.detach_data_channels();

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(settings)
            .build();

        let mut config = RTCConfiguration::default();
        if !ice_servers.is_empty() {
            config.ice_servers = vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }];
        }
        let pc = Arc::new(api.new_peer_connection(config).await?);

        let (events, rx) = mpsc::unbounded_channel();
        let has_channel = Arc::new(AtomicBool::new(false));

        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(LinkEvent::LocalCandidate(from_rtc_candidate(init)));
                    }
                    Err(e) => warn!(error = %e, "failed to serialize local candidate"),
                }
            })
        }));

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                info!(%state, "peer connection state");
                let _ = tx.send(LinkEvent::StateChanged(state.to_string()));
            })
        }));

        let tx = events.clone();
        let claimed = Arc::clone(&has_channel);
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = tx.clone();
            let claimed = Arc::clone(&claimed);
            Box::pin(async move {
                if claimed.swap(true, Ordering::SeqCst) {
                    warn!(label = dc.label(), "ignoring additional remote data channel");
                    return;
                }
                debug!(label = dc.label(), "remote data channel");
                let channel = Arc::new(RtcDataChannel::new(dc));
                let _ = tx.send(LinkEvent::RemoteChannel(Arc::clone(&channel)));
                channel.attach(tx).await;
            })
        }));

        let conn = Self {
            pc,
            events,
            candidates: Mutex::new(CandidateQueue::default()),
            has_channel,
        };
        Ok((conn, rx))
    }

    async fn flush_candidates(&self) {
        let pending = {
            let mut queue = self.candidates.lock().await;
            queue.remote_set = true;
            std::mem::take(&mut queue.pending)
        };
        for candidate in pending {
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!(error = %e, "failed to apply buffered candidate");
            }
        }
    }
}

impl PeerConnection for RtcPeerConnection {
    type Channel = RtcDataChannel;

    fn create_data_channel<'a>(&'a self, label: &'a str) -> PeerFuture<'a, Arc<RtcDataChannel>> {
        Box::pin(async move {
            let init = RTCDataChannelInit {
                ordered: Some(true),
                ..Default::default()
            };
            let dc = self.pc.create_data_channel(label, Some(init)).await?;
            self.has_channel.store(true, Ordering::SeqCst);
            let channel = Arc::new(RtcDataChannel::new(dc));
            channel.attach(self.events.clone()).await;
            Ok(channel)
        })
    }

    fn create_offer(&self) -> PeerFuture<'_, SessionDescription> {
        Box::pin(async move { from_rtc_description(self.pc.create_offer(None).await?) })
    }

    fn create_answer(&self) -> PeerFuture<'_, SessionDescription> {
        Box::pin(async move { from_rtc_description(self.pc.create_answer(None).await?) })
    }

    fn set_local_description(&self, desc: SessionDescription) -> PeerFuture<'_, ()> {
        Box::pin(async move {
            self.pc.set_local_description(to_rtc_description(desc)?).await?;
            Ok(())
        })
    }

    fn set_remote_description(&self, desc: SessionDescription) -> PeerFuture<'_, ()> {
        Box::pin(async move {
            self.pc.set_remote_description(to_rtc_description(desc)?).await?;
            self.flush_candidates().await;
            Ok(())
        })
    }

    fn add_ice_candidate(&self, candidate: IceCandidate) -> PeerFuture<'_, ()> {
        Box::pin(async move {
            let init = to_rtc_candidate(candidate);
            {
                let mut queue = self.candidates.lock().await;
                if !queue.remote_set {
                    debug!("buffering candidate until remote description is set");
                    queue.pending.push(init);
                    return Ok(());
                }
            }
            self.pc.add_ice_candidate(init).await?;
            Ok(())
        })
    }

    fn close(&self) -> PeerFuture<'_, ()> {
        Box::pin(async move {
            self.pc.close().await?;
            Ok(())
        })
    }
}

/// A WebRTC data channel.
///
/// Backpressure waits on the stack's "buffered amount low" event, with the
/// regular poll interval as a fallback tick. Incoming messages are read
/// from the detached channel by [`read_loop`].
pub struct RtcDataChannel {
    dc: Arc<RTCDataChannel>,
    low: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl RtcDataChannel {
    fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self {
            dc,
            low: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn attach(&self, events: EventTx) {
        let dc: Weak<RTCDataChannel> = Arc::downgrade(&self.dc);
        let closed = Arc::clone(&self.closed);
        self.dc.on_open(Box::new(move || {
            Box::pin(async move {
                let Some(dc) = dc.upgrade() else { return };
                match dc.detach().await {
                    Ok(raw) => {
                        debug!(label = dc.label(), "data channel open");
                        let _ = events.send(LinkEvent::ChannelOpen);
                        tokio::spawn(read_loop(raw, events, closed));
                    }
                    Err(e) => {
                        warn!(label = dc.label(), error = %e, "cannot detach data channel");
                        closed.store(true, Ordering::SeqCst);
                        let _ = events.send(LinkEvent::ChannelError(e.to_string()));
                        let _ = events.send(LinkEvent::ChannelClosed);
                    }
                }
            })
        }));

        self.dc
            .set_buffered_amount_low_threshold(MAX_BUFFERED_AMOUNT)
            .await;
        let low = Arc::clone(&self.low);
        self.dc
            .on_buffered_amount_low(Box::new(move || {
                let low = Arc::clone(&low);
                Box::pin(async move {
                    low.notify_waiters();
                })
            }))
            .await;
    }

    fn map_send_error(&self, e: webrtc::Error) -> TransferError {
        if self.is_open() {
            TransferError::Channel(e.to_string())
        } else {
            TransferError::ChannelClosed
        }
    }
}

impl DataChannel for RtcDataChannel {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn buffered_amount(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(self.dc.buffered_amount())
    }

    fn send_text(&self, text: String) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            self.dc
                .send_text(text)
                .await
                .map(|_| ())
                .map_err(|e| self.map_send_error(e))
        })
    }

    fn send_binary(&self, data: Bytes) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            self.dc
                .send(&data)
                .await
                .map(|_| ())
                .map_err(|e| self.map_send_error(e))
        })
    }

    fn wait_buffered_below(&self, threshold: usize) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            loop {
                if !self.is_open() {
                    return Err(TransferError::ChannelClosed);
                }
                if self.dc.buffered_amount().await <= threshold {
                    return Ok(());
                }
                tokio::select! {
                    _ = self.low.notified() => {}
                    _ = tokio::time::sleep(BACKPRESSURE_POLL_INTERVAL) => {}
                }
            }
        })
    }
}

/// Forwards messages from a detached channel until it ends, then marks
/// the channel closed.
async fn read_loop(raw: Arc<DetachedChannel>, events: EventTx, closed: Arc<AtomicBool>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        // A zero-length read is the remote resetting the stream; transfers
        // never send empty messages.
        let (n, is_string) = match raw.read_data_channel(&mut buf).await {
            Ok((0, _)) => break,
            Ok(read) => read,
            Err(e) => {
                debug!(error = %e, "data channel read ended");
                break;
            }
        };
        if events.send(message_event(&buf[..n], is_string)).is_err() {
            break;
        }
    }
    closed.store(true, Ordering::SeqCst);
    let _ = events.send(LinkEvent::ChannelClosed);
}

fn message_event(data: &[u8], is_string: bool) -> LinkEvent<RtcDataChannel> {
    if !is_string {
        return LinkEvent::Frame(Frame::Binary(Bytes::copy_from_slice(data)));
    }
    match std::str::from_utf8(data) {
        Ok(text) => LinkEvent::Frame(Frame::Text(text.to_owned())),
        Err(e) => LinkEvent::ChannelError(format!("non UTF-8 text frame: {e}")),
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, PeerError> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Rollback => {
            return Err(PeerError::Negotiation("rollback is not supported".into()));
        }
    };
    Ok(rtc)
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescription, PeerError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(PeerError::Negotiation("unspecified description type".into()));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

fn to_rtc_candidate(c: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: c.candidate,
        sdp_mid: c.sdp_mid,
        sdp_mline_index: c.sdp_mline_index,
        username_fragment: c.username_fragment,
    }
}

fn from_rtc_candidate(c: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: c.candidate,
        sdp_mid: c.sdp_mid,
        sdp_mline_index: c.sdp_mline_index,
        username_fragment: c.username_fragment,
    }
}
