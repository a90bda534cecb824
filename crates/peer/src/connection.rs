//! The peer-connection seam.
//!
//! Stack callbacks never touch negotiation state directly: they only push
//! [`LinkEvent`]s into an unbounded channel that the negotiator (and later
//! the [`PeerLink`](crate::PeerLink)) drains on its own task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use codedrop_protocol::{IceCandidate, SessionDescription};
use codedrop_transfer::{DataChannel, Frame};
use tokio::sync::mpsc;

use crate::PeerError;

/// A boxed future returned by connection operations.
pub type PeerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PeerError>> + Send + 'a>>;

/// Stream of events produced by a connection and its data channel.
pub type LinkEvents<C> = mpsc::UnboundedReceiver<LinkEvent<C>>;

/// Something the connection stack reported.
#[derive(Debug)]
pub enum LinkEvent<C> {
    /// A local ICE candidate was gathered and should be relayed.
    LocalCandidate(IceCandidate),
    /// The remote peer opened a data channel towards us.
    RemoteChannel(Arc<C>),
    /// The data channel became writable.
    ChannelOpen,
    /// A message arrived on the data channel.
    Frame(Frame),
    /// The data channel reported an error.
    ChannelError(String),
    /// The data channel closed.
    ChannelClosed,
    /// Overall connection state changed (informational).
    StateChanged(String),
}

/// Operations the negotiator needs from a peer-connection stack.
pub trait PeerConnection: Send + Sync {
    type Channel: DataChannel + 'static;

    /// Creates an ordered, reliable data channel. Its events are reported
    /// on the connection's event stream.
    fn create_data_channel<'a>(&'a self, label: &'a str) -> PeerFuture<'a, Arc<Self::Channel>>;

    fn create_offer(&self) -> PeerFuture<'_, SessionDescription>;

    fn create_answer(&self) -> PeerFuture<'_, SessionDescription>;

    fn set_local_description(&self, desc: SessionDescription) -> PeerFuture<'_, ()>;

    fn set_remote_description(&self, desc: SessionDescription) -> PeerFuture<'_, ()>;

    /// Adds a remote candidate. Candidates received before the remote
    /// description are held back and applied in order once it is set.
    fn add_ice_candidate(&self, candidate: IceCandidate) -> PeerFuture<'_, ()>;

    fn close(&self) -> PeerFuture<'_, ()>;
}
