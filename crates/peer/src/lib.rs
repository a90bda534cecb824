//! Peer-to-peer connection establishment and transfer sessions.
//!
//! A [`Session`] joins a room on the signaling relay, runs the
//! [`Negotiator`] state machine over a [`PeerConnection`] until one data
//! channel is open, and hands back a [`PeerLink`] that carries a single
//! file in either direction. The production connection is
//! [`RtcPeerConnection`].

mod connection;
mod error;
mod link;
mod negotiator;
mod rtc;
mod session;
#[cfg(test)]
mod testing;
mod types;
mod watchdog;

pub use connection::{LinkEvent, LinkEvents, PeerConnection, PeerFuture};
pub use error::PeerError;
pub use link::PeerLink;
pub use negotiator::{Negotiator, ReadyCallback};
pub use rtc::{RtcDataChannel, RtcPeerConnection};
pub use session::Session;
pub use types::{NegotiationState, Role};
pub use watchdog::{Activity, Watchdog};
