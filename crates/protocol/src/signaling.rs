//! Messages exchanged with the rendezvous relay.
//!
//! # Wire format
//!
//! Every message is a JSON text frame tagged by `type`:
//!
//! ```text
//! {"type":"join","code":"123456"}                      client -> relay
//! {"type":"peer-joined"}                               relay -> room member
//! {"type":"signal","code":"123456","data":{"offer":{"type":"offer","sdp":"..."}}}
//! {"type":"signal","code":"123456","data":{"answer":{...}}}
//! {"type":"signal","code":"123456","data":{"ice":{"candidate":"...","sdpMid":"0",...}}}
//! ```
//!
//! The relay forwards `signal` messages verbatim to the other member of the
//! room; it never interprets `data`.

use serde::{Deserialize, Serialize};

use crate::room::RoomCode;

/// A message sent to or received from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Joins the room identified by `code`.
    Join { code: String },
    /// Another member joined the room.
    PeerJoined,
    /// Opaque negotiation payload scoped to a room.
    Signal { code: String, data: SignalData },
}

impl SignalMessage {
    /// Builds a join request for `code`.
    pub fn join(code: &RoomCode) -> Self {
        Self::Join {
            code: code.to_string(),
        }
    }

    /// Wraps a negotiation payload for `code`.
    pub fn signal(code: &RoomCode, data: SignalData) -> Self {
        Self::Signal {
            code: code.to_string(),
            data,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Join { .. } => "join",
            SignalMessage::PeerJoined => "peer-joined",
            SignalMessage::Signal { data, .. } => data.kind(),
        }
    }

    /// Serializes to the JSON text frame sent over the socket.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Negotiation payload carried by a `signal` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalData {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Ice(IceCandidate),
}

impl SignalData {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalData::Offer(_) => "offer",
            SignalData::Answer(_) => "answer",
            SignalData::Ice(_) => "ice",
        }
    }
}

/// Kind of session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// A session description (`{type, sdp}`), as produced by the peer stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate in its JSON init form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}
