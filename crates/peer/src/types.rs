use std::fmt;

/// Which side of the exchange this peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the room and the data channel, sends the offer. The sender.
    Initiator,
    /// Joins an existing room and answers. The receiver.
    Responder,
}

/// Progress of connection negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    Idle,
    Joining,
    OfferSent,
    AwaitingOffer,
    AnswerExchanged,
    IceExchanging,
    ChannelOpen,
    Closed,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}
