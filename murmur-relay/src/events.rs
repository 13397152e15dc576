use murmur_types::message::ChatMessage;
use murmur_types::primitives::{Label, ProposalId};

/// Overlay progress worth showing to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Milestone {
    /// A connection proposal left this node.
    ProposalSent,
    /// This node answered someone else's proposal.
    ProposalAccepted,
    /// One of our proposals was answered.
    ProposalAnswered,
    /// A session opened.
    Connected { label: Label },
    /// A join offer was handed to the rendezvous.
    RendezvousOfferSent,
}

/// Events delivered to subscribers of a running node.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// A new chat message arrived. `text` holds the plaintext of a private
    /// message addressed to us, or the content of a public one.
    MessageIncoming {
        message: Box<ChatMessage>,
        text: Option<String>,
    },
    /// The last session closed.
    PeerConnectionsLost,
    Milestone(Milestone),
    /// Someone is calling and needs confirmation through
    /// `MeshHandle::confirm_calls_from`.
    IncomingCall { pseudo: String, call_id: ProposalId },
    /// Media channel of a call opened.
    CallConnected { pseudo: String, call_id: ProposalId },
}
