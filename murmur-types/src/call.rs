use serde::{Deserialize, Serialize};

use crate::primitives::{PeerId, ProposalId};
use crate::proposal::SessionDescription;

/// A session description in the clear, or sealed to the peer's encryption key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallPayload {
    Clear(SessionDescription),
    Sealed(String),
}

/// An audio call offer flooded through the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallProposal {
    pub id: ProposalId,
    /// Target nickname. `None` lets any peer answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub peer_id: PeerId,
    /// Caller's nickname.
    pub pseudo: String,
    pub offer: CallPayload,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub encrypted: bool,
    /// Caller's encryption key, used to seal the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl CallProposal {
    /// Whether this node should act on the call rather than only relay it.
    pub fn is_for(&self, nickname: &str) -> bool {
        self.to.as_deref().map_or(true, |to| to == nickname)
    }
}

/// Answer to a call, routed back by proposal id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAcceptance {
    pub id: ProposalId,
    /// Nickname of the answering peer.
    pub pseudo: String,
    pub answer: CallPayload,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub encrypted: bool,
}
