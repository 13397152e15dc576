use serde::{Deserialize, Serialize};

use crate::primitives::{Label, PeerId, ProposalId, Timestamp};

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Transport negotiation blob, opaque to the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A flooded request to open a session with an indirectly reachable peer.
///
/// `channel_path` is a stack of session labels: every node that puts the
/// proposal on a session pushes that session's label, so popping walks the
/// route back to the originator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProposal {
    pub id: ProposalId,
    /// Originator's peer id on the way out, accepter's on the way back.
    pub peer_id: PeerId,
    pub channel_path: Vec<Label>,
    pub ttl: u32,
    pub expires_at: Timestamp,
    pub content: SessionDescription,
}

impl ConnectionProposal {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    /// Whether the proposal travelled at least one hop beyond a direct neighbor.
    pub fn is_indirect(&self) -> bool {
        self.channel_path.len() > 1
    }

    /// Spend one hop. Returns `false` once the budget is exhausted.
    pub fn consume_hop(&mut self) -> bool {
        self.ttl = self.ttl.saturating_sub(1);
        self.ttl > 0
    }

    /// Record the session the proposal is about to be sent on.
    pub fn push_hop(&mut self, label: Label) {
        self.channel_path.push(label);
    }

    /// Pop the next hop of the reverse route, if any is left.
    pub fn pop_hop(&mut self) -> Option<Label> {
        self.channel_path.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(path: &[&str], ttl: u32) -> ConnectionProposal {
        ConnectionProposal {
            id: 7,
            peer_id: uuid::Uuid::nil(),
            channel_path: path.iter().map(|s| s.to_string()).collect(),
            ttl,
            expires_at: 1_000,
            content: SessionDescription::offer("v=0"),
        }
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(proposal(&["a"], 3)).unwrap();
        assert_eq!(json["channelPath"][0], "a");
        assert_eq!(json["expiresAt"], 1_000);
        assert_eq!(json["content"]["type"], "offer");
        assert!(json.get("peerId").is_some());
    }

    #[test]
    fn test_direct_neighbor_is_not_indirect() {
        assert!(!proposal(&[], 3).is_indirect());
        assert!(!proposal(&["a"], 3).is_indirect());
        assert!(proposal(&["a", "b"], 3).is_indirect());
    }

    #[test]
    fn test_consume_hop_terminates() {
        let mut p = proposal(&["a"], 2);
        assert!(p.consume_hop());
        assert_eq!(p.ttl, 1);
        assert!(!p.consume_hop());
        assert_eq!(p.ttl, 0);
        assert!(!p.consume_hop());
        assert_eq!(p.ttl, 0);
    }

    #[test]
    fn test_pop_on_empty_path() {
        let mut p = proposal(&["a"], 2);
        assert_eq!(p.pop_hop().as_deref(), Some("a"));
        assert_eq!(p.pop_hop(), None);
    }

    #[test]
    fn test_expiry_boundary() {
        let p = proposal(&[], 1);
        assert!(!p.is_expired(999));
        assert!(p.is_expired(1_000));
    }
}
