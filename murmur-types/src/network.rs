use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::call::{CallAcceptance, CallProposal};
use crate::error::MurmurError;
use crate::message::ChatMessage;
use crate::primitives::MessageId;
use crate::proposal::ConnectionProposal;

// ─── Route Numbers ───────────────────────────────────────────────────────────

pub const PATH_ID_ANNOUNCE: u8 = 0;
pub const PATH_PULL_REQUEST: u8 = 1;
pub const PATH_PULL_RESPONSE: u8 = 2;
pub const PATH_CONNECTION_PROPOSAL: u8 = 3;
pub const PATH_PROPOSAL_ACCEPTED: u8 = 4;
pub const PATH_CALL_PROPOSAL: u8 = 5;
pub const PATH_CALL_ACCEPTED: u8 = 6;

/// Everything a session channel carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// "I hold a message with this id."
    IdAnnounce(MessageId),
    /// "Send me the body of this id."
    PullRequest(MessageId),
    PullResponse(Box<ChatMessage>),
    ConnectionProposal(ConnectionProposal),
    ProposalAccepted(ConnectionProposal),
    CallProposal(CallProposal),
    CallAccepted(CallAcceptance),
}

/// On-channel JSON framing: `{"path": <route>, "args": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub path: u8,
    pub args: Value,
}

impl WireMessage {
    /// Route number of this message.
    pub fn path(&self) -> u8 {
        match self {
            WireMessage::IdAnnounce(_) => PATH_ID_ANNOUNCE,
            WireMessage::PullRequest(_) => PATH_PULL_REQUEST,
            WireMessage::PullResponse(_) => PATH_PULL_RESPONSE,
            WireMessage::ConnectionProposal(_) => PATH_CONNECTION_PROPOSAL,
            WireMessage::ProposalAccepted(_) => PATH_PROPOSAL_ACCEPTED,
            WireMessage::CallProposal(_) => PATH_CALL_PROPOSAL,
            WireMessage::CallAccepted(_) => PATH_CALL_ACCEPTED,
        }
    }

    pub fn into_frame(self) -> Result<Frame, MurmurError> {
        let path = self.path();
        let args = match self {
            WireMessage::IdAnnounce(id) | WireMessage::PullRequest(id) => to_value(&id),
            WireMessage::PullResponse(msg) => to_value(&msg),
            WireMessage::ConnectionProposal(p) | WireMessage::ProposalAccepted(p) => to_value(&p),
            WireMessage::CallProposal(call) => to_value(&call),
            WireMessage::CallAccepted(acceptance) => to_value(&acceptance),
        }?;
        Ok(Frame { path, args })
    }

    pub fn from_frame(frame: Frame) -> Result<Self, MurmurError> {
        let Frame { path, args } = frame;
        match path {
            PATH_ID_ANNOUNCE => from_value(args).map(WireMessage::IdAnnounce),
            PATH_PULL_REQUEST => from_value(args).map(WireMessage::PullRequest),
            PATH_PULL_RESPONSE => from_value(args).map(|m| WireMessage::PullResponse(Box::new(m))),
            PATH_CONNECTION_PROPOSAL => from_value(args).map(WireMessage::ConnectionProposal),
            PATH_PROPOSAL_ACCEPTED => from_value(args).map(WireMessage::ProposalAccepted),
            PATH_CALL_PROPOSAL => from_value(args).map(WireMessage::CallProposal),
            PATH_CALL_ACCEPTED => from_value(args).map(WireMessage::CallAccepted),
            other => Err(MurmurError::InvalidMessageFormat {
                reason: format!("unknown path {other}"),
            }),
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, MurmurError> {
    serde_json::to_value(value).map_err(|e| MurmurError::SerializationError {
        reason: e.to_string(),
    })
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, MurmurError> {
    serde_json::from_value(value).map_err(|e| MurmurError::DeserializationError {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageContent;
    use crate::proposal::SessionDescription;

    #[test]
    fn test_announce_frame_shape() {
        let id = uuid::Uuid::new_v4();
        let frame = WireMessage::IdAnnounce(id).into_frame().unwrap();
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["path"], 0);
        assert_eq!(json["args"], id.to_string());
    }

    #[test]
    fn test_paths_are_distinct() {
        let proposal = ConnectionProposal {
            id: 1,
            peer_id: uuid::Uuid::nil(),
            channel_path: vec!["a".into()],
            ttl: 3,
            expires_at: 10,
            content: SessionDescription::offer("x"),
        };
        let msg = ChatMessage::new(uuid::Uuid::nil(), 1, MessageContent::Text("t".into()), "n");
        let all = [
            WireMessage::IdAnnounce(uuid::Uuid::nil()),
            WireMessage::PullRequest(uuid::Uuid::nil()),
            WireMessage::PullResponse(Box::new(msg)),
            WireMessage::ConnectionProposal(proposal.clone()),
            WireMessage::ProposalAccepted(proposal),
        ];
        let paths: Vec<u8> = all.iter().map(WireMessage::path).collect();
        assert_eq!(paths, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_proposal_and_acceptance_decode_by_path() {
        let proposal = ConnectionProposal {
            id: 9,
            peer_id: uuid::Uuid::nil(),
            channel_path: vec!["a".into(), "b".into()],
            ttl: 3,
            expires_at: 10,
            content: SessionDescription::answer("y"),
        };
        let frame = WireMessage::ProposalAccepted(proposal.clone())
            .into_frame()
            .unwrap();
        assert_eq!(
            WireMessage::from_frame(frame).unwrap(),
            WireMessage::ProposalAccepted(proposal)
        );
    }

    #[test]
    fn test_unknown_path_rejected() {
        let frame = Frame {
            path: 42,
            args: Value::Null,
        };
        assert!(matches!(
            WireMessage::from_frame(frame),
            Err(MurmurError::InvalidMessageFormat { .. })
        ));
    }

    #[test]
    fn test_bad_args_rejected() {
        let frame = Frame {
            path: PATH_PULL_REQUEST,
            args: Value::from(17),
        };
        assert!(matches!(
            WireMessage::from_frame(frame),
            Err(MurmurError::DeserializationError { .. })
        ));
    }
}
