use std::time::{SystemTime, UNIX_EPOCH};

/// Chat message identifier.
pub type MessageId = uuid::Uuid;

/// Per-process peer identifier, regenerated on every start.
pub type PeerId = uuid::Uuid;

/// Identifier of a connection proposal or call proposal.
pub type ProposalId = u64;

/// Label of a session channel. Both ends of a channel share the same label.
pub type Label = String;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}
