use murmur_storage::error::StorageError;
use murmur_types::error::MurmurError;
use murmur_types::primitives::PeerId;
use thiserror::Error;

/// Errors that can occur in the relay layer.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Offer/answer negotiation or a send on a channel failed.
    #[error("transport failure: {reason}")]
    TransportFailure { reason: String },

    /// A proposal, pull or call outlived its deadline.
    #[error("protocol timeout: {reason}")]
    ProtocolTimeout { reason: String },

    /// A bounded table is full.
    #[error("capacity exceeded: limit {limit}")]
    CapacityExceeded { limit: usize },

    /// Failed to encode or decode a frame.
    #[error("codec error: {reason}")]
    CodecError { reason: String },

    /// Frame exceeds maximum allowed size.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("no session with label {label}")]
    SessionNotFound { label: String },

    #[error("already connected to peer {peer}")]
    DuplicatePeer { peer: PeerId },

    /// No encryption key is known for this nickname.
    #[error("unknown recipient: {nickname}")]
    UnknownRecipient { nickname: String },

    #[error("unknown contact: {fingerprint}")]
    UnknownContact { fingerprint: String },

    /// Internal channel send/receive error.
    #[error("channel error: {reason}")]
    ChannelError { reason: String },

    #[error(transparent)]
    Crypto(#[from] MurmurError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
