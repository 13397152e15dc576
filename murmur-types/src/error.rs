use thiserror::Error;

/// Errors raised by the identity, envelope and wire layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MurmurError {
    // ─── Crypto Errors ───────────────────────────────────────────────────────
    #[error("invalid key material: {reason}")]
    InvalidKeyMaterial { reason: String },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    // ─── Envelope Errors ─────────────────────────────────────────────────────
    #[error("malformed envelope: {reason}")]
    EnvelopeInvalid { reason: String },

    // ─── Storage Errors ──────────────────────────────────────────────────────
    #[error("stored key material is corrupt: {reason}")]
    StorageCorrupt { reason: String },

    #[error("key storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    // ─── Serialization Errors ────────────────────────────────────────────────
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    #[error("deserialization error: {reason}")]
    DeserializationError { reason: String },

    // ─── Network Errors ──────────────────────────────────────────────────────
    #[error("message too large: {size} > {max_size}")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("invalid message format: {reason}")]
    InvalidMessageFormat { reason: String },
}
