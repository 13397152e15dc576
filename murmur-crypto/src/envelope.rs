use murmur_types::error::MurmurError;
use murmur_types::message::{ChatMessage, EnvelopeShape, MessageContent};

use crate::encryption;
use crate::identity::Identity;
use crate::keys;

/// Outcome of inspecting a received envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// No signature attached.
    Unsigned,
    /// Signature matches `pubkey`.
    Verified,
}

impl Provenance {
    /// Value for [`ChatMessage::verified`].
    pub fn as_verified(self) -> Option<bool> {
        match self {
            Provenance::Unsigned => None,
            Provenance::Verified => Some(true),
        }
    }
}

/// Recompute the signed payload and check it against `pubkey`.
///
/// Returns `false` for unsigned messages as well as for bad signatures.
pub fn verify(message: &ChatMessage) -> bool {
    matches!(inspect(message), Ok(Provenance::Verified))
}

/// Classify a received message.
///
/// Fails with [`MurmurError::EnvelopeInvalid`] when the signature fields are
/// half present and with [`MurmurError::InvalidSignature`] when a signature
/// does not verify.
pub fn inspect(message: &ChatMessage) -> Result<Provenance, MurmurError> {
    match message.envelope_shape()? {
        EnvelopeShape::Unsigned => Ok(Provenance::Unsigned),
        EnvelopeShape::Signed => {
            let (Some(signature), Some(pubkey)) = (&message.signature, &message.pubkey) else {
                return Err(MurmurError::EnvelopeInvalid {
                    reason: "signature fields vanished".to_string(),
                });
            };
            keys::verify(&message.signing_payload(), signature, pubkey)
                .map_err(|_| MurmurError::InvalidSignature)?;
            Ok(Provenance::Verified)
        }
    }
}

/// Build the addressed body of a private message.
pub fn address(text: &str, to: &str, recipient_key: &str) -> Result<MessageContent, MurmurError> {
    Ok(MessageContent::Addressed {
        to: to.to_string(),
        data: encryption::encrypt_for(text, recipient_key)?,
    })
}

/// Decrypt an encrypted message addressed to `nickname`.
///
/// Returns `Ok(None)` when the message is not for us, so relays can pass it
/// on untouched.
pub fn open_addressed(
    identity: &Identity,
    nickname: &str,
    message: &ChatMessage,
) -> Result<Option<String>, MurmurError> {
    if !message.encrypted {
        return Ok(None);
    }
    match &message.content {
        MessageContent::Addressed { to, data } if to == nickname => {
            identity.decrypt_with_local_key(data).map(Some)
        }
        _ => Ok(None),
    }
}
