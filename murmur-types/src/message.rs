use serde::{Deserialize, Serialize};

use crate::error::MurmurError;
use crate::primitives::{MessageId, Timestamp};

/// Body of a chat message: plain text, or ciphertext addressed to a nickname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Addressed { to: String, data: String },
}

impl MessageContent {
    /// The text covered by the signature: the plain text, or the ciphertext.
    pub fn signed_text(&self) -> &str {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Addressed { data, .. } => data,
        }
    }

    /// Recipient nickname of an addressed message.
    pub fn recipient(&self) -> Option<&str> {
        match self {
            MessageContent::Text(_) => None,
            MessageContent::Addressed { to, .. } => Some(to),
        }
    }
}

/// A chat message as disseminated through the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub timestamp: Timestamp,
    pub content: MessageContent,
    pub nickname: String,
    /// Base64 ECDSA P-384 signature over [`ChatMessage::signing_payload`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Base64 SPKI of the signing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    /// Base64 SPKI of the sender's encryption key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub encrypted: bool,
    /// Outcome of signature verification on receipt. `None` for unsigned messages.
    #[serde(skip)]
    pub verified: Option<bool>,
    /// Set when the nickname collides with a registered contact under another key.
    #[serde(skip)]
    pub warn_contact: bool,
}

/// Whether a message carries a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeShape {
    Unsigned,
    Signed,
}

impl ChatMessage {
    /// Build an unsigned plain-text message.
    pub fn new(
        id: MessageId,
        timestamp: Timestamp,
        content: MessageContent,
        nickname: impl Into<String>,
    ) -> Self {
        Self {
            id,
            timestamp,
            content,
            nickname: nickname.into(),
            signature: None,
            pubkey: None,
            crypto_key: None,
            encrypted: false,
            verified: None,
            warn_contact: false,
        }
    }

    /// Bytes covered by the signature: `id || content || timestamp || nickname`.
    pub fn signing_payload(&self) -> Vec<u8> {
        signing_payload(
            &self.id.to_string(),
            self.content.signed_text(),
            self.timestamp,
            &self.nickname,
        )
    }

    /// Check the structural envelope invariants.
    ///
    /// `signature` and `pubkey` must be both present or both absent, and an
    /// encrypted message must carry addressed content.
    pub fn envelope_shape(&self) -> Result<EnvelopeShape, MurmurError> {
        if self.encrypted && self.content.recipient().is_none() {
            return Err(MurmurError::EnvelopeInvalid {
                reason: "encrypted message without an addressed body".to_string(),
            });
        }
        match (&self.signature, &self.pubkey) {
            (Some(_), Some(_)) => Ok(EnvelopeShape::Signed),
            (None, None) => Ok(EnvelopeShape::Unsigned),
            _ => Err(MurmurError::EnvelopeInvalid {
                reason: "signature and pubkey must be present together".to_string(),
            }),
        }
    }
}

/// Concatenate the four signed fields.
pub fn signing_payload(id: &str, content: &str, timestamp: Timestamp, nickname: &str) -> Vec<u8> {
    format!("{id}{content}{timestamp}{nickname}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChatMessage {
        ChatMessage::new(
            uuid::Uuid::nil(),
            1_700_000_000_000,
            MessageContent::Text("hello".to_string()),
            "alice",
        )
    }

    #[test]
    fn test_plain_message_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["content"], "hello");
        assert_eq!(json["nickname"], "alice");
        assert!(json.get("signature").is_none());
        assert!(json.get("encrypted").is_none());
        assert!(json.get("verified").is_none());
    }

    #[test]
    fn test_addressed_content_parses() {
        let json = r#"{"id":"00000000-0000-0000-0000-000000000000","timestamp":5,
            "content":{"to":"bob","data":"Y2lwaGVy"},"nickname":"alice","encrypted":true}"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.content.recipient(), Some("bob"));
        assert_eq!(msg.content.signed_text(), "Y2lwaGVy");
        assert!(msg.encrypted);
        assert_eq!(msg.envelope_shape().unwrap(), EnvelopeShape::Unsigned);
    }

    #[test]
    fn test_crypto_key_uses_camel_case() {
        let mut msg = sample();
        msg.crypto_key = Some("key".to_string());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["cryptoKey"], "key");
    }

    #[test]
    fn test_signing_payload_concatenates_fields() {
        let msg = sample();
        let expected = format!("{}hello1700000000000alice", uuid::Uuid::nil());
        assert_eq!(msg.signing_payload(), expected.into_bytes());
    }

    #[test]
    fn test_half_signed_envelope_is_invalid() {
        let mut msg = sample();
        msg.signature = Some("sig".to_string());
        assert!(matches!(
            msg.envelope_shape(),
            Err(MurmurError::EnvelopeInvalid { .. })
        ));
        msg.signature = None;
        msg.pubkey = Some("pk".to_string());
        assert!(msg.envelope_shape().is_err());
    }

    #[test]
    fn test_encrypted_text_body_is_invalid() {
        let mut msg = sample();
        msg.encrypted = true;
        assert!(msg.envelope_shape().is_err());
    }
}
