use murmur_types::constants::MAX_MESSAGE_SIZE;
use murmur_types::network::{Frame, WireMessage};

use crate::error::RelayError;

/// Encode a wire message as the JSON text sent on a session channel.
///
/// Wire format: `{"path": <route>, "args": <payload>}`
pub fn encode_message(msg: WireMessage) -> Result<String, RelayError> {
    let frame = msg.into_frame().map_err(|e| RelayError::CodecError {
        reason: e.to_string(),
    })?;
    let text = serde_json::to_string(&frame).map_err(|e| RelayError::CodecError {
        reason: e.to_string(),
    })?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(RelayError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(text)
}

/// Decode a frame received on a session channel.
pub fn decode_message(data: &str) -> Result<WireMessage, RelayError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(RelayError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let frame: Frame = serde_json::from_str(data).map_err(|e| RelayError::CodecError {
        reason: e.to_string(),
    })?;
    WireMessage::from_frame(frame).map_err(|e| RelayError::CodecError {
        reason: e.to_string(),
    })
}
