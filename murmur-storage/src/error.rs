use murmur_types::error::MurmurError;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write error: {reason}")]
    WriteError { reason: String },

    #[error("Read error: {reason}")]
    ReadError { reason: String },

    #[error("SQLite error: {reason}")]
    SqliteError { reason: String },

    #[error("Serialization error: {reason}")]
    SerializationError { reason: String },

    #[error("Deserialization error: {reason}")]
    DeserializationError { reason: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::SqliteError {
            reason: err.to_string(),
        }
    }
}

impl From<StorageError> for MurmurError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DeserializationError { reason } => MurmurError::StorageCorrupt { reason },
            other => MurmurError::StorageUnavailable {
                reason: other.to_string(),
            },
        }
    }
}
