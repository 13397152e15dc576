use murmur_relay::error::RelayError;
use murmur_storage::error::StorageError;
use murmur_types::error::MurmurError;
use thiserror::Error;

/// Errors that can occur in the murmur binary.
#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum NodeError {
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    #[error("identity error: {0}")]
    IdentityError(#[from] MurmurError),

    #[error("storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("relay error: {0}")]
    RelayError(#[from] RelayError),

    #[error("simulation error: {reason}")]
    SimulationError { reason: String },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = NodeError::ConfigError {
            reason: "missing field".to_string(),
        };
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn test_relay_error_from() {
        let err: NodeError = RelayError::UnknownRecipient {
            nickname: "bob".to_string(),
        }
        .into();
        assert!(matches!(err, NodeError::RelayError(_)));
        assert!(err.to_string().contains("bob"));
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let node_err: NodeError = io_err.into();
        assert!(matches!(node_err, NodeError::IoError(_)));
    }
}
