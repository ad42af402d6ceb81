//! Error taxonomy for the Vigil core.

use vigil_store::StoreError;

/// Vigil core errors.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    /// Storage-layer failure, surfaced as-is.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The scan queue buffer is saturated. The caller keeps ownership of
    /// the upload and is responsible for removing it.
    #[error("scan queue is full")]
    QueueFull,

    /// The scan queue has been shut down.
    #[error("scan queue is closed")]
    QueueClosed,

    /// Circuit breaker is open; the protected call was not attempted.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The operation was cancelled while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// An updater failed beyond its retry budget or at registration.
    #[error("updater '{name}': {reason}")]
    Update { name: String, reason: String },

    /// No updater registered under this name.
    #[error("unknown updater: {0}")]
    UnknownUpdater(String),

    /// No health probe registered under this name.
    #[error("unknown health probe: {0}")]
    UnknownProbe(String),

    /// A download could not be completed from any mirror.
    #[error("download failed: {0}")]
    Download(String),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl VigilError {
    pub(crate) fn update(name: impl Into<String>, reason: impl Into<String>) -> Self {
        VigilError::Update {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for Vigil core operations.
pub type Result<T> = std::result::Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(VigilError::QueueFull.to_string(), "scan queue is full");
        assert_eq!(
            VigilError::CircuitOpen.to_string(),
            "circuit breaker is open"
        );

        let err = VigilError::update("clamav-mirror", "all mirrors unreachable");
        assert!(err.to_string().contains("clamav-mirror"));
        assert!(err.to_string().contains("all mirrors unreachable"));
    }

    #[test]
    fn test_store_error_passthrough() {
        let store_err = StoreError::Backend("boom".to_string());
        let err: VigilError = store_err.into();
        assert!(err.to_string().contains("boom"));
    }
}
