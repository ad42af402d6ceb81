//! Error types for the Vigil storage layer.

use thiserror::Error;

/// Errors raised by the storage layer and the domain records it owns.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database connection error
    #[error("database connection failed: {0}")]
    Connection(String),

    /// Backend query error
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Hash string failed validation
    #[error("invalid hash '{value}': {reason}")]
    InvalidHash { value: String, reason: String },

    /// Signature record failed validation (e.g. missing sha256)
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Job not found
    #[error("job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Job is not in a valid state for the requested transition
    #[error("job {id} is {status}, expected {expected}")]
    InvalidJobState {
        id: uuid::Uuid,
        status: String,
        expected: String,
    },

    /// A caller-supplied visitor aborted an iteration
    #[error("iteration aborted: {0}")]
    Aborted(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::InvalidHash {
            value: "xyz".to_string(),
            reason: "not hex".to_string(),
        };
        assert!(err.to_string().contains("xyz"));
        assert!(err.to_string().contains("not hex"));

        let id = uuid::Uuid::new_v4();
        let err = StoreError::JobNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_invalid_job_state_display() {
        let err = StoreError::InvalidJobState {
            id: uuid::Uuid::new_v4(),
            status: "completed".to_string(),
            expected: "pending".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("completed"));
        assert!(msg.contains("pending"));
    }
}
