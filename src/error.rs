//! Error types for the relay.

use crate::types::FailureReason;
use thiserror::Error;

/// Top-level errors surfaced to callers of the relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed batch size or missing connection parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A session could not be opened for a batch
    #[error("Connection error: {0}")]
    Connection(#[from] TransferError),

    /// A single message failed to upload
    #[error("Upload failed for message {message_id}: {reason}")]
    Upload {
        message_id: String,
        reason: FailureReason,
    },

    /// Anything that does not fit the categories above
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        RelayError::InvalidConfiguration(message.into())
    }
}

/// Errors raised by a transport or one of its connections
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("could not reach {endpoint}: {message}")]
    Unreachable { endpoint: String, message: String },

    #[error("SSH handshake failed: {0}")]
    Handshake(String),

    #[error("authentication failed for user {0}")]
    Authentication(String),

    #[error("host key mismatch: expected {expected}, got {actual}")]
    HostKeyMismatch { expected: String, actual: String },

    #[error("remote rejected operation on {path}: {message}")]
    Remote { path: String, message: String },

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("session already closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport task failed: {0}")]
    Task(String),
}

impl TransferError {
    pub fn remote(path: impl Into<String>, message: impl ToString) -> Self {
        TransferError::Remote {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Maps a transmit-time error onto the per-message failure taxonomy
    pub fn into_failure(self) -> FailureReason {
        match self {
            TransferError::Timeout(ms) => FailureReason::Timeout(ms),
            TransferError::Task(message) => FailureReason::Unexpected(message),
            other => FailureReason::Transmission(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(err: tokio::task::JoinError) -> Self {
        TransferError::Task(err.to_string())
    }
}
