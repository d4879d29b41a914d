//! Error types for the employee record store.
//!
//! `NotFound`, `Locked` and `ServerError` mirror response statuses and are only
//! produced by the client convenience layer. Everything else is a local failure
//! with no response attached.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    // Outcomes reported by the server
    #[error("Record not found: {record_id}")]
    NotFound { record_id: i32 },

    #[error("Record {record_id} is locked by another client")]
    Locked { record_id: i32 },

    #[error("Server failed to process request for record {record_id}")]
    ServerError { record_id: i32 },

    // Transport errors
    #[error("Transport error at {path:?}: {message}")]
    Transport {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("No response within {0:?}")]
    Timeout(Duration),

    // Persistence errors
    #[error("Persistence error at {path:?}: {message}")]
    Persistence {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Wire errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Runtime errors
    #[error("Background task failed: {message}")]
    Task { message: String },
}

/// Result type alias for record store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Transport {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl StoreError {
    /// Create a transport error with path context.
    pub fn transport_at(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        StoreError::Transport {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a persistence error with path context.
    pub fn persistence_at(
        message: impl Into<String>,
        path: impl Into<PathBuf>,
        source: Option<std::io::Error>,
    ) -> Self {
        StoreError::Persistence {
            message: message.into(),
            path: Some(path.into()),
            source,
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        StoreError::Protocol {
            message: message.into(),
        }
    }

    /// Check if the same request may succeed when sent again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Locked { .. } | StoreError::Timeout(_))
    }

    /// True for failures that happened locally, before any response arrived.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StoreError::Transport { .. } | StoreError::Timeout(_) | StoreError::Protocol { .. }
        )
    }
}
