//! Domain-level error taxonomy for Conveyor.

use conveyor_state::StorageError;

/// Conveyor domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ConveyorError {
    #[error("invalid stage: {0}")]
    InvalidStage(String),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("invalid image tag: {0}")]
    InvalidTag(String),

    /// Nothing has been published under the registry key yet.
    #[error("no image tag published under key {key}")]
    TagNotFound { key: String },

    #[error("permission denied for stage {stage}: {reason}")]
    PermissionDenied { stage: String, reason: String },

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("notification delivery failed: {0}")]
    Delivery(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl From<StorageError> for ConveyorError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::TagNotFound { key } => ConveyorError::TagNotFound { key },
            other => ConveyorError::Storage(other),
        }
    }
}

/// Result type for Conveyor domain operations.
pub type Result<T> = std::result::Result<T, ConveyorError>;
