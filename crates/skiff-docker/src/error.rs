//! Error types for skiff-docker.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by a container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine control socket did not answer.
    #[error("container engine unreachable: {0}")]
    Unreachable(String),

    /// A container-level operation was rejected by the engine.
    #[error("container operation failed: {0}")]
    Container(String),

    /// The exec output stream broke mid-read.
    #[error("exec stream error: {0}")]
    Stream(String),

    /// Raw error from the Docker API client.
    #[error(transparent)]
    Api(#[from] bollard::errors::Error),
}
