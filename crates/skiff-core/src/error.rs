//! Error types for skiff-core.

use crate::sandbox::SandboxId;
use crate::state::SandboxState;
use skiff_docker::EngineError;
use thiserror::Error;

/// Result type alias for skiff-core operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur during sandbox pool operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Every slot is taken and retries did not free one.
    #[error("sandbox pool exhausted ({0} sandboxes max)")]
    PoolExhausted(usize),

    /// The engine is down, or creation failed even after the retry.
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// An operation exceeded its deadline.
    #[error("{op} timed out after {timeout_ms} ms")]
    Timeout { op: &'static str, timeout_ms: u64 },

    /// Illegal lifecycle transition. Programmer error; never caught.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: SandboxState,
        to: SandboxState,
    },

    /// First-time Python package install exited non-zero.
    #[error("python setup failed: {0}")]
    PythonSetupFailed(String),

    /// Path contains characters outside the safe set.
    #[error("unsafe container path: {0}")]
    UnsafePath(String),

    /// In-container file write exited non-zero.
    #[error("file write failed: {0}")]
    WriteFailed(String),

    /// No tracked sandbox with this id.
    #[error("unknown sandbox: {0}")]
    UnknownSandbox(SandboxId),

    /// Invalid merged configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Error from the container engine.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// True for deadline errors.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True when the pool had no free slot.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted(_))
    }
}
