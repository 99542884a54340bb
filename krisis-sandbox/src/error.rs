//! Error types for sandbox operations

use krisis_core::error::{BackendError, EvalError, HandoffError};
use thiserror::Error;

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Error types for sandbox
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Container engine not found: {0}")]
    EngineNotFound(String),

    #[error("`{command}` exited with status {}: {stderr}", status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("File not found in sandbox: {0}")]
    FileNotFound(String),

    #[error("Sandbox container is gone: {0}")]
    ContainerGone(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<SandboxError> for BackendError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::CommandFailed { status, stderr, .. } => {
                BackendError::Process { status, stderr }
            }
            SandboxError::FileNotFound(path) => HandoffError::Missing { path }.into(),
            other => BackendError::Transport(other.to_string()),
        }
    }
}

impl From<SandboxError> for EvalError {
    fn from(err: SandboxError) -> Self {
        EvalError::Setup(err.to_string())
    }
}
