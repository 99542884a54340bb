//! Error types for Krisis operations

use std::time::Duration;

use crate::binding::HandleKind;

/// Result type for Krisis operations
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors surfaced to the caller of an evaluation run.
///
/// Evaluation content failures never show up here; they end up in the
/// report. Only setup and configuration problems are returned as errors.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// Backend client could not be constructed
    #[error("Setup error: {0}")]
    Setup(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No scenario registered under this name
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    /// Backend failure outside of a turn (e.g. during client construction)
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for EvalError {
    fn from(s: String) -> Self {
        EvalError::Other(s)
    }
}

impl From<&str> for EvalError {
    fn from(s: &str) -> Self {
        EvalError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for EvalError {
    fn from(err: anyhow::Error) -> Self {
        EvalError::Other(err.to_string())
    }
}

/// A backend turn (or a backend query) failed.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Network or API transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The agent process exited unsuccessfully
    #[error("agent process exited with status {}: {stderr}", status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    Process {
        /// Exit code, if the process exited normally
        status: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// The agent itself reported a failure
    #[error("agent error: {0}")]
    Agent(String),

    /// Environment handoff failed
    #[error("handoff error: {0}")]
    Handoff(#[from] HandoffError),

    /// The operation context was cancelled
    #[error("turn cancelled")]
    Cancelled,

    /// The turn exceeded its time budget
    #[error("turn timed out after {0:?}")]
    Timeout(Duration),

    /// The backend does not offer this capability
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}

impl BackendError {
    /// Whether this error came from cancellation rather than the backend
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackendError::Cancelled)
    }
}

/// Reading a binding's value as a specific type failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// The binding holds no value (declared slot, or missing entirely)
    #[error("binding {key:?} has no value")]
    Empty { key: String },

    /// The binding holds a value of another type
    #[error("binding {key:?} is a {found}, not a {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Serializing or parsing an environment snapshot failed.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    /// An input carries a handle, which cannot cross the file handoff
    #[error("input {key:?} holds a {kind} handle and cannot be passed by value")]
    NonTextual { key: String, kind: HandleKind },

    /// Snapshot JSON is malformed
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Snapshot file was not produced
    #[error("snapshot not found at {path}")]
    Missing { path: String },
}
