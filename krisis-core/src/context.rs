//! Operation context threaded through every backend call

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;

/// Context for backend calls (passed through the orchestrator)
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    /// Evaluation name, for log correlation
    pub eval_name: Option<String>,

    /// Cancellation token
    pub cancellation: CancellationToken,

    /// Upper bound for a single backend turn
    pub turn_timeout: Option<Duration>,
}

impl TurnContext {
    /// Create a new context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set evaluation name
    pub fn with_eval_name(mut self, name: impl Into<String>) -> Self {
        self.eval_name = Some(name.into());
        self
    }

    /// Set cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Set the per-turn timeout
    pub fn with_turn_timeout(mut self, limit: Duration) -> Self {
        self.turn_timeout = Some(limit);
        self
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Run a backend future under this context's cancellation and timeout.
    ///
    /// A cancelled context fails with [`BackendError::Cancelled`] without
    /// polling `work` further; the future is dropped, which kills any child
    /// process spawned with `kill_on_drop`.
    pub async fn guard<T, F>(&self, work: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        if self.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        let bounded = async {
            match self.turn_timeout {
                Some(limit) => match timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout(limit)),
                },
                None => work.await,
            }
        };

        tokio::select! {
            _ = self.cancellation.cancelled() => Err(BackendError::Cancelled),
            result = bounded => result,
        }
    }
}
