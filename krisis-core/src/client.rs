//! Backend client and driver traits
//!
//! A [`BackendClient`] is the only thing the orchestrator talks to. Drivers
//! are factories: given an [`EvalRunner`] they build a fresh client for one
//! evaluation run. The two shipped drivers share no code; each is an
//! independent implementation of these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::TurnContext;
use crate::environment::Environment;
use crate::error::{BackendError, Result};
use crate::runner::EvalRunner;

/// Function producing a new environment from the current one
pub type EnvMutator = Arc<dyn Fn(&Environment) -> Environment + Send + Sync>;

/// Token counters reported by a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Capabilities every agent backend offers the orchestrator
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Set the prompt for the next turn. No I/O.
    fn set_prompt(&mut self, prompt: &str);

    /// Apply `mutator` to the current environment and keep the result
    fn set_environment(&mut self, mutator: &(dyn Fn(&Environment) -> Environment + Send + Sync));

    /// Reconcile backend state into an [`Environment`]
    async fn get_environment(
        &mut self,
        ctx: &TurnContext,
    ) -> std::result::Result<Environment, BackendError>;

    /// Perform exactly one backend interaction
    async fn run_turn(&mut self, ctx: &TurnContext) -> std::result::Result<(), BackendError>;

    /// Conversation transcript, one entry per line
    async fn history(&self, _ctx: &TurnContext) -> std::result::Result<Vec<String>, BackendError> {
        Err(BackendError::Unsupported("history"))
    }

    /// Accumulated token usage
    async fn token_usage(
        &self,
        _ctx: &TurnContext,
    ) -> std::result::Result<TokenCounts, BackendError> {
        Err(BackendError::Unsupported("token usage"))
    }

    /// Documentation of the tools exposed to the agent
    async fn tools_doc(&self, _ctx: &TurnContext) -> std::result::Result<String, BackendError> {
        Err(BackendError::Unsupported("tools documentation"))
    }
}

/// Factory for backend clients
#[async_trait]
pub trait Driver: Send + Sync {
    /// Driver name, as used in configuration
    fn name(&self) -> &str;

    /// Build a client for one evaluation run.
    ///
    /// Errors here (e.g. the sandbox cannot be created) are the only
    /// failures an evaluation run returns to its caller.
    async fn new_client(&self, runner: &EvalRunner) -> Result<Box<dyn BackendClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direct::{AgentRuntime, DirectClient};

    fn assert_send_sync<T: Send + Sync + ?Sized>() {}

    #[test]
    fn test_clients_are_shareable() {
        // The orchestrator awaits `&self` queries through `&mut dyn BackendClient`.
        assert_send_sync::<dyn BackendClient>();
        assert_send_sync::<dyn AgentRuntime>();
        assert_send_sync::<DirectClient>();
    }
}
