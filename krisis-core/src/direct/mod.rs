//! Direct driver: a backend client around an in-process agent runtime
//!
//! The driver holds a factory that builds one [`AgentRuntime`] per run. The
//! client forwards every [`BackendClient`] call to that runtime, guarding
//! turns with the context's cancellation and timeout.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::client::{BackendClient, Driver, TokenCounts};
use crate::config::LLMProviderConfig;
use crate::context::TurnContext;
use crate::environment::Environment;
use crate::error::{BackendError, EvalError, Result};
use crate::llm::{LLMProvider, LLMProviderFactory};
use crate::runner::EvalRunner;

mod runtime;

pub use runtime::{AgentReply, LlmAgentRuntime};

/// An agent that runs inside the harness process
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Current environment
    fn environment(&self) -> Environment;

    /// Replace the environment
    fn set_environment(&mut self, env: Environment);

    /// Queue a prompt for the next turn
    fn set_prompt(&mut self, prompt: &str);

    /// Process the queued prompt, if any
    async fn sync(&mut self, ctx: &TurnContext) -> std::result::Result<(), BackendError>;

    /// Conversation transcript, one entry per line
    fn history(&self) -> Vec<String>;

    /// Accumulated token usage
    fn token_usage(&self) -> TokenCounts;

    /// Documentation of what the agent can do
    fn tools_doc(&self) -> String;
}

type RuntimeFactory = dyn Fn(&EvalRunner) -> Result<Box<dyn AgentRuntime>> + Send + Sync;

/// Driver building [`DirectClient`]s
pub struct DirectDriver {
    factory: Box<RuntimeFactory>,
}

impl DirectDriver {
    /// Driver from an arbitrary runtime factory
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&EvalRunner) -> Result<Box<dyn AgentRuntime>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
        }
    }

    /// Driver running [`LlmAgentRuntime`] against a configured provider.
    ///
    /// The provider is built per run so the runner's model and key variable
    /// apply.
    pub fn llm(config: LLMProviderConfig) -> Self {
        Self::new(move |runner| {
            let mut config = config.clone();
            if let Some(var) = &runner.llm_key_env {
                config.api_key_env = var.clone();
            }
            if runner.host.is_some() {
                config.host = runner.host.clone();
            }
            if runner.base_path.is_some() {
                config.base_path = runner.base_path.clone();
            }

            let model = config.model.clone().unwrap_or_else(|| runner.model.clone());
            if model.trim().is_empty() {
                return Err(EvalError::Configuration(
                    "no model configured for the direct driver".to_string(),
                ));
            }

            let provider = LLMProviderFactory::create(&config, &model)?;
            Ok(Box::new(LlmAgentRuntime::new(provider, runner)) as Box<dyn AgentRuntime>)
        })
    }

    /// Driver running [`LlmAgentRuntime`] against a ready-made provider
    pub fn with_provider(provider: Arc<dyn LLMProvider>) -> Self {
        Self::new(move |runner| {
            Ok(Box::new(LlmAgentRuntime::new(provider.clone(), runner)) as Box<dyn AgentRuntime>)
        })
    }
}

#[async_trait]
impl Driver for DirectDriver {
    fn name(&self) -> &str {
        "direct"
    }

    async fn new_client(&self, runner: &EvalRunner) -> Result<Box<dyn BackendClient>> {
        let runtime = (self.factory)(runner)?;
        info!(model = %runner.model, attempt = runner.attempt, "direct client ready");
        Ok(Box::new(DirectClient::new(runtime)))
    }
}

/// Backend client delegating to an [`AgentRuntime`]
pub struct DirectClient {
    runtime: Box<dyn AgentRuntime>,
}

impl DirectClient {
    pub fn new(runtime: Box<dyn AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl BackendClient for DirectClient {
    fn set_prompt(&mut self, prompt: &str) {
        self.runtime.set_prompt(prompt);
    }

    fn set_environment(&mut self, mutator: &(dyn Fn(&Environment) -> Environment + Send + Sync)) {
        let next = mutator(&self.runtime.environment());
        self.runtime.set_environment(next);
    }

    async fn get_environment(
        &mut self,
        ctx: &TurnContext,
    ) -> std::result::Result<Environment, BackendError> {
        if ctx.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        Ok(self.runtime.environment())
    }

    async fn run_turn(&mut self, ctx: &TurnContext) -> std::result::Result<(), BackendError> {
        let runtime = &mut self.runtime;
        ctx.guard(runtime.sync(ctx)).await
    }

    async fn history(&self, _ctx: &TurnContext) -> std::result::Result<Vec<String>, BackendError> {
        Ok(self.runtime.history())
    }

    async fn token_usage(
        &self,
        _ctx: &TurnContext,
    ) -> std::result::Result<TokenCounts, BackendError> {
        Ok(self.runtime.token_usage())
    }

    async fn tools_doc(&self, _ctx: &TurnContext) -> std::result::Result<String, BackendError> {
        Ok(self.runtime.tools_doc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    /// Runtime that copies its prompt into the `echo` output
    #[derive(Default)]
    struct EchoRuntime {
        env: Environment,
        prompt: Option<String>,
        turns: usize,
    }

    #[async_trait]
    impl AgentRuntime for EchoRuntime {
        fn environment(&self) -> Environment {
            self.env.clone()
        }

        fn set_environment(&mut self, env: Environment) {
            self.env = env;
        }

        fn set_prompt(&mut self, prompt: &str) {
            self.prompt = Some(prompt.to_string());
        }

        async fn sync(&mut self, _ctx: &TurnContext) -> std::result::Result<(), BackendError> {
            if let Some(prompt) = self.prompt.take() {
                self.turns += 1;
                self.env = self.env.with_output_value("echo", prompt, "");
            }
            Ok(())
        }

        fn history(&self) -> Vec<String> {
            vec![format!("turns: {}", self.turns)]
        }

        fn token_usage(&self) -> TokenCounts {
            TokenCounts {
                input_tokens: self.turns as u64,
                output_tokens: 0,
            }
        }

        fn tools_doc(&self) -> String {
            "echo".to_string()
        }
    }

    fn echo_driver() -> DirectDriver {
        DirectDriver::new(|_| Ok(Box::new(EchoRuntime::default()) as Box<dyn AgentRuntime>))
    }

    #[tokio::test]
    async fn test_direct_client_delegates() {
        let driver = echo_driver();
        assert_eq!(driver.name(), "direct");

        let mut client = driver.new_client(&EvalRunner::new("m")).await.unwrap();
        let ctx = TurnContext::new();

        client.set_environment(&|env: &Environment| {
            env.with_string_output("echo", "Echoed prompt")
        });
        client.set_prompt("hello");
        client.run_turn(&ctx).await.unwrap();

        let env = client.get_environment(&ctx).await.unwrap();
        assert_eq!(env.output("echo").as_string().unwrap(), "hello");
        assert_eq!(env.output("echo").description(), "Echoed prompt");
        assert_eq!(client.history(&ctx).await.unwrap(), vec!["turns: 1"]);
        assert_eq!(client.token_usage(&ctx).await.unwrap().input_tokens, 1);
        assert_eq!(client.tools_doc(&ctx).await.unwrap(), "echo");
    }

    #[tokio::test]
    async fn test_turn_without_prompt_is_noop() {
        let mut client = echo_driver().new_client(&EvalRunner::new("m")).await.unwrap();
        let ctx = TurnContext::new();

        client.run_turn(&ctx).await.unwrap();
        assert_eq!(client.token_usage(&ctx).await.unwrap().input_tokens, 0);
    }

    #[tokio::test]
    async fn test_cancelled_turn() {
        let mut client = echo_driver().new_client(&EvalRunner::new("m")).await.unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = TurnContext::new().with_cancellation(token);

        client.set_prompt("hello");
        let err = client.run_turn(&ctx).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(client.get_environment(&ctx).await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_factory_error_is_setup_failure() {
        let driver = DirectDriver::new(|_| Err(EvalError::Setup("no runtime".to_string())));
        let result = driver.new_client(&EvalRunner::new("m")).await;
        assert!(matches!(result, Err(EvalError::Setup(_))));
    }

    #[tokio::test]
    async fn test_llm_driver_requires_model() {
        let config = LLMProviderConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        let driver = DirectDriver::llm(config);
        let result = driver.new_client(&EvalRunner::new("")).await;
        assert!(matches!(result, Err(EvalError::Configuration(_))));

        assert!(driver.new_client(&EvalRunner::new("gpt-4o")).await.is_ok());
    }
}
