//! Evaluation runner configuration and driver binding

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::client::{BackendClient, Driver};
use crate::config::{KrisisConfig, LLMProvider};
use crate::error::Result;

/// Common configuration for an evaluation run
#[derive(Debug, Clone)]
pub struct EvalRunner {
    /// Model name passed to the backend
    pub model: String,

    /// Attempt number (>0, monotonically increasing so attempts are easy to tell apart)
    pub attempt: u32,

    /// System prompt override; empty keeps the backend default
    pub system_prompt: String,

    /// Project directory the agent works on
    pub target: Option<PathBuf>,

    /// Agent CLI binary mounted into a sandbox
    pub agent_cli: Option<PathBuf>,

    /// Container engine socket mounted into a sandbox
    pub docker_socket: Option<PathBuf>,

    /// Name of the host variable holding the LLM API key
    pub llm_key_env: Option<String>,

    /// LLM provider the agent should use
    pub provider: LLMProvider,

    /// Provider host (OpenAI-compatible endpoints)
    pub host: Option<String>,

    /// Provider base path
    pub base_path: Option<String>,
}

impl Default for EvalRunner {
    fn default() -> Self {
        Self {
            model: String::new(),
            attempt: 1,
            system_prompt: String::new(),
            target: None,
            agent_cli: None,
            docker_socket: None,
            llm_key_env: None,
            provider: LLMProvider::OpenAI,
            host: None,
            base_path: None,
        }
    }
}

impl EvalRunner {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Build a runner from loaded configuration
    pub fn from_config(config: &KrisisConfig) -> Self {
        let llm = &config.llm;
        Self {
            model: config.runner.model.clone(),
            attempt: config.runner.attempt,
            system_prompt: config.runner.system_prompt.clone(),
            target: config.sandbox.target_dir.clone(),
            agent_cli: config.sandbox.agent_cli.clone(),
            docker_socket: config.sandbox.docker_socket.clone(),
            llm_key_env: Some(llm.api_key_env.clone()),
            provider: llm.provider.clone(),
            host: llm.host.clone(),
            base_path: llm.base_path.clone(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_agent_cli(mut self, path: impl Into<PathBuf>) -> Self {
        self.agent_cli = Some(path.into());
        self
    }

    pub fn with_docker_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.docker_socket = Some(path.into());
        self
    }

    pub fn with_llm_key_env(mut self, var: impl Into<String>) -> Self {
        self.llm_key_env = Some(var.into());
        self
    }
}

/// The runner plus the driver that turns it into a backend client
#[derive(Clone)]
pub struct EvalContext {
    runner: EvalRunner,
    driver: Arc<dyn Driver>,
}

impl EvalContext {
    pub fn new(runner: EvalRunner, driver: Arc<dyn Driver>) -> Self {
        Self { runner, driver }
    }

    pub fn runner(&self) -> &EvalRunner {
        &self.runner
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Build a fresh backend client for one run
    pub async fn new_client(&self) -> Result<Box<dyn BackendClient>> {
        self.driver.new_client(&self.runner).await
    }
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("runner", &self.runner)
            .field("driver", &self.driver.name())
            .finish()
    }
}
