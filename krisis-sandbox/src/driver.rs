//! Sandboxed driver
//!
//! Runs an agent CLI inside a [`Sandbox`]. The agent cannot see the harness's
//! memory, so every turn goes through files in the snapshot directory:
//!
//! 1. `input.json` and `expected.json` are written from the environment
//! 2. the agent command runs once with the prompt
//! 3. the sandbox state is committed so the next turn continues from it
//!
//! `output.json`, left behind by the agent, is merged back into the
//! environment on [`BackendClient::get_environment`].

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span};

use krisis_core::config::SandboxConfig;
use krisis_core::environment::Environment;
use krisis_core::error::{BackendError, EvalError};
use krisis_core::handoff::{decode_records, encode_expected_outputs, encode_inputs, merge_outputs};
use krisis_core::{BackendClient, Driver, EvalRunner, TokenCounts, TurnContext};

use crate::docker::DockerProvider;
use crate::error::SandboxError;
use crate::sandbox::{Mount, Sandbox, SandboxProvider, SandboxSpec};
use crate::session;
use crate::template::{self, DEFAULT_CONFIG_TEMPLATE, TemplateVars};

/// Input snapshot written before each turn
pub const INPUT_FILE: &str = "input.json";
/// Declared output slots written before each turn
pub const EXPECTED_FILE: &str = "expected.json";
/// Output snapshot the agent leaves behind
pub const OUTPUT_FILE: &str = "output.json";

/// Variable pointing the agent at the system prompt override
pub const SYSTEM_PROMPT_VAR: &str = "GOOSE_SYSTEM_PROMPT_FILE_PATH";

/// Where a forwarded container-engine socket is mounted
pub const DOCKER_SOCKET_MOUNT: &str = "/var/run/docker.sock";

fn snapshot_path(dir: &str, file: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), file)
}

/// Substitute `{session}` and `{prompt}` in the agent command
fn agent_argv(command: &[String], prompt: &str, session_file: &str) -> Vec<String> {
    command
        .iter()
        .map(|arg| arg.replace("{session}", session_file).replace("{prompt}", prompt))
        .collect()
}

/// Builds [`SandboxedClient`]s
pub struct SandboxedDriver {
    config: SandboxConfig,
    provider: Arc<dyn SandboxProvider>,
}

impl SandboxedDriver {
    pub fn new(config: SandboxConfig, provider: Arc<dyn SandboxProvider>) -> Self {
        Self { config, provider }
    }

    /// Driver backed by the configured Docker CLI
    pub fn docker(config: SandboxConfig) -> Self {
        let provider = Arc::new(DockerProvider::new(config.docker.clone()));
        Self::new(config, provider)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Sandbox layout for one run
    pub fn spec(&self, runner: &EvalRunner) -> SandboxSpec {
        let config = &self.config;

        let mut mounts = Vec::new();
        if let Some(target) = &runner.target {
            mounts.push(Mount::bind(target, config.workdir.clone()));
        }
        if let Some(cli) = &runner.agent_cli {
            mounts.push(Mount::bind(cli, config.agent_cli_mount.clone()).read_only());
        }
        if let Some(socket) = &runner.docker_socket {
            mounts.push(Mount::bind(socket, DOCKER_SOCKET_MOUNT));
        }

        let mut secrets = config.secrets.clone();
        if let Some(var) = &runner.llm_key_env {
            if !secrets.contains(var) {
                secrets.push(var.clone());
            }
        }

        let mut env = config.env.clone();
        if !runner.system_prompt.is_empty() {
            env.insert(SYSTEM_PROMPT_VAR.to_string(), config.system_prompt_path.clone());
        }

        SandboxSpec {
            image: config.image.clone(),
            mounts,
            env,
            secrets,
            workdir: Some(config.workdir.clone()),
            dirs: vec![config.snapshot_dir.clone(), config.workdir.clone()],
        }
    }

    async fn render_agent_config(&self, runner: &EvalRunner) -> krisis_core::Result<String> {
        let template = match &self.config.config_template {
            Some(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                EvalError::Configuration(format!(
                    "cannot read agent config template {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => DEFAULT_CONFIG_TEMPLATE.to_string(),
        };
        let vars = TemplateVars::for_runner(runner, &self.config.snapshot_dir);
        Ok(template::render(&template, &vars))
    }
}

async fn provision(
    sandbox: &mut dyn Sandbox,
    config: &SandboxConfig,
    runner: &EvalRunner,
    agent_config: &str,
) -> crate::Result<()> {
    sandbox
        .write_file(&config.config_path, agent_config.as_bytes())
        .await?;

    if !runner.system_prompt.is_empty() {
        sandbox
            .write_file(&config.system_prompt_path, runner.system_prompt.as_bytes())
            .await?;
    }

    let seed = session::seed_contents(&config.workdir)
        .map_err(|e| SandboxError::Sandbox(e.to_string()))?;
    sandbox.write_file(&config.session_file, seed.as_bytes()).await?;
    Ok(())
}

#[async_trait]
impl Driver for SandboxedDriver {
    fn name(&self) -> &str {
        "sandboxed"
    }

    async fn new_client(&self, runner: &EvalRunner) -> krisis_core::Result<Box<dyn BackendClient>> {
        let agent_config = self.render_agent_config(runner).await?;
        let spec = self.spec(runner);

        let mut sandbox = self.provider.create(&spec).await?;
        if let Err(e) = provision(sandbox.as_mut(), &self.config, runner, &agent_config).await {
            let _ = sandbox.teardown().await;
            return Err(e.into());
        }

        info!(
            sandbox = sandbox.id(),
            model = %runner.model,
            attempt = runner.attempt,
            "Sandboxed client ready"
        );
        Ok(Box::new(SandboxedClient::new(
            sandbox,
            self.config.clone(),
            agent_config,
        )))
    }
}

/// Backend client driving one sandbox
pub struct SandboxedClient {
    sandbox: Box<dyn Sandbox>,
    config: SandboxConfig,
    agent_config: String,
    env: Environment,
    prompt: Option<String>,
    turns: usize,
}

impl SandboxedClient {
    pub fn new(sandbox: Box<dyn Sandbox>, config: SandboxConfig, agent_config: String) -> Self {
        Self {
            sandbox,
            config,
            agent_config,
            env: Environment::new(),
            prompt: None,
            turns: 0,
        }
    }

    pub fn sandbox_id(&self) -> &str {
        self.sandbox.id()
    }

    /// Completed turns
    pub fn turns(&self) -> usize {
        self.turns
    }

    /// Tear the sandbox down now instead of on drop
    pub async fn close(mut self) -> crate::Result<()> {
        self.sandbox.teardown().await
    }

    async fn read_session(&self, ctx: &TurnContext) -> Result<String, BackendError> {
        let sandbox = &self.sandbox;
        let path = &self.config.session_file;
        let bytes = ctx
            .guard(async { Ok::<_, BackendError>(sandbox.read_file(path).await?) })
            .await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
impl BackendClient for SandboxedClient {
    fn set_prompt(&mut self, prompt: &str) {
        self.prompt = Some(prompt.to_string());
    }

    fn set_environment(&mut self, mutator: &(dyn Fn(&Environment) -> Environment + Send + Sync)) {
        self.env = mutator(&self.env);
    }

    async fn get_environment(&mut self, ctx: &TurnContext) -> Result<Environment, BackendError> {
        let path = snapshot_path(&self.config.snapshot_dir, OUTPUT_FILE);
        let sandbox = &self.sandbox;
        let bytes = ctx
            .guard(async { Ok::<_, BackendError>(sandbox.read_file(&path).await?) })
            .await?;

        let records = decode_records(&String::from_utf8_lossy(&bytes))?;
        debug!(records = records.len(), "Merging agent outputs");
        self.env = merge_outputs(&self.env, &records);
        Ok(self.env.clone())
    }

    async fn run_turn(&mut self, ctx: &TurnContext) -> Result<(), BackendError> {
        let Some(prompt) = self.prompt.take() else {
            debug!("No pending prompt, nothing to send");
            return Ok(());
        };

        // Encode before touching the sandbox so a bad input aborts the turn cleanly.
        let inputs = encode_inputs(&self.env)?;
        let expected = encode_expected_outputs(&self.env)?;

        let argv = agent_argv(&self.config.agent_command, &prompt, &self.config.session_file);
        let input_path = snapshot_path(&self.config.snapshot_dir, INPUT_FILE);
        let expected_path = snapshot_path(&self.config.snapshot_dir, EXPECTED_FILE);
        let turn = self.turns + 1;
        let span = info_span!("sandbox_turn", sandbox = %self.sandbox.id(), turn);
        let sandbox = &mut self.sandbox;

        ctx.guard(
            async move {
                sandbox.write_file(&input_path, inputs.as_bytes()).await?;
                sandbox.write_file(&expected_path, expected.as_bytes()).await?;

                let stdout = sandbox.exec(&argv).await?;
                debug!(bytes = stdout.len(), "Agent finished");

                let state = sandbox.commit().await?;
                debug!(state = %state, "Committed turn state");
                Ok::<(), BackendError>(())
            }
            .instrument(span),
        )
        .await?;

        self.turns = turn;
        Ok(())
    }

    async fn history(&self, ctx: &TurnContext) -> Result<Vec<String>, BackendError> {
        let content = self.read_session(ctx).await?;
        Ok(session::history_lines(&content))
    }

    async fn token_usage(&self, ctx: &TurnContext) -> Result<TokenCounts, BackendError> {
        let content = self.read_session(ctx).await?;
        session::token_usage(&content)
    }

    async fn tools_doc(&self, _ctx: &TurnContext) -> Result<String, BackendError> {
        Ok(format!(
            "## Sandboxed agent\n\n\
             Command: `{}`\n\n\
             Handoff directory `{}`: the agent reads `{}` and `{}` and writes `{}`.\n\n\
             ### Agent configuration\n\n```yaml\n{}\n```\n",
            self.config.agent_command.join(" "),
            self.config.snapshot_dir,
            INPUT_FILE,
            EXPECTED_FILE,
            OUTPUT_FILE,
            self.agent_config.trim_end()
        ))
    }
}
