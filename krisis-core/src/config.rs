//! Configuration types for Krisis

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::EvalError;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KrisisConfig {
    /// Evaluation runner settings
    pub runner: RunnerConfig,

    /// LLM provider settings
    pub llm: LLMProviderConfig,

    /// Sandboxed driver settings
    pub sandbox: SandboxConfig,
}

/// Which backend driver builds the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// In-process agent runtime
    #[default]
    Direct,
    /// Agent CLI inside a container
    Sandboxed,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Direct => write!(f, "direct"),
            DriverKind::Sandboxed => write!(f, "sandboxed"),
        }
    }
}

impl FromStr for DriverKind {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(DriverKind::Direct),
            "sandboxed" | "sandbox" => Ok(DriverKind::Sandboxed),
            other => Err(EvalError::Configuration(format!("Invalid driver: {}", other))),
        }
    }
}

/// Evaluation runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Model name
    pub model: String,

    /// Attempt number (>= 1)
    pub attempt: u32,

    /// System prompt override
    pub system_prompt: String,

    /// Backend driver
    pub driver: DriverKind,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1".to_string(),
            attempt: 1,
            system_prompt: String::new(),
            driver: DriverKind::Direct,
        }
    }
}

/// LLM provider type (all spoken to through the OpenAI-compatible API)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LLMProvider {
    Groq,
    OpenAI,
    Ollama,
}

impl LLMProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LLMProvider::Groq => "groq",
            LLMProvider::OpenAI => "openai",
            LLMProvider::Ollama => "ollama",
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMProviderConfig {
    /// Provider type
    pub provider: LLMProvider,

    /// Model override for the direct driver; `runner.model` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// API key (prefer `api_key_env`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Host variable holding the API key
    pub api_key_env: String,

    /// Full base URL, overriding the provider default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Host handed to sandboxed agents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Base path handed to sandboxed agents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
}

impl Default for LLMProviderConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::OpenAI,
            model: None,
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            host: None,
            base_path: None,
        }
    }
}

/// Sandboxed driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container engine CLI
    pub docker: PathBuf,

    /// Base image; must already contain the agent CLI
    pub image: String,

    /// Directory inside the sandbox holding the handoff snapshots
    pub snapshot_dir: String,

    /// Agent session file inside the sandbox
    pub session_file: String,

    /// Where the target project is mounted
    pub workdir: String,

    /// Host project directory mounted at `workdir`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<PathBuf>,

    /// Host binary mounted into the sandbox for the agent to call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_cli: Option<PathBuf>,

    /// Mount point of `agent_cli`
    pub agent_cli_mount: String,

    /// Host container-engine socket forwarded into the sandbox
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket: Option<PathBuf>,

    /// Host variables forwarded as secrets
    pub secrets: Vec<String>,

    /// Plain environment for the agent process
    pub env: BTreeMap<String, String>,

    /// Agent invocation; `{prompt}` and `{session}` are substituted
    pub agent_command: Vec<String>,

    /// Agent config template on the host; the built-in one is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_template: Option<PathBuf>,

    /// Where the rendered agent config lands inside the sandbox
    pub config_path: String,

    /// Where a system prompt override lands inside the sandbox
    pub system_prompt_path: String,

    /// Upper bound for one agent turn
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub turn_timeout: Option<Duration>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker: PathBuf::from("docker"),
            image: "ghcr.io/block/goose:latest".to_string(),
            snapshot_dir: "/tmp/env_snapshot".to_string(),
            session_file: "/root/.krisis/llm-history".to_string(),
            workdir: "/target".to_string(),
            target_dir: None,
            agent_cli: None,
            agent_cli_mount: "/usr/local/bin/engine".to_string(),
            docker_socket: None,
            secrets: vec!["OPENAI_API_KEY".to_string()],
            env: BTreeMap::new(),
            agent_command: vec![
                "goose".to_string(),
                "run".to_string(),
                "--path".to_string(),
                "{session}".to_string(),
                "--resume".to_string(),
                "--text".to_string(),
                "{prompt}".to_string(),
            ],
            config_template: None,
            config_path: "/root/.config/goose/config.yaml".to_string(),
            system_prompt_path: "/system_prompt.md".to_string(),
            turn_timeout: Some(Duration::from_secs(15 * 60)),
        }
    }
}

/// Builder for KrisisConfig
pub struct ConfigBuilder {
    config: KrisisConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: KrisisConfig::default(),
        }
    }

    /// Set runner configuration
    pub fn runner(mut self, config: RunnerConfig) -> Self {
        self.config.runner = config;
        self
    }

    /// Set LLM configuration
    pub fn llm(mut self, config: LLMProviderConfig) -> Self {
        self.config.llm = config;
        self
    }

    /// Set sandbox configuration
    pub fn sandbox(mut self, config: SandboxConfig) -> Self {
        self.config.sandbox = config;
        self
    }

    /// Build the configuration
    pub fn build(self) -> KrisisConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KrisisConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (krisis.toml)
    /// 3. Environment variable overrides (`KRISIS_RUNNER__MODEL=...`)
    /// 4. File named by KRISIS_CONFIG_PATH, if set
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid or validation fails.
    pub fn load() -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Toml},
        };

        let mut figment = Figment::new()
            .merge(Toml::file("krisis.toml"))
            .merge(Env::prefixed("KRISIS_").ignore(&["CONFIG_PATH"]).split("__"));

        if let Ok(path) = std::env::var("KRISIS_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: KrisisConfig = figment.extract().map_err(|e| {
            EvalError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Toml},
        };

        let config: KrisisConfig = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                EvalError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.runner.attempt == 0 {
            return Err(EvalError::Configuration(
                "runner.attempt must be at least 1".to_string(),
            ));
        }

        if self.runner.model.trim().is_empty() {
            return Err(EvalError::Configuration(
                "runner.model must not be empty".to_string(),
            ));
        }

        if self.runner.driver == DriverKind::Sandboxed {
            if self.sandbox.image.trim().is_empty() {
                return Err(EvalError::Configuration(
                    "sandbox.image must not be empty".to_string(),
                ));
            }
            if self.sandbox.agent_command.is_empty() {
                return Err(EvalError::Configuration(
                    "sandbox.agent_command must not be empty".to_string(),
                ));
            }
            if !self.sandbox.snapshot_dir.starts_with('/') {
                return Err(EvalError::Configuration(format!(
                    "sandbox.snapshot_dir must be absolute, got {}",
                    self.sandbox.snapshot_dir
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = KrisisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runner.attempt, 1);
        assert_eq!(config.runner.driver, DriverKind::Direct);
        assert_eq!(config.sandbox.snapshot_dir, "/tmp/env_snapshot");
    }

    #[test]
    fn test_zero_attempt_rejected() {
        let mut config = KrisisConfig::default();
        config.runner.attempt = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sandbox_requires_command() {
        let config = ConfigBuilder::new()
            .runner(RunnerConfig {
                driver: DriverKind::Sandboxed,
                ..Default::default()
            })
            .sandbox(SandboxConfig {
                agent_command: Vec::new(),
                ..Default::default()
            })
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_driver_kind_from_str() {
        assert_eq!("direct".parse::<DriverKind>().unwrap(), DriverKind::Direct);
        assert_eq!("Sandboxed".parse::<DriverKind>().unwrap(), DriverKind::Sandboxed);
        assert!("docker".parse::<DriverKind>().is_err());
    }

    #[test]
    fn test_load_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "krisis.toml",
                r#"
                [runner]
                model = "gpt-4o"
                driver = "sandboxed"

                [sandbox]
                image = "agents/goose:1.0.20"
                turn_timeout = "90s"
                secrets = ["GROQ_API_KEY"]
                "#,
            )?;
            jail.set_env("KRISIS_RUNNER__ATTEMPT", "3");

            let config = KrisisConfig::load().expect("config should load");
            assert_eq!(config.runner.model, "gpt-4o");
            assert_eq!(config.runner.attempt, 3);
            assert_eq!(config.runner.driver, DriverKind::Sandboxed);
            assert_eq!(config.sandbox.image, "agents/goose:1.0.20");
            assert_eq!(config.sandbox.turn_timeout, Some(Duration::from_secs(90)));
            assert_eq!(config.sandbox.secrets, vec!["GROQ_API_KEY".to_string()]);
            assert_eq!(config.sandbox.snapshot_dir, "/tmp/env_snapshot");
            Ok(())
        });
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[runner]\nattempt = 0\n")?;
            assert!(KrisisConfig::from_file("bad.toml").is_err());
            Ok(())
        });
    }
}
