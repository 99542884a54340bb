//! Factory for creating LLM providers from configuration

use std::sync::Arc;

use crate::config::{LLMProvider as LLMProviderType, LLMProviderConfig};
use crate::error::{EvalError, Result};
use crate::llm::LLMProvider;
use crate::llm::providers::OpenAIProvider;
use crate::llm::providers::openai::OPENAI_BASE_URL;

const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Factory for creating LLM providers
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Create an LLM provider from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the provider needs an API key and none is configured
    pub fn create(config: &LLMProviderConfig, model: &str) -> Result<Arc<dyn LLMProvider>> {
        let base_url = Self::base_url(config);

        let api_key = match (&config.api_key, config.provider.clone()) {
            (Some(key), _) => key.clone(),
            (None, LLMProviderType::Ollama) => std::env::var(&config.api_key_env)
                .unwrap_or_else(|_| "ollama".to_string()),
            (None, _) => std::env::var(&config.api_key_env).map_err(|_| {
                EvalError::Configuration(format!(
                    "{} environment variable not set",
                    config.api_key_env
                ))
            })?,
        };

        let provider = OpenAIProvider::with_base_url(api_key, model, base_url)
            .with_provider_name(config.provider.as_str());

        Ok(Arc::new(provider))
    }

    /// Resolve the endpoint: explicit URL, then host + base path, then provider default
    pub fn base_url(config: &LLMProviderConfig) -> String {
        if let Some(url) = &config.base_url {
            return url.clone();
        }

        if let Some(host) = &config.host {
            let path = config.base_path.as_deref().unwrap_or("v1");
            return format!(
                "{}/{}",
                host.trim_end_matches('/'),
                path.trim_start_matches('/')
            );
        }

        match config.provider {
            LLMProviderType::OpenAI => OPENAI_BASE_URL,
            LLMProviderType::Groq => GROQ_BASE_URL,
            LLMProviderType::Ollama => OLLAMA_BASE_URL,
        }
        .to_string()
    }
}
