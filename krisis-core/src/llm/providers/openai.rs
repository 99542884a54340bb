//! OpenAI-compatible chat completion provider
//!
//! Groq and Ollama expose the same `/chat/completions` endpoint, so this one
//! provider serves all three; only the base URL and key differ.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::llm::{LLMProvider, LLMRequest, LLMResponse, Message, ModelInfo, TokenUsage};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible LLM provider
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    provider_name: String,
}

impl OpenAIProvider {
    /// Create a provider against the public OpenAI API.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, OPENAI_BASE_URL)
    }

    /// Create with a custom base URL (Groq, Ollama, or any compatible API).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            provider_name: "openai".to_string(),
        }
    }

    /// Name reported by [`LLMProvider::model_info`]
    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Serialize)]
struct OpenAIMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: Option<OpenAIMessageResponse>,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Deserialize)]
struct OpenAIErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

fn convert_messages(messages: &[Message]) -> Vec<OpenAIMessage<'_>> {
    messages
        .iter()
        .map(|m| OpenAIMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .collect()
}

/// Turn an HTTP status and body into a response or an agent error
fn parse_completion(status: u16, body: &str) -> Result<LLMResponse, BackendError> {
    if !(200..300).contains(&status) {
        if let Ok(error) = serde_json::from_str::<OpenAIError>(body) {
            return Err(BackendError::Agent(format!(
                "API error ({}): {}",
                error.error.error_type.unwrap_or_else(|| status.to_string()),
                error.error.message
            )));
        }
        return Err(BackendError::Agent(format!("API error ({}): {}", status, body)));
    }

    let response: OpenAIResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::Agent(format!("Failed to parse completion: {}", e)))?;

    let Some(choice) = response.choices.into_iter().next() else {
        return Err(BackendError::Agent("API returned no choices".to_string()));
    };

    let content = choice.message.and_then(|m| m.content).unwrap_or_default();

    let usage = response.usage.map(|u| TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    Ok(LLMResponse { content, usage })
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse, BackendError> {
        let body = OpenAIRequest {
            model: &self.model,
            messages: convert_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            url = %url,
            model = %self.model,
            messages = request.messages.len(),
            "sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(format!("Failed to send request: {}", e)))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(format!("Failed to read response: {}", e)))?;

        parse_completion(status, &text)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: self.provider_name.clone(),
            model_name: self.model.clone(),
        }
    }
}
