//! In-process agent runtime backed by a chat-completion provider

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

use super::AgentRuntime;
use crate::binding::BindingValue;
use crate::client::TokenCounts;
use crate::context::TurnContext;
use crate::environment::Environment;
use crate::error::BackendError;
use crate::llm::{LLMProvider, LLMRequest, Message};
use crate::runner::EvalRunner;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an agent completing tasks inside an evaluation harness.";

const REPLY_INSTRUCTIONS: &str = r#"Every message lists the inputs available to you and the outputs you are expected to produce.
Refer to inputs by name; their values are given to you, so do not ask for them.
Answer with a single JSON object and nothing else:
{"reply": "<what you did, in prose>", "outputs": {"<output name>": "<string value>"}}
Only include outputs you were asked for. Omit an output rather than guessing its value."#;

/// Parsed model answer
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub reply: String,

    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl AgentReply {
    /// Parse a model answer, tolerating code fences and surrounding prose
    pub fn parse(content: &str) -> Result<Self, BackendError> {
        let trimmed = strip_fences(content.trim());

        if let Ok(reply) = serde_json::from_str::<AgentReply>(trimmed) {
            return Ok(reply);
        }

        if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
            if start < end {
                if let Ok(reply) = serde_json::from_str::<AgentReply>(&trimmed[start..=end]) {
                    return Ok(reply);
                }
            }
        }

        Err(BackendError::Agent(format!(
            "model reply is not a JSON object: {}",
            truncate(content, 200)
        )))
    }

    /// Output values rendered as strings
    pub fn string_outputs(&self) -> impl Iterator<Item = (&str, String)> {
        self.outputs.iter().map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.as_str(), value)
        })
    }
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the language tag line
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Render the environment for the model
fn describe_environment(env: &Environment) -> String {
    let mut out = String::new();

    if env.inputs().next().is_some() {
        out.push_str("Inputs:\n");
        for binding in env.inputs() {
            let _ = match binding.value() {
                BindingValue::String(value) => writeln!(
                    out,
                    "- ${} (string) = {:?}: {}",
                    binding.key(),
                    value,
                    binding.description()
                ),
                BindingValue::Handle(handle) => writeln!(
                    out,
                    "- ${} ({}) at {}: {}",
                    binding.key(),
                    handle.kind(),
                    handle.reference().display(),
                    binding.description()
                ),
                BindingValue::Absent => writeln!(
                    out,
                    "- ${} (unset): {}",
                    binding.key(),
                    binding.description()
                ),
            };
        }
    }

    if env.outputs().next().is_some() {
        out.push_str("Outputs:\n");
        for binding in env.outputs() {
            let _ = match binding.value() {
                BindingValue::String(value) => writeln!(
                    out,
                    "- ${} (currently {:?}): {}",
                    binding.key(),
                    value,
                    binding.description()
                ),
                _ => writeln!(out, "- ${}: {}", binding.key(), binding.description()),
            };
        }
    }

    out
}

/// Agent runtime that asks an [`LLMProvider`] for one completion per turn
pub struct LlmAgentRuntime {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    attempt: u32,
    env: Environment,
    pending_prompt: Option<String>,
    conversation: Vec<Message>,
    usage: TokenCounts,
}

impl LlmAgentRuntime {
    pub fn new(provider: Arc<dyn LLMProvider>, runner: &EvalRunner) -> Self {
        let system_prompt = if runner.system_prompt.is_empty() {
            DEFAULT_SYSTEM_PROMPT.to_string()
        } else {
            runner.system_prompt.clone()
        };

        Self {
            provider,
            system_prompt,
            attempt: runner.attempt,
            env: Environment::new(),
            pending_prompt: None,
            conversation: Vec::new(),
            usage: TokenCounts::default(),
        }
    }

    fn system_message(&self) -> Message {
        Message::system(format!(
            "{}\n\n{}\n\n(attempt {})",
            self.system_prompt, REPLY_INSTRUCTIONS, self.attempt
        ))
    }

    fn apply_reply(&mut self, reply: &AgentReply) {
        for (name, value) in reply.string_outputs() {
            if !self.env.has_output(name) {
                warn!(output = name, "model filled an undeclared output");
            }
            self.env = self.env.with_output_value(name, value, "");
        }
    }
}

#[async_trait]
impl AgentRuntime for LlmAgentRuntime {
    fn environment(&self) -> Environment {
        self.env.clone()
    }

    fn set_environment(&mut self, env: Environment) {
        self.env = env;
    }

    fn set_prompt(&mut self, prompt: &str) {
        self.pending_prompt = Some(prompt.to_string());
    }

    async fn sync(&mut self, _ctx: &TurnContext) -> Result<(), BackendError> {
        let Some(prompt) = self.pending_prompt.take() else {
            debug!("no pending prompt, nothing to do");
            return Ok(());
        };

        let user = Message::user(format!("{}\n{}", describe_environment(&self.env), prompt));

        let mut messages = Vec::with_capacity(self.conversation.len() + 2);
        messages.push(self.system_message());
        messages.extend(self.conversation.iter().cloned());
        messages.push(user.clone());

        let response = self
            .provider
            .generate_request(&LLMRequest::new(messages))
            .await?;

        if let Some(usage) = response.usage {
            self.usage.input_tokens += usage.prompt_tokens as u64;
            self.usage.output_tokens += usage.completion_tokens as u64;
        }

        self.conversation.push(user);
        self.conversation.push(Message::assistant(response.content.clone()));

        let reply = AgentReply::parse(&response.content)?;
        debug!(outputs = reply.outputs.len(), "model replied");
        self.apply_reply(&reply);

        Ok(())
    }

    fn history(&self) -> Vec<String> {
        self.conversation
            .iter()
            .flat_map(|m| {
                format!("{}: {}", m.role.as_str(), m.content)
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn token_usage(&self) -> TokenCounts {
        self.usage
    }

    fn tools_doc(&self) -> String {
        let info = self.provider.model_info();
        format!(
            "## {} ({})\n\nNo tools are exposed. The model answers each turn with:\n\n{}\n",
            info.model_name, info.provider, REPLY_INSTRUCTIONS
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMResponse, MessageRole, ModelInfo, TokenUsage};
    use std::sync::Mutex;

    /// Provider replaying canned answers and recording requests
    struct StubProvider {
        answers: Mutex<Vec<String>>,
        requests: Mutex<Vec<LLMRequest>>,
    }

    impl StubProvider {
        fn new(answers: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().rev().map(|s| s.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for StubProvider {
        async fn generate_request(
            &self,
            request: &LLMRequest,
        ) -> Result<LLMResponse, BackendError> {
            self.requests.lock().unwrap().push(request.clone());
            let content = self
                .answers
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| BackendError::Transport("no more answers".to_string()))?;
            Ok(LLMResponse {
                content,
                usage: Some(TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 10,
                    total_tokens: 110,
                }),
            })
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                provider: "stub".to_string(),
                model_name: "stub-model".to_string(),
            }
        }
    }

    #[test]
    fn test_parse_plain_json() {
        let reply = AgentReply::parse(r#"{"reply": "done", "outputs": {"a": "1"}}"#).unwrap();
        assert_eq!(reply.reply, "done");
        assert_eq!(reply.outputs["a"], serde_json::json!("1"));
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = AgentReply::parse("```json\n{\"outputs\": {\"n\": 3}}\n```").unwrap();
        let outputs: Vec<_> = reply.string_outputs().collect();
        assert_eq!(outputs, vec![("n", "3".to_string())]);
    }

    #[test]
    fn test_parse_json_with_prose() {
        let reply = AgentReply::parse("Sure! {\"reply\": \"ok\"} Hope that helps.").unwrap();
        assert_eq!(reply.reply, "ok");
        assert!(reply.outputs.is_empty());
    }

    #[test]
    fn test_parse_rejects_prose() {
        let err = AgentReply::parse("I could not do it").unwrap_err();
        assert!(matches!(err, BackendError::Agent(_)));
    }

    #[test]
    fn test_describe_environment() {
        let env = Environment::new()
            .with_string_input("myContent", "I'm a strawberry!", "The content to write.")
            .with_directory_input("workdir", "/target", "Project")
            .with_string_output("written", "Written content");

        let text = describe_environment(&env);
        assert!(text.contains("$myContent (string) = \"I'm a strawberry!\""));
        assert!(text.contains("$workdir (directory) at /target"));
        assert!(text.contains("- $written: Written content"));
    }

    #[tokio::test]
    async fn test_sync_fills_outputs_and_counts_tokens() {
        let provider = StubProvider::new(&[
            r#"{"reply": "published", "outputs": {"imageRef": "ttl.sh/hello-dagger-1234"}}"#,
            r#"{"reply": "scanned", "outputs": {"trivyOutput": "Vulnerability CVE-1"}}"#,
        ]);
        let runner = EvalRunner::new("stub-model").with_attempt(4);
        let mut runtime = LlmAgentRuntime::new(provider.clone(), &runner);
        let ctx = TurnContext::new();

        runtime.set_environment(
            Environment::new().with_string_output("imageRef", "Published docker image"),
        );
        runtime.set_prompt("publish the hello dagger app");
        runtime.sync(&ctx).await.unwrap();

        let env = runtime.environment();
        assert_eq!(
            env.output("imageRef").as_string().unwrap(),
            "ttl.sh/hello-dagger-1234"
        );
        assert_eq!(env.output("imageRef").description(), "Published docker image");

        runtime.set_prompt("check for its vulnerabilities");
        runtime.sync(&ctx).await.unwrap();

        assert_eq!(
            runtime.token_usage(),
            TokenCounts {
                input_tokens: 200,
                output_tokens: 20
            }
        );

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages[0].role, MessageRole::System);
        assert!(requests[0].messages[0].content.contains("(attempt 4)"));
        // system + first exchange + new user message
        assert_eq!(requests[1].messages.len(), 4);

        let history = runtime.history();
        assert!(history[0].starts_with("user: "));
        assert!(history.iter().any(|l| l.starts_with("assistant: ")));
    }

    #[tokio::test]
    async fn test_sync_without_prompt_skips_provider() {
        let provider = StubProvider::new(&[]);
        let mut runtime = LlmAgentRuntime::new(provider.clone(), &EvalRunner::new("m"));

        runtime.sync(&TurnContext::new()).await.unwrap();
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_is_consumed() {
        let provider = StubProvider::new(&[r#"{"reply": "ok"}"#]);
        let mut runtime = LlmAgentRuntime::new(provider.clone(), &EvalRunner::new("m"));
        let ctx = TurnContext::new();

        runtime.set_prompt("once");
        runtime.sync(&ctx).await.unwrap();
        runtime.sync(&ctx).await.unwrap();
        assert_eq!(provider.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_error_fails_turn() {
        let provider = StubProvider::new(&[]);
        let mut runtime = LlmAgentRuntime::new(provider, &EvalRunner::new("m"));

        runtime.set_prompt("anything");
        let err = runtime.sync(&TurnContext::new()).await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }

    #[test]
    fn test_tools_doc_names_model() {
        let runtime = LlmAgentRuntime::new(StubProvider::new(&[]), &EvalRunner::new("m"));
        assert!(runtime.tools_doc().starts_with("## stub-model (stub)"));
    }
}
