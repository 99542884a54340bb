use std::fmt;
use std::sync::Arc;

use crate::client::EnvMutator;
use crate::context::TurnContext;
use crate::environment::Environment;
use crate::recorder::{CheckResult, Recorder};

/// Assertion run against the environment a turn produced
pub type Check =
    Arc<dyn Fn(&TurnContext, &mut Recorder, &Environment) -> CheckResult + Send + Sync>;

/// One (environment mutation, prompt, check) step of an evaluation
#[derive(Clone, Default)]
pub struct Step {
    prompt: String,
    name: Option<String>,
    mutator: Option<EnvMutator>,
    check: Option<Check>,
}

impl Step {
    /// Step sending `prompt`; an empty prompt leaves the backend's prompt untouched
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Label used in the report and the assertion span
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mutate the environment before the turn
    pub fn with_env<F>(mut self, mutator: F) -> Self
    where
        F: Fn(&Environment) -> Environment + Send + Sync + 'static,
    {
        self.mutator = Some(Arc::new(mutator));
        self
    }

    /// Check the environment after the turn
    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&TurnContext, &mut Recorder, &Environment) -> CheckResult + Send + Sync + 'static,
    {
        self.check = Some(Arc::new(check));
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn mutator(&self) -> Option<&EnvMutator> {
        self.mutator.as_ref()
    }

    pub fn check(&self) -> Option<&Check> {
        self.check.as_ref()
    }

    /// Name if set, else the prompt
    pub fn label(&self) -> &str {
        match &self.name {
            Some(name) => name.as_str(),
            None if !self.prompt.is_empty() => self.prompt.as_str(),
            None => "(no prompt)",
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("prompt", &self.prompt)
            .field("name", &self.name)
            .field("mutator", &self.mutator.is_some())
            .field("check", &self.check.is_some())
            .finish()
    }
}
