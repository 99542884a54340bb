//! Agent config template rendering
//!
//! Templates use shell-style `$NAME` / `${NAME}` placeholders. Only a fixed
//! set of names is known; anything else expands to the empty string.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;

use krisis_core::EvalRunner;

/// Built-in agent configuration
pub const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../templates/goose-config.yaml.tmpl");

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("placeholder pattern is valid")
});

/// Substitution values for a template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    values: BTreeMap<&'static str, String>,
}

impl TemplateVars {
    /// Variables describing the runner's model and provider
    pub fn for_runner(runner: &EvalRunner, snapshot_dir: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert("GOOSE_MODEL", runner.model.clone());
        values.insert("GOOSE_PROVIDER", runner.provider.as_str().to_string());
        values.insert("OPENAI_HOST", runner.host.clone().unwrap_or_default());
        values.insert("OPENAI_BASE_PATH", runner.base_path.clone().unwrap_or_default());
        values.insert("ENV_SNAPSHOT_DIR", snapshot_dir.to_string());
        Self { values }
    }

    pub fn get(&self, name: &str) -> &str {
        self.values.get(name).map(String::as_str).unwrap_or("")
    }
}

/// Expand every placeholder in `template`
pub fn render(template: &str, vars: &TemplateVars) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or("");
            vars.get(name).to_string()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TemplateVars {
        let runner = EvalRunner::new("gpt-4o");
        TemplateVars::for_runner(&runner, "/tmp/env_snapshot")
    }

    #[test]
    fn test_both_placeholder_forms() {
        let out = render("model=${GOOSE_MODEL} provider=$GOOSE_PROVIDER", &vars());
        assert_eq!(out, "model=gpt-4o provider=openai");
    }

    #[test]
    fn test_unknown_and_unset_expand_to_empty() {
        assert_eq!(render("[${HOME}][$OPENAI_HOST]", &vars()), "[][]");
    }

    #[test]
    fn test_text_without_placeholders_is_unchanged() {
        assert_eq!(render("price: 5$ flat", &vars()), "price: 5$ flat");
    }

    #[test]
    fn test_default_template() {
        let rendered = render(DEFAULT_CONFIG_TEMPLATE, &vars());
        assert!(rendered.contains("GOOSE_MODEL: gpt-4o"));
        assert!(rendered.contains("- /tmp/env_snapshot"));
        assert!(!rendered.contains("${"));
    }

    #[test]
    fn test_host_and_base_path() {
        let mut runner = EvalRunner::new("llama3");
        runner.host = Some("http://proxy:8080".to_string());
        runner.base_path = Some("v1/chat/completions".to_string());
        let vars = TemplateVars::for_runner(&runner, "/snap");
        assert_eq!(
            render("$OPENAI_HOST/$OPENAI_BASE_PATH", &vars),
            "http://proxy:8080/v1/chat/completions"
        );
    }
}
