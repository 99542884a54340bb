//! Agent session file
//!
//! The agent appends its conversation to a JSON-lines session file. The first
//! line is a metadata object carrying accumulated token counts.

use serde::{Deserialize, Serialize};

use krisis_core::TokenCounts;
use krisis_core::error::BackendError;

/// First line of the session file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMetadata {
    pub working_dir: String,
    pub description: String,
    pub message_count: u64,
    pub total_tokens: Option<u64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub accumulated_total_tokens: Option<u64>,
    pub accumulated_input_tokens: Option<u64>,
    pub accumulated_output_tokens: Option<u64>,
}

impl SessionMetadata {
    /// Metadata for a fresh session with zero usage
    pub fn seed(working_dir: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            description: "krisis evaluation".to_string(),
            message_count: 0,
            total_tokens: Some(0),
            input_tokens: Some(0),
            output_tokens: Some(0),
            accumulated_total_tokens: Some(0),
            accumulated_input_tokens: Some(0),
            accumulated_output_tokens: Some(0),
        }
    }

    /// Accumulated counts, falling back to the last-exchange counts
    pub fn token_counts(&self) -> TokenCounts {
        TokenCounts {
            input_tokens: self
                .accumulated_input_tokens
                .or(self.input_tokens)
                .unwrap_or(0),
            output_tokens: self
                .accumulated_output_tokens
                .or(self.output_tokens)
                .unwrap_or(0),
        }
    }
}

/// Session file contents for a new session
pub fn seed_contents(working_dir: &str) -> Result<String, BackendError> {
    let line = serde_json::to_string(&SessionMetadata::seed(working_dir))
        .map_err(|e| BackendError::Agent(format!("failed to encode session metadata: {}", e)))?;
    Ok(format!("{}\n", line))
}

/// One history entry per non-empty line
pub fn history_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse token usage from the metadata line
pub fn token_usage(content: &str) -> Result<TokenCounts, BackendError> {
    let first = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| BackendError::Agent("session file is empty".to_string()))?;

    let metadata: SessionMetadata = serde_json::from_str(first)
        .map_err(|e| BackendError::Agent(format!("malformed session metadata: {}", e)))?;

    Ok(metadata.token_counts())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = r#"{"working_dir":"/target","description":"Initial greeting exchange","message_count":2,"total_tokens":687,"input_tokens":673,"output_tokens":14,"accumulated_total_tokens":1373,"accumulated_input_tokens":1346,"accumulated_output_tokens":27}
{"role":"user","content":[{"type":"text","text":"publish the hello dagger app"}]}

{"role":"assistant","content":[{"type":"text","text":"Published."}]}
"#;

    #[test]
    fn test_accumulated_tokens() {
        assert_eq!(
            token_usage(SESSION).unwrap(),
            TokenCounts {
                input_tokens: 1346,
                output_tokens: 27
            }
        );
    }

    #[test]
    fn test_falls_back_to_exchange_tokens() {
        let content = r#"{"working_dir":"/target","input_tokens":10,"output_tokens":3}"#;
        assert_eq!(token_usage(content).unwrap().input_tokens, 10);
        assert_eq!(token_usage(content).unwrap().output_tokens, 3);
    }

    #[test]
    fn test_history_skips_blank_lines() {
        let lines = history_lines(SESSION);
        assert_eq!(lines.len(), 3);
        assert!(lines[2].contains("Published."));
    }

    #[test]
    fn test_seed_has_zero_usage() {
        let seed = seed_contents("/target").unwrap();
        assert!(seed.ends_with('\n'));
        assert_eq!(token_usage(&seed).unwrap(), TokenCounts::default());
    }

    #[test]
    fn test_empty_or_malformed_session() {
        assert!(token_usage("\n\n").is_err());
        assert!(token_usage("not json").is_err());
    }
}
