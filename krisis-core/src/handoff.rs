//! File-based environment handoff
//!
//! A sandboxed agent process cannot see the harness's memory, so bindings
//! travel through JSON files: the harness writes the input snapshot before a
//! turn and reads the output snapshot the agent left behind afterwards. Both
//! files hold an array of `{key, value, description}` records.

use serde::{Deserialize, Serialize};

use crate::binding::BindingValue;
use crate::environment::Environment;
use crate::error::HandoffError;

/// Input key passed to the sandbox by mount rather than by value
pub const WORKDIR_KEY: &str = "workdir";

/// One binding on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub description: String,
}

/// A declared output slot, written so the agent knows what to produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedOutput {
    pub key: String,
    #[serde(default)]
    pub description: String,
}

/// Collect the string-valued inputs of `env` as handoff records.
///
/// `workdir` is skipped. Any other handle-valued input is rejected: handles
/// cannot cross the handoff and dropping them silently would hide data the
/// agent was promised.
pub fn input_records(env: &Environment) -> Result<Vec<HandoffRecord>, HandoffError> {
    let mut records = Vec::new();
    for binding in env.inputs() {
        if binding.key() == WORKDIR_KEY {
            continue;
        }
        match binding.value() {
            BindingValue::String(value) => records.push(HandoffRecord {
                key: binding.key().to_string(),
                value: value.clone(),
                description: binding.description().to_string(),
            }),
            BindingValue::Handle(handle) => {
                return Err(HandoffError::NonTextual {
                    key: binding.key().to_string(),
                    kind: handle.kind(),
                });
            }
            BindingValue::Absent => {}
        }
    }
    Ok(records)
}

/// Serialize the input snapshot
pub fn encode_inputs(env: &Environment) -> Result<String, HandoffError> {
    Ok(serde_json::to_string_pretty(&input_records(env)?)?)
}

/// Serialize the declared output slots
pub fn encode_expected_outputs(env: &Environment) -> Result<String, HandoffError> {
    let expected: Vec<ExpectedOutput> = env
        .outputs()
        .map(|b| ExpectedOutput {
            key: b.key().to_string(),
            description: b.description().to_string(),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&expected)?)
}

/// Parse a snapshot file
pub fn decode_records(content: &str) -> Result<Vec<HandoffRecord>, HandoffError> {
    Ok(serde_json::from_str(content)?)
}

/// Merge output records into `env`, last write wins per key
pub fn merge_outputs(env: &Environment, records: &[HandoffRecord]) -> Environment {
    records.iter().fold(env.clone(), |acc, record| {
        acc.with_output_value(&record.key, &record.value, &record.description)
    })
}
