//! Copy-on-write environment of input and output bindings
//!
//! Every `with_*` method takes `&self` and returns a new [`Environment`].
//! Unchanged bindings are shared between the old and new value, so a step can
//! keep a snapshot of the environment it started from without ever observing
//! later mutations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::binding::{Binding, BindingValue, Handle};

type BindingMap = BTreeMap<String, Arc<Binding>>;

/// Inputs and outputs visible to one evaluation run.
///
/// Names are unique within `inputs` and within `outputs`; an input and an
/// output may share a name.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    inputs: Arc<BindingMap>,
    outputs: Arc<BindingMap>,
}

impl Environment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string_input(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.with_input(Binding::string(key, value, description))
    }

    pub fn with_directory_input(
        &self,
        key: impl Into<String>,
        dir: impl Into<PathBuf>,
        description: impl Into<String>,
    ) -> Self {
        self.with_handle_input(key, Handle::directory(dir), description)
    }

    pub fn with_file_input(
        &self,
        key: impl Into<String>,
        file: impl Into<PathBuf>,
        description: impl Into<String>,
    ) -> Self {
        self.with_handle_input(key, Handle::file(file), description)
    }

    pub fn with_socket_input(
        &self,
        key: impl Into<String>,
        socket: impl Into<PathBuf>,
        description: impl Into<String>,
    ) -> Self {
        self.with_handle_input(key, Handle::socket(socket), description)
    }

    /// Bind a secret by the name of the host variable that holds it
    pub fn with_secret_input(
        &self,
        key: impl Into<String>,
        env_var: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.with_handle_input(key, Handle::secret(env_var), description)
    }

    pub fn with_handle_input(
        &self,
        key: impl Into<String>,
        handle: Handle,
        description: impl Into<String>,
    ) -> Self {
        self.with_input(Binding::new(key, BindingValue::Handle(handle), description))
    }

    /// Insert or replace an input binding
    pub fn with_input(&self, binding: Binding) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.inputs).insert(binding.key().to_string(), Arc::new(binding));
        next
    }

    /// Declare an output slot the backend is expected to fill
    pub fn with_string_output(
        &self,
        key: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.with_output(Binding::slot(key, description))
    }

    /// Fill (or add) an output with a string value.
    ///
    /// An empty description keeps the description of an already declared slot.
    pub fn with_output_value(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let mut description = description.into();
        if description.is_empty() {
            if let Some(existing) = self.outputs.get(&key) {
                description = existing.description().to_string();
            }
        }
        self.with_output(Binding::string(key, value, description))
    }

    /// Insert or replace an output binding
    pub fn with_output(&self, binding: Binding) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.outputs).insert(binding.key().to_string(), Arc::new(binding));
        next
    }

    /// Look up an output.
    ///
    /// Missing outputs come back as an absent binding rather than an error;
    /// callers find out through [`Binding::as_string`].
    pub fn output(&self, name: &str) -> Binding {
        self.outputs
            .get(name)
            .map(|b| b.as_ref().clone())
            .unwrap_or_else(|| Binding::slot(name, ""))
    }

    /// Look up an input, with the same zero-value semantics as [`Environment::output`]
    pub fn input(&self, name: &str) -> Binding {
        self.inputs
            .get(name)
            .map(|b| b.as_ref().clone())
            .unwrap_or_else(|| Binding::slot(name, ""))
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.contains_key(name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.contains_key(name)
    }

    /// Inputs in name order
    pub fn inputs(&self) -> impl Iterator<Item = &Binding> {
        self.inputs.values().map(|b| b.as_ref())
    }

    /// Outputs in name order
    pub fn outputs(&self) -> impl Iterator<Item = &Binding> {
        self.outputs.values().map(|b| b.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Whether two environments share the same storage for `name`'s input
    #[cfg(test)]
    fn shares_input(&self, other: &Environment, name: &str) -> bool {
        match (self.inputs.get(name), other.inputs.get(name)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
