//! Bindings: named, described, optionally-valued slots exchanged with a backend

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BindingError;

/// Kind of an opaque handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleKind {
    Directory,
    File,
    Socket,
    Secret,
}

impl HandleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HandleKind::Directory => "directory",
            HandleKind::File => "file",
            HandleKind::Socket => "socket",
            HandleKind::Secret => "secret",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to something owned by the execution engine.
///
/// Paths refer to the host. Secrets are referenced by the name of the host
/// environment variable holding them, so the value itself never lands in a
/// binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    kind: HandleKind,
    reference: PathBuf,
}

impl Handle {
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: HandleKind::Directory,
            reference: path.into(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: HandleKind::File,
            reference: path.into(),
        }
    }

    pub fn socket(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: HandleKind::Socket,
            reference: path.into(),
        }
    }

    /// Secret held in the named host environment variable
    pub fn secret(env_var: impl Into<String>) -> Self {
        Self {
            kind: HandleKind::Secret,
            reference: PathBuf::from(env_var.into()),
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn reference(&self) -> &Path {
        &self.reference
    }
}

/// Value carried by a binding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BindingValue {
    /// Declared output slot, not filled yet
    #[default]
    Absent,
    String(String),
    Handle(Handle),
}

impl BindingValue {
    fn type_name(&self) -> &'static str {
        match self {
            BindingValue::Absent => "absent value",
            BindingValue::String(_) => "string",
            BindingValue::Handle(handle) => handle.kind().as_str(),
        }
    }
}

/// A single named value exchanged between the harness and a backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    key: String,
    value: BindingValue,
    description: String,
}

impl Binding {
    pub fn new(
        key: impl Into<String>,
        value: BindingValue,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            description: description.into(),
        }
    }

    pub fn string(
        key: impl Into<String>,
        value: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::new(key, BindingValue::String(value.into()), description)
    }

    /// A declared slot with no value yet
    pub fn slot(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(key, BindingValue::Absent, description)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &BindingValue {
        &self.value
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_absent(&self) -> bool {
        matches!(self.value, BindingValue::Absent)
    }

    /// Read the value as a string.
    ///
    /// Fails with [`BindingError::Empty`] when nothing was bound and with
    /// [`BindingError::TypeMismatch`] when the value is a handle.
    pub fn as_string(&self) -> Result<&str, BindingError> {
        match &self.value {
            BindingValue::String(s) => Ok(s),
            BindingValue::Absent => Err(BindingError::Empty {
                key: self.key.clone(),
            }),
            other => Err(BindingError::TypeMismatch {
                key: self.key.clone(),
                expected: "string",
                found: other.type_name(),
            }),
        }
    }

    /// Read the value as a handle of the given kind
    pub fn as_handle(&self, kind: HandleKind) -> Result<&Handle, BindingError> {
        match &self.value {
            BindingValue::Handle(handle) if handle.kind() == kind => Ok(handle),
            BindingValue::Absent => Err(BindingError::Empty {
                key: self.key.clone(),
            }),
            other => Err(BindingError::TypeMismatch {
                key: self.key.clone(),
                expected: kind.as_str(),
                found: other.type_name(),
            }),
        }
    }
}
