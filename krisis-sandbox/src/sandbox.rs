//! Sandbox capability boundary
//!
//! The sandboxed driver only needs a handful of operations from an isolated
//! execution environment: put a file in, run a command, checkpoint the
//! resulting state, get a file out. [`Sandbox`] captures exactly that, so the
//! container engine can be swapped (or faked in tests).

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::Result;

/// Host path made visible inside the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Everything needed to provision a sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxSpec {
    /// Base image
    pub image: String,

    pub mounts: Vec<Mount>,

    /// Plain environment variables
    pub env: BTreeMap<String, String>,

    /// Host variable names whose values are forwarded without being recorded
    pub secrets: Vec<String>,

    /// Working directory for executed commands
    pub workdir: Option<String>,

    /// Directories created at provisioning time
    pub dirs: Vec<String>,
}

/// A provisioned, stateful execution environment.
///
/// State written by `write_file` or `exec` is visible to every later call.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Identifier for logs
    fn id(&self) -> &str;

    /// Write a file, creating parent directories
    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<()>;

    /// Run `argv` and return its stdout; a non-zero exit is an error
    async fn exec(&mut self, argv: &[String]) -> Result<String>;

    /// Checkpoint the current state and return its identifier
    async fn commit(&mut self) -> Result<String>;

    /// Read a file
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Release every resource held by the sandbox
    async fn teardown(&mut self) -> Result<()>;
}

/// Creates sandboxes from a spec
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>>;
}
