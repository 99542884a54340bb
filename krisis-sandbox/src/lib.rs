//! # Krisis sandbox driver
//!
//! Runs an agent CLI inside a container and exchanges the evaluation
//! environment with it through JSON files in a snapshot directory. See
//! [`SandboxedDriver`] for the turn protocol.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use krisis_core::prelude::*;
//! use krisis_sandbox::SandboxedDriver;
//!
//! # async fn run() -> Result<()> {
//! let config = KrisisConfig::load()?;
//! let context = EvalContext::new(
//!     EvalRunner::from_config(&config),
//!     Arc::new(SandboxedDriver::docker(config.sandbox.clone())),
//! );
//! let steps = scenarios::find("trivy-scan")?.steps(context.runner());
//! let report = Orchestrator::new(context).run(&TurnContext::new(), &steps).await?;
//! println!("{}", report.report);
//! # Ok(())
//! # }
//! ```

pub mod docker;
pub mod driver;
pub mod error;
pub mod sandbox;
pub mod session;
pub mod template;

pub use docker::{DockerProvider, DockerSandbox};
pub use driver::{SandboxedClient, SandboxedDriver};
pub use error::{Result, SandboxError};
pub use sandbox::{Mount, Sandbox, SandboxProvider, SandboxSpec};
