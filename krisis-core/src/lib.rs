//! # Krisis - scripted evaluations for agent backends
//!
//! Krisis drives an AI-agent backend through an ordered list of steps. Each
//! step mutates the agent's [`Environment`], sends a prompt, runs one turn
//! and checks the environment the agent hands back. The result of a run is
//! an [`EvalReport`](eval::EvalReport) with a markdown transcript.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use krisis_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = KrisisConfig::load()?;
//!     let context = EvalContext::new(
//!         EvalRunner::from_config(&config),
//!         Arc::new(DirectDriver::llm(config.llm.clone())),
//!     );
//!
//!     let scenario = scenarios::find("read-implicit-vars")?;
//!     let steps = scenario.steps(context.runner());
//!     let report = Orchestrator::new(context)
//!         .run(&TurnContext::new(), &steps)
//!         .await?;
//!
//!     println!("{}", report.report);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Bindings and environments**: copy-on-write inputs and outputs
//! - **Backend clients**: the [`BackendClient`] trait, built per run by a [`Driver`]
//! - **Direct driver**: an in-process agent runtime on top of an LLM provider
//! - **Orchestrator**: step loop, isolated assertions and report rendering
//!
//! The sandboxed driver lives in the `krisis-sandbox` crate.

pub mod binding;
pub mod client;
pub mod config;
pub mod context;
pub mod direct;
pub mod environment;
pub mod error;
pub mod eval;
pub mod handoff;
pub mod llm;
pub mod recorder;
pub mod runner;
pub mod scenarios;

pub use binding::{Binding, BindingValue, Handle, HandleKind};
pub use client::{BackendClient, Driver, EnvMutator, TokenCounts};
pub use context::TurnContext;
pub use environment::Environment;
pub use error::{BackendError, EvalError, Result};
pub use recorder::{CheckResult, Halt, Recorder};
pub use runner::{EvalContext, EvalRunner};

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::binding::{Binding, BindingValue, Handle, HandleKind};
    pub use crate::client::{BackendClient, Driver, TokenCounts};
    pub use crate::config::{DriverKind, KrisisConfig};
    pub use crate::context::TurnContext;
    pub use crate::direct::DirectDriver;
    pub use crate::environment::Environment;
    pub use crate::error::{BackendError, EvalError, Result};
    pub use crate::eval::{EvalReport, Orchestrator, Step};
    pub use crate::recorder::{CheckResult, Halt, Recorder};
    pub use crate::runner::{EvalContext, EvalRunner};
    pub use crate::scenarios;
}
