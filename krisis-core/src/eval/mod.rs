//! Scripted multi-step evaluations
//!
//! An evaluation is an ordered list of [`Step`]s. For each step the
//! [`Orchestrator`] applies the environment mutation, sets the prompt, runs
//! one backend turn and then checks the resulting environment through a
//! [`Recorder`](crate::recorder::Recorder). The first failing step stops the
//! run; the outcome is always an [`EvalReport`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use krisis_core::config::LLMProviderConfig;
//! use krisis_core::direct::DirectDriver;
//! use krisis_core::eval::{Orchestrator, Step};
//! use krisis_core::{EvalContext, EvalRunner, TurnContext};
//!
//! # async fn example() -> krisis_core::Result<()> {
//! let context = EvalContext::new(
//!     EvalRunner::new("gpt-4o"),
//!     Arc::new(DirectDriver::llm(LLMProviderConfig::default())),
//! );
//!
//! let steps = [Step::new("publish the hello dagger app")
//!     .with_env(|env| env.with_string_output("imageRef", "Published docker image"))
//!     .with_check(|_ctx, t, env| {
//!         let image_ref = env.output("imageRef");
//!         let image = t.require_ok(image_ref.as_string(), "imageRef")?;
//!         t.require_contains(image, "ttl.sh/hello-dagger-", "unexpected image ref")
//!     })];
//!
//! let report = Orchestrator::new(context)
//!     .run(&TurnContext::new(), &steps)
//!     .await?;
//! println!("{}", report.report);
//! # Ok(())
//! # }
//! ```

mod orchestrator;
mod report;
mod step;

pub use orchestrator::Orchestrator;
pub use report::{EvalReport, RunState, StepOutcome, StepRecord, StopReason};
pub use step::{Check, Step};
