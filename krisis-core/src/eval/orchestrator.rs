use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use tracing::{Instrument, debug, info, info_span, warn};

use super::report::{EvalReport, ReportWriter, RunState, StepOutcome, StepRecord, StopReason};
use super::step::Step;
use crate::client::BackendClient;
use crate::context::TurnContext;
use crate::error::{EvalError, Result};
use crate::recorder::{CheckResult, Halt, Recorder};
use crate::runner::EvalContext;

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a hook that stashes the backtrace of panics raised inside checks.
/// Panics elsewhere go to the previous hook unchanged.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let trace = Backtrace::force_capture().to_string();
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

struct CaughtPanic {
    message: String,
    backtrace: String,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run a check, turning a panic into a value
fn run_isolated<F>(check: F) -> std::result::Result<CheckResult, CaughtPanic>
where
    F: FnOnce() -> CheckResult,
{
    install_panic_hook();
    CAPTURING.with(|c| c.set(true));
    let result = panic::catch_unwind(AssertUnwindSafe(check));
    CAPTURING.with(|c| c.set(false));

    result.map_err(|payload| CaughtPanic {
        message: panic_message(payload.as_ref()),
        backtrace: LAST_BACKTRACE
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_default(),
    })
}

/// Drives a list of steps against one backend client and renders the report
#[derive(Debug)]
pub struct Orchestrator {
    context: EvalContext,
    name: String,
}

impl Orchestrator {
    pub fn new(context: EvalContext) -> Self {
        Self {
            context,
            name: "eval".to_string(),
        }
    }

    /// Name given to the recorder
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn context(&self) -> &EvalContext {
        &self.context
    }

    /// Build a client from the context and run `steps` against it.
    ///
    /// Only client construction failures are returned as errors; everything
    /// that goes wrong afterwards ends up in the report.
    pub async fn run(&self, ctx: &TurnContext, steps: &[Step]) -> Result<EvalReport> {
        let mut client = self.context.new_client().await.map_err(|e| match e {
            EvalError::Setup(_) | EvalError::Configuration(_) => e,
            other => EvalError::Setup(other.to_string()),
        })?;

        Ok(self.run_with_client(client.as_mut(), ctx, steps).await)
    }

    /// Run `steps` against an existing client
    pub async fn run_with_client(
        &self,
        client: &mut dyn BackendClient,
        ctx: &TurnContext,
        steps: &[Step],
    ) -> EvalReport {
        info!(
            eval = %self.name,
            driver = %self.context.driver_name(),
            steps = steps.len(),
            "starting evaluation"
        );

        let mut recorder = Recorder::new(self.name.clone());
        let mut out = ReportWriter::default();
        let mut records = Vec::with_capacity(steps.len());
        let mut state = RunState::Pending;

        for (i, step) in steps.iter().enumerate() {
            let index = i + 1;
            state = RunState::Running(index);

            if let Some(mutator) = step.mutator() {
                client.set_environment(&**mutator);
            }
            if !step.prompt().is_empty() {
                client.set_prompt(step.prompt());
            }

            let turn = client.run_turn(ctx).await;
            let turn_failed = turn.is_err();

            let span = info_span!("assert", step = index, prompt = %step.label());
            let outcome = async {
                // leading assertion: the turn itself completed
                if let Err(err) = &turn {
                    warn!(error = %err, "backend turn failed");
                    out.backend_error(index, err);
                    recorder.error(format!("backend turn did not complete: {}", err));
                    return StepOutcome::BackendError;
                }

                let Some(check) = step.check() else {
                    return StepOutcome::Passed;
                };

                let env = match client.get_environment(ctx).await {
                    Ok(env) => env,
                    Err(err) => {
                        warn!(error = %err, "failed to read environment");
                        out.backend_error(index, &err);
                        recorder.error(format!("failed to read environment: {}", err));
                        return StepOutcome::BackendError;
                    }
                };

                // The recorder is run-wide; only flags raised by this check count.
                let failed_before = recorder.failed();
                let skipped_before = recorder.skipped();
                match run_isolated(|| check(ctx, &mut recorder, &env)) {
                    Ok(Err(Halt::Failed)) => StepOutcome::Failed,
                    Ok(Err(Halt::Skipped)) => StepOutcome::Skipped,
                    Ok(Ok(())) if recorder.failed() && !failed_before => StepOutcome::Failed,
                    Ok(Ok(())) if recorder.skipped() && !skipped_before => StepOutcome::Skipped,
                    Ok(Ok(())) => StepOutcome::Passed,
                    Err(caught) => {
                        warn!(panic = %caught.message, "check panicked");
                        out.panic(&caught.message, &caught.backtrace);
                        recorder.error(format!("check panicked: {}", caught.message));
                        StepOutcome::Panicked
                    }
                }
            }
            .instrument(span)
            .await;

            debug!(step = index, outcome = %outcome, "step finished");
            records.push(StepRecord {
                index,
                label: step.label().to_string(),
                outcome,
            });

            if turn_failed || outcome == StepOutcome::BackendError {
                state = RunState::Stopped(StopReason::Error);
                break;
            }
            if recorder.failed() {
                state = RunState::Stopped(StopReason::Failed);
                break;
            }
        }

        if !matches!(state, RunState::Stopped(_)) {
            state = RunState::Completed;
        }

        out.steps(&records);

        out.message_log_heading();
        match client.history(ctx).await {
            Ok(lines) => out.message_log(&lines),
            Err(err) => out.line(format_args!("Failed to get history: {}", err)),
        }

        let (input_tokens, output_tokens) = match client.token_usage(ctx).await {
            Ok(counts) => (counts.input_tokens, counts.output_tokens),
            Err(err) => {
                out.line(format_args!("Failed to get input tokens: {}", err));
                out.line(format_args!("Failed to get output tokens: {}", err));
                (0, 0)
            }
        };
        out.blank();

        out.token_cost(input_tokens, output_tokens);
        let succeeded = out.result(&recorder);

        let tools_doc = match client.tools_doc(ctx).await {
            Ok(doc) => doc,
            Err(err) => {
                out.line(format_args!("Failed to get tools: {}", err));
                String::new()
            }
        };

        info!(
            eval = %self.name,
            succeeded,
            state = ?state,
            input_tokens,
            output_tokens,
            "evaluation finished"
        );

        EvalReport {
            succeeded,
            report: out.finish(),
            tools_doc,
            input_tokens,
            output_tokens,
            final_state: state,
            steps: records,
        }
    }
}
