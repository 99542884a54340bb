use serde::Serialize;
use std::fmt::{self, Display, Write as _};

use crate::recorder::Recorder;

/// Why a run stopped before its last step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// An assertion failed or a check panicked
    Failed,
    /// The backend failed a turn
    Error,
}

/// Orchestrator progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    /// Executing the step with this 1-based index
    Running(usize),
    Stopped(StopReason),
    Completed,
}

/// How a single step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Passed,
    Failed,
    Skipped,
    Panicked,
    BackendError,
}

impl Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepOutcome::Passed => "passed",
            StepOutcome::Failed => "failed",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Panicked => "panicked",
            StepOutcome::BackendError => "backend error",
        };
        f.write_str(s)
    }
}

/// Per-step entry of the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// 1-based position in the step list
    pub index: usize,
    pub label: String,
    pub outcome: StepOutcome,
}

/// Result of one evaluation run
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    /// True iff the recorder neither failed nor skipped
    pub succeeded: bool,

    /// Markdown report
    pub report: String,

    /// Tools documentation from the backend
    pub tools_doc: String,

    pub input_tokens: u64,
    pub output_tokens: u64,

    pub final_state: RunState,

    /// Executed steps, in order
    pub steps: Vec<StepRecord>,
}

/// Accumulates the markdown report
#[derive(Debug, Default)]
pub(crate) struct ReportWriter {
    text: String,
}

impl ReportWriter {
    pub fn line(&mut self, line: impl Display) {
        let _ = writeln!(self.text, "{}", line);
    }

    pub fn blank(&mut self) {
        self.text.push('\n');
    }

    fn heading(&mut self, title: &str) {
        self.line(format_args!("### {}", title));
        self.blank();
    }

    pub fn panic(&mut self, message: &str, backtrace: &str) {
        self.line(format_args!("PANIC: {}", message));
        self.text.push_str(backtrace);
        if !backtrace.ends_with('\n') {
            self.blank();
        }
        self.blank();
    }

    pub fn backend_error(&mut self, step: usize, error: impl Display) {
        self.line(format_args!("BACKEND ERROR (step {}): {}", step, error));
    }

    pub fn steps(&mut self, steps: &[StepRecord]) {
        self.heading("Steps");
        for step in steps {
            self.line(format_args!("{}. {}: {}", step.index, step.label, step.outcome));
        }
        self.blank();
    }

    pub fn message_log_heading(&mut self) {
        self.heading("Message Log");
    }

    /// Numbered transcript, numbers right-aligned to the widest one
    pub fn message_log(&mut self, lines: &[String]) {
        let width = lines.len().to_string().len();
        for (i, line) in lines.iter().enumerate() {
            self.line(format_args!("    {:>width$} | {}", i + 1, line, width = width));
        }
    }

    pub fn token_cost(&mut self, input: u64, output: u64) {
        self.heading("Total Token Cost");
        self.line(format_args!("* Input Tokens: {}", input));
        self.line(format_args!("* Output Tokens: {}", output));
        self.blank();
    }

    /// Write the verdict; returns whether the run succeeded
    pub fn result(&mut self, recorder: &Recorder) -> bool {
        self.heading("Evaluation Result");
        if recorder.failed() {
            self.line(recorder.logs());
            self.line("FAILED");
            false
        } else if recorder.skipped() {
            self.line(recorder.logs());
            self.line("SKIPPED");
            false
        } else {
            self.line("SUCCESS");
            true
        }
    }

    pub fn finish(self) -> String {
        self.text
    }
}
