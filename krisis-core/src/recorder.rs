//! Assertion recorder
//!
//! A minimal stand-in for a test framework's test handle. Checks log through
//! it and mark it failed or skipped. Instead of unwinding, [`Recorder::fatal`]
//! and [`Recorder::skip`] return a [`Halt`] that the check hands back as its
//! result, so a halted check never reaches past its own step.

use std::fmt::{self, Display, Write as _};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Why a check stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// The check failed and gave up
    Failed,
    /// The check opted out
    Skipped,
}

impl Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Halt::Failed => write!(f, "failed"),
            Halt::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of a check: `Ok(())` passes (unless [`Recorder::error`] was called)
pub type CheckResult = std::result::Result<(), Halt>;

/// Records failures, skips and log lines for one evaluation run
#[derive(Debug)]
pub struct Recorder {
    name: String,
    failed: bool,
    skipped: bool,
    logs: String,
    temp_dirs: Vec<TempDir>,
}

impl Recorder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failed: false,
            skipped: false,
            logs: String::new(),
            temp_dirs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a line to the log
    pub fn log(&mut self, message: impl Display) {
        let _ = writeln!(self.logs, "{}", message);
    }

    /// Log and mark failed, but keep going
    pub fn error(&mut self, message: impl Display) {
        self.log(message);
        self.failed = true;
    }

    /// Log, mark failed, and return the halt for the check to propagate
    #[must_use = "return the halt from the check"]
    pub fn fatal(&mut self, message: impl Display) -> Halt {
        self.error(message);
        Halt::Failed
    }

    /// Log, mark skipped, and return the halt for the check to propagate
    #[must_use = "return the halt from the check"]
    pub fn skip(&mut self, message: impl Display) -> Halt {
        self.log(message);
        self.skipped = true;
        Halt::Skipped
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn skipped(&self) -> bool {
        self.skipped
    }

    pub fn logs(&self) -> &str {
        &self.logs
    }

    /// Fail the check unless `condition` holds
    pub fn require(&mut self, condition: bool, message: impl Display) -> CheckResult {
        if condition {
            Ok(())
        } else {
            Err(self.fatal(message))
        }
    }

    /// Unwrap a result, failing the check with `message` and the error on `Err`
    pub fn require_ok<T, E: Display>(
        &mut self,
        result: std::result::Result<T, E>,
        message: impl Display,
    ) -> std::result::Result<T, Halt> {
        result.map_err(|e| self.fatal(format!("{}: {}", message, e)))
    }

    pub fn require_contains(
        &mut self,
        haystack: &str,
        needle: &str,
        message: impl Display,
    ) -> CheckResult {
        if haystack.contains(needle) {
            Ok(())
        } else {
            Err(self.fatal(format!(
                "{}: {:?} does not contain {:?}",
                message, haystack, needle
            )))
        }
    }

    pub fn require_eq<T: PartialEq + fmt::Debug>(
        &mut self,
        expected: T,
        actual: T,
        message: impl Display,
    ) -> CheckResult {
        if expected == actual {
            Ok(())
        } else {
            Err(self.fatal(format!(
                "{}: expected {:?}, got {:?}",
                message, expected, actual
            )))
        }
    }

    /// Create a scratch directory removed when the recorder is dropped
    pub fn temp_dir(&mut self) -> std::result::Result<PathBuf, Halt> {
        match tempfile::Builder::new().prefix("krisis-").tempdir() {
            Ok(dir) => {
                let path = dir.path().to_path_buf();
                self.temp_dirs.push(dir);
                Ok(path)
            }
            Err(e) => Err(self.fatal(format!("failed to create temp dir: {}", e))),
        }
    }

    /// Set a process environment variable for tooling a check shells out to
    pub fn set_env(&mut self, key: &str, value: &str) -> CheckResult {
        if key.is_empty() || key.contains('=') || key.contains('\0') || value.contains('\0') {
            return Err(self.fatal(format!("invalid environment variable {:?}", key)));
        }
        // SAFETY: the orchestrator runs checks sequentially on a single task
        // and the key/value were validated above.
        unsafe {
            std::env::set_var(key, value);
        }
        Ok(())
    }

    /// Change the process working directory
    pub fn chdir(&mut self, dir: impl AsRef<Path>) -> CheckResult {
        let dir = dir.as_ref();
        std::env::set_current_dir(dir)
            .map_err(|e| self.fatal(format!("failed to chdir to {}: {}", dir.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_marks_failed_and_continues() {
        let mut t = Recorder::new("eval");
        t.error("first problem");
        t.log("still running");

        assert!(t.failed());
        assert!(!t.skipped());
        assert_eq!(t.logs(), "first problem\nstill running\n");
    }

    #[test]
    fn test_fatal_returns_failed_halt() {
        let mut t = Recorder::new("eval");
        let check = |t: &mut Recorder, fail: bool| -> CheckResult {
            if fail {
                return Err(t.fatal("boom"));
            }
            t.log("reached the end");
            Ok(())
        };

        assert_eq!(check(&mut t, true), Err(Halt::Failed));
        assert!(t.failed());
        assert!(!t.logs().contains("reached the end"));
    }

    #[test]
    fn test_skip_returns_skipped_halt() {
        let mut t = Recorder::new("eval");
        assert_eq!(t.skip("not applicable"), Halt::Skipped);
        assert!(t.skipped());
        assert!(!t.failed());
    }

    #[test]
    fn test_require_helpers() {
        let mut t = Recorder::new("eval");
        assert!(t.require(true, "fine").is_ok());
        assert!(t.require_contains("ttl.sh/hello-dagger-7", "ttl.sh/hello-dagger-", "REF").is_ok());
        assert!(!t.failed());

        let parsed: std::result::Result<u32, Halt> =
            t.require_ok("12".parse::<u32>(), "parse");
        assert_eq!(parsed, Ok(12));

        assert_eq!(t.require_eq(1, 2, "mismatch"), Err(Halt::Failed));
        assert!(t.failed());
        assert!(t.logs().contains("expected 1, got 2"));
    }

    #[test]
    fn test_require_ok_logs_error() {
        let mut t = Recorder::new("eval");
        let result = t.require_ok("nope".parse::<u32>(), "parse count");
        assert_eq!(result, Err(Halt::Failed));
        assert!(t.logs().starts_with("parse count: "));
    }

    #[test]
    fn test_temp_dir_is_removed_on_drop() {
        let mut t = Recorder::new("eval");
        let dir = t.temp_dir().unwrap();
        assert!(dir.is_dir());
        drop(t);
        assert!(!dir.exists());
    }

    #[test]
    fn test_set_env_rejects_bad_key() {
        let mut t = Recorder::new("eval");
        assert_eq!(t.set_env("A=B", "x"), Err(Halt::Failed));
        assert_eq!(t.set_env("", "x"), Err(Halt::Failed));
    }

    #[test]
    fn test_set_env() {
        // Jail holds the process-wide env lock shared with the config tests.
        figment::Jail::expect_with(|_jail| {
            let mut t = Recorder::new("eval");
            assert!(t.set_env("KRISIS_RECORDER_SET_ENV_ONLY", "1").is_ok());
            assert_eq!(std::env::var("KRISIS_RECORDER_SET_ENV_ONLY").unwrap(), "1");
            // SAFETY: serialized by the jail lock; no other test reads this key.
            unsafe {
                std::env::remove_var("KRISIS_RECORDER_SET_ENV_ONLY");
            }
            Ok(())
        });
    }
}
