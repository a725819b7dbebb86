use std::{fmt, sync::Arc, time::Duration};

use crate::{
    asserts::{Assert, FailureCollector},
    error::{AssertionError, TimeoutAssertionError},
};

/// The outcome of one command execution, with the composed assertion still
/// attached so the caller decides when to evaluate it.
pub struct CommandResult {
    command: String,
    exit_code: i32,
    duration: Duration,
    byte_count_stdout: u64,
    byte_count_stderr: u64,
    timeout_error: Option<TimeoutAssertionError>,
    asserts: Vec<Arc<dyn Assert + Send + Sync>>,
}

impl fmt::Debug for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandResult")
            .field("command", &self.command)
            .field("exit_code", &self.exit_code)
            .field("duration", &self.duration)
            .field("byte_count_stdout", &self.byte_count_stdout)
            .field("byte_count_stderr", &self.byte_count_stderr)
            .field("timed_out", &self.timeout_error.is_some())
            .finish_non_exhaustive()
    }
}

impl CommandResult {
    pub(crate) fn new(
        command: String,
        exit_code: i32,
        duration: Duration,
        byte_count_stdout: u64,
        byte_count_stderr: u64,
        timeout_error: Option<TimeoutAssertionError>,
        asserts: Vec<Arc<dyn Assert + Send + Sync>>,
    ) -> Self {
        Self {
            command,
            exit_code,
            duration,
            byte_count_stdout,
            byte_count_stderr,
            timeout_error,
            asserts,
        }
    }

    /// The rendered command line, as logged at spawn.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The exit code of the child, or `-1` when waiting timed out.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// How long the command ran (until the wait gave up, on timeout).
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Bytes the child wrote to stdout.
    pub fn byte_count_stdout(&self) -> u64 {
        self.byte_count_stdout
    }

    /// Bytes the child wrote to stderr; `0` when stderr was merged into
    /// stdout.
    pub fn byte_count_stderr(&self) -> u64 {
        self.byte_count_stderr
    }

    /// Whether the wait gave up before the child terminated.
    pub fn timed_out(&self) -> bool {
        self.timeout_error.is_some()
    }

    /// Evaluate every assertion attached to the execution and fail with the
    /// aggregated report if any of them is unsatisfied.
    ///
    /// Components evaluate in a fixed order (stdout, stderr, stdin, exit
    /// code) and the evaluation is pure over the collected state, so calling
    /// this again on the returned value reproduces the same outcome.
    pub fn assert_success(self) -> Result<Self, AssertionError> {
        let mut collector = FailureCollector::new(&self.command);
        if let Some(timeout_error) = &self.timeout_error {
            collector.exception(None, Arc::new(timeout_error.clone()));
        }
        for assert in &self.asserts {
            assert.evaluate(&mut collector);
        }
        collector.assert_satisfied()?;
        Ok(self)
    }

    /// Assert that the execution ran into the wait timeout.
    pub fn assert_timeout(self) -> Result<Self, AssertionError> {
        if self.timeout_error.is_some() {
            Ok(self)
        } else {
            Err(AssertionError::new(format!(
                "Expected a timeout when running\n\n    {}\n\nbut it terminated in {:?} with exit code {}",
                self.command, self.duration, self.exit_code
            )))
        }
    }
}
