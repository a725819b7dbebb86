use std::{io::Write, path::PathBuf, time::Duration};

use encoding_rs::Encoding;
use regex::Regex;

use super::{CommandSpec, StreamState};
use crate::{
    asserts::{ByteCountAssert, ExitCodeAssert, LineAssert, ProcessOutput, line},
    awaits::LineAwait,
    capture::OutputCapture,
    consumer::{Redirect, RedirectTarget, StreamExpectations},
    error::Result,
    process::CommandProcess,
    result::CommandResult,
};

/// Expectations of one command execution: per-stream assertions plus the
/// exit code.
pub struct ExpectationsSpec {
    pub(crate) command: CommandSpec,
}

impl ExpectationsSpec {
    /// Configure assertions for stdout. An opened stream starts without any
    /// assertion; a stream never opened must stay silent.
    pub fn stdout(mut self) -> StreamSpec {
        let expectations = match std::mem::replace(
            &mut self.command.stdout_expectations,
            StreamState::Default,
        ) {
            StreamState::Configured(expectations) => expectations,
            StreamState::Default => StreamExpectations::empty(ProcessOutput::Stdout),
        };
        StreamSpec {
            command: self.command,
            expectations,
        }
    }

    /// Configure assertions for stderr.
    ///
    /// # Panics
    ///
    /// Panics if stderr is redirected into stdout.
    pub fn stderr(mut self) -> StreamSpec {
        assert!(
            !self.command.stderr_to_stdout,
            "You cannot set any assertions on stderr while you are redirecting stderr to stdout"
        );
        let expectations = match std::mem::replace(
            &mut self.command.stderr_expectations,
            StreamState::Default,
        ) {
            StreamState::Configured(expectations) => expectations,
            StreamState::Default => StreamExpectations::empty(ProcessOutput::Stderr),
        };
        StreamSpec {
            command: self.command,
            expectations,
        }
    }

    /// Assert that the process exits with the given code.
    pub fn exit_code_is(mut self, expected: i32) -> Self {
        self.command.exit_code = ExitCodeAssert::is(expected);
        self
    }

    /// Assert that the process exits with any of the given codes.
    pub fn exit_code_is_any_of(mut self, expected: impl IntoIterator<Item = i32>) -> Self {
        self.command.exit_code = ExitCodeAssert::any_of(expected);
        self
    }

    /// Assert that the exit code satisfies `predicate`; `description` may
    /// use the `${actual}` placeholder.
    pub fn exit_code_satisfies(
        mut self,
        predicate: impl Fn(i32) -> bool + Send + Sync + 'static,
        description: impl Into<String>,
    ) -> Self {
        self.command.exit_code = ExitCodeAssert::satisfies(predicate, description);
        self
    }

    /// Start the command and return the running process.
    pub fn start(self) -> Result<CommandProcess> {
        self.command.start()
    }

    /// Start the command and wait for it to terminate.
    pub fn execute(self) -> Result<CommandResult> {
        self.command.execute()
    }

    /// Start the command and wait at most `timeout` for it to terminate.
    pub fn execute_with_timeout(self, timeout: Duration) -> Result<CommandResult> {
        self.command.execute_with_timeout(timeout)
    }
}

/// Assertions applicable to one output stream of the command.
pub struct StreamSpec {
    command: CommandSpec,
    expectations: StreamExpectations,
}

impl StreamSpec {
    fn stream(&self) -> ProcessOutput {
        self.expectations.stream
    }

    fn push(mut self, assert: impl LineAssert + 'static) -> Self {
        self.expectations.asserts.push(Box::new(assert));
        self
    }

    fn fold(self) -> CommandSpec {
        let mut command = self.command;
        match self.expectations.stream {
            ProcessOutput::Stdout => {
                command.stdout_expectations = StreamState::Configured(self.expectations);
            }
            ProcessOutput::Stderr => {
                command.stderr_expectations = StreamState::Configured(self.expectations);
            }
        }
        command
    }

    /// Assert that each of the given whole lines occurs, in any order.
    pub fn has_lines<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stream = self.stream();
        self.push(line::has_lines(stream, collect(lines)))
    }

    /// Assert that none of the given whole lines occurs.
    pub fn does_not_have_lines<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stream = self.stream();
        self.push(line::does_not_have_lines(stream, collect(lines)))
    }

    /// Assert that each of the given substrings occurs in some line.
    pub fn has_lines_containing<I, S>(self, substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stream = self.stream();
        self.push(line::has_lines_containing(stream, collect(substrings), false))
    }

    /// Assert that each of the given substrings occurs in some line, using
    /// case insensitive comparison.
    pub fn has_lines_containing_case_insensitive<I, S>(self, substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stream = self.stream();
        self.push(line::has_lines_containing(stream, collect(substrings), true))
    }

    /// Assert that none of the given substrings occurs in any line.
    pub fn does_not_have_lines_containing<I, S>(self, substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stream = self.stream();
        self.push(line::does_not_have_lines_containing(
            stream,
            collect(substrings),
            false,
        ))
    }

    /// Assert that none of the given substrings occurs in any line, using
    /// case insensitive comparison.
    pub fn does_not_have_lines_containing_case_insensitive<I, S>(self, substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stream = self.stream();
        self.push(line::does_not_have_lines_containing(
            stream,
            collect(substrings),
            true,
        ))
    }

    /// Assert that each of the given patterns is found in some line
    /// (unanchored, like `Regex::find`).
    ///
    /// # Panics
    ///
    /// Panics if a pattern is not a valid regular expression; see
    /// [`StreamSpec::has_lines_matching_patterns`] for prebuilt patterns.
    pub fn has_lines_matching<I, S>(self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stream = self.stream();
        self.push(line::has_lines_matching(stream, compile(patterns)))
    }

    /// Assert that each of the given patterns is found in some line.
    pub fn has_lines_matching_patterns(self, patterns: impl IntoIterator<Item = Regex>) -> Self {
        let stream = self.stream();
        self.push(line::has_lines_matching(
            stream,
            patterns.into_iter().collect(),
        ))
    }

    /// Assert that none of the given patterns is found in any line.
    ///
    /// # Panics
    ///
    /// Panics if a pattern is not a valid regular expression; see
    /// [`StreamSpec::does_not_have_lines_matching_patterns`] for prebuilt
    /// patterns.
    pub fn does_not_have_lines_matching<I, S>(self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stream = self.stream();
        self.push(line::does_not_have_lines_matching(stream, compile(patterns)))
    }

    /// Assert that none of the given patterns is found in any line.
    pub fn does_not_have_lines_matching_patterns(
        self,
        patterns: impl IntoIterator<Item = Regex>,
    ) -> Self {
        let stream = self.stream();
        self.push(line::does_not_have_lines_matching(
            stream,
            patterns.into_iter().collect(),
        ))
    }

    /// Assert that the stream produced exactly the given number of lines.
    pub fn has_line_count(self, expected: u64) -> Self {
        let stream = self.stream();
        self.push(line::has_line_count(stream, expected))
    }

    /// Assert that the number of lines satisfies `predicate`; `description`
    /// may use the `${stream}` and `${actual}` placeholders.
    pub fn has_line_count_satisfying(
        self,
        predicate: impl Fn(u64) -> bool + Send + 'static,
        description: impl Into<String>,
    ) -> Self {
        let stream = self.stream();
        self.push(line::has_line_count_satisfying(stream, predicate, description))
    }

    /// Add a user-supplied stateful line assertion.
    pub fn lines_satisfy(self, assert: impl LineAssert + 'static) -> Self {
        self.push(assert)
    }

    /// Assert that the stream produced exactly the given number of bytes.
    pub fn has_byte_count(mut self, expected: u64) -> Self {
        let stream = self.stream();
        self.expectations.byte_count_assert =
            Some(ByteCountAssert::has_byte_count(stream, expected));
        self
    }

    /// Assert that the byte count satisfies `predicate`; `description` may
    /// use the `${stream}` and `${actual}` placeholders.
    pub fn has_byte_count_satisfying(
        mut self,
        predicate: impl Fn(u64) -> bool + Send + Sync + 'static,
        description: impl Into<String>,
    ) -> Self {
        let stream = self.stream();
        self.expectations.byte_count_assert =
            Some(ByteCountAssert::satisfies(stream, predicate, description));
        self
    }

    /// Assert that the stream produced zero bytes.
    pub fn is_empty(self) -> Self {
        self.has_byte_count(0)
    }

    /// Log each line at INFO level via `tracing`, target
    /// `cli_assured::stdout` or `cli_assured::stderr`.
    pub fn log(self) -> Self {
        let stream = self.stream();
        self.push(line::log(line::LogSink::Tracing(stream)))
    }

    /// Pass each line to the given consumer; it is called from the stream's
    /// worker thread.
    pub fn log_with(self, consumer: impl FnMut(&str) + Send + 'static) -> Self {
        self.push(line::log(line::LogSink::Custom(Box::new(consumer))))
    }

    /// Mirror the stream into the given file; opened and closed by the
    /// consumer.
    pub fn redirect(mut self, file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        self.expectations.redirect = Some(Redirect {
            label: file.display().to_string(),
            target: RedirectTarget::File(file),
        });
        self
    }

    /// Mirror the stream into the given sink. The sink is flushed at stream
    /// end but stays open; keep a duplicate handle (e.g. `File::try_clone`)
    /// to reuse the underlying resource afterwards.
    pub fn redirect_sink<W: Write + Send + 'static>(mut self, sink: W) -> Self {
        self.expectations.redirect = Some(Redirect {
            label: std::any::type_name::<W>().to_string(),
            target: RedirectTarget::Sink(Box::new(sink)),
        });
        self
    }

    /// Decode the stream with the given encoding instead of UTF-8.
    pub fn charset(mut self, charset: &'static Encoding) -> Self {
        self.expectations.charset = charset;
        self
    }

    /// Keep the first `max_head_lines` and last `max_tail_lines` lines in
    /// memory for failure reporting; the default is 16 and 16.
    pub fn capture(mut self, max_head_lines: usize, max_tail_lines: usize) -> Self {
        let stream = self.stream();
        self.expectations.capture =
            OutputCapture::new(Some(max_head_lines), Some(max_tail_lines), stream);
        self
    }

    /// Keep every line in memory for failure reporting.
    pub fn capture_all(mut self) -> Self {
        let stream = self.stream();
        self.expectations.capture = OutputCapture::capture_all(stream);
        self
    }

    /// Drain the stream without decoding lines or asserting anything; only
    /// the byte counter keeps running.
    pub fn dev_null(mut self) -> Self {
        let stream = self.stream();
        self.expectations.dev_null = true;
        self.expectations.asserts.clear();
        self.expectations.awaits.clear();
        self.expectations.capture = OutputCapture::no_capture(stream);
        self
    }

    /// Complete the given awaiter with the first matching line of this
    /// stream.
    pub fn await_line<T: Send + 'static>(mut self, awaited: &LineAwait<T>) -> Self {
        self.expectations.awaits.push(Box::new(awaited.clone()));
        self
    }

    /// Switch over to configuring stderr.
    pub fn stderr(self) -> StreamSpec {
        ExpectationsSpec {
            command: self.fold(),
        }
        .stderr()
    }

    /// Assert that the process exits with the given code.
    pub fn exit_code_is(self, expected: i32) -> ExpectationsSpec {
        ExpectationsSpec {
            command: self.fold(),
        }
        .exit_code_is(expected)
    }

    /// Assert that the process exits with any of the given codes.
    pub fn exit_code_is_any_of(
        self,
        expected: impl IntoIterator<Item = i32>,
    ) -> ExpectationsSpec {
        ExpectationsSpec {
            command: self.fold(),
        }
        .exit_code_is_any_of(expected)
    }

    /// Assert that the exit code satisfies `predicate`; `description` may
    /// use the `${actual}` placeholder.
    pub fn exit_code_satisfies(
        self,
        predicate: impl Fn(i32) -> bool + Send + Sync + 'static,
        description: impl Into<String>,
    ) -> ExpectationsSpec {
        ExpectationsSpec {
            command: self.fold(),
        }
        .exit_code_satisfies(predicate, description)
    }

    /// Start the command and return the running process.
    pub fn start(self) -> Result<CommandProcess> {
        self.fold().start()
    }

    /// Start the command and wait for it to terminate.
    pub fn execute(self) -> Result<CommandResult> {
        self.fold().execute()
    }

    /// Start the command and wait at most `timeout` for it to terminate.
    pub fn execute_with_timeout(self, timeout: Duration) -> Result<CommandResult> {
        self.fold().execute_with_timeout(timeout)
    }
}

fn collect<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

fn compile<I, S>(patterns: I) -> Vec<Regex>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|pattern| {
            let pattern = pattern.as_ref();
            match Regex::new(pattern) {
                Ok(regex) => regex,
                Err(error) => panic!("Invalid pattern '{pattern}': {error}"),
            }
        })
        .collect()
}
