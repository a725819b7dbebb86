pub mod byte_count;
pub mod exit_code;
pub mod line;

pub use byte_count::ByteCountAssert;
pub use exit_code::ExitCodeAssert;
pub use line::LineAssert;

use std::fmt;

use crate::error::{AssertionError, SharedError};

#[cfg(test)]
mod tests;

/// Which output stream of the child a failure or capture belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutput {
    Stdout,
    Stderr,
}

impl ProcessOutput {
    /// The shell operator used when rendering a redirect of this stream.
    pub(crate) fn redirect_operator(self) -> &'static str {
        match self {
            ProcessOutput::Stdout => " > ",
            ProcessOutput::Stderr => " 2> ",
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            ProcessOutput::Stdout => "stdout",
            ProcessOutput::Stderr => "stderr",
        }
    }
}

impl fmt::Display for ProcessOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A component that can report its verdict into a [`FailureCollector`] after
/// the command terminated.
pub trait Assert {
    fn evaluate(&self, collector: &mut FailureCollector);
}

/// Failures, exceptions and the capture recorded for one stream bucket.
#[derive(Default)]
struct StreamFailures {
    failures: Vec<String>,
    exceptions: Vec<SharedError>,
    capture: Option<String>,
}

impl StreamFailures {
    fn sum(&self) -> usize {
        self.failures.len() + self.exceptions.len()
    }
}

/// Collects assertion failures and exceptions from all components of one
/// execution and renders the aggregated failure message.
///
/// Buckets are rendered in a fixed order: failures not tied to a stream
/// first, then `stdout`, then `stderr`. Within a bucket exceptions precede
/// failures, and the stream capture is appended when the bucket collected
/// anything.
pub struct FailureCollector {
    command: String,
    buckets: [StreamFailures; 3],
}

fn bucket_index(stream: Option<ProcessOutput>) -> usize {
    match stream {
        None => 0,
        Some(ProcessOutput::Stdout) => 1,
        Some(ProcessOutput::Stderr) => 2,
    }
}

impl FailureCollector {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            buckets: Default::default(),
        }
    }

    /// Record an assertion failure against the given stream.
    pub fn failure(&mut self, stream: Option<ProcessOutput>, description: impl Into<String>) {
        self.buckets[bucket_index(stream)]
            .failures
            .push(description.into());
    }

    /// Record an exception against the given stream.
    pub fn exception(&mut self, stream: Option<ProcessOutput>, exception: SharedError) {
        self.buckets[bucket_index(stream)].exceptions.push(exception);
    }

    /// Attach the rendered output capture of the given stream.
    pub fn capture(&mut self, stream: Option<ProcessOutput>, rendered: String) {
        self.buckets[bucket_index(stream)].capture = Some(rendered);
    }

    /// The number of failures and exceptions recorded for the given stream.
    pub fn sum(&self, stream: Option<ProcessOutput>) -> usize {
        self.buckets[bucket_index(stream)].sum()
    }

    /// Succeeds iff nothing was collected; otherwise returns the aggregated
    /// failure message.
    pub fn assert_satisfied(&self) -> Result<(), AssertionError> {
        let exception_count: usize = self.buckets.iter().map(|b| b.exceptions.len()).sum();
        let failure_count: usize = self.buckets.iter().map(|b| b.failures.len()).sum();
        if exception_count + failure_count == 0 {
            return Ok(());
        }

        let mut header = Vec::new();
        if exception_count > 0 {
            header.push(format!("{exception_count} exceptions"));
        }
        if failure_count > 0 {
            header.push(format!("{failure_count} assertion failures"));
        }
        let mut message = format!(
            "{} occurred while executing\n\n    {}",
            header.join(" and "),
            self.command
        );

        let mut exception_index = 1;
        let mut failure_index = 1;
        for bucket in &self.buckets {
            for exception in &bucket.exceptions {
                ensure_two_trailing_newlines(&mut message);
                message.push_str(&format!(
                    "Exception {exception_index}/{exception_count}: "
                ));
                render_exception(&mut message, exception.as_ref());
                exception_index += 1;
            }
            for failure in &bucket.failures {
                ensure_two_trailing_newlines(&mut message);
                message.push_str(&format!("Failure {failure_index}/{failure_count}: "));
                message.push_str(failure);
                failure_index += 1;
            }
            if let Some(capture) = &bucket.capture {
                ensure_two_trailing_newlines(&mut message);
                message.push_str(capture);
            }
        }

        Err(AssertionError::new(message))
    }
}

/// Renders an error followed by its source chain, the closest Rust analog of
/// a printed stack trace.
fn render_exception(out: &mut String, exception: &(dyn std::error::Error + 'static)) {
    out.push_str(&exception.to_string());
    let mut source = exception.source();
    while let Some(cause) = source {
        out.push_str(&format!("\nCaused by: {cause}"));
        source = cause.source();
    }
}

/// Makes sure the message ends with exactly one blank line before the next
/// block is appended.
fn ensure_two_trailing_newlines(message: &mut String) {
    let trailing = message.chars().rev().take_while(|c| *c == '\n').count();
    for _ in trailing..2 {
        message.push('\n');
    }
}

/// Expands `${name}` placeholders in user-supplied failure templates.
pub(crate) fn format_message(template: &str, eval: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let name = &rest[start + 2..start + 2 + end];
                match eval(name) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&rest[start..start + 3 + end]),
                }
                rest = &rest[start + 3 + end..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Renders a list of expected values the way failure messages quote them,
/// one per indented line.
pub(crate) fn list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("\n    ")
}
