use std::sync::Mutex;

use super::{Assert, FailureCollector, format_message};

/// An assertion on the exit code of the command.
///
/// The supervisor records the actual exit code exactly once, when the child
/// terminates (or `-1` when waiting timed out); `evaluate` produces the
/// verdict afterwards.
pub struct ExitCodeAssert {
    expected: Expectation,
    actual: Mutex<Option<i32>>,
}

enum Expectation {
    Is(i32),
    AnyOf(Vec<i32>),
    Satisfies {
        predicate: Box<dyn Fn(i32) -> bool + Send + Sync>,
        description: String,
    },
}

impl ExitCodeAssert {
    /// Expect exactly the given exit code.
    pub fn is(expected: i32) -> Self {
        Self::new(Expectation::Is(expected))
    }

    /// Expect any of the given exit codes.
    pub fn any_of(expected: impl IntoIterator<Item = i32>) -> Self {
        Self::new(Expectation::AnyOf(expected.into_iter().collect()))
    }

    /// Expect the exit code to satisfy `predicate`; `description` may use
    /// the `${actual}` placeholder.
    pub fn satisfies(
        predicate: impl Fn(i32) -> bool + Send + Sync + 'static,
        description: impl Into<String>,
    ) -> Self {
        Self::new(Expectation::Satisfies {
            predicate: Box::new(predicate),
            description: description.into(),
        })
    }

    fn new(expected: Expectation) -> Self {
        Self {
            expected,
            actual: Mutex::new(None),
        }
    }

    /// Record the actual exit code; failures are reported via
    /// [`Assert::evaluate`], never from here.
    pub fn record(&self, exit_code: i32) {
        let mut actual = self.actual.lock().unwrap();
        if actual.is_none() {
            *actual = Some(exit_code);
        }
    }
}

impl Assert for ExitCodeAssert {
    fn evaluate(&self, collector: &mut FailureCollector) {
        let Some(actual) = *self.actual.lock().unwrap() else {
            return;
        };
        match &self.expected {
            Expectation::Is(expected) => {
                if actual != *expected {
                    collector.failure(None, format!("Expected exit code {expected} but was {actual}"));
                }
            }
            Expectation::AnyOf(expected) => {
                if !expected.contains(&actual) {
                    let codes = expected
                        .iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    collector.failure(
                        None,
                        format!("Expected any of exit codes {codes} but was {actual}"),
                    );
                }
            }
            Expectation::Satisfies {
                predicate,
                description,
            } => {
                if !predicate(actual) {
                    let message = format_message(description, |name| match name {
                        "actual" => Some(actual.to_string()),
                        _ => None,
                    });
                    collector.failure(None, message);
                }
            }
        }
    }
}
