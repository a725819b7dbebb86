use std::sync::atomic::{AtomicU64, Ordering};

use super::{Assert, FailureCollector, ProcessOutput, format_message};

/// An assertion on the number of bytes a stream produced.
///
/// The consumer records the final byte count after its read loop drained the
/// pipe; the verdict is produced later, from the evaluating thread.
pub struct ByteCountAssert {
    stream: ProcessOutput,
    expected: Expectation,
    actual: AtomicU64,
}

enum Expectation {
    Exactly(u64),
    Satisfies {
        predicate: Box<dyn Fn(u64) -> bool + Send + Sync>,
        description: String,
    },
}

impl ByteCountAssert {
    /// Expect exactly `expected` bytes.
    pub(crate) fn has_byte_count(stream: ProcessOutput, expected: u64) -> Self {
        Self {
            stream,
            expected: Expectation::Exactly(expected),
            actual: AtomicU64::new(0),
        }
    }

    /// Expect the byte count to satisfy `predicate`; `description` may use
    /// the `${stream}` and `${actual}` placeholders.
    pub(crate) fn satisfies(
        stream: ProcessOutput,
        predicate: impl Fn(u64) -> bool + Send + Sync + 'static,
        description: impl Into<String>,
    ) -> Self {
        Self {
            stream,
            expected: Expectation::Satisfies {
                predicate: Box::new(predicate),
                description: description.into(),
            },
            actual: AtomicU64::new(0),
        }
    }

    pub(crate) fn record(&self, actual: u64) {
        self.actual.store(actual, Ordering::SeqCst);
    }
}

impl Assert for ByteCountAssert {
    fn evaluate(&self, collector: &mut FailureCollector) {
        let actual = self.actual.load(Ordering::SeqCst);
        match &self.expected {
            Expectation::Exactly(expected) => {
                if actual != *expected {
                    collector.failure(
                        Some(self.stream),
                        format!(
                            "Expected {expected} bytes in {} but found {actual} bytes",
                            self.stream
                        ),
                    );
                }
            }
            Expectation::Satisfies {
                predicate,
                description,
            } => {
                if !predicate(actual) {
                    let message = format_message(description, |name| match name {
                        "stream" => Some(self.stream.to_string()),
                        "actual" => Some(actual.to_string()),
                        _ => None,
                    });
                    collector.failure(Some(self.stream), message);
                }
            }
        }
    }
}
