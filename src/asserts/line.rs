use regex::Regex;

use super::{FailureCollector, ProcessOutput, format_message, list};

/// A stateful per-line assertion: `line` observes every streamed line in
/// order, `evaluate` reports the verdict once the stream was drained.
pub trait LineAssert: Send {
    fn line(&mut self, line: &str);
    fn evaluate(&self, collector: &mut FailureCollector);
}

/// Wraps the matched region of an offending line in `>>match<<`.
fn highlight(line: &str, start: usize, end: usize) -> String {
    if line.is_char_boundary(start) && line.is_char_boundary(end) {
        format!("{}>>{}<<{}", &line[..start], &line[start..end], &line[end..])
    } else {
        format!(">>{line}<<")
    }
}

const CASE_INSENSITIVE_CLAUSE: &str = "using case insensitive comparison ";

pub(crate) struct HasLines {
    stream: ProcessOutput,
    expected: Vec<String>,
    found: Vec<bool>,
}

pub(crate) fn has_lines(stream: ProcessOutput, expected: Vec<String>) -> HasLines {
    let found = vec![false; expected.len()];
    HasLines {
        stream,
        expected,
        found,
    }
}

impl LineAssert for HasLines {
    fn line(&mut self, line: &str) {
        for (expected, found) in self.expected.iter().zip(self.found.iter_mut()) {
            if expected == line {
                *found = true;
            }
        }
    }

    fn evaluate(&self, collector: &mut FailureCollector) {
        if self.found.iter().all(|f| *f) {
            return;
        }
        let tail = if self.found.iter().any(|f| *f) {
            let missing: Vec<&String> = self
                .expected
                .iter()
                .zip(&self.found)
                .filter(|(_, found)| !**found)
                .map(|(line, _)| line)
                .collect();
            format!(
                "but the following lines did not occur\n\n    {}",
                list(&missing)
            )
        } else {
            "but none of them occurred".to_string()
        };
        collector.failure(
            Some(self.stream),
            format!(
                "Expected lines\n\n    {}\n\nto occur in {} in any order, {}",
                list(&self.expected),
                self.stream,
                tail
            ),
        );
    }
}

pub(crate) struct DoesNotHaveLines {
    stream: ProcessOutput,
    expected: Vec<String>,
    seen: Vec<bool>,
}

pub(crate) fn does_not_have_lines(stream: ProcessOutput, expected: Vec<String>) -> DoesNotHaveLines {
    let seen = vec![false; expected.len()];
    DoesNotHaveLines {
        stream,
        expected,
        seen,
    }
}

impl LineAssert for DoesNotHaveLines {
    fn line(&mut self, line: &str) {
        for (expected, seen) in self.expected.iter().zip(self.seen.iter_mut()) {
            if expected == line {
                *seen = true;
            }
        }
    }

    fn evaluate(&self, collector: &mut FailureCollector) {
        if !self.seen.iter().any(|s| *s) {
            return;
        }
        let tail = if self.seen.iter().all(|s| *s) {
            "but all of them occurred".to_string()
        } else {
            let seen: Vec<&String> = self
                .expected
                .iter()
                .zip(&self.seen)
                .filter(|(_, seen)| **seen)
                .map(|(line, _)| line)
                .collect();
            format!("but some of them occurred\n\n    {}", list(&seen))
        };
        collector.failure(
            Some(self.stream),
            format!(
                "Expected none of the lines\n\n    {}\n\nto occur in {}, {}",
                list(&self.expected),
                self.stream,
                tail
            ),
        );
    }
}

pub(crate) struct HasLinesContaining {
    stream: ProcessOutput,
    substrings: Vec<String>,
    case_insensitive: bool,
    found: Vec<bool>,
}

pub(crate) fn has_lines_containing(
    stream: ProcessOutput,
    substrings: Vec<String>,
    case_insensitive: bool,
) -> HasLinesContaining {
    let substrings = if case_insensitive {
        substrings.into_iter().map(|s| s.to_lowercase()).collect()
    } else {
        substrings
    };
    let found = vec![false; substrings.len()];
    HasLinesContaining {
        stream,
        substrings,
        case_insensitive,
        found,
    }
}

impl LineAssert for HasLinesContaining {
    fn line(&mut self, line: &str) {
        let haystack = if self.case_insensitive {
            line.to_lowercase()
        } else {
            line.to_string()
        };
        for (substring, found) in self.substrings.iter().zip(self.found.iter_mut()) {
            if haystack.contains(substring.as_str()) {
                *found = true;
            }
        }
    }

    fn evaluate(&self, collector: &mut FailureCollector) {
        if self.found.iter().all(|f| *f) {
            return;
        }
        let clause = if self.case_insensitive {
            CASE_INSENSITIVE_CLAUSE
        } else {
            ""
        };
        let tail = if self.found.iter().any(|f| *f) {
            let missing: Vec<&String> = self
                .substrings
                .iter()
                .zip(&self.found)
                .filter(|(_, found)| !**found)
                .map(|(s, _)| s)
                .collect();
            format!(
                "but the following substrings did not occur\n\n    {}",
                list(&missing)
            )
        } else {
            "but none of them occurred".to_string()
        };
        collector.failure(
            Some(self.stream),
            format!(
                "Expected lines containing\n\n    {}\n\n{}to occur in {}, {}",
                list(&self.substrings),
                clause,
                self.stream,
                tail
            ),
        );
    }
}

pub(crate) struct DoesNotHaveLinesContaining {
    stream: ProcessOutput,
    substrings: Vec<String>,
    case_insensitive: bool,
    offending: Vec<String>,
}

pub(crate) fn does_not_have_lines_containing(
    stream: ProcessOutput,
    substrings: Vec<String>,
    case_insensitive: bool,
) -> DoesNotHaveLinesContaining {
    let substrings = if case_insensitive {
        substrings.into_iter().map(|s| s.to_lowercase()).collect()
    } else {
        substrings
    };
    DoesNotHaveLinesContaining {
        stream,
        substrings,
        case_insensitive,
        offending: Vec::new(),
    }
}

impl LineAssert for DoesNotHaveLinesContaining {
    fn line(&mut self, line: &str) {
        let haystack = if self.case_insensitive {
            line.to_lowercase()
        } else {
            line.to_string()
        };
        for substring in &self.substrings {
            if let Some(start) = haystack.find(substring.as_str()) {
                self.offending
                    .push(highlight(line, start, start + substring.len()));
            }
        }
    }

    fn evaluate(&self, collector: &mut FailureCollector) {
        if self.offending.is_empty() {
            return;
        }
        let clause = if self.case_insensitive {
            CASE_INSENSITIVE_CLAUSE
        } else {
            ""
        };
        collector.failure(
            Some(self.stream),
            format!(
                "Expected no lines containing\n\n    {}\n\n{}to occur in {}, \
                 but some of the substrings occur in lines\n\n    {}",
                list(&self.substrings),
                clause,
                self.stream,
                list(&self.offending)
            ),
        );
    }
}

pub(crate) struct HasLinesMatching {
    stream: ProcessOutput,
    patterns: Vec<Regex>,
    found: Vec<bool>,
}

pub(crate) fn has_lines_matching(stream: ProcessOutput, patterns: Vec<Regex>) -> HasLinesMatching {
    let found = vec![false; patterns.len()];
    HasLinesMatching {
        stream,
        patterns,
        found,
    }
}

impl LineAssert for HasLinesMatching {
    fn line(&mut self, line: &str) {
        for (pattern, found) in self.patterns.iter().zip(self.found.iter_mut()) {
            if pattern.is_match(line) {
                *found = true;
            }
        }
    }

    fn evaluate(&self, collector: &mut FailureCollector) {
        if self.found.iter().all(|f| *f) {
            return;
        }
        let sources: Vec<&str> = self.patterns.iter().map(|p| p.as_str()).collect();
        let tail = if self.found.iter().any(|f| *f) {
            let missing: Vec<&str> = sources
                .iter()
                .zip(&self.found)
                .filter(|(_, found)| !**found)
                .map(|(s, _)| *s)
                .collect();
            format!(
                "but the following patterns did not match\n\n    {}",
                list(&missing)
            )
        } else {
            "but none of them matched".to_string()
        };
        collector.failure(
            Some(self.stream),
            format!(
                "Expected lines matching\n\n    {}\n\nto occur in {}, {}",
                list(&sources),
                self.stream,
                tail
            ),
        );
    }
}

pub(crate) struct DoesNotHaveLinesMatching {
    stream: ProcessOutput,
    patterns: Vec<Regex>,
    offending: Vec<String>,
}

pub(crate) fn does_not_have_lines_matching(
    stream: ProcessOutput,
    patterns: Vec<Regex>,
) -> DoesNotHaveLinesMatching {
    DoesNotHaveLinesMatching {
        stream,
        patterns,
        offending: Vec::new(),
    }
}

impl LineAssert for DoesNotHaveLinesMatching {
    fn line(&mut self, line: &str) {
        for pattern in &self.patterns {
            if let Some(found) = pattern.find(line) {
                self.offending
                    .push(highlight(line, found.start(), found.end()));
            }
        }
    }

    fn evaluate(&self, collector: &mut FailureCollector) {
        if self.offending.is_empty() {
            return;
        }
        let sources: Vec<&str> = self.patterns.iter().map(|p| p.as_str()).collect();
        collector.failure(
            Some(self.stream),
            format!(
                "Expected no lines matching\n\n    {}\n\nto occur in {}, \
                 but some of the patterns matched the lines\n\n    {}",
                list(&sources),
                self.stream,
                list(&self.offending)
            ),
        );
    }
}

pub(crate) struct LineCount {
    stream: ProcessOutput,
    expected: Expected,
    count: u64,
}

enum Expected {
    Exactly(u64),
    Satisfies {
        predicate: Box<dyn Fn(u64) -> bool + Send>,
        description: String,
    },
}

pub(crate) fn has_line_count(stream: ProcessOutput, expected: u64) -> LineCount {
    LineCount {
        stream,
        expected: Expected::Exactly(expected),
        count: 0,
    }
}

pub(crate) fn has_line_count_satisfying(
    stream: ProcessOutput,
    predicate: impl Fn(u64) -> bool + Send + 'static,
    description: impl Into<String>,
) -> LineCount {
    LineCount {
        stream,
        expected: Expected::Satisfies {
            predicate: Box::new(predicate),
            description: description.into(),
        },
        count: 0,
    }
}

impl LineAssert for LineCount {
    fn line(&mut self, _line: &str) {
        self.count += 1;
    }

    fn evaluate(&self, collector: &mut FailureCollector) {
        match &self.expected {
            Expected::Exactly(expected) => {
                if self.count != *expected {
                    collector.failure(
                        Some(self.stream),
                        format!(
                            "Expected {expected} lines in {} but found {} lines",
                            self.stream, self.count
                        ),
                    );
                }
            }
            Expected::Satisfies {
                predicate,
                description,
            } => {
                if !predicate(self.count) {
                    let message = format_message(description, |name| match name {
                        "stream" => Some(self.stream.to_string()),
                        "actual" => Some(self.count.to_string()),
                        _ => None,
                    });
                    collector.failure(Some(self.stream), message);
                }
            }
        }
    }
}

/// The default assertion of a stream nobody configured expectations for.
pub(crate) struct HasNoLines {
    stream: ProcessOutput,
    count: u64,
}

pub(crate) fn has_no_lines(stream: ProcessOutput) -> HasNoLines {
    HasNoLines { stream, count: 0 }
}

impl LineAssert for HasNoLines {
    fn line(&mut self, _line: &str) {
        self.count += 1;
    }

    fn evaluate(&self, collector: &mut FailureCollector) {
        if self.count > 0 {
            collector.failure(
                Some(self.stream),
                format!("Expected no content to occur in {}", self.stream),
            );
        }
    }
}

/// Side-effect only: forwards every line to a logger and never fails.
pub(crate) struct Log {
    sink: LogSink,
}

pub(crate) enum LogSink {
    Tracing(ProcessOutput),
    Custom(Box<dyn FnMut(&str) + Send>),
}

pub(crate) fn log(sink: LogSink) -> Log {
    Log { sink }
}

impl LineAssert for Log {
    fn line(&mut self, line: &str) {
        match &mut self.sink {
            LogSink::Tracing(ProcessOutput::Stdout) => {
                tracing::info!(target: "cli_assured::stdout", "{line}")
            }
            LogSink::Tracing(ProcessOutput::Stderr) => {
                tracing::info!(target: "cli_assured::stderr", "{line}")
            }
            LogSink::Custom(consumer) => consumer(line),
        }
    }

    fn evaluate(&self, _collector: &mut FailureCollector) {}
}
