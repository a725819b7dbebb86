use std::sync::Arc;

use super::*;
use crate::error::WorkerError;

fn io_error(message: &str) -> crate::error::SharedError {
    Arc::new(WorkerError::new(
        "cli-assert-io-1-stdout",
        std::io::Error::other(message.to_string()),
    ))
}

fn failure_message(collector: &FailureCollector) -> String {
    collector
        .assert_satisfied()
        .expect_err("expected failures")
        .message()
        .to_string()
}

#[test]
fn collector_orders_exceptions_before_failures() {
    let mut collector = FailureCollector::new("test-command");
    collector.failure(Some(ProcessOutput::Stdout), "f1");
    collector.failure(Some(ProcessOutput::Stdout), "f2");
    collector.exception(Some(ProcessOutput::Stdout), io_error("Hello 1"));
    collector.exception(Some(ProcessOutput::Stdout), io_error("Hello 2"));
    collector.exception(Some(ProcessOutput::Stdout), io_error("Hello 3"));

    let message = failure_message(&collector);
    assert_eq!(
        message,
        "3 exceptions and 2 assertion failures occurred while executing\n\
         \n\
         \x20   test-command\n\
         \n\
         Exception 1/3: cli-assert-io-1-stdout: Hello 1\n\
         Caused by: Hello 1\n\
         \n\
         Exception 2/3: cli-assert-io-1-stdout: Hello 2\n\
         Caused by: Hello 2\n\
         \n\
         Exception 3/3: cli-assert-io-1-stdout: Hello 3\n\
         Caused by: Hello 3\n\
         \n\
         Failure 1/2: f1\n\
         \n\
         Failure 2/2: f2"
    );
}

#[test]
fn collector_renders_buckets_in_stream_order() {
    let mut collector = FailureCollector::new("test-command");
    collector.failure(Some(ProcessOutput::Stderr), "on stderr");
    collector.failure(Some(ProcessOutput::Stdout), "on stdout");
    collector.failure(None, "no stream");
    collector.capture(Some(ProcessOutput::Stdout), "stdout: <no output>".to_string());

    let message = failure_message(&collector);
    assert_eq!(
        message,
        "3 assertion failures occurred while executing\n\
         \n\
         \x20   test-command\n\
         \n\
         Failure 1/3: no stream\n\
         \n\
         Failure 2/3: on stdout\n\
         \n\
         stdout: <no output>\n\
         \n\
         Failure 3/3: on stderr"
    );
}

#[test]
fn collector_header_uses_only_nonzero_terms() {
    let mut collector = FailureCollector::new("cmd");
    collector.exception(None, io_error("boom"));
    let message = failure_message(&collector);
    assert!(message.starts_with("1 exceptions occurred while executing"));

    let mut collector = FailureCollector::new("cmd");
    collector.failure(None, "nope");
    let message = failure_message(&collector);
    assert!(message.starts_with("1 assertion failures occurred while executing"));
}

#[test]
fn collector_is_satisfied_when_empty() {
    assert!(FailureCollector::new("cmd").assert_satisfied().is_ok());
}

#[test]
fn format_message_expands_placeholders() {
    let message = format_message("Expected ${expected} but got ${actual}", |name| {
        match name {
            "actual" => Some("1".to_string()),
            _ => None,
        }
    });
    assert_eq!(message, "Expected ${expected} but got 1");
}

#[test]
fn exit_code_is() {
    let assert = ExitCodeAssert::is(0);
    assert.record(0);
    let mut collector = FailureCollector::new("test-command");
    assert.evaluate(&mut collector);
    assert!(collector.assert_satisfied().is_ok());

    let assert = ExitCodeAssert::is(0);
    assert.record(1);
    let mut collector = FailureCollector::new("test-command");
    assert.evaluate(&mut collector);
    assert!(
        failure_message(&collector).ends_with("Failure 1/1: Expected exit code 0 but was 1")
    );
}

#[test]
fn exit_code_any_of() {
    let codes = [0, 1, 2];
    for code in codes {
        let assert = ExitCodeAssert::any_of(codes);
        assert.record(code);
        let mut collector = FailureCollector::new("test-command");
        assert.evaluate(&mut collector);
        assert!(collector.assert_satisfied().is_ok());
    }

    let assert = ExitCodeAssert::any_of(codes);
    assert.record(4);
    let mut collector = FailureCollector::new("test-command");
    assert.evaluate(&mut collector);
    assert!(
        failure_message(&collector).ends_with("Expected any of exit codes 0, 1, 2 but was 4")
    );
}

#[test]
fn exit_code_satisfies_expands_actual() {
    let assert = ExitCodeAssert::satisfies(|c| c == 42, "Expected 42 but got ${actual}");
    assert.record(1);
    let mut collector = FailureCollector::new("test-command");
    assert.evaluate(&mut collector);
    assert!(failure_message(&collector).ends_with("Failure 1/1: Expected 42 but got 1"));
}

#[test]
fn exit_code_records_only_once() {
    let assert = ExitCodeAssert::is(7);
    assert.record(7);
    assert.record(1);
    let mut collector = FailureCollector::new("test-command");
    assert.evaluate(&mut collector);
    assert!(collector.assert_satisfied().is_ok());
}

fn run_lines(assert: &mut dyn LineAssert, lines: &[&str]) -> Result<(), String> {
    for line in lines {
        assert.line(line);
    }
    let mut collector = FailureCollector::new("test-command");
    assert.evaluate(&mut collector);
    collector
        .assert_satisfied()
        .map_err(|e| e.message().to_string())
}

#[test]
fn has_lines_passes_in_any_order() {
    let mut assert = line::has_lines(
        ProcessOutput::Stdout,
        vec!["b".to_string(), "a".to_string()],
    );
    assert!(run_lines(&mut assert, &["a", "b", "c"]).is_ok());
}

#[test]
fn has_lines_reports_when_none_occurred() {
    let mut assert = line::has_lines(ProcessOutput::Stderr, vec!["Hello Joe".to_string()]);
    let message = run_lines(&mut assert, &[]).unwrap_err();
    assert!(message.ends_with(
        "Failure 1/1: Expected lines\n\
         \n\
         \x20   Hello Joe\n\
         \n\
         to occur in stderr in any order, but none of them occurred"
    ));
}

#[test]
fn has_lines_reports_the_missing_subset() {
    let mut assert = line::has_lines(
        ProcessOutput::Stdout,
        vec!["a".to_string(), "b".to_string()],
    );
    let message = run_lines(&mut assert, &["a"]).unwrap_err();
    assert!(message.contains("but the following lines did not occur\n\n    b"));
}

#[test]
fn does_not_have_lines_quotes_the_whole_line() {
    let mut assert = line::does_not_have_lines(
        ProcessOutput::Stdout,
        vec!["Hello Joe".to_string()],
    );
    let message = run_lines(&mut assert, &["Hello Joe"]).unwrap_err();
    assert!(message.ends_with(
        "Failure 1/1: Expected none of the lines\n\
         \n\
         \x20   Hello Joe\n\
         \n\
         to occur in stdout, but all of them occurred"
    ));
}

#[test]
fn has_lines_containing_case_insensitive_lowercases_the_listing() {
    let mut assert = line::has_lines_containing(
        ProcessOutput::Stderr,
        vec!["JOE".to_string()],
        true,
    );
    let message = run_lines(&mut assert, &[]).unwrap_err();
    assert!(message.ends_with(
        "Failure 1/1: Expected lines containing\n\
         \n\
         \x20   joe\n\
         \n\
         using case insensitive comparison to occur in stderr, but none of them occurred"
    ));
}

#[test]
fn does_not_have_lines_containing_highlights_the_match() {
    let mut assert = line::does_not_have_lines_containing(
        ProcessOutput::Stdout,
        vec!["Joe".to_string()],
        false,
    );
    let message = run_lines(&mut assert, &["Hello Joe"]).unwrap_err();
    assert!(message.ends_with(
        "Failure 1/1: Expected no lines containing\n\
         \n\
         \x20   Joe\n\
         \n\
         to occur in stdout, but some of the substrings occur in lines\n\
         \n\
         \x20   Hello >>Joe<<"
    ));
}

#[test]
fn has_lines_matching_uses_find_semantics() {
    let mut assert = line::has_lines_matching(
        ProcessOutput::Stdout,
        vec![regex::Regex::new("lo J.e").unwrap()],
    );
    assert!(run_lines(&mut assert, &["Hello Joe"]).is_ok());
}

#[test]
fn has_lines_matching_reports_the_pattern_source() {
    let mut assert = line::has_lines_matching(
        ProcessOutput::Stderr,
        vec![regex::Regex::new("lo J.e").unwrap()],
    );
    let message = run_lines(&mut assert, &[]).unwrap_err();
    assert!(message.ends_with(
        "Failure 1/1: Expected lines matching\n\
         \n\
         \x20   lo J.e\n\
         \n\
         to occur in stderr, but none of them matched"
    ));
}

#[test]
fn does_not_have_lines_matching_highlights_the_match_range() {
    let mut assert = line::does_not_have_lines_matching(
        ProcessOutput::Stdout,
        vec![regex::Regex::new("lo Jo.*").unwrap()],
    );
    let message = run_lines(&mut assert, &["Hello Joe"]).unwrap_err();
    assert!(message.ends_with(
        "Failure 1/1: Expected no lines matching\n\
         \n\
         \x20   lo Jo.*\n\
         \n\
         to occur in stdout, but some of the patterns matched the lines\n\
         \n\
         \x20   Hel>>lo Joe<<"
    ));
}

#[test]
fn line_count_counts_all_lines() {
    let mut assert = line::has_line_count(ProcessOutput::Stdout, 2);
    assert!(run_lines(&mut assert, &["a", "b"]).is_ok());

    let mut assert = line::has_line_count(ProcessOutput::Stdout, 1);
    let message = run_lines(&mut assert, &["a", "b"]).unwrap_err();
    assert!(message.ends_with("Expected 1 lines in stdout but found 2 lines"));
}

#[test]
fn line_count_predicate_expands_placeholders() {
    let mut assert = line::has_line_count_satisfying(
        ProcessOutput::Stderr,
        |count| count > 0 && count < 2,
        "Expected number of lines > 0 && < 2 in ${stream} but found ${actual} lines",
    );
    let message = run_lines(&mut assert, &[]).unwrap_err();
    assert!(message.ends_with(
        "Expected number of lines > 0 && < 2 in stderr but found 0 lines"
    ));
}

#[test]
fn has_no_lines_reports_any_content() {
    let mut assert = line::has_no_lines(ProcessOutput::Stderr);
    assert!(run_lines(&mut assert, &[]).is_ok());

    let mut assert = line::has_no_lines(ProcessOutput::Stderr);
    let message = run_lines(&mut assert, &["Hello stderr Joe"]).unwrap_err();
    assert!(message.ends_with("Failure 1/1: Expected no content to occur in stderr"));
}

#[test]
fn byte_count_exact() {
    let assert = ByteCountAssert::has_byte_count(ProcessOutput::Stdout, 20);
    assert.record(10);
    let mut collector = FailureCollector::new("test-command");
    assert.evaluate(&mut collector);
    assert!(
        failure_message(&collector)
            .ends_with("Failure 1/1: Expected 20 bytes in stdout but found 10 bytes")
    );
}

#[test]
fn byte_count_predicate_expands_placeholders() {
    let assert = ByteCountAssert::satisfies(
        ProcessOutput::Stdout,
        |count| count > 20,
        "Expected bytes > 20 in ${stream} but found ${actual} bytes",
    );
    assert.record(11);
    let mut collector = FailureCollector::new("test-command");
    assert.evaluate(&mut collector);
    assert!(
        failure_message(&collector)
            .ends_with("Expected bytes > 20 in stdout but found 11 bytes")
    );
}
