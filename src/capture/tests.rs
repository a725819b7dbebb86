use super::*;

fn feed(capture: &mut OutputCapture, count: usize) {
    for i in 0..count {
        capture.capture(&format!("Line {i}"));
    }
}

const OMITTED_HINT: &str =
    "lines omitted; set stdout().capture(maxHeadLines, maxTailLines) or stdout().captureAll() to capure more lines]";

#[test]
fn head3_tail4() {
    let mut capture = OutputCapture::new(Some(3), Some(4), ProcessOutput::Stdout);
    feed(&mut capture, 10);

    let mut expected = String::from("stdout:\n");
    for i in 0..3 {
        expected.push_str(&format!("\n    Line {i}"));
    }
    expected.push_str(&format!("\n    ...\n    [3 {OMITTED_HINT}\n    ..."));
    for i in 6..10 {
        expected.push_str(&format!("\n    Line {i}"));
    }
    assert_eq!(capture.render(), expected);
}

#[test]
fn ten_lines_head0_tail4() {
    let mut capture = OutputCapture::new(Some(0), Some(4), ProcessOutput::Stdout);
    feed(&mut capture, 10);

    let mut expected = String::from("stdout:\n");
    expected.push_str(&format!("\n    [6 {OMITTED_HINT}\n    ..."));
    for i in 6..10 {
        expected.push_str(&format!("\n    Line {i}"));
    }
    assert_eq!(capture.render(), expected);
}

#[test]
fn two_lines_head0_tail4() {
    let mut capture = OutputCapture::new(Some(0), Some(4), ProcessOutput::Stdout);
    feed(&mut capture, 2);

    assert_eq!(capture.render(), "stdout:\n\n    Line 0\n    Line 1");
}

#[test]
fn ten_lines_head0_tail0() {
    let mut capture = OutputCapture::new(Some(0), Some(0), ProcessOutput::Stdout);
    feed(&mut capture, 10);

    assert_eq!(capture.render(), "stdout: <no lines captured>");
}

#[test]
fn six_lines_head4_tail4() {
    let mut capture = OutputCapture::new(Some(4), Some(4), ProcessOutput::Stdout);
    let mut expected = String::from("stdout:\n");
    for i in 0..6 {
        capture.capture(&format!("Line {i}"));
        expected.push_str(&format!("\n    Line {i}"));
    }
    assert_eq!(capture.render(), expected);
}

#[test]
fn two_lines_head4_tail0() {
    let mut capture = OutputCapture::new(Some(4), Some(0), ProcessOutput::Stdout);
    feed(&mut capture, 2);

    assert_eq!(capture.render(), "stdout:\n\n    Line 0\n    Line 1");
}

#[test]
fn six_lines_head4_tail0() {
    let mut capture = OutputCapture::new(Some(4), Some(0), ProcessOutput::Stdout);
    feed(&mut capture, 6);

    let mut expected = String::from("stdout:\n");
    for i in 0..4 {
        expected.push_str(&format!("\n    Line {i}"));
    }
    expected.push_str(&format!("\n    ...\n    [2 {OMITTED_HINT}"));
    assert_eq!(capture.render(), expected);
}

#[test]
fn capture_all_never_omits() {
    let mut capture = OutputCapture::capture_all(ProcessOutput::Stdout);
    let mut expected = String::from("stdout:\n");
    for i in 0..35 {
        capture.capture(&format!("Line {i}"));
        expected.push_str(&format!("\n    Line {i}"));
    }
    assert_eq!(capture.render(), expected);
}

#[test]
fn no_output() {
    let capture = OutputCapture::default_capture(ProcessOutput::Stderr);
    assert_eq!(capture.render(), "stderr: <no output>");
}
