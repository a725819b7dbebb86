use super::*;

fn feed<T: Send + 'static>(awaited: &LineAwait<T>, lines: &[&str]) {
    for line in lines {
        awaited.accept(line);
    }
}

#[test]
fn line_completes_on_exact_match() {
    let awaited = Await::line("Sleeped for 100 ms");
    feed(&awaited, &["About to sleep for 100 ms", "Sleeped for 100 ms"]);
    assert_eq!(
        awaited.wait_for(Duration::from_secs(1)).unwrap(),
        "Sleeped for 100 ms"
    );
}

#[test]
fn line_containing_completes_on_substring() {
    let awaited = Await::line_containing("ed for 100 ");
    feed(&awaited, &["Sleeped for 100 ms"]);
    assert_eq!(
        awaited.wait_for(Duration::from_secs(1)).unwrap(),
        "Sleeped for 100 ms"
    );
}

#[test]
fn line_containing_case_insensitive_folds_case() {
    let awaited = Await::line_containing_case_insensitive("ed FOR 100 ");
    feed(&awaited, &["Sleeped for 100 ms"]);
    assert_eq!(
        awaited.wait_for(Duration::from_secs(1)).unwrap(),
        "Sleeped for 100 ms"
    );
}

#[test]
fn line_matching_without_group_returns_the_line() {
    let awaited = Await::line_matching(r"ed for 1\d\d ");
    feed(&awaited, &["Sleeped for 100 ms"]);
    assert_eq!(
        awaited.wait_for(Duration::from_secs(1)).unwrap(),
        "Sleeped for 100 ms"
    );
}

#[test]
fn line_matching_with_group_extracts_the_group() {
    let awaited = Await::line_matching(r"listening on port: (\d+)").map(|s| s.parse::<u32>().unwrap());
    feed(&awaited, &["hello-server listening on port: 8347"]);
    assert_eq!(awaited.wait_for(Duration::from_secs(1)).unwrap(), 8347);
}

#[test]
fn line_count_completes_on_the_nth_line() {
    let awaited = Await::line_count(2);
    feed(&awaited, &["first", "second", "third"]);
    assert_eq!(awaited.wait_for(Duration::from_secs(1)).unwrap(), "second");
}

#[test]
fn first_match_wins() {
    let awaited = Await::line_containing("match");
    feed(&awaited, &["match one", "match two"]);
    assert_eq!(awaited.wait_for(Duration::from_secs(1)).unwrap(), "match one");
}

#[test]
fn wait_for_times_out_with_description() {
    let awaited = Await::line("Sleeped for 123 ms");
    let error = awaited.wait_for(Duration::from_millis(50)).unwrap_err();
    assert_eq!(
        error.to_string(),
        "Awaiting line 'Sleeped for 123 ms' has not finished within 50 ms"
    );
}

#[test]
fn timeout_descriptions_match_the_constructors() {
    let cases: Vec<(LineAwait<String>, &str)> = vec![
        (Await::line_containing("ed for 123 "), "line containing 'ed for 123 '"),
        (
            Await::line_containing_case_insensitive("ed FOR 123 "),
            "line containing case insensitive 'ed FOR 123 '",
        ),
        (Await::line_matching(r"ed for 1\d5 "), r"line matching 'ed for 1\d5 '"),
        (Await::line_count(5), "line count 5"),
        (Await::line_satisfying("foo", |_| false), "foo"),
    ];
    for (awaited, description) in cases {
        let error = awaited.wait_for(Duration::from_millis(10)).unwrap_err();
        assert_eq!(
            error.to_string(),
            format!("Awaiting {description} has not finished within 10 ms")
        );
    }
}

#[test]
fn panicking_predicate_fails_the_promise() {
    let awaited = Await::line_satisfying("bar", |_| panic!("foo"));
    awaited.accept("anything");
    let error = awaited.wait_for(Duration::from_secs(1)).unwrap_err();
    assert_eq!(error.to_string(), "Exception thrown when awaiting bar");
    let source = std::error::Error::source(&error).unwrap();
    assert_eq!(source.to_string(), "foo");
}

#[test]
fn accept_is_a_no_op_once_completed() {
    let mut calls = 0u32;
    let awaited = Await::line_satisfying("counting", move |_| {
        calls += 1;
        assert!(calls <= 1, "predicate called after completion");
        true
    });
    awaited.accept("first");
    awaited.accept("second");
    assert_eq!(awaited.wait_for(Duration::from_secs(1)).unwrap(), "first");
}

#[test]
fn clones_share_the_promise() {
    let awaited = Await::line("ready");
    let registered = awaited.clone();
    registered.accept("ready");
    assert_eq!(awaited.wait_for(Duration::from_secs(1)).unwrap(), "ready");
}

#[test]
fn map_chains_conversions() {
    let awaited = Await::line("upper").map(|s| s.to_uppercase());
    awaited.accept("upper");
    assert_eq!(awaited.wait_for(Duration::from_secs(1)).unwrap(), "UPPER");
}
