use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use regex::Regex;

use crate::error::{AwaitError, PanicError, SharedError};

#[cfg(test)]
mod tests;

/// Entry points for awaiting a condition on the line output of a command.
///
/// ```no_run
/// use std::time::Duration;
/// use cli_assured::{Await, command};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let port = Await::line_matching(r"listening on port: (\d+)")
///     .map(|s| s.parse::<u16>().unwrap());
/// let proc = command("start-server", ["--random-port"])
///     .then()
///     .stdout()
///     .await_line(&port)
///     .start()?;
/// let port = port.wait_for(Duration::from_secs(10))?;
/// // connect and test ...
/// # drop(proc); Ok(())
/// # }
/// ```
pub struct Await;

impl Await {
    /// Completed by the first line equal to `line`.
    pub fn line(line: impl Into<String>) -> LineAwait<String> {
        let line = line.into();
        let description = format!("line '{line}'");
        LineAwait::from_matcher(description, move |l: &str| {
            (l == line).then(|| l.to_string())
        })
    }

    /// Completed by the first line containing `substring`.
    pub fn line_containing(substring: impl Into<String>) -> LineAwait<String> {
        let substring = substring.into();
        let description = format!("line containing '{substring}'");
        LineAwait::from_matcher(description, move |l: &str| {
            l.contains(&substring).then(|| l.to_string())
        })
    }

    /// Completed by the first line containing `substring`, compared case
    /// insensitively.
    pub fn line_containing_case_insensitive(substring: impl Into<String>) -> LineAwait<String> {
        let substring = substring.into();
        let description = format!("line containing case insensitive '{substring}'");
        let needle = substring.to_lowercase();
        LineAwait::from_matcher(description, move |l: &str| {
            l.to_lowercase().contains(&needle).then(|| l.to_string())
        })
    }

    /// Completed by the first line the given pattern is found in
    /// (unanchored). With at least one capture group the awaited value is
    /// the first group; otherwise it is the whole line.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid regular expression; see
    /// [`Await::line_matching_pattern`] for a prebuilt [`Regex`].
    pub fn line_matching(pattern: &str) -> LineAwait<String> {
        match Regex::new(pattern) {
            Ok(regex) => Self::line_matching_pattern(regex),
            Err(error) => panic!("Invalid pattern '{pattern}': {error}"),
        }
    }

    /// Completed by the first line the given pattern is found in
    /// (unanchored). With at least one capture group the awaited value is
    /// the first group; otherwise it is the whole line.
    pub fn line_matching_pattern(pattern: Regex) -> LineAwait<String> {
        let description = format!("line matching '{}'", pattern.as_str());
        LineAwait::from_matcher(description, move |l: &str| {
            let captures = pattern.captures(l)?;
            match captures.get(1) {
                Some(group) => Some(group.as_str().to_string()),
                None => Some(l.to_string()),
            }
        })
    }

    /// Completed by the line that brings the stream to `line_count` lines.
    pub fn line_count(line_count: u64) -> LineAwait<String> {
        let description = format!("line count {line_count}");
        let mut count = 0;
        LineAwait::from_matcher(description, move |l: &str| {
            count += 1;
            (count >= line_count).then(|| l.to_string())
        })
    }

    /// Completed by the first line satisfying `predicate`; `description` is
    /// used in timeout and failure messages.
    pub fn line_satisfying(
        description: impl Into<String>,
        mut predicate: impl FnMut(&str) -> bool + Send + 'static,
    ) -> LineAwait<String> {
        LineAwait::from_matcher(description.into(), move |l: &str| {
            predicate(l).then(|| l.to_string())
        })
    }
}

/// A one-shot, predicate-driven promise over the line stream of a command.
///
/// Cloning yields another handle onto the same promise, so one clone can be
/// registered on a stream while the caller keeps the other to wait on.
pub struct LineAwait<T> {
    inner: Arc<AwaitInner<T>>,
}

impl<T> Clone for LineAwait<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct AwaitInner<T> {
    description: String,
    matcher: Mutex<Box<dyn FnMut(&str) -> Option<T> + Send>>,
    promise: Promise<T>,
}

impl<T: Send + 'static> LineAwait<T> {
    fn from_matcher(
        description: String,
        matcher: impl FnMut(&str) -> Option<T> + Send + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(AwaitInner {
                description,
                matcher: Mutex::new(Box::new(matcher)),
                promise: Promise::new(),
            }),
        }
    }

    /// Chain a conversion of the awaited value; panics inside `mapper` fail
    /// the promise instead of tearing down the consuming worker.
    pub fn map<U: Send + 'static>(
        self,
        mapper: impl Fn(T) -> U + Send + 'static,
    ) -> LineAwait<U> {
        let description = self.inner.description.clone();
        let source = self.inner;
        LineAwait::from_matcher(description, move |line: &str| {
            let mut matcher = source
                .matcher
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            (*matcher)(line).map(&mapper)
        })
    }

    /// Feed one line; a no-op once the promise completed.
    pub(crate) fn accept(&self, line: &str) {
        if self.inner.promise.is_done() {
            return;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut matcher = self
                .inner
                .matcher
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            (*matcher)(line)
        }));
        match outcome {
            Ok(Some(value)) => self.inner.promise.complete(value),
            Ok(None) => {}
            Err(payload) => self
                .inner
                .promise
                .fail(Arc::new(PanicError::from_payload(payload))),
        }
    }

    pub(crate) fn description(&self) -> &str {
        &self.inner.description
    }
}

impl<T: Clone> LineAwait<T> {
    /// Wait at most `timeout` for the condition and return the mapped value.
    pub fn wait_for(&self, timeout: Duration) -> Result<T, AwaitError> {
        self.inner
            .promise
            .wait_deadline(Some(timeout), &self.inner.description)
    }

    /// Wait, potentially indefinitely, for the condition.
    pub fn wait(&self) -> Result<T, AwaitError> {
        self.inner.promise.wait_deadline(None, &self.inner.description)
    }
}

/// A single-assignment cell; the first `complete` or `fail` wins and any
/// later write is a no-op.
struct Promise<T> {
    state: Mutex<PromiseState<T>>,
    cond: Condvar,
}

enum PromiseState<T> {
    Pending,
    Complete(T),
    Failed(SharedError),
}

impl<T> Promise<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(PromiseState::Pending),
            cond: Condvar::new(),
        }
    }

    fn is_done(&self) -> bool {
        !matches!(*self.state.lock().unwrap(), PromiseState::Pending)
    }

    fn complete(&self, value: T) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, PromiseState::Pending) {
            *state = PromiseState::Complete(value);
            self.cond.notify_all();
        }
    }

    fn fail(&self, error: SharedError) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, PromiseState::Pending) {
            *state = PromiseState::Failed(error);
            self.cond.notify_all();
        }
    }
}

impl<T: Clone> Promise<T> {
    fn wait_deadline(
        &self,
        timeout: Option<Duration>,
        description: &str,
    ) -> Result<T, AwaitError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock().unwrap();
        loop {
            match &*state {
                PromiseState::Complete(value) => return Ok(value.clone()),
                PromiseState::Failed(error) => {
                    return Err(AwaitError::Failed {
                        description: description.to_string(),
                        source: Arc::clone(error),
                    });
                }
                PromiseState::Pending => {}
            }
            state = match deadline {
                None => self.cond.wait(state).unwrap(),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(AwaitError::Timeout {
                            description: description.to_string(),
                            timeout_ms: timeout.unwrap_or_default().as_millis(),
                        });
                    }
                    self.cond.wait_timeout(state, remaining).unwrap().0
                }
            };
        }
    }
}

/// Type-erased registration handle the stream consumer notifies per line.
pub(crate) trait AwaitSink: Send {
    fn accept_line(&self, line: &str);
}

impl<T: Send + 'static> AwaitSink for LineAwait<T> {
    fn accept_line(&self, line: &str) {
        self.accept(line);
    }
}
