use std::{
    fs::File,
    io::{Read, Write},
    panic::{AssertUnwindSafe, catch_unwind},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use encoding_rs::{Decoder, Encoding, UTF_8};

use crate::{
    asserts::{Assert, ByteCountAssert, FailureCollector, LineAssert, ProcessOutput},
    awaits::AwaitSink,
    capture::OutputCapture,
    error::{PanicError, SharedError, WorkerError},
    pool::{Executor, TaskHandle},
};

/// Where a stream is mirrored to, in addition to being asserted on.
pub(crate) struct Redirect {
    pub(crate) target: RedirectTarget,
    pub(crate) label: String,
}

pub(crate) enum RedirectTarget {
    File(PathBuf),
    Sink(Box<dyn Write + Send>),
}

/// Everything the consumer needs to know about one output stream, assembled
/// by the builder and handed over at `start`.
pub(crate) struct StreamExpectations {
    pub(crate) stream: ProcessOutput,
    pub(crate) asserts: Vec<Box<dyn LineAssert>>,
    pub(crate) awaits: Vec<Box<dyn AwaitSink>>,
    pub(crate) byte_count_assert: Option<ByteCountAssert>,
    pub(crate) charset: &'static Encoding,
    pub(crate) redirect: Option<Redirect>,
    pub(crate) capture: OutputCapture,
    pub(crate) dev_null: bool,
}

impl StreamExpectations {
    /// An empty, user-configured stream: no assertions until some are added.
    pub(crate) fn empty(stream: ProcessOutput) -> Self {
        Self {
            stream,
            asserts: Vec::new(),
            awaits: Vec::new(),
            byte_count_assert: None,
            charset: UTF_8,
            redirect: None,
            capture: OutputCapture::default_capture(stream),
            dev_null: false,
        }
    }

    /// The default for a stream nobody opened: it must stay silent.
    pub(crate) fn has_no_lines(stream: ProcessOutput) -> Self {
        let mut expectations = Self::empty(stream);
        expectations
            .asserts
            .push(Box::new(crate::asserts::line::has_no_lines(stream)));
        expectations
    }
}

/// Drains one output pipe of the child on a pool worker, splits it into
/// lines and fans them out to capture, assertions, awaiters and the redirect
/// sink.
pub(crate) struct OutputConsumer {
    inner: Arc<ConsumerInner>,
    handle: Mutex<Option<TaskHandle>>,
}

struct ConsumerInner {
    stream: ProcessOutput,
    worker_label: String,
    expectations: Mutex<StreamExpectations>,
    byte_count: AtomicU64,
    cancelled: AtomicBool,
    exceptions: Mutex<Vec<SharedError>>,
}

impl OutputConsumer {
    pub(crate) fn new(expectations: StreamExpectations, thread_index: usize) -> Self {
        let stream = expectations.stream;
        Self {
            inner: Arc::new(ConsumerInner {
                stream,
                worker_label: format!("cli-assert-io-{thread_index}-{stream}"),
                expectations: Mutex::new(expectations),
                byte_count: AtomicU64::new(0),
                cancelled: AtomicBool::new(false),
                exceptions: Mutex::new(Vec::new()),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Submit the read loop to a worker.
    pub(crate) fn start(&self, pool: &dyn Executor, source: Box<dyn Read + Send>) {
        let inner = Arc::clone(&self.inner);
        let handle = pool.submit(Box::new(move || read_loop(inner, source)));
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Mark the consumer cancelled; the read loop returns as soon as the
    /// pipe closes under it.
    pub(crate) fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Block until the read loop exited.
    pub(crate) fn join(&self) {
        if let Some(handle) = self.handle.lock().unwrap().as_ref() {
            handle.join();
        }
    }

    /// Total bytes drained from the pipe so far; stable after termination.
    pub(crate) fn byte_count(&self) -> u64 {
        self.inner.byte_count.load(Ordering::SeqCst)
    }
}

impl Assert for OutputConsumer {
    fn evaluate(&self, collector: &mut FailureCollector) {
        let stream = Some(self.inner.stream);
        let sum_before = collector.sum(stream);
        for exception in self.inner.exceptions.lock().unwrap().iter() {
            collector.exception(stream, Arc::clone(exception));
        }
        let expectations = self.inner.expectations.lock().unwrap();
        for assert in &expectations.asserts {
            assert.evaluate(collector);
        }
        if collector.sum(stream) > sum_before {
            collector.capture(stream, expectations.capture.render());
        }
        if let Some(byte_count_assert) = &expectations.byte_count_assert {
            byte_count_assert.record(self.byte_count());
            byte_count_assert.evaluate(collector);
        }
    }
}

fn read_loop(inner: Arc<ConsumerInner>, mut source: Box<dyn Read + Send>) {
    let (charset, dev_null) = {
        let expectations = inner.expectations.lock().unwrap();
        (expectations.charset, expectations.dev_null)
    };
    let mut redirect = open_redirect(&inner);
    let mut decoder = charset.new_decoder();
    let mut pending = String::new();
    let mut buf = [0u8; 8192];

    loop {
        if inner.cancelled.load(Ordering::SeqCst) {
            break;
        }
        match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                inner.byte_count.fetch_add(n as u64, Ordering::SeqCst);
                if dev_null {
                    continue;
                }
                decode(&mut decoder, &buf[..n], false, &mut pending);
                drain_lines(&inner, &mut pending, &mut redirect);
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => {
                if !inner.cancelled.load(Ordering::SeqCst) {
                    record_io_error(&inner, error);
                }
                break;
            }
        }
    }

    if !dev_null {
        decode(&mut decoder, &[], true, &mut pending);
        drain_lines(&inner, &mut pending, &mut redirect);
        if !pending.is_empty() {
            dispatch_line(&inner, &pending, &mut redirect);
        }
    }
    if let Some(sink) = redirect.as_mut() {
        if let Err(error) = sink.flush() {
            record_io_error(&inner, error);
        }
    }
}

/// Opens the redirect target, if any. File targets are owned by the loop and
/// closed when it exits; user sinks are only flushed.
fn open_redirect(inner: &ConsumerInner) -> Option<Box<dyn Write + Send>> {
    let redirect = inner.expectations.lock().unwrap().redirect.take()?;
    match redirect.target {
        RedirectTarget::Sink(sink) => Some(sink),
        RedirectTarget::File(path) => match File::create(&path) {
            Ok(file) => Some(Box::new(file)),
            Err(error) => {
                record_io_error(
                    inner,
                    std::io::Error::new(
                        error.kind(),
                        format!("Could not open {} for writing: {error}", path.display()),
                    ),
                );
                None
            }
        },
    }
}

fn decode(decoder: &mut Decoder, bytes: &[u8], last: bool, out: &mut String) {
    let mut remaining = bytes;
    loop {
        out.reserve(decoder.max_utf8_buffer_length(remaining.len()).unwrap_or(64));
        let (result, read, _replaced) = decoder.decode_to_string(remaining, out, last);
        remaining = &remaining[read..];
        if result == encoding_rs::CoderResult::InputEmpty {
            break;
        }
    }
}

fn drain_lines(
    inner: &ConsumerInner,
    pending: &mut String,
    redirect: &mut Option<Box<dyn Write + Send>>,
) {
    while let Some(terminator) = pending.find('\n') {
        let mut line: String = pending.drain(..=terminator).collect();
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
        dispatch_line(inner, &line, redirect);
    }
}

fn dispatch_line(
    inner: &ConsumerInner,
    line: &str,
    redirect: &mut Option<Box<dyn Write + Send>>,
) {
    {
        let mut expectations = inner.expectations.lock().unwrap();
        let expectations = &mut *expectations;
        expectations.capture.capture(line);
        for assert in expectations.asserts.iter_mut() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| assert.line(line))) {
                inner
                    .exceptions
                    .lock()
                    .unwrap()
                    .push(Arc::new(PanicError::from_payload(payload)));
            }
        }
        for awaited in &expectations.awaits {
            awaited.accept_line(line);
        }
    }
    if let Some(sink) = redirect.as_mut() {
        let outcome = sink
            .write_all(line.as_bytes())
            .and_then(|()| sink.write_all(b"\n"));
        if let Err(error) = outcome {
            record_io_error(inner, error);
            *redirect = None;
        }
    }
}

fn record_io_error(inner: &ConsumerInner, error: std::io::Error) {
    inner
        .exceptions
        .lock()
        .unwrap()
        .push(Arc::new(WorkerError::new(&inner.worker_label, error)));
}
