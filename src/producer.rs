use std::{
    io::{self, Write},
    panic::{AssertUnwindSafe, catch_unwind},
    process::ChildStdin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    asserts::{Assert, FailureCollector},
    error::{CancellationError, PanicError, SharedError, WorkerError},
    pool::{Executor, TaskHandle},
};

/// The stdin callback; it receives a cancellable sink wired to the child.
pub type StdinFn = Box<dyn FnOnce(&mut dyn Write) -> io::Result<()> + Send>;

/// A byte sink over the child's stdin that starts failing with a
/// cancellation error once the process was killed.
///
/// The sink is closed exactly once: normally after the callback returned, or
/// implicitly on cancellation; a second close is a no-op.
pub struct CancellableSink {
    delegate: Mutex<Option<ChildStdin>>,
    cancelled: AtomicBool,
}

impl CancellableSink {
    pub(crate) fn new(stdin: ChildStdin) -> Self {
        Self {
            delegate: Mutex::new(Some(stdin)),
            cancelled: AtomicBool::new(false),
        }
    }

    fn check_cancelled(&self) -> io::Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(io::Error::other(CancellationError))
        } else {
            Ok(())
        }
    }

    /// Marks the sink cancelled and closes the underlying pipe best-effort.
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.delegate.lock().unwrap().take();
    }

    /// Closes the pipe unless cancellation already did.
    fn close(&self) {
        if !self.cancelled.load(Ordering::SeqCst) {
            self.delegate.lock().unwrap().take();
        }
    }
}

impl Write for &CancellableSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_cancelled()?;
        match self.delegate.lock().unwrap().as_mut() {
            Some(stdin) => stdin.write(buf),
            None => Err(io::Error::other(CancellationError)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_cancelled()?;
        match self.delegate.lock().unwrap().as_mut() {
            Some(stdin) => stdin.flush(),
            None => Err(io::Error::other(CancellationError)),
        }
    }
}

/// Runs the user's stdin callback on a pool worker and collects whatever
/// goes wrong for the final report.
pub(crate) struct InputProducer {
    inner: Arc<ProducerInner>,
    callback: Mutex<Option<StdinFn>>,
    handle: Mutex<Option<TaskHandle>>,
}

struct ProducerInner {
    sink: CancellableSink,
    worker_label: String,
    exceptions: Mutex<Vec<SharedError>>,
}

impl InputProducer {
    pub(crate) fn new(stdin: ChildStdin, callback: StdinFn, thread_index: usize) -> Self {
        Self {
            inner: Arc::new(ProducerInner {
                sink: CancellableSink::new(stdin),
                worker_label: format!("cli-assert-io-{thread_index}-stdin"),
                exceptions: Mutex::new(Vec::new()),
            }),
            callback: Mutex::new(Some(callback)),
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn start(&self, pool: &dyn Executor) {
        let Some(callback) = self.callback.lock().unwrap().take() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        let handle = pool.submit(Box::new(move || run(inner, callback)));
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Cancels the sink; any in-flight write in the callback fails with a
    /// cancellation error instead of hanging.
    pub(crate) fn cancel(&self) {
        self.inner.sink.cancel();
    }

    pub(crate) fn join(&self) {
        if let Some(handle) = self.handle.lock().unwrap().as_ref() {
            handle.join();
        }
    }
}

fn run(inner: Arc<ProducerInner>, callback: StdinFn) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut sink: &CancellableSink = &inner.sink;
        callback(&mut sink)
    }));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            let exception: SharedError = if is_cancellation(&error) {
                Arc::new(CancellationError)
            } else {
                Arc::new(WorkerError::new(&inner.worker_label, error))
            };
            inner.exceptions.lock().unwrap().push(exception);
        }
        Err(payload) => {
            inner
                .exceptions
                .lock()
                .unwrap()
                .push(Arc::new(PanicError::from_payload(payload)));
        }
    }
    inner.sink.close();
}

fn is_cancellation(error: &io::Error) -> bool {
    error
        .get_ref()
        .is_some_and(|inner| inner.is::<CancellationError>())
}

impl Assert for InputProducer {
    fn evaluate(&self, collector: &mut FailureCollector) {
        for exception in self.inner.exceptions.lock().unwrap().iter() {
            collector.exception(None, Arc::clone(exception));
        }
    }
}
