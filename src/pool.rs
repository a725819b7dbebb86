use std::{
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use crate::error::{Error, Result};

#[cfg(test)]
mod tests;

pub(crate) const DEFAULT_CORE_SIZE: usize = 0;
pub(crate) const DEFAULT_MAX_SIZE: usize = usize::MAX;
pub(crate) const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

const THREAD_NAME_PREFIX: &str = "cli-assert-io-";

static LOCAL_POOL_NUMBER: AtomicUsize = AtomicUsize::new(1);

/// Where the I/O workers of a command run.
///
/// A cached default implementation is provided; callers may substitute their
/// own, e.g. to bridge into a runtime-native executor.
pub trait Executor: Send + Sync {
    fn submit(&self, task: Box<dyn FnOnce() + Send + 'static>) -> TaskHandle;
}

/// Completion handle of a submitted task.
pub struct TaskHandle {
    latch: Arc<Latch>,
}

struct Latch {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    fn open(&self) {
        *self.done.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

impl TaskHandle {
    /// Block until the task finished running.
    pub fn join(&self) {
        let mut done = self.latch.done.lock().unwrap();
        while !*done {
            done = self.latch.cond.wait(done).unwrap();
        }
    }
}

/// Sizing of a cached pool.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolSettings {
    pub(crate) core_size: usize,
    pub(crate) max_size: usize,
    pub(crate) keep_alive: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            core_size: DEFAULT_CORE_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

/// A cached pool of named worker threads: spawns on demand up to `max_size`,
/// idle threads beyond `core_size` retire after `keep_alive`.
#[derive(Clone)]
pub struct CachedThreadPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name_prefix: String,
    settings: PoolSettings,
    state: Mutex<PoolState>,
    available: Condvar,
    shutdown: AtomicBool,
}

struct PoolState {
    queue: VecDeque<Job>,
    idle: usize,
    workers: usize,
    next_thread: usize,
}

struct Job {
    task: Box<dyn FnOnce() + Send>,
    latch: Arc<Latch>,
}

impl CachedThreadPool {
    pub(crate) fn new(name_prefix: impl Into<String>, settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name_prefix: name_prefix.into(),
                settings,
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    idle: 0,
                    workers: 0,
                    next_thread: 1,
                }),
                available: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Create a pool for a single command; disposed by the supervisor when
    /// the command terminates.
    pub(crate) fn local(settings: PoolSettings) -> Self {
        let pool_number = LOCAL_POOL_NUMBER.fetch_add(1, Ordering::SeqCst);
        Self::new(format!("{THREAD_NAME_PREFIX}{pool_number}-"), settings)
    }

    /// Lets idle workers retire as soon as the queue drains.
    pub(crate) fn dispose(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.available.notify_all();
    }
}

impl Executor for CachedThreadPool {
    fn submit(&self, task: Box<dyn FnOnce() + Send + 'static>) -> TaskHandle {
        let latch = Latch::new();
        let job = Job {
            task,
            latch: Arc::clone(&latch),
        };

        let mut state = self.inner.state.lock().unwrap();
        state.queue.push_back(job);
        if state.idle == 0 && state.workers < self.inner.settings.max_size {
            let thread_number = state.next_thread;
            state.next_thread += 1;
            state.workers += 1;
            let name = format!("{}{}", self.inner.name_prefix, thread_number);
            let inner = Arc::clone(&self.inner);
            if let Err(error) = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(inner))
            {
                state.workers -= 1;
                tracing::error!("Could not spawn worker thread {name}: {error}");
            }
        }
        drop(state);
        self.inner.available.notify_one();

        TaskHandle { latch }
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    let mut state = inner.state.lock().unwrap();
    loop {
        if let Some(job) = state.queue.pop_front() {
            drop(state);
            if catch_unwind(AssertUnwindSafe(job.task)).is_err() {
                tracing::warn!("A pool task panicked");
            }
            job.latch.open();
            state = inner.state.lock().unwrap();
            continue;
        }

        if inner.shutdown.load(Ordering::SeqCst) {
            state.workers -= 1;
            return;
        }

        state.idle += 1;
        let (reacquired, wait) = inner
            .available
            .wait_timeout(state, inner.settings.keep_alive)
            .unwrap();
        state = reacquired;
        state.idle -= 1;

        if wait.timed_out()
            && state.queue.is_empty()
            && (state.workers > inner.settings.core_size
                || inner.shutdown.load(Ordering::SeqCst))
        {
            state.workers -= 1;
            return;
        }
    }
}

struct GlobalPool {
    settings: PoolSettings,
    pool: Option<CachedThreadPool>,
}

static GLOBAL_POOL: Mutex<GlobalPool> = Mutex::new(GlobalPool {
    settings: PoolSettings {
        core_size: DEFAULT_CORE_SIZE,
        max_size: DEFAULT_MAX_SIZE,
        keep_alive: DEFAULT_KEEP_ALIVE,
    },
    pool: None,
});

/// Hands out the process-wide pool, creating it on first use. The pool is
/// never shut down.
pub(crate) fn global_pool() -> CachedThreadPool {
    let mut global = GLOBAL_POOL.lock().unwrap();
    match &global.pool {
        Some(pool) => pool.clone(),
        None => {
            tracing::trace!("Creating the global worker pool");
            let pool = CachedThreadPool::new(THREAD_NAME_PREFIX, global.settings);
            global.pool = Some(pool.clone());
            pool
        }
    }
}

fn configure_global(update: impl FnOnce(&mut PoolSettings)) -> Result<()> {
    let mut global = GLOBAL_POOL.lock().unwrap();
    if global.pool.is_some() {
        return Err(Error::PoolAlreadyCreated);
    }
    update(&mut global.settings);
    Ok(())
}

/// Configuration of the process-wide worker pool.
///
/// Unlike the rest of the crate this configuration is mutable process-wide
/// state; it can only be changed before the first command runs on the global
/// pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalThreadPoolSpec;

impl GlobalThreadPoolSpec {
    /// The number of threads kept alive even when idle.
    pub fn core_size(self, core_size: usize) -> Result<Self> {
        configure_global(|s| s.core_size = core_size)?;
        Ok(self)
    }

    /// The maximum number of concurrently live threads.
    pub fn max_size(self, max_size: usize) -> Result<Self> {
        configure_global(|s| s.max_size = max_size)?;
        Ok(self)
    }

    /// How long non-core idle threads linger before retiring.
    pub fn keep_alive(self, keep_alive: Duration) -> Result<Self> {
        configure_global(|s| s.keep_alive = keep_alive)?;
        Ok(self)
    }
}

#[cfg(test)]
pub(crate) fn global_pool_created() -> bool {
    GLOBAL_POOL.lock().unwrap().pool.is_some()
}
