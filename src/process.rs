use std::{
    collections::HashMap,
    fmt,
    process::{Child, ExitStatus},
    sync::{
        Arc, Mutex, Once,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    asserts::{Assert, ExitCodeAssert},
    consumer::OutputConsumer,
    error::{Result, TimeoutAssertionError},
    pool::CachedThreadPool,
    producer::InputProducer,
    result::CommandResult,
};

#[cfg(test)]
mod tests;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What `close` (scope exit) does to a still-running child.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AutoClose {
    pub(crate) forcibly: bool,
    pub(crate) with_descendants: bool,
    pub(crate) timeout: Option<Duration>,
}

impl Default for AutoClose {
    fn default() -> Self {
        Self {
            forcibly: false,
            with_descendants: true,
            timeout: None,
        }
    }
}

/// A running command: the child process, its three I/O workers and the
/// composed assertion that will be evaluated once it terminated.
///
/// Dropping the handle kills the child according to the configured
/// auto-close policy and waits for it, so a test cannot leak processes.
pub struct CommandProcess {
    command: String,
    child: Mutex<Child>,
    pid: u32,
    started: Instant,
    stdout: Arc<OutputConsumer>,
    stderr: Option<Arc<OutputConsumer>>,
    stdin: Option<Arc<InputProducer>>,
    exit_code_assert: Arc<ExitCodeAssert>,
    asserts: Vec<Arc<dyn Assert + Send + Sync>>,
    closed: AtomicBool,
    hook: Mutex<Option<u64>>,
    local_pool: Option<CachedThreadPool>,
    auto_close: AutoClose,
}

impl CommandProcess {
    #[expect(clippy::too_many_arguments)]
    pub(crate) fn new(
        command: String,
        child: Child,
        stdout: Arc<OutputConsumer>,
        stderr: Option<Arc<OutputConsumer>>,
        stdin: Option<Arc<InputProducer>>,
        exit_code_assert: Arc<ExitCodeAssert>,
        asserts: Vec<Arc<dyn Assert + Send + Sync>>,
        local_pool: Option<CachedThreadPool>,
        auto_close: AutoClose,
    ) -> Self {
        let pid = child.id();
        let hook = register_shutdown_hook(pid, auto_close.forcibly, auto_close.with_descendants);
        Self {
            command,
            child: Mutex::new(child),
            pid,
            started: Instant::now(),
            stdout,
            stderr,
            stdin,
            exit_code_assert,
            asserts,
            closed: AtomicBool::new(false),
            hook: Mutex::new(Some(hook)),
            local_pool,
            auto_close,
        }
    }

    /// The OS process id of the child.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Block until the child exits and produce the final result.
    pub fn wait(&self) -> Result<CommandResult> {
        let status = self.child.lock().unwrap().wait()?;
        self.terminated(status)
    }

    /// Wait at most `timeout`, polling the child every 100 ms. On expiry the
    /// result carries exit code −1 and a timeout error; the workers are left
    /// running and will drain once the child actually dies.
    pub fn wait_with_timeout(&self, timeout: Duration) -> Result<CommandResult> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.lock().unwrap().try_wait()? {
                return self.terminated(status);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(WAIT_POLL_INTERVAL));
        }

        self.exit_code_assert.record(-1);
        Ok(CommandResult::new(
            self.command.clone(),
            -1,
            self.started.elapsed(),
            self.stdout.byte_count(),
            self.stderr.as_ref().map_or(0, |c| c.byte_count()),
            Some(TimeoutAssertionError::new(timeout)),
            self.asserts.clone(),
        ))
    }

    fn terminated(&self, status: ExitStatus) -> Result<CommandResult> {
        let exit_code = exit_code_of(status);
        self.unregister_hook();
        // The child is gone; keep Drop from signalling a recycled pid.
        self.closed.store(true, Ordering::SeqCst);

        self.stdout.join();
        if let Some(stderr) = &self.stderr {
            stderr.join();
        }
        if let Some(stdin) = &self.stdin {
            stdin.join();
        }
        if let Some(pool) = &self.local_pool {
            pool.dispose();
        }
        self.exit_code_assert.record(exit_code);

        Ok(CommandResult::new(
            self.command.clone(),
            exit_code,
            self.started.elapsed(),
            self.stdout.byte_count(),
            self.stderr.as_ref().map_or(0, |c| c.byte_count()),
            None,
            self.asserts.clone(),
        ))
    }

    /// Kill the child: gently (SIGTERM) or forcibly (SIGKILL), optionally
    /// taking its descendants down first. Idempotent; never fails, problems
    /// are logged.
    pub fn kill(&self, forcibly: bool, with_descendants: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.unregister_hook();

        self.stdout.cancel();
        if let Some(stderr) = &self.stderr {
            stderr.cancel();
        }
        if let Some(stdin) = &self.stdin {
            stdin.cancel();
        }

        if with_descendants {
            kill_descendants(self.pid, forcibly);
        }
        kill_pid(self.pid, forcibly, &self.child);
    }

    /// Direct children of the child process, where the host supports
    /// enumerating them.
    pub fn children(&self) -> Result<Vec<u32>> {
        process_tree(self.pid).map(|tree| tree.get(&self.pid).cloned().unwrap_or_default())
    }

    /// All live descendants of the child process, where the host supports
    /// enumerating them.
    pub fn descendants(&self) -> Result<Vec<u32>> {
        let tree = process_tree(self.pid)?;
        let mut result = Vec::new();
        let mut queue = vec![self.pid];
        while let Some(pid) = queue.pop() {
            if let Some(children) = tree.get(&pid) {
                result.extend(children.iter().copied());
                queue.extend(children.iter().copied());
            }
        }
        Ok(result)
    }

    /// Scope exit: kill per the auto-close policy, then wait (bounded by the
    /// auto-close timeout when one is configured).
    pub fn close(&self) {
        self.kill(self.auto_close.forcibly, self.auto_close.with_descendants);
        let outcome = match self.auto_close.timeout {
            Some(timeout) => self.wait_with_timeout(timeout).map(|_| ()),
            None => self.wait().map(|_| ()),
        };
        if let Err(error) = outcome {
            tracing::warn!("Could not await the killed process {}: {error}", self.pid);
        }
    }

    fn unregister_hook(&self) {
        if let Some(hook) = self.hook.lock().unwrap().take() {
            unregister_shutdown_hook(hook);
        }
    }
}

impl Drop for CommandProcess {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            self.close();
        }
        self.unregister_hook();
    }
}

impl fmt::Display for CommandProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)
    }
}

impl fmt::Debug for CommandProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandProcess")
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|signal| 128 + signal))
            .unwrap_or(-1)
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}

/// Delivers SIGTERM or SIGKILL to one pid; returns whether it was accepted.
#[cfg(unix)]
fn signal_pid(pid: u32, forcibly: bool) -> bool {
    let signal = if forcibly { libc::SIGKILL } else { libc::SIGTERM };
    unsafe { libc::kill(pid as libc::pid_t, signal) == 0 }
}

#[cfg(not(unix))]
fn signal_pid(_pid: u32, _forcibly: bool) -> bool {
    false
}

/// A signal works without the child lock, which a concurrent `wait` may
/// hold; only the fallback path needs the `Child` itself.
fn kill_pid(pid: u32, forcibly: bool, child: &Mutex<Child>) {
    if signal_pid(pid, forcibly) {
        return;
    }
    if !forcibly {
        tracing::warn!("Graceful termination is not supported for process {pid}; killing forcibly");
    }
    if let Err(error) = child.lock().unwrap().kill() {
        tracing::warn!("Could not kill process {pid}: {error}");
    }
}

fn kill_descendants(pid: u32, forcibly: bool) {
    match process_tree(pid) {
        Ok(tree) => {
            let mut queue = vec![pid];
            while let Some(current) = queue.pop() {
                if let Some(children) = tree.get(&current) {
                    for child in children {
                        queue.push(*child);
                        if !signal_pid(*child, forcibly) {
                            tracing::warn!(
                                "Could not kill descendant process {child} of process {pid}"
                            );
                        }
                    }
                }
            }
        }
        Err(_) => {
            tracing::warn!(
                "Enumerating descendants is not supported on this host; \
                 killing only the direct child {pid}"
            );
        }
    }
}

/// Parent-pid → child-pids map of the live process table, scoped loosely to
/// what `/proc` exposes.
#[cfg(target_os = "linux")]
fn process_tree(_root: u32) -> Result<HashMap<u32, Vec<u32>>> {
    let mut tree: HashMap<u32, Vec<u32>> = HashMap::new();
    for entry in std::fs::read_dir("/proc")? {
        let entry = entry?;
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        // The command in field 2 may contain spaces; parse after its ')'.
        let Some(rest) = stat.rsplit_once(')').map(|(_, rest)| rest) else {
            continue;
        };
        let Some(ppid) = rest.split_whitespace().nth(1).and_then(|p| p.parse::<u32>().ok())
        else {
            continue;
        };
        tree.entry(ppid).or_default().push(pid);
    }
    Ok(tree)
}

#[cfg(not(target_os = "linux"))]
fn process_tree(_root: u32) -> Result<HashMap<u32, Vec<u32>>> {
    Err(crate::error::Error::Unsupported(
        "Enumerating child processes is not supported on this host".to_string(),
    ))
}

/// Registered kill actions executed when the host process is terminated.
struct ShutdownHooks {
    actions: HashMap<u64, (u32, bool, bool)>,
}

static SHUTDOWN_HOOKS: Mutex<Option<ShutdownHooks>> = Mutex::new(None);
static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(1);
static SIGNAL_LISTENER: Once = Once::new();

fn register_shutdown_hook(pid: u32, forcibly: bool, with_descendants: bool) -> u64 {
    install_signal_listener();
    let id = NEXT_HOOK_ID.fetch_add(1, Ordering::SeqCst);
    let mut hooks = SHUTDOWN_HOOKS.lock().unwrap();
    hooks
        .get_or_insert_with(|| ShutdownHooks {
            actions: HashMap::new(),
        })
        .actions
        .insert(id, (pid, forcibly, with_descendants));
    id
}

fn unregister_shutdown_hook(id: u64) {
    if let Some(hooks) = SHUTDOWN_HOOKS.lock().unwrap().as_mut() {
        hooks.actions.remove(&id);
    }
}

/// Kills every still-registered child; runs on host termination.
fn run_shutdown_hooks() {
    let actions: Vec<(u32, bool, bool)> = {
        let mut hooks = SHUTDOWN_HOOKS.lock().unwrap();
        hooks
            .as_mut()
            .map(|h| h.actions.drain().map(|(_, a)| a).collect())
            .unwrap_or_default()
    };
    for (pid, forcibly, with_descendants) in actions {
        if with_descendants {
            kill_descendants(pid, forcibly);
        }
        signal_pid(pid, forcibly);
    }
}

#[cfg(unix)]
fn install_signal_listener() {
    SIGNAL_LISTENER.call_once(|| {
        use signal_hook::{consts::{SIGINT, SIGTERM}, iterator::Signals};
        let listener = thread::Builder::new()
            .name("cli-assert-shutdown".to_string())
            .spawn(|| match Signals::new([SIGINT, SIGTERM]) {
                Ok(mut signals) => {
                    if let Some(signal) = signals.forever().next() {
                        run_shutdown_hooks();
                        let _ = signal_hook::low_level::emulate_default_handler(signal);
                    }
                }
                Err(error) => {
                    tracing::warn!("Could not install the shutdown signal listener: {error}");
                }
            });
        if let Err(error) = listener {
            tracing::warn!("Could not spawn the shutdown listener thread: {error}");
        }
    });
}

#[cfg(not(unix))]
fn install_signal_listener() {
    SIGNAL_LISTENER.call_once(|| {
        tracing::debug!("No shutdown signal listener on this host");
    });
}
