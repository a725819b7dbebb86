mod stream;

pub use stream::{ExpectationsSpec, StreamSpec};


use std::{
    env,
    io::{self, Read, Write},
    path::PathBuf,
    process::{Command as StdCommand, Stdio},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::{
    asserts::{Assert, ExitCodeAssert, ProcessOutput},
    consumer::{OutputConsumer, StreamExpectations},
    error::{Error, Result},
    pool::{CachedThreadPool, Executor, GlobalThreadPoolSpec, PoolSettings, global_pool},
    process::{AutoClose, CommandProcess},
    producer::{InputProducer, StdinFn},
    result::CommandResult,
};

/// Per-spec index used to label the I/O workers of one command.
static COMMAND_COUNTER: AtomicUsize = AtomicUsize::new(0);

const DEFAULT_EXIT_CODE_TEMPLATE: &str =
    "Expected exit code 0 but actually terminated with exit code ${actual}";

pub(crate) enum Executable {
    Path(String),
    CurrentExe,
}

pub(crate) enum StdinSpec {
    Text(String),
    File(PathBuf),
    Callback(StdinFn),
}

impl StdinSpec {
    fn into_callback(self) -> StdinFn {
        match self {
            StdinSpec::Text(text) => Box::new(move |stdin| stdin.write_all(text.as_bytes())),
            StdinSpec::File(path) => Box::new(move |stdin| {
                let mut file = std::fs::File::open(&path)?;
                io::copy(&mut file, stdin).map(|_| ())
            }),
            StdinSpec::Callback(callback) => callback,
        }
    }
}

pub(crate) enum StreamState {
    Default,
    Configured(StreamExpectations),
}

pub(crate) enum PoolChoice {
    Global,
    Local(PoolSettings),
    Custom(Arc<dyn Executor>),
}

/// A command that can be executed, with expectations attached.
///
/// Every builder method takes the spec by value and returns the adjusted
/// spec, so a configuration is never shared between executions; `start`
/// consumes it.
pub struct CommandSpec {
    pub(crate) executable: Option<Executable>,
    pub(crate) args: Vec<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) cd: PathBuf,
    pub(crate) stderr_to_stdout: bool,
    pub(crate) stdin: Option<StdinSpec>,
    pub(crate) stdout_expectations: StreamState,
    pub(crate) stderr_expectations: StreamState,
    pub(crate) exit_code: ExitCodeAssert,
    pub(crate) auto_close_forcibly: bool,
    pub(crate) auto_close_with_descendants: bool,
    pub(crate) auto_close_timeout: Option<Duration>,
    pub(crate) pool: PoolChoice,
    pub(crate) thread_index: usize,
}

/// A plain spec without an executable; set one via
/// [`CommandSpec::executable`] or [`CommandSpec::command`].
pub fn given() -> CommandSpec {
    CommandSpec::new(None)
}

/// A spec with the executable and its arguments set.
pub fn command<I, S>(executable: impl Into<String>, args: I) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    CommandSpec::new(Some(Executable::Path(executable.into()))).args(args)
}

/// A spec that runs the currently executing binary, resolved at `start`.
pub fn current_exe() -> CommandSpec {
    CommandSpec::new(Some(Executable::CurrentExe))
}

impl CommandSpec {
    fn new(executable: Option<Executable>) -> Self {
        Self {
            executable,
            args: Vec::new(),
            env: Vec::new(),
            cd: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            stderr_to_stdout: false,
            stdin: None,
            stdout_expectations: StreamState::Default,
            stderr_expectations: StreamState::Default,
            exit_code: ExitCodeAssert::satisfies(|code| code == 0, DEFAULT_EXIT_CODE_TEMPLATE),
            auto_close_forcibly: false,
            auto_close_with_descendants: true,
            auto_close_timeout: None,
            pool: PoolChoice::Global,
            thread_index: COMMAND_COUNTER.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Set the executable and its arguments in one call.
    pub fn command<I, S>(mut self, executable: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.executable = Some(Executable::Path(executable.into()));
        self.args(args)
    }

    /// Set the executable: an absolute or relative path, or a plain name
    /// found in `PATH`.
    pub fn executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = Some(Executable::Path(executable.into()));
        self
    }

    /// Run the currently executing binary, resolved at `start`.
    pub fn current_exe(mut self) -> Self {
        self.executable = Some(Executable::CurrentExe);
        self
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable; entries keep their insertion order in
    /// the rendered command line.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.env.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing)) => *existing = value,
            None => self.env.push((name, value)),
        }
        self
    }

    /// Set multiple environment variables.
    pub fn envs<I, N, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        for (name, value) in vars {
            self = self.env(name, value);
        }
        self
    }

    /// Set the working directory of the child.
    pub fn cd(mut self, work_directory: impl Into<PathBuf>) -> Self {
        self.cd = work_directory.into();
        self
    }

    /// Redirect stderr into stdout; stderr expectations become unavailable.
    pub fn stderr_to_stdout(mut self) -> Self {
        self.stderr_to_stdout = true;
        self
    }

    /// Pass the given text to the stdin of the command, UTF-8 encoded.
    ///
    /// # Panics
    ///
    /// Panics if another stdin source was configured before.
    pub fn stdin(mut self, text: impl Into<String>) -> Self {
        self.assert_stdin_unset();
        self.stdin = Some(StdinSpec::Text(text.into()));
        self
    }

    /// Stream the given file into the stdin of the command.
    ///
    /// # Panics
    ///
    /// Panics if another stdin source was configured before.
    pub fn stdin_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.assert_stdin_unset();
        self.stdin = Some(StdinSpec::File(file.into()));
        self
    }

    /// Drive the stdin of the command from a callback running on a worker.
    ///
    /// The callback receives a cancellable sink; once the process is killed,
    /// any further write or flush fails with a cancellation error. Errors
    /// and panics from the callback are collected and reported by
    /// [`CommandResult::assert_success`].
    ///
    /// # Panics
    ///
    /// Panics if another stdin source was configured before.
    pub fn stdin_with(
        mut self,
        callback: impl FnOnce(&mut dyn Write) -> io::Result<()> + Send + 'static,
    ) -> Self {
        self.assert_stdin_unset();
        self.stdin = Some(StdinSpec::Callback(Box::new(callback)));
        self
    }

    fn assert_stdin_unset(&self) {
        assert!(
            self.stdin.is_none(),
            "stdin was already defined for this CommandSpec. \
             You may want to keep only one stdin(...) call for the given CommandSpec chain"
        );
    }

    /// Make scope exit destroy the child forcibly instead of gracefully.
    pub fn auto_close_forcibly(mut self) -> Self {
        self.auto_close_forcibly = true;
        self
    }

    /// Make scope exit kill only the child itself, not its descendants.
    pub fn auto_close_without_descendants(mut self) -> Self {
        self.auto_close_with_descendants = false;
        self
    }

    /// Bound how long scope exit waits for the killed child to terminate.
    pub fn auto_close_timeout(mut self, timeout: Duration) -> Self {
        self.auto_close_timeout = Some(timeout);
        self
    }

    /// Run the I/O workers of this command on a dedicated pool instead of
    /// the process-wide one.
    pub fn thread_pool(self) -> LocalThreadPoolSpec {
        LocalThreadPoolSpec {
            command: self,
            settings: PoolSettings::default(),
        }
    }

    /// Run the I/O workers of this command on the given executor.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.pool = PoolChoice::Custom(executor);
        self
    }

    /// Syntactic sugar for behavior-driven chains:
    /// `given().env(..).when().command(..).then().stdout()...`.
    pub fn when(self) -> Self {
        self
    }

    /// Attach expectations to the command.
    pub fn then(self) -> ExpectationsSpec {
        ExpectationsSpec { command: self }
    }

    /// Start the command and return the running process.
    pub fn start(self) -> Result<CommandProcess> {
        let executable = match self.executable {
            None => return Err(Error::ExecutableNotSpecified),
            Some(Executable::Path(path)) => path,
            Some(Executable::CurrentExe) => env::current_exe()?.to_string_lossy().into_owned(),
        };
        // An unopened stdout is only drained; an unopened stderr must stay
        // silent (programs report errors there).
        let stdout_expectations = match self.stdout_expectations {
            StreamState::Default => StreamExpectations::empty(ProcessOutput::Stdout),
            StreamState::Configured(expectations) => expectations,
        };
        let stderr_expectations = if self.stderr_to_stdout {
            None
        } else {
            Some(match self.stderr_expectations {
                StreamState::Default => StreamExpectations::has_no_lines(ProcessOutput::Stderr),
                StreamState::Configured(expectations) => expectations,
            })
        };

        let command_string = render_command_string(
            &self.cd,
            &self.env,
            &executable,
            &self.args,
            self.stderr_to_stdout,
            &stdout_expectations,
            stderr_expectations.as_ref(),
        );
        tracing::info!("Executing\n\n    {command_string}\n");

        let mut command = StdCommand::new(&executable);
        command.args(&self.args).current_dir(&self.cd);
        for (name, value) in &self.env {
            command.env(name, value);
        }
        command.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut merged_reader = None;
        if self.stderr_to_stdout {
            let (reader, writer) = io::pipe()?;
            command.stdout(writer.try_clone()?);
            command.stderr(writer);
            merged_reader = Some(reader);
        } else {
            command.stdout(Stdio::piped());
            command.stderr(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            command: command_string.clone(),
            source,
        })?;
        // The Command still holds the parent's copies of the merged pipe's
        // write end; the reader would never see EOF while they live.
        drop(command);

        let stdout_reader: Box<dyn Read + Send> = match merged_reader {
            Some(reader) => Box::new(reader),
            None => Box::new(
                child
                    .stdout
                    .take()
                    .ok_or_else(|| Error::Io(io::Error::other("missing stdout pipe")))?,
            ),
        };
        let stderr_reader: Option<Box<dyn Read + Send>> = match &stderr_expectations {
            None => None,
            Some(_) => Some(Box::new(
                child
                    .stderr
                    .take()
                    .ok_or_else(|| Error::Io(io::Error::other("missing stderr pipe")))?,
            )),
        };

        let (pool, local_pool): (Arc<dyn Executor>, Option<CachedThreadPool>) = match self.pool {
            PoolChoice::Global => (Arc::new(global_pool()), None),
            PoolChoice::Local(settings) => {
                let pool = CachedThreadPool::local(settings);
                (Arc::new(pool.clone()), Some(pool))
            }
            PoolChoice::Custom(executor) => (executor, None),
        };

        let stdout_consumer = Arc::new(OutputConsumer::new(stdout_expectations, self.thread_index));
        stdout_consumer.start(&*pool, stdout_reader);

        let stderr_consumer = match stderr_expectations {
            None => None,
            Some(expectations) => {
                let consumer = Arc::new(OutputConsumer::new(expectations, self.thread_index));
                // stderr_reader is present whenever stderr is not merged
                if let Some(reader) = stderr_reader {
                    consumer.start(&*pool, reader);
                }
                Some(consumer)
            }
        };

        let producer = match self.stdin {
            None => None,
            Some(spec) => {
                let stdin_pipe = child
                    .stdin
                    .take()
                    .ok_or_else(|| Error::Io(io::Error::other("missing stdin pipe")))?;
                let producer = Arc::new(InputProducer::new(
                    stdin_pipe,
                    spec.into_callback(),
                    self.thread_index,
                ));
                producer.start(&*pool);
                Some(producer)
            }
        };

        let exit_code_assert = Arc::new(self.exit_code);
        let mut asserts: Vec<Arc<dyn Assert + Send + Sync>> =
            vec![stdout_consumer.clone() as Arc<dyn Assert + Send + Sync>];
        if let Some(consumer) = &stderr_consumer {
            asserts.push(consumer.clone());
        }
        if let Some(producer) = &producer {
            asserts.push(producer.clone());
        }
        asserts.push(exit_code_assert.clone());

        Ok(CommandProcess::new(
            command_string,
            child,
            stdout_consumer,
            stderr_consumer,
            producer,
            exit_code_assert,
            asserts,
            local_pool,
            AutoClose {
                forcibly: self.auto_close_forcibly,
                with_descendants: self.auto_close_with_descendants,
                timeout: self.auto_close_timeout,
            },
        ))
    }

    /// Start the command and wait, potentially indefinitely, for it to
    /// terminate.
    pub fn execute(self) -> Result<CommandResult> {
        self.start()?.wait()
    }

    /// Start the command and wait at most `timeout` for it to terminate.
    pub fn execute_with_timeout(self, timeout: Duration) -> Result<CommandResult> {
        self.start()?.wait_with_timeout(timeout)
    }
}

/// Surround a token with double quotes iff it contains whitespace.
fn quote(token: &str) -> String {
    if token.chars().any(char::is_whitespace) {
        format!("\"{}\"", token.replace('"', "\\\""))
    } else {
        token.to_string()
    }
}

fn render_command_string(
    cd: &std::path::Path,
    env: &[(String, String)],
    executable: &str,
    args: &[String],
    stderr_to_stdout: bool,
    stdout_expectations: &StreamExpectations,
    stderr_expectations: Option<&StreamExpectations>,
) -> String {
    let mut out = format!("cd {} &&", quote(&cd.display().to_string()));
    for (name, value) in env {
        out.push(' ');
        out.push_str(name);
        out.push('=');
        out.push_str(&quote(value));
    }
    out.push(' ');
    out.push_str(&quote(executable));
    for arg in args {
        out.push(' ');
        out.push_str(&quote(arg));
    }
    if stderr_to_stdout {
        out.push_str(" 2>&1");
    }
    if let Some(redirect) = &stdout_expectations.redirect {
        out.push_str(ProcessOutput::Stdout.redirect_operator());
        out.push_str(&redirect.label);
    }
    if let Some(redirect) = stderr_expectations.and_then(|e| e.redirect.as_ref()) {
        out.push_str(ProcessOutput::Stderr.redirect_operator());
        out.push_str(&redirect.label);
    }
    out
}

/// An immutable spec of a pool dedicated to one command; each `start`
/// creates a fresh pool and the supervisor disposes it at termination.
pub struct LocalThreadPoolSpec {
    command: CommandSpec,
    settings: PoolSettings,
}

impl LocalThreadPoolSpec {
    /// The number of threads kept alive even when idle.
    pub fn core_size(mut self, core_size: usize) -> Self {
        self.settings.core_size = core_size;
        self
    }

    /// The maximum number of concurrently live threads.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.settings.max_size = max_size;
        self
    }

    /// How long non-core idle threads linger before retiring.
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.settings.keep_alive = keep_alive;
        self
    }

    fn parent(self) -> CommandSpec {
        let mut command = self.command;
        command.pool = PoolChoice::Local(self.settings);
        command
    }

    /// Attach expectations to the command.
    pub fn then(self) -> ExpectationsSpec {
        self.parent().then()
    }

    /// Start the command and return the running process.
    pub fn start(self) -> Result<CommandProcess> {
        self.parent().start()
    }

    /// Start the command and wait for it to terminate.
    pub fn execute(self) -> Result<CommandResult> {
        self.parent().execute()
    }

    /// Start the command and wait at most `timeout` for it to terminate.
    pub fn execute_with_timeout(self, timeout: Duration) -> Result<CommandResult> {
        self.parent().execute_with_timeout(timeout)
    }
}

impl GlobalThreadPoolSpec {
    /// A plain spec running its workers on the global pool.
    pub fn given(self) -> CommandSpec {
        given()
    }

    /// A spec with the executable and arguments set, running its workers on
    /// the global pool.
    pub fn command<I, S>(self, executable: impl Into<String>, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        command(executable, args)
    }

    /// A spec running the currently executing binary.
    pub fn current_exe(self) -> CommandSpec {
        current_exe()
    }
}
