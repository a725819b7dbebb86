//! CLI Assured - fluent assertions for end-to-end testing of command-line
//! programs.
//!
//! A test describes a command (executable, arguments, environment, working
//! directory, stdin source, redirections), attaches assertions and live
//! observers to its output streams, starts it, optionally interacts with it
//! while it runs, and finally collects one aggregated verdict covering exit
//! code, byte counts, line-level predicates and any worker exceptions.
//! Everything is synchronous: each command owns up to three pooled worker
//! threads that drain stdout, drain stderr and drive stdin.
//!
//! ```no_run
//! use cli_assured::given;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     given()
//!         .env("GREETING", "CLI Assured rocks!")
//!         .when()
//!         .command("sh", ["-c", "echo $GREETING"])
//!         .then()
//!         .stdout()
//!         .has_lines(["CLI Assured rocks!"])
//!         .has_line_count(1)
//!         .exit_code_is(0)
//!         .execute()?
//!         .assert_success()?;
//!     Ok(())
//! }
//! ```

mod asserts;
mod awaits;
mod capture;
mod consumer;
mod error;
mod pool;
mod process;
mod producer;
mod result;
mod spec;

pub mod prelude;

pub use asserts::{
    Assert, ByteCountAssert, ExitCodeAssert, FailureCollector, LineAssert, ProcessOutput,
};
pub use awaits::{Await, LineAwait};
pub use error::{
    AssertionError, AwaitError, CancellationError, Error, Result, SharedError,
    TimeoutAssertionError,
};
pub use pool::{CachedThreadPool, Executor, GlobalThreadPoolSpec, TaskHandle};
pub use process::CommandProcess;
pub use producer::CancellableSink;
pub use result::CommandResult;
pub use spec::{
    CommandSpec, ExpectationsSpec, LocalThreadPoolSpec, StreamSpec, command, current_exe, given,
};

/// The process-wide worker pool configuration.
///
/// It must be configured before the first command runs on the global pool;
/// later attempts fail. The pool itself is created lazily and never shut
/// down.
pub fn global_thread_pool() -> GlobalThreadPoolSpec {
    GlobalThreadPoolSpec
}
