use std::{io, sync::Arc, time::Duration};

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An exception collected from a worker; shared so that evaluating a result
/// twice reports the same entries.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by spawning and supervising commands.
#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "The executable must be specified before starting the command process. \
         You may want to call CommandSpec::executable() or CommandSpec::command()"
    )]
    ExecutableNotSpecified,

    #[error("Could not execute {command}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "The global thread pool is not mutable once it was created. \
         Configure it before the first command runs on it"
    )]
    PoolAlreadyCreated,

    #[error("{0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// An aggregated assertion failure, rendered by the failure collector.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AssertionError {
    message: String,
}

impl AssertionError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The full aggregated failure text.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Raised when a command does not terminate within the requested time.
#[derive(Debug, Clone, Error)]
#[error("Command has not terminated within {timeout_ms} ms")]
pub struct TimeoutAssertionError {
    timeout_ms: u128,
}

impl TimeoutAssertionError {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout_ms: timeout.as_millis(),
        }
    }
}

/// Raised from the stdin sink once the process was killed.
#[derive(Debug, Error)]
#[error("The process was cancelled")]
pub struct CancellationError;

/// An exception recorded by an I/O worker, labelled with the worker that hit
/// it so concurrent test runs stay debuggable.
#[derive(Debug, Error)]
#[error("{label}: {source}")]
pub struct WorkerError {
    label: String,
    #[source]
    source: io::Error,
}

impl WorkerError {
    pub(crate) fn new(label: impl Into<String>, source: io::Error) -> Self {
        Self {
            label: label.into(),
            source,
        }
    }
}

/// Errors returned when awaiting a line condition.
#[derive(Debug, Error)]
pub enum AwaitError {
    #[error("Awaiting {description} has not finished within {timeout_ms} ms")]
    Timeout { description: String, timeout_ms: u128 },

    #[error("Exception thrown when awaiting {description}")]
    Failed {
        description: String,
        #[source]
        source: SharedError,
    },
}

/// A panic payload converted into an error so worker panics can be reported
/// instead of tearing the stream down.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PanicError {
    message: String,
}

impl PanicError {
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self { message }
    }
}
