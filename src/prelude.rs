pub use crate::{
    Await, CommandProcess, CommandResult, CommandSpec, LineAwait, ProcessOutput, command,
    current_exe, given, global_thread_pool,
};

pub use crate::Result;
