// src/system/errors.rs

use crate::models::StreamKind;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Everything that can go wrong while describing, spawning, supervising or halting a process.
///
/// The type is `Clone` so that a failure recorded by a task can be handed to every caller
/// waiting on it; I/O sources are shared through `Arc` for that reason.
#[derive(Error, Debug, Clone)]
pub enum RunnerError {
    #[error("No command specified to run.")]
    EmptyCommand,

    #[error("Command could not be parsed: {0}")]
    CommandParse(String),

    #[error("A command must be given either as a program with arguments or as a command line, not both.")]
    AmbiguousCommand,

    #[error("Process '{command}' could not be spawned: {source}")]
    Spawn {
        command: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("Process '{command}' Exit code: {code}")]
    ExitCode { command: String, code: i32 },

    #[error("Process wait timeout: '{command}'")]
    Timeout { command: String },

    #[error("Output handler for {stream} of '{command}' failed: {message}")]
    Sink {
        command: String,
        stream: StreamKind,
        message: String,
    },

    #[error("Signal delivery is not supported: {reason}")]
    UnsupportedSignal { reason: String },

    #[error("process hasn't exited")]
    NotExited,

    #[error("Process '{command}' stdin is not piped")]
    StdinNotPiped { command: String },

    #[error("Process '{command}' stdin has already been closed")]
    StdinClosed { command: String },

    #[error("Process '{command}' was cancelled before it started")]
    Cancelled { command: String },

    #[error("Runner has been halted and does not accept new tasks.")]
    RunnerHalted,

    #[error("Runner backlog is full ({limit} tasks pending).")]
    BacklogFull { limit: usize },

    #[error("I/O error on process '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("Worker pool could not be created: {0}")]
    Pool(String),
}

impl RunnerError {
    pub(crate) fn io(command: &str, source: io::Error) -> Self {
        Self::Io {
            command: command.to_string(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn spawn(command: &str, source: io::Error) -> Self {
        Self::Spawn {
            command: command.to_string(),
            source: Arc::new(source),
        }
    }

    /// Exit code carried by an `ExitCode` failure.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitCode { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this is a `Timeout` failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<rayon::ThreadPoolBuildError> for RunnerError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Self::Pool(err.to_string())
    }
}
