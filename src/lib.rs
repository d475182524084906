//! # procrun
//!
//! Supervised execution of external processes with line-oriented output streaming.
//!
//! A [`ProcessRunner`] schedules commands on a serial or parallel worker pool. Each submitted
//! command becomes a [`ProcessTask`] whose output streams are drained line by line into
//! [`OutputSink`]s such as [`BufferCollector`] and [`TabularCollector`].
//!
//! ```no_run
//! use procrun::{BufferCollector, ProcessRunner};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let runner = ProcessRunner::parallel("example")?;
//! let out = Arc::new(BufferCollector::unbounded());
//! let task = runner.cmd("uname -a", Some(out.clone()))?;
//! task.wait_for(Some(Duration::from_secs(10)))?;
//! println!("{} exited with {}: {}", task.command(), task.exit_code()?, out);
//! runner.close();
//! # Ok::<(), procrun::RunnerError>(())
//! ```

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;

pub use crate::core::config_loader::{CommandConfig, JobFile, RunnerConfig};
pub use crate::core::sinks::{
    BufferCollector, FnSink, OutputSink, SharedSink, SplitMode, TabularCollector, line_fn, sink_fn,
};
pub use crate::models::{CommandSpec, RunMode, StreamKind};
pub use crate::system::errors::RunnerError;
pub use crate::system::runner::{CmdOptions, ProcessRunner};
pub use crate::system::signal::Signal;
pub use crate::system::task::{ProcessTask, TaskState};
