//! # System Interaction Layer
//!
//! Everything that touches OS processes, threads and pipes.
//!
//! ## Modules
//!
//! - **`runner`**: `ProcessRunner`, the scheduler. Owns the worker and drain pools and the
//!   registry of live tasks; implements submit, halt, reset and close.
//! - **`task`**: `ProcessTask`, one supervised child. Spawning, exit polling, timeouts, stdin
//!   writes and failure propagation to waiters.
//! - **`drain`**: background readers moving a child's stdout/stderr into sinks, line by line.
//! - **`gate`**: one-shot latches and the pending-work counter used to wait for tasks.
//! - **`signal`**: POSIX signal numbers and delivery through the `kill` utility.
//! - **`platform`**: host detection, executable lookup and exit status decoding.
//! - **`errors`**: `RunnerError`, shared by every operation of the crate.

pub(crate) mod drain;
pub mod errors;
pub mod gate;
pub mod platform;
pub mod runner;
pub mod signal;
pub mod task;
