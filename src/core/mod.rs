//! # Core Layer
//!
//! Pure, OS-independent building blocks of the runner.
//!
//! ## Modules
//!
//! - **`tokenizer`**: splits shell-like command lines into argv and column-aligned text into cells.
//! - **`sinks`**: the `OutputSink` contract and the stock collectors that receive process output.
//! - **`config_loader`**: `RunnerConfig` and the TOML job files read by the `procrun` binary.

pub mod config_loader;
pub mod sinks;
pub mod tokenizer;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
