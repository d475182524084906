// src/core/sinks/mod.rs

//! # Output Sinks
//!
//! A sink is the consumer end of a drain worker: every line a child writes to a drained stream is
//! handed to [`OutputSink::consume`], in order, without its line terminator.
//!
//! - **`buffer`**: [`BufferCollector`], accumulates text up to a character cap.
//! - **`tabular`**: [`TabularCollector`], parses column-aligned output (`docker ps`, `ps`, ...)
//!   into rows and named rows.
//! - [`FnSink`] adapts a caller closure.
//!
//! Sinks are shared as [`SharedSink`] (`Arc<dyn OutputSink>`) so the caller keeps a handle to read
//! results once the task has stopped. Each sink expects a single writer; sharing one between two
//! streams or tasks is allowed but lines from different writers interleave arbitrarily.

pub mod buffer;
pub mod tabular;

pub use buffer::BufferCollector;
pub use tabular::{SplitMode, TabularCollector, TabularCollectorBuilder};

use crate::core::lock;
use anyhow::Result;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Consumer of process output, one line at a time.
pub trait OutputSink: Send + Sync {
    /// Receives one line. An error aborts the drain of the stream this line came from.
    fn consume(&self, line: &str) -> Result<()>;
}

/// Reference-counted sink handle passed to the runner.
pub type SharedSink = Arc<dyn OutputSink>;

/// Optional rewrite applied to each line before a collector stores it.
pub type LineTransform = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Adapter turning a closure into an [`OutputSink`].
pub struct FnSink<F> {
    f: Mutex<F>,
}

impl<F> FnSink<F>
where
    F: FnMut(&str) -> Result<()> + Send,
{
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f: Mutex::new(f) }
    }
}

impl<F> OutputSink for FnSink<F>
where
    F: FnMut(&str) -> Result<()> + Send,
{
    fn consume(&self, line: &str) -> Result<()> {
        let mut f = lock(&self.f);
        (*f)(line)
    }
}

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSink").finish_non_exhaustive()
    }
}

/// Wraps a fallible closure as a [`SharedSink`].
pub fn sink_fn<F>(f: F) -> SharedSink
where
    F: FnMut(&str) -> Result<()> + Send + 'static,
{
    Arc::new(FnSink::new(f))
}

/// Wraps an infallible closure as a [`SharedSink`].
pub fn line_fn<F>(mut f: F) -> SharedSink
where
    F: FnMut(&str) + Send + 'static,
{
    sink_fn(move |line| {
        f(line);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_line_fn_collects_lines() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            line_fn(move |line| seen.lock().unwrap().push(line.to_string()))
        };
        sink.consume("one").unwrap();
        sink.consume("two").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn test_sink_fn_propagates_errors() {
        let sink = sink_fn(|line| {
            if line == "bad" {
                Err(anyhow!("refusing '{}'", line))
            } else {
                Ok(())
            }
        });
        assert!(sink.consume("good").is_ok());
        let err = sink.consume("bad").unwrap_err();
        assert_eq!(err.to_string(), "refusing 'bad'");
    }
}
