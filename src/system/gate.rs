// src/system/gate.rs

//! Blocking synchronization primitives shared by tasks and runners.
//!
//! - [`Gate`]: a one-shot latch. Once opened it stays open, so a waiter arriving late can never
//!   miss the notification.
//! - [`WorkTracker`]: counts scheduled work of one runner generation and lets `halt` wait for it
//!   to drain.

use crate::core::lock;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One-shot latch with blocking waits.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    /// A closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the gate and wakes every waiter. Opening twice is a no-op.
    pub fn open(&self) {
        let mut open = lock(&self.open);
        if !*open {
            *open = true;
            self.cond.notify_all();
        }
    }

    /// Whether the gate has been opened.
    pub fn is_open(&self) -> bool {
        *lock(&self.open)
    }

    /// Blocks until the gate opens.
    pub fn wait(&self) {
        let mut open = lock(&self.open);
        while !*open {
            open = self
                .cond
                .wait(open)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Blocks until the gate opens or `deadline` passes; returns whether it is open.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut open = lock(&self.open);
        while !*open {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(open, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            open = guard;
        }
        true
    }

    /// Waits for the gate, bounded by `deadline` when one is given.
    pub fn wait_deadline(&self, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => self.wait_until(deadline),
            None => {
                self.wait();
                true
            }
        }
    }
}

/// Counter of scheduled-but-unfinished work items.
#[derive(Debug, Default)]
pub struct WorkTracker {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl WorkTracker {
    /// A tracker with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unfinished work items.
    pub fn pending(&self) -> usize {
        *lock(&self.pending)
    }

    /// Registers a work item unless `limit` items are already pending.
    pub fn try_begin(&self, limit: usize) -> bool {
        let mut pending = lock(&self.pending);
        if *pending >= limit {
            return false;
        }
        *pending += 1;
        true
    }

    /// Marks one item done, waking idle waiters at zero.
    pub fn finish(&self) {
        let mut pending = lock(&self.pending);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    /// Blocks until no work is pending or `max_wait` elapses; returns whether it went idle.
    pub fn wait_idle(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now().checked_add(max_wait);
        let mut pending = lock(&self.pending);
        while *pending > 0 {
            let timeout = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    deadline - now
                }
                // Deadline beyond what `Instant` can represent: wait in long slices.
                None => Duration::from_secs(3600),
            };
            let (guard, _) = self
                .idle
                .wait_timeout(pending, timeout)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            pending = guard;
        }
        true
    }
}
