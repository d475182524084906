// src/constants.rs

use std::time::Duration;

/// How often a task worker polls its child for exit while waiting out a timeout or a halt.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Deadline used by `ProcessRunner::close`.
pub const CLOSE_WAIT: Duration = Duration::from_secs(30 * 60);

/// Maximum number of tasks that may be queued on a runner before `submit` is refused.
pub const DEFAULT_BACKLOG: usize = 1024 * 1024;

/// Lower bound for the number of workers of a parallel runner.
pub const MIN_PARALLEL_WORKERS: usize = 2;

/// Drain threads allocated per scheduling worker (one per output stream).
pub const DRAIN_THREADS_PER_WORKER: usize = 2;

/// Default minimum run of blanks separating two columns of tabular output.
pub const DEFAULT_MIN_SPLIT_SPACES: usize = 2;

/// Environment variable holding the `env_logger` filter for the `procrun` binary.
pub const LOG_ENV_VAR: &str = "PROCRUN_LOG";

/// Group label used in log records of runners created without one.
pub const DEFAULT_GROUP: &str = "runner";

/// How long a task waits for the output of a destroyed process to close before abandoning its
/// drains. A grandchild holding the pipe open would otherwise stall the task indefinitely.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);
