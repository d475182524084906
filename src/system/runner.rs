// src/system/runner.rs

//! The scheduler.
//!
//! A [`ProcessRunner`] owns a scheduling pool (one thread when serial, one per CPU when
//! parallel), a drain pool shared by the output readers of its tasks, and the registry of tasks
//! that have not stopped yet. `halt` retires the current pools; `reset` installs fresh ones so
//! the same runner can be used again.

use crate::constants::{CLOSE_WAIT, DRAIN_THREADS_PER_WORKER, MIN_PARALLEL_WORKERS};
use crate::core::config_loader::RunnerConfig;
use crate::core::lock;
use crate::core::sinks::{SharedSink, line_fn};
use crate::models::{CommandSpec, RunMode};
use crate::system::errors::RunnerError;
use crate::system::drain::DrainPool;
use crate::system::gate::WorkTracker;
use crate::system::signal::Signal;
use crate::system::task::{ProcessTask, TaskContext};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type UserData = Arc<dyn Any + Send + Sync>;

/// Options of [`ProcessRunner::cmd`].
///
/// When no `stderr` sink is given, stderr is merged into the output sink.
#[derive(Default)]
pub struct CmdOptions {
    /// Command line, tokenized like a shell would.
    pub line: String,
    /// Working directory of the child.
    pub dir: Option<PathBuf>,
    /// Environment overrides.
    pub env: HashMap<String, String>,
    /// Fail the task on a non-zero exit code.
    pub fail_on_exit_code: bool,
    /// Fail the task when it runs into `timeout` or a wait budget.
    pub fail_on_timeout: bool,
    /// Run time limit; zero disables it.
    pub timeout: Duration,
    /// Separate sink for stderr.
    pub stderr: Option<SharedSink>,
}

impl CmdOptions {
    /// Options running `line` with everything else defaulted.
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            ..Self::default()
        }
    }

    /// Sets the working directory.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Adds an environment override.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Fail the task on a non-zero exit code.
    pub fn fail_on_exit_code(mut self, yes: bool) -> Self {
        self.fail_on_exit_code = yes;
        self
    }

    /// Fail the task on a timeout.
    pub fn fail_on_timeout(mut self, yes: bool) -> Self {
        self.fail_on_timeout = yes;
        self
    }

    /// Sets the run time limit.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Routes stderr to its own sink instead of merging it.
    pub fn stderr(mut self, sink: SharedSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    fn into_parts(self) -> (CommandSpec, Option<SharedSink>) {
        let spec = CommandSpec::from_line(self.line)
            .envs(self.env)
            .fail_on_exit_code(self.fail_on_exit_code)
            .fail_on_timeout(self.fail_on_timeout)
            .timeout(self.timeout)
            .merge_stderr(self.stderr.is_none());
        let spec = match self.dir {
            Some(dir) => spec.working_dir(dir),
            None => spec,
        };
        (spec, self.stderr)
    }
}

impl From<&str> for CmdOptions {
    fn from(line: &str) -> Self {
        Self::new(line)
    }
}

impl From<String> for CmdOptions {
    fn from(line: String) -> Self {
        Self::new(line)
    }
}

impl fmt::Debug for CmdOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmdOptions")
            .field("line", &self.line)
            .field("dir", &self.dir)
            .field("env", &self.env)
            .field("fail_on_exit_code", &self.fail_on_exit_code)
            .field("fail_on_timeout", &self.fail_on_timeout)
            .field("timeout", &self.timeout)
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

struct Pools {
    workers: ThreadPool,
    drains: Arc<DrainPool>,
}

/// Pools and pending work of one halt-to-halt span of a runner.
struct Generation {
    number: u64,
    /// `None` once halted.
    pools: Option<Pools>,
    work: Arc<WorkTracker>,
}

pub(crate) struct RunnerInner {
    config: RunnerConfig,
    workers: usize,
    drain_threads: usize,
    registry: Mutex<BTreeMap<u64, Arc<ProcessTask>>>,
    generation: Mutex<Generation>,
    next_id: AtomicU64,
    user_data: Mutex<HashMap<String, UserData>>,
}

impl RunnerInner {
    pub(crate) fn deregister(&self, id: u64) {
        lock(&self.registry).remove(&id);
    }

    fn build_pools(&self, number: u64) -> Result<Pools, RunnerError> {
        let group = self.config.group.clone();
        let workers = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name({
                let group = group.clone();
                move |i| format!("{}-{}-worker-{}", group, number, i)
            })
            .panic_handler(|_| log::error!("A runner worker panicked."))
            .build()?;
        let drains = ThreadPoolBuilder::new()
            .num_threads(self.drain_threads)
            .thread_name({
                let group = group.clone();
                move |i| format!("{}-{}-drain-{}", group, number, i)
            })
            .panic_handler(|_| log::error!("A drain worker panicked."))
            .build()?;
        Ok(Pools {
            workers,
            drains: Arc::new(DrainPool::new(drains, format!("{}-{}-drain", group, number))),
        })
    }
}

/// Scheduler of supervised processes. Cloning yields another handle to the same runner.
#[derive(Clone)]
pub struct ProcessRunner {
    inner: Arc<RunnerInner>,
}

impl ProcessRunner {
    /// A runner executing one command at a time, in submission order.
    pub fn serial(group: impl Into<String>) -> Result<Self, RunnerError> {
        Self::with_config(RunnerConfig {
            mode: RunMode::Serial,
            group: group.into(),
            ..RunnerConfig::default()
        })
    }

    /// A runner executing up to `max(CPUs, 2)` commands at once.
    pub fn parallel(group: impl Into<String>) -> Result<Self, RunnerError> {
        Self::with_config(RunnerConfig {
            mode: RunMode::Parallel,
            group: group.into(),
            ..RunnerConfig::default()
        })
    }

    /// Builds a runner from `config`. Fails only when a pool cannot be created.
    pub fn with_config(config: RunnerConfig) -> Result<Self, RunnerError> {
        let workers = match config.mode {
            RunMode::Serial => 1,
            RunMode::Parallel => config.workers.filter(|n| *n > 0).unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(1)
                    .max(MIN_PARALLEL_WORKERS)
            }),
        };
        let drain_threads = config
            .drain_threads
            .filter(|n| *n > 0)
            .unwrap_or(workers * DRAIN_THREADS_PER_WORKER);
        log::debug!(
            "[{}] Creating {} runner with {} worker(s) and {} drain thread(s).",
            config.group,
            config.mode,
            workers,
            drain_threads
        );

        let mut inner = RunnerInner {
            config,
            workers,
            drain_threads,
            registry: Mutex::new(BTreeMap::new()),
            generation: Mutex::new(Generation {
                number: 0,
                pools: None,
                work: Arc::new(WorkTracker::new()),
            }),
            next_id: AtomicU64::new(1),
            user_data: Mutex::new(HashMap::new()),
        };
        let pools = inner.build_pools(0)?;
        inner
            .generation
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pools = Some(pools);
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub(crate) fn from_inner(inner: Arc<RunnerInner>) -> Self {
        Self { inner }
    }

    /// Validates `spec`, registers a task for it and schedules the task on a worker.
    ///
    /// Output of the child goes to `stdout` (or to it alone when the spec merges stderr) and to
    /// `stderr`; a stream without a sink is discarded.
    pub fn submit(
        &self,
        spec: CommandSpec,
        stdout: Option<SharedSink>,
        stderr: Option<SharedSink>,
    ) -> Result<Arc<ProcessTask>, RunnerError> {
        let generation = lock(&self.inner.generation);
        let Some(pools) = generation.pools.as_ref() else {
            return Err(RunnerError::RunnerHalted);
        };
        let limit = self.inner.config.backlog;
        if !generation.work.try_begin(limit) {
            log::warn!("[{}] Refusing task, {} already pending.", self.group(), limit);
            return Err(RunnerError::BacklogFull { limit });
        }

        let ctx = TaskContext {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            group: self.inner.config.group.clone(),
            verbose: self.inner.config.verbose,
            runner: Arc::downgrade(&self.inner),
            drains: Arc::clone(&pools.drains),
            work: Arc::clone(&generation.work),
        };
        let task = match ProcessTask::prepare(spec, stdout, stderr, ctx) {
            Ok(task) => task,
            Err(e) => {
                generation.work.finish();
                log::error!("[{}] {}", self.group(), e);
                return Err(e);
            }
        };

        lock(&self.inner.registry).insert(task.id(), Arc::clone(&task));
        let job = Arc::clone(&task);
        pools.workers.spawn_fifo(move || job.run());
        log::debug!(
            "[{}/{}] Scheduled: {}",
            self.group(),
            task.id(),
            task.command()
        );
        Ok(task)
    }

    /// Tokenizes a command line and submits it.
    ///
    /// ```no_run
    /// use procrun::{BufferCollector, CmdOptions, ProcessRunner};
    /// use std::sync::Arc;
    ///
    /// let runner = ProcessRunner::serial("docs")?;
    /// let out = Arc::new(BufferCollector::unbounded());
    /// runner
    ///     .cmd(CmdOptions::new("ls -la").fail_on_exit_code(true), Some(out.clone()))?
    ///     .wait_for(None)?;
    /// println!("{}", out);
    /// # Ok::<(), procrun::RunnerError>(())
    /// ```
    pub fn cmd(
        &self,
        opts: impl Into<CmdOptions>,
        output: Option<SharedSink>,
    ) -> Result<Arc<ProcessTask>, RunnerError> {
        let (spec, stderr) = opts.into().into_parts();
        self.submit(spec, output, stderr)
    }

    /// [`Self::cmd`] with a closure receiving every output line.
    pub fn cmd_fn<F>(&self, opts: impl Into<CmdOptions>, output: F) -> Result<Arc<ProcessTask>, RunnerError>
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.cmd(opts, Some(line_fn(output)))
    }

    /// Stops accepting tasks, optionally signals every live child (queued tasks are cancelled),
    /// and waits up to `max_wait` for all scheduled work to finish. Whatever is still running
    /// after that is destroyed.
    ///
    /// Returns whether all work finished within the deadline.
    pub fn halt(&self, max_wait: Duration, signal: Option<Signal>) -> bool {
        self.halt_with(max_wait, signal, |_| {})
    }

    /// [`Self::halt`], then `on_halted`.
    pub fn halt_with<F>(&self, max_wait: Duration, signal: Option<Signal>, on_halted: F) -> bool
    where
        F: FnOnce(&Self),
    {
        let (work, pools) = {
            let mut generation = lock(&self.inner.generation);
            (Arc::clone(&generation.work), generation.pools.take())
        };
        if pools.is_none() {
            log::debug!("[{}] Runner was already halted.", self.group());
        }

        if let Some(signal) = signal {
            for task in self.tasks() {
                match task.signal_or_cancel(signal) {
                    Ok(true) => {}
                    Ok(false) => log::debug!("[{}/{}] No live process to receive {}.", self.group(), task.id(), signal),
                    Err(e) => log::warn!("[{}/{}] Failed to deliver {}: {}", self.group(), task.id(), signal, e),
                }
            }
        }

        let natural = work.wait_idle(max_wait);
        let leftovers = std::mem::take(&mut *lock(&self.inner.registry));
        if !natural {
            log::warn!(
                "[{}] Halt deadline of {:?} passed, destroying {} remaining task(s).",
                self.group(),
                max_wait,
                leftovers.len()
            );
        }
        for task in leftovers.values() {
            task.destroy();
        }
        // Queued jobs still run to completion before the pool threads exit.
        drop(pools);
        log::debug!("[{}] Halted (natural: {}).", self.group(), natural);
        on_halted(self);
        natural
    }

    /// Halts the runner and makes it accept tasks again with fresh pools.
    pub fn reset(&self, max_wait: Duration, signal: Option<Signal>) -> Result<bool, RunnerError> {
        self.reset_with(max_wait, signal, |_| {})
    }

    /// [`Self::reset`], then `on_reset` once the runner accepts tasks again.
    pub fn reset_with<F>(&self, max_wait: Duration, signal: Option<Signal>, on_reset: F) -> Result<bool, RunnerError>
    where
        F: FnOnce(&Self),
    {
        let natural = self.halt(max_wait, signal);
        {
            let mut generation = lock(&self.inner.generation);
            let number = generation.number + 1;
            generation.pools = Some(self.inner.build_pools(number)?);
            generation.number = number;
            generation.work = Arc::new(WorkTracker::new());
        }
        log::debug!("[{}] Runner reset.", self.group());
        on_reset(self);
        Ok(natural)
    }

    /// Halts with a generous deadline and no signal.
    pub fn close(&self) -> bool {
        self.halt(CLOSE_WAIT, None)
    }

    /// Number of tasks that have not stopped yet.
    pub fn tasks_num(&self) -> usize {
        lock(&self.inner.registry).len()
    }

    /// Snapshot of the tasks that have not stopped yet, in submission order.
    pub fn tasks(&self) -> Vec<Arc<ProcessTask>> {
        lock(&self.inner.registry).values().cloned().collect()
    }

    /// Whether `submit` takes new tasks, i.e. the runner is not halted.
    pub fn is_accepting(&self) -> bool {
        lock(&self.inner.generation).pools.is_some()
    }

    /// Log label of the runner.
    pub fn group(&self) -> &str {
        &self.inner.config.group
    }

    /// Serial or parallel.
    pub fn mode(&self) -> RunMode {
        self.inner.config.mode
    }

    /// Number of processes this runner may supervise at once.
    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// The configuration the runner was built with.
    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// Attaches an arbitrary value to the runner, replacing any previous value under `key`.
    pub fn set_user_data<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        lock(&self.inner.user_data).insert(key.into(), Arc::new(value));
    }

    /// The value stored under `key`, if there is one of type `T`.
    pub fn user_data<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = lock(&self.inner.user_data).get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Drops the value under `key`; `false` if there was none.
    pub fn remove_user_data(&self, key: &str) -> bool {
        lock(&self.inner.user_data).remove(key).is_some()
    }
}

impl fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("group", &self.group())
            .field("mode", &self.mode())
            .field("workers", &self.inner.workers)
            .field("tasks", &self.tasks_num())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}
