// src/system/task.rs

//! A supervised child process.
//!
//! A [`ProcessTask`] is created by [`ProcessRunner::submit`](crate::ProcessRunner::submit) and
//! driven by one worker of the runner's scheduling pool through its whole life:
//!
//! 1. spawn the child and attach one drain per captured stream,
//! 2. open the *started* gate,
//! 3. poll for exit, destroying the child once its time limit passes,
//! 4. join the drains and evaluate the exit code,
//! 5. deregister from the runner and open the *stopped* gate.
//!
//! The first failure of steps 1-4 is stored on the task and handed to every caller of
//! [`ProcessTask::wait_for`].

use crate::constants::{DRAIN_GRACE, EXIT_POLL_INTERVAL};
use crate::core::lock;
use crate::core::sinks::SharedSink;
use crate::core::tokenizer;
use crate::models::{CommandSpec, StreamKind};
use crate::system::drain::{self, DrainHandle, DrainJob, DrainPool};
use crate::system::errors::RunnerError;
use crate::system::gate::{Gate, WorkTracker};
use crate::system::platform::{self, ProcessHandle};
use crate::system::runner::{ProcessRunner, RunnerInner};
use crate::system::signal::{self, Signal};
use log::Level;
use std::ffi::OsStr;
use std::fmt;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Lifecycle of a task. Transitions only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskState {
    /// Submitted; waiting for a worker.
    #[default]
    Created,
    /// The child has been spawned and its output is being drained.
    Running,
    /// The child is gone (or was never started) and the task left its runner.
    Stopped,
}

/// What a task was given by its runner at submit time.
#[derive(Debug)]
pub(crate) struct TaskContext {
    pub(crate) id: u64,
    pub(crate) group: String,
    pub(crate) verbose: bool,
    pub(crate) runner: Weak<RunnerInner>,
    pub(crate) drains: Arc<DrainPool>,
    pub(crate) work: Arc<WorkTracker>,
}

#[derive(Default)]
struct Outputs {
    stdout: Option<SharedSink>,
    stderr: Option<SharedSink>,
}

type Stream = (StreamKind, Box<dyn Read + Send>, SharedSink);

enum Stdin {
    /// The child has not been spawned yet.
    Pending,
    Open(ChildStdin),
    Closed,
    NotPiped,
}

#[derive(Debug, Default)]
struct Status {
    state: TaskState,
    exit_code: Option<i32>,
    failure: Option<RunnerError>,
    cancelled: bool,
    destroyed: bool,
}

/// One process under supervision.
pub struct ProcessTask {
    id: u64,
    tag: String,
    command: String,
    argv: Vec<String>,
    spec: CommandSpec,
    verbose: bool,
    child: Mutex<Option<Child>>,
    pid: OnceLock<u32>,
    stdin: Mutex<Stdin>,
    outputs: Mutex<Option<Outputs>>,
    status: Mutex<Status>,
    started: Gate,
    stopped: Gate,
    runner: Weak<RunnerInner>,
    drains: Arc<DrainPool>,
    work: Arc<WorkTracker>,
}

impl ProcessTask {
    /// Validates `spec` and builds the task. The child is spawned later, by [`Self::run`].
    ///
    /// Everything that makes a spawn fail predictably (empty or ambiguous command, unknown
    /// executable, missing working directory) is reported here, synchronously.
    pub(crate) fn prepare(
        spec: CommandSpec,
        stdout: Option<SharedSink>,
        stderr: Option<SharedSink>,
        ctx: TaskContext,
    ) -> Result<Arc<Self>, RunnerError> {
        let argv = spec.argv()?;
        let command = tokenizer::render(&argv);
        preflight(&argv, &spec, &command)?;

        let tag = format!("{}/{}", ctx.group, ctx.id);
        if spec.inherits_io() && (stdout.is_some() || stderr.is_some()) {
            log::debug!("[{}] Output is inherited, sinks will not be attached.", tag);
        }
        Ok(Arc::new(Self {
            id: ctx.id,
            tag,
            command,
            argv,
            spec,
            verbose: ctx.verbose,
            child: Mutex::new(None),
            pid: OnceLock::new(),
            stdin: Mutex::new(Stdin::Pending),
            outputs: Mutex::new(Some(Outputs { stdout, stderr })),
            status: Mutex::new(Status::default()),
            started: Gate::new(),
            stopped: Gate::new(),
            runner: ctx.runner,
            drains: ctx.drains,
            work: ctx.work,
        }))
    }

    /// Worker body. Always ends in `Stopped`, even when it unwinds.
    pub(crate) fn run(self: Arc<Self>) {
        let task = scopeguard::guard(self, |task| task.complete());
        task.execute();
    }

    fn execute(&self) {
        let outputs = lock(&self.outputs).take().unwrap_or_default();
        let streams = {
            let mut slot = lock(&self.child);
            if lock(&self.status).cancelled {
                self.lifecycle(format_args!("Cancelled before start: {}", self.command));
                self.record_failure(RunnerError::Cancelled {
                    command: self.command.clone(),
                });
                return;
            }
            match self.spawn_child(&outputs) {
                Ok((child, streams)) => {
                    *slot = Some(child);
                    streams
                }
                Err(e) => {
                    log::error!("[{}] {}", self.tag, e);
                    self.record_failure(e);
                    return;
                }
            }
        };
        lock(&self.status).state = TaskState::Running;

        let mut drains: Vec<DrainHandle> = Vec::with_capacity(streams.len());
        for (stream, reader, sink) in streams {
            let job = DrainJob {
                tag: self.tag.clone(),
                command: self.command.clone(),
                stream,
                reader,
                sink,
            };
            match drain::spawn_drain(&self.drains, job) {
                Ok(handle) => drains.push(handle),
                Err(e) => {
                    log::error!("[{}] No thread to drain {}: {}", self.tag, stream, e);
                    self.record_failure(e);
                    self.destroy();
                }
            }
        }
        self.started.open();

        let code = self.await_exit();
        let grace = lock(&self.status).destroyed.then_some(DRAIN_GRACE);
        for handle in drains {
            let stream = handle.stream();
            match handle.join_within(&self.command, grace) {
                Some(Ok(lines)) => log::trace!("[{}] {} delivered {} line(s).", self.tag, stream, lines),
                Some(Err(e)) => self.record_failure(e),
                None => log::warn!(
                    "[{}] {} still open {:?} after the process was destroyed, abandoning it.",
                    self.tag,
                    stream,
                    DRAIN_GRACE
                ),
            }
        }

        self.lifecycle(format_args!("Exit code {}: {}", code, self.command));
        lock(&self.status).exit_code = Some(code);
        if self.spec.fails_on_exit_code() && code != 0 {
            self.record_failure(RunnerError::ExitCode {
                command: self.command.clone(),
                code,
            });
        }
    }

    fn spawn_child(&self, outputs: &Outputs) -> Result<(Child, Vec<Stream>), RunnerError> {
        let (program, args) = self.argv.split_first().ok_or(RunnerError::EmptyCommand)?;
        let mut command = Command::new(program);
        command.args(args).envs(self.spec.env_vars());
        if let Some(dir) = self.spec.dir() {
            command.current_dir(dunce::simplified(dir));
        }

        let mut merged = None;
        if self.spec.inherits_io() {
            command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        } else {
            command.stdin(Stdio::piped());
            if outputs.stdout.is_some() && self.spec.merges_stderr() {
                let (reader, writer) =
                    io::pipe().map_err(|e| RunnerError::spawn(&self.command, e))?;
                let stdout_writer = writer
                    .try_clone()
                    .map_err(|e| RunnerError::spawn(&self.command, e))?;
                command.stdout(stdout_writer).stderr(writer);
                merged = Some(reader);
            } else {
                command.stdout(piped_if(outputs.stdout.is_some()));
                command.stderr(piped_if(
                    outputs.stderr.is_some() && !self.spec.merges_stderr(),
                ));
            }
        }

        self.lifecycle(format_args!("Executing: {}", self.command));
        let spawned = command.spawn();
        // `command` still owns the parent's ends of a merged pipe; the drain only sees EOF
        // once they are closed.
        drop(command);
        let mut child = spawned.map_err(|e| RunnerError::spawn(&self.command, e))?;
        let _ = self.pid.set(child.id());
        log::debug!("[{}] Spawned with pid {}.", self.tag, child.id());

        *lock(&self.stdin) = match child.stdin.take() {
            Some(pipe) => Stdin::Open(pipe),
            None => Stdin::NotPiped,
        };

        let mut streams: Vec<Stream> = Vec::with_capacity(2);
        if let Some(sink) = &outputs.stdout {
            if let Some(reader) = merged {
                streams.push((StreamKind::Merged, Box::new(reader), Arc::clone(sink)));
            } else if let Some(out) = child.stdout.take() {
                streams.push((StreamKind::Stdout, Box::new(out), Arc::clone(sink)));
            }
        }
        if let Some(sink) = &outputs.stderr {
            if let Some(err) = child.stderr.take() {
                streams.push((StreamKind::Stderr, Box::new(err), Arc::clone(sink)));
            }
        }
        Ok((child, streams))
    }

    /// Polls the child until it exits, enforcing the time limit of the spec.
    fn await_exit(&self) -> i32 {
        let mut deadline = self
            .spec
            .time_limit()
            .and_then(|limit| Instant::now().checked_add(limit));
        loop {
            let polled = match lock(&self.child).as_mut() {
                Some(child) => child.try_wait(),
                None => return -1,
            };
            match polled {
                Ok(Some(status)) => return platform::exit_code(status),
                Ok(None) => {}
                Err(e) => {
                    log::error!("[{}] Failed to poll process: {}", self.tag, e);
                    self.record_failure(RunnerError::io(&self.command, e));
                    self.destroy();
                    return -1;
                }
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                deadline = None;
                log::error!("[{}] Process timeout: {}", self.tag, self.command);
                if self.spec.fails_on_timeout() {
                    self.record_failure(RunnerError::Timeout {
                        command: self.command.clone(),
                    });
                }
                self.destroy();
                continue;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    fn complete(&self) {
        if thread::panicking() {
            log::error!("[{}] Worker panicked, destroying the process.", self.tag);
            self.destroy();
        }
        lock(&self.status).state = TaskState::Stopped;
        *lock(&self.stdin) = Stdin::Closed;
        if let Some(runner) = self.runner.upgrade() {
            runner.deregister(self.id);
        }
        self.started.open();
        self.stopped.open();
        self.work.finish();
        log::trace!("[{}] Stopped.", self.tag);
    }

    fn record_failure(&self, err: RunnerError) {
        let mut status = lock(&self.status);
        match &status.failure {
            Some(first) => log::debug!("[{}] Ignoring later failure ({}), first was: {}", self.tag, err, first),
            None => status.failure = Some(err),
        }
    }

    fn lifecycle(&self, args: fmt::Arguments<'_>) {
        let level = if self.verbose { Level::Info } else { Level::Debug };
        log::log!(level, "[{}] {}", self.tag, args);
    }

    /// Blocks until the task stops or `budget` runs out.
    ///
    /// Returns `Ok(true)` once stopped, or the failure recorded by the task. When the budget runs
    /// out the result depends on `fail_on_timeout`: with it the process is destroyed and
    /// `Timeout` is returned, without it the call returns `Ok(false)` and the process keeps
    /// running.
    pub fn wait_for(&self, budget: Option<Duration>) -> Result<bool, RunnerError> {
        let deadline = budget.and_then(|budget| Instant::now().checked_add(budget));
        let stopped = self.started.wait_deadline(deadline) && self.stopped.wait_deadline(deadline);
        if !stopped {
            if !self.spec.fails_on_timeout() {
                return Ok(false);
            }
            log::error!("[{}] Process wait timeout: {}", self.tag, self.command);
            let err = RunnerError::Timeout {
                command: self.command.clone(),
            };
            self.record_failure(err.clone());
            self.destroy();
            return Err(err);
        }
        match &lock(&self.status).failure {
            Some(err) => Err(err.clone()),
            None => Ok(true),
        }
    }

    /// [`Self::wait_for`], then `on_stopped` if the task stopped cleanly.
    pub fn wait_for_with<F>(&self, budget: Option<Duration>, on_stopped: F) -> Result<bool, RunnerError>
    where
        F: FnOnce(&Self),
    {
        let stopped = self.wait_for(budget)?;
        if stopped {
            on_stopped(self);
        }
        Ok(stopped)
    }

    /// Writes `data` to the child's stdin, waiting for the child to be spawned first.
    pub fn write(&self, data: &str, flush: bool) -> Result<&Self, RunnerError> {
        if self.spec.inherits_io() {
            return Err(self.stdin_not_piped());
        }
        self.started.wait();
        self.unspawned_failure()?;
        let mut stdin = lock(&self.stdin);
        match &mut *stdin {
            Stdin::Open(pipe) => {
                pipe.write_all(data.as_bytes())
                    .map_err(|e| RunnerError::io(&self.command, e))?;
                if flush {
                    pipe.flush().map_err(|e| RunnerError::io(&self.command, e))?;
                }
                Ok(self)
            }
            Stdin::NotPiped => Err(self.stdin_not_piped()),
            Stdin::Pending | Stdin::Closed => Err(RunnerError::StdinClosed {
                command: self.command.clone(),
            }),
        }
    }

    /// Writes `line` followed by a newline and flushes.
    pub fn writeln(&self, line: &str) -> Result<&Self, RunnerError> {
        self.write(&format!("{}\n", line), true)
    }

    /// Closes the child's stdin so it sees end of input. Closing twice is a no-op.
    pub fn write_end(&self) -> Result<&Self, RunnerError> {
        if self.spec.inherits_io() {
            return Err(self.stdin_not_piped());
        }
        self.started.wait();
        self.unspawned_failure()?;
        let mut stdin = lock(&self.stdin);
        if matches!(*stdin, Stdin::NotPiped) {
            return Err(self.stdin_not_piped());
        }
        *stdin = Stdin::Closed;
        Ok(self)
    }

    /// The recorded failure of a task whose child never came to exist.
    fn unspawned_failure(&self) -> Result<(), RunnerError> {
        if self.pid.get().is_some() {
            return Ok(());
        }
        match &lock(&self.status).failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn stdin_not_piped(&self) -> RunnerError {
        RunnerError::StdinNotPiped {
            command: self.command.clone(),
        }
    }

    /// Sends `signal` to the child. Returns `Ok(false)` when there is no live process to signal.
    pub fn kill(&self, signal: Signal) -> Result<bool, RunnerError> {
        let mut slot = lock(&self.child);
        let Some(child) = slot.as_mut() else {
            return Ok(false);
        };
        if child
            .try_wait()
            .map_err(|e| RunnerError::io(&self.command, e))?
            .is_some()
        {
            return Ok(false);
        }
        signal::kill(child, signal)
    }

    /// Signals a live child, or makes sure a queued one is never spawned.
    pub(crate) fn signal_or_cancel(&self, signal: Signal) -> Result<bool, RunnerError> {
        {
            let slot = lock(&self.child);
            if slot.is_none() {
                lock(&self.status).cancelled = true;
                return Ok(true);
            }
        }
        self.kill(signal)
    }

    /// Kills the child forcibly; a task that has not started yet will never start.
    pub fn destroy(&self) {
        let mut slot = lock(&self.child);
        match slot.as_mut() {
            Some(child) => {
                lock(&self.status).destroyed = true;
                if let Err(e) = child.destroy() {
                    log::warn!("[{}] Failed to destroy process: {}", self.tag, e);
                }
            }
            None => lock(&self.status).cancelled = true,
        }
    }

    /// Halts the runner this task belongs to; see [`ProcessRunner::halt`].
    ///
    /// If the runner no longer exists only this task is waited for.
    pub fn halt_runner(&self, max_wait: Duration, signal: Option<Signal>) -> bool {
        self.halt_runner_with(max_wait, signal, |_| {})
    }

    /// [`Self::halt_runner`], calling `on_halted` with the runner once it is halted.
    pub fn halt_runner_with<F>(&self, max_wait: Duration, signal: Option<Signal>, on_halted: F) -> bool
    where
        F: FnOnce(&ProcessRunner),
    {
        match self.runner() {
            Some(runner) => runner.halt_with(max_wait, signal, on_halted),
            None => {
                log::debug!("[{}] Runner is gone, waiting for this task only.", self.tag);
                let deadline = Instant::now().checked_add(max_wait);
                self.stopped.wait_deadline(deadline)
            }
        }
    }

    /// The runner this task was submitted to, while it still exists.
    pub fn runner(&self) -> Option<ProcessRunner> {
        self.runner.upgrade().map(ProcessRunner::from_inner)
    }

    /// Exit code of the child. Only available once the task has stopped; a task whose child
    /// never ran reports the failure that prevented it.
    pub fn exit_code(&self) -> Result<i32, RunnerError> {
        let status = lock(&self.status);
        match (status.state, status.exit_code) {
            (TaskState::Stopped, Some(code)) => Ok(code),
            (TaskState::Stopped, None) => Err(status.failure.clone().unwrap_or(RunnerError::NotExited)),
            _ => Err(RunnerError::NotExited),
        }
    }

    /// Whether the child exited with a non-zero code.
    pub fn failed(&self) -> Result<bool, RunnerError> {
        Ok(self.exit_code()? != 0)
    }

    /// The failure recorded so far, if any.
    pub fn failure(&self) -> Option<RunnerError> {
        lock(&self.status).failure.clone()
    }

    /// Whether the child has been spawned and has not exited yet.
    pub fn is_alive(&self) -> bool {
        lock(&self.child)
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        lock(&self.status).state
    }

    /// Whether the started gate is open: spawned with drains attached, or gone without a process.
    pub fn is_started(&self) -> bool {
        self.started.is_open()
    }

    /// Whether the task has finished, output included.
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_open()
    }

    /// Sequence number of the task within its runner.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// OS process id, once spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    /// The argv joined with spaces, as used in logs and error messages.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The resolved argv.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// The spec the task was built from.
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }
}

impl fmt::Debug for ProcessTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessTask")
            .field("tag", &self.tag)
            .field("command", &self.command)
            .field("pid", &self.pid())
            .field("status", &*lock(&self.status))
            .finish_non_exhaustive()
    }
}

fn piped_if(piped: bool) -> Stdio {
    if piped { Stdio::piped() } else { Stdio::null() }
}

fn preflight(argv: &[String], spec: &CommandSpec, command: &str) -> Result<(), RunnerError> {
    if let Some(dir) = spec.dir() {
        if !dir.is_dir() {
            return Err(RunnerError::spawn(
                command,
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("working directory '{}' does not exist", dir.display()),
                ),
            ));
        }
    }
    let program = argv.first().ok_or(RunnerError::EmptyCommand)?;
    let search_path = spec.env_vars().get("PATH").map(OsStr::new);
    platform::locate_program(program, spec.dir(), search_path)
        .map(|_| ())
        .map_err(|e| RunnerError::spawn(command, e))
}
