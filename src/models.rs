// src/models.rs

use crate::core::tokenizer;
use crate::system::errors::RunnerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scheduling discipline of a `ProcessRunner`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One worker, submitted commands run strictly in FIFO order.
    #[default]
    Serial,
    /// A pool of `max(CPUs, 2)` workers.
    Parallel,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => f.write_str("serial"),
            Self::Parallel => f.write_str("parallel"),
        }
    }
}

/// Which child stream a drain worker is reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
    /// stdout and stderr redirected into one pipe.
    Merged,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("STDOUT"),
            Self::Stderr => f.write_str("STDERR"),
            Self::Merged => f.write_str("STDALL"),
        }
    }
}

/// Immutable description of one process invocation.
///
/// A spec carries either an executable with its arguments or a raw command line that is
/// tokenized at submit time. It is built once with the consuming builder methods and handed to
/// exactly one task.
///
/// ```
/// use procrun::CommandSpec;
/// use std::time::Duration;
///
/// let spec = CommandSpec::new("/bin/sh")
///     .args(["-c", "echo hello"])
///     .env("GREETING", "hi")
///     .fail_on_exit_code(true)
///     .timeout(Duration::from_secs(5));
/// assert_eq!(spec.argv().unwrap(), vec!["/bin/sh", "-c", "echo hello"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    program: Option<String>,
    args: Vec<String>,
    line: Option<String>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    inherit_io: bool,
    merge_stderr: bool,
    fail_on_exit_code: bool,
    fail_on_timeout: bool,
    timeout: Duration,
}

impl CommandSpec {
    /// A spec running `program` with no arguments yet.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: Some(program.into()),
            ..Self::default()
        }
    }

    /// A spec whose argv is obtained by tokenizing a shell-like `line`.
    pub fn from_line(line: impl Into<String>) -> Self {
        Self {
            line: Some(line.into()),
            ..Self::default()
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds one environment override on top of the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Adds several environment overrides.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Directory the child starts in.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Child shares stdin/stdout/stderr with the current process; no sinks are attached.
    pub fn inherit_io(mut self, yes: bool) -> Self {
        self.inherit_io = yes;
        self
    }

    /// Redirect stderr into the stdout pipe.
    pub fn merge_stderr(mut self, yes: bool) -> Self {
        self.merge_stderr = yes;
        self
    }

    /// Treat a non-zero exit code as a task failure.
    pub fn fail_on_exit_code(mut self, yes: bool) -> Self {
        self.fail_on_exit_code = yes;
        self
    }

    /// Treat running into a timeout as a task failure.
    pub fn fail_on_timeout(mut self, yes: bool) -> Self {
        self.fail_on_timeout = yes;
        self
    }

    /// Maximum run time of the process; `Duration::ZERO` means unbounded.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Executable, when the spec was built from one.
    pub fn program(&self) -> Option<&str> {
        self.program.as_deref()
    }

    /// Extra arguments, appended after the program or the tokenized line.
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Raw command line, when the spec was built from one.
    pub fn line(&self) -> Option<&str> {
        self.line.as_deref()
    }

    /// Environment overrides.
    pub fn env_vars(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Working directory, if set.
    pub fn dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Whether the child shares the current process's standard streams.
    pub fn inherits_io(&self) -> bool {
        self.inherit_io
    }

    /// Whether stderr goes to the stdout pipe.
    pub fn merges_stderr(&self) -> bool {
        self.merge_stderr
    }

    /// Whether a non-zero exit code fails the task.
    pub fn fails_on_exit_code(&self) -> bool {
        self.fail_on_exit_code
    }

    /// Whether running into a timeout fails the task.
    pub fn fails_on_timeout(&self) -> bool {
        self.fail_on_timeout
    }

    /// The run time limit, `None` when unbounded.
    pub fn time_limit(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Resolves the spec to the argv handed to the OS.
    pub fn argv(&self) -> Result<Vec<String>, RunnerError> {
        let argv = match (&self.program, &self.line) {
            (Some(_), Some(_)) => return Err(RunnerError::AmbiguousCommand),
            (Some(program), None) => {
                let mut argv = Vec::with_capacity(self.args.len() + 1);
                argv.push(program.clone());
                argv.extend(self.args.iter().cloned());
                argv
            }
            (None, Some(line)) => {
                let mut argv = tokenizer::tokenize(line)?;
                argv.extend(self.args.iter().cloned());
                argv
            }
            (None, None) => Vec::new(),
        };
        match argv.first() {
            Some(program) if !program.trim().is_empty() => Ok(argv),
            _ => Err(RunnerError::EmptyCommand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argv_from_program_and_args() {
        let spec = CommandSpec::new("ls").arg("-la").args(["/tmp", "/var"]);
        assert_eq!(spec.argv().unwrap(), vec!["ls", "-la", "/tmp", "/var"]);
    }

    #[test]
    fn test_argv_from_line_respects_quotes() {
        let spec = CommandSpec::from_line("/bin/sh -c 'exit 22'");
        assert_eq!(spec.argv().unwrap(), vec!["/bin/sh", "-c", "exit 22"]);
    }

    #[test]
    fn test_empty_specs_are_rejected() {
        assert!(matches!(
            CommandSpec::default().argv(),
            Err(RunnerError::EmptyCommand)
        ));
        assert!(matches!(
            CommandSpec::from_line("   ").argv(),
            Err(RunnerError::EmptyCommand)
        ));
        assert!(matches!(
            CommandSpec::new("").argv(),
            Err(RunnerError::EmptyCommand)
        ));
    }

    #[test]
    fn test_zero_timeout_is_unbounded() {
        assert_eq!(CommandSpec::new("true").time_limit(), None);
        let spec = CommandSpec::new("true").timeout(Duration::from_millis(250));
        assert_eq!(spec.time_limit(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_run_mode_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Holder {
            mode: RunMode,
        }
        let holder: Holder = toml::from_str("mode = \"parallel\"").unwrap();
        assert_eq!(holder.mode, RunMode::Parallel);
        assert_eq!(RunMode::default().to_string(), "serial");
    }
}
