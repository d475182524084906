//! # Config Loader
//!
//! Declarative configuration for runners and the commands they run.
//!
//! - [`RunnerConfig`] describes how a [`ProcessRunner`](crate::ProcessRunner) schedules work.
//! - [`CommandConfig`] is one command of a job file and converts into a [`CommandSpec`].
//! - [`JobFile`] is a TOML document with a `[runner]` table and `[[command]]` entries:
//!
//! ```toml
//! [runner]
//! mode = "parallel"
//! group = "build"
//!
//! [[command]]
//! name = "list"
//! line = "ls -la"
//! cwd = "~/projects"
//! fail_on_exit_code = true
//!
//! [[command]]
//! program = "/bin/sh"
//! args = ["-c", "echo $GREETING"]
//! env = { GREETING = "hello" }
//! timeout_ms = 5000
//! ```

use crate::constants::{DEFAULT_BACKLOG, DEFAULT_GROUP};
use crate::models::{CommandSpec, RunMode};
use crate::system::errors::RunnerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading a job file or converting its entries.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read job file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML file at '{path}': {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to expand working directory '{value}': {message}")]
    Expand { value: String, message: String },
    #[error("Invalid command '{name}': {source}")]
    Command {
        name: String,
        #[source]
        source: RunnerError,
    },
}

/// How a runner is built.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Serial or parallel scheduling.
    pub mode: RunMode,
    /// Label prefixed to every log record of the runner and its tasks.
    pub group: String,
    /// Log task lifecycle events at `info` instead of `debug`.
    pub verbose: bool,
    /// Worker count of a parallel runner; `max(CPUs, 2)` when unset. Ignored when serial.
    pub workers: Option<usize>,
    /// Size of the drain pool; two per worker when unset.
    pub drain_threads: Option<usize>,
    /// Maximum number of tasks pending at once.
    pub backlog: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            group: DEFAULT_GROUP.to_string(),
            verbose: false,
            workers: None,
            drain_threads: None,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

/// One `[[command]]` entry of a job file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    /// Name used in reports.
    pub name: Option<String>,
    /// Shell-like command line, tokenized at submit time.
    pub line: Option<String>,
    /// Executable, as an alternative to `line`.
    pub program: Option<String>,
    /// Arguments appended to `program` or to the tokenized `line`.
    pub args: Vec<String>,
    /// Environment overrides.
    pub env: HashMap<String, String>,
    /// Working directory; `~` and environment variables are expanded, relative paths are
    /// resolved against the directory of the job file.
    pub cwd: Option<String>,
    /// Send stderr to the stdout sink.
    pub merge_stderr: bool,
    /// Share the standard streams of `procrun` instead of capturing them.
    pub inherit_io: bool,
    /// Fail on a non-zero exit code.
    pub fail_on_exit_code: bool,
    /// Fail when the time limit is hit.
    pub fail_on_timeout: bool,
    /// Run time limit in milliseconds; 0 disables it.
    pub timeout_ms: u64,
}

impl CommandConfig {
    /// Name used in reports: the configured name, else the command itself.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match (&self.line, &self.program) {
            (Some(line), _) => line.clone(),
            (None, Some(program)) => std::iter::once(program.as_str())
                .chain(self.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" "),
            (None, None) => "<empty>".to_string(),
        }
    }

    /// Builds the spec this entry describes. `base_dir` anchors a relative `cwd`.
    pub fn to_spec(&self, base_dir: Option<&Path>) -> Result<CommandSpec, ConfigError> {
        let invalid = |source| ConfigError::Command {
            name: self.display_name(),
            source,
        };
        let spec = match (&self.line, &self.program) {
            (Some(_), Some(_)) => return Err(invalid(RunnerError::AmbiguousCommand)),
            (None, None) => return Err(invalid(RunnerError::EmptyCommand)),
            (Some(line), None) => CommandSpec::from_line(line.clone()).args(self.args.iter().cloned()),
            (None, Some(program)) => CommandSpec::new(program.clone()).args(self.args.iter().cloned()),
        };
        let mut spec = spec
            .envs(self.env.clone())
            .merge_stderr(self.merge_stderr)
            .inherit_io(self.inherit_io)
            .fail_on_exit_code(self.fail_on_exit_code)
            .fail_on_timeout(self.fail_on_timeout)
            .timeout(Duration::from_millis(self.timeout_ms));
        if let Some(cwd) = &self.cwd {
            spec = spec.working_dir(expand_dir(cwd, base_dir)?);
        }
        spec.argv().map_err(invalid)?;
        Ok(spec)
    }
}

/// A parsed job file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct JobFile {
    /// The `[runner]` table.
    pub runner: RunnerConfig,
    /// The `[[command]]` entries.
    #[serde(rename = "command")]
    pub commands: Vec<CommandConfig>,
    /// Directory the file was loaded from; anchors relative working directories.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl JobFile {
    /// Converts every entry into a spec, stopping at the first invalid one.
    pub fn specs(&self) -> Result<Vec<(String, CommandSpec)>, ConfigError> {
        self.commands
            .iter()
            .map(|command| Ok((command.display_name(), command.to_spec(self.base_dir.as_deref())?)))
            .collect()
    }
}

/// Reads and parses a job file.
pub fn load_job_file(path: &Path) -> Result<JobFile, ConfigError> {
    log::debug!("Loading job file '{}'.", path.display());
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut job: JobFile = parse_job_file(&content, path)?;
    job.base_dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(|parent| dunce::simplified(parent).to_path_buf());
    log::debug!(
        "Job file '{}' declares {} command(s) for a {} runner.",
        path.display(),
        job.commands.len(),
        job.runner.mode
    );
    Ok(job)
}

/// Parses job file `content`; `path` is only used in error messages.
pub fn parse_job_file(content: &str, path: &Path) -> Result<JobFile, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Expands `~` and environment variables in `value`; a relative result is joined onto `base_dir`.
pub fn expand_dir(value: &str, base_dir: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let expanded = shellexpand::full(value).map_err(|e| ConfigError::Expand {
        value: value.to_string(),
        message: e.to_string(),
    })?;
    let path = PathBuf::from(expanded.into_owned());
    let path = match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    };
    Ok(dunce::simplified(&path).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const JOBS: &str = r#"
        [runner]
        mode = "parallel"
        group = "ci"
        workers = 3

        [[command]]
        name = "greet"
        line = "/bin/sh -c 'echo $GREETING'"
        env = { GREETING = "hi" }
        fail_on_exit_code = true

        [[command]]
        program = "ls"
        args = ["-la"]
        cwd = "sub"
        timeout_ms = 1500
    "#;

    #[test]
    fn test_parse_job_file() {
        let job = parse_job_file(JOBS, Path::new("jobs.toml")).unwrap();
        assert_eq!(job.runner.mode, RunMode::Parallel);
        assert_eq!(job.runner.group, "ci");
        assert_eq!(job.runner.workers, Some(3));
        assert_eq!(job.runner.backlog, DEFAULT_BACKLOG);
        assert_eq!(job.commands.len(), 2);

        let greet = job.commands[0].to_spec(None).unwrap();
        assert_eq!(greet.argv().unwrap(), vec!["/bin/sh", "-c", "echo $GREETING"]);
        assert_eq!(greet.env_vars().get("GREETING").map(String::as_str), Some("hi"));
        assert!(greet.fails_on_exit_code());

        assert_eq!(job.commands[1].display_name(), "ls -la");
        let ls = job.commands[1].to_spec(Some(Path::new("/base"))).unwrap();
        assert_eq!(ls.dir(), Some(Path::new("/base/sub")));
        assert_eq!(ls.time_limit(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let job = parse_job_file("", Path::new("empty.toml")).unwrap();
        assert_eq!(job.runner, RunnerConfig::default());
        assert_eq!(job.runner.group, DEFAULT_GROUP);
        assert!(job.commands.is_empty());
    }

    #[test]
    fn test_command_forms_are_exclusive() {
        let both = CommandConfig {
            line: Some("ls".to_string()),
            program: Some("ls".to_string()),
            ..CommandConfig::default()
        };
        let err = both.to_spec(None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Command {
                source: RunnerError::AmbiguousCommand,
                ..
            }
        ));

        let neither = CommandConfig {
            name: Some("nothing".to_string()),
            ..CommandConfig::default()
        };
        let err = neither.to_spec(None).unwrap_err();
        assert!(err.to_string().starts_with("Invalid command 'nothing'"));
    }

    #[test]
    fn test_unparsable_line_is_rejected() {
        let config = CommandConfig {
            line: Some("echo 'open".to_string()),
            ..CommandConfig::default()
        };
        assert!(matches!(
            config.to_spec(None),
            Err(ConfigError::Command {
                source: RunnerError::CommandParse(_),
                ..
            })
        ));
    }

    #[test]
    fn test_load_job_file_anchors_relative_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(JOBS.as_bytes()).unwrap();

        let job = load_job_file(&path).unwrap();
        let specs = job.specs().unwrap();
        assert_eq!(specs[0].0, "greet");
        assert_eq!(specs[1].1.dir(), Some(dir.path().join("sub").as_path()));
    }

    #[test]
    fn test_load_errors_name_the_file() {
        let err = load_job_file(Path::new("/definitely/missing/jobs.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/missing/jobs.toml"));

        let err = parse_job_file("[runner]\nmode = \"sideways\"", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse { .. }));
    }
}
