// src/cli/args.rs
use crate::constants::{DEFAULT_GROUP, DEFAULT_MIN_SPLIT_SPACES};
use clap::Parser;
use std::path::PathBuf;

/// Runs command lines under a runner and prints the output of each.
#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)]
pub struct RunArgs {
    /// Run the commands concurrently instead of one after the other.
    #[arg(long)]
    pub parallel: bool,

    /// Number of concurrent commands with --parallel. Defaults to the number of CPUs.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Label used in log records.
    #[arg(long, default_value = DEFAULT_GROUP)]
    pub group: String,

    /// Kill a command once it has run this long (milliseconds, 0 = never).
    #[arg(long, default_value_t = 0)]
    pub timeout_ms: u64,

    /// Treat a non-zero exit code as a failure of the command.
    #[arg(long)]
    pub fail_on_exit_code: bool,

    /// Treat running into the timeout as a failure of the command.
    #[arg(long)]
    pub fail_on_timeout: bool,

    /// Set an environment variable for the commands (e.g., "KEY=VALUE"). Repeatable.
    #[arg(long, short = 'e')]
    pub env: Vec<String>,

    /// Working directory of the commands. `~` and environment variables are expanded.
    #[arg(long)]
    pub cwd: Option<String>,

    /// Keep at most this many characters of output per command (0 = everything).
    #[arg(long, default_value_t = 0)]
    pub max_output: usize,

    /// Log task lifecycle events at info level.
    #[arg(long, short)]
    pub verbose: bool,

    /// The command lines to run.
    #[arg(required = true)]
    pub lines: Vec<String>,
}

/// Runs every command declared in a TOML job file.
#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)]
pub struct JobsArgs {
    /// The job file.
    pub file: PathBuf,

    /// Run the commands concurrently, whatever the job file says.
    #[arg(long)]
    pub parallel: bool,

    /// Do not print the output of the commands, only their results.
    #[arg(long, short)]
    pub quiet: bool,

    /// Log task lifecycle events at info level.
    #[arg(long, short)]
    pub verbose: bool,
}

/// Runs one command and parses its column-aligned output into rows.
#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)]
pub struct TableArgs {
    /// The output has no header line.
    #[arg(long)]
    pub no_header: bool,

    /// Keep only the last N rows.
    #[arg(long)]
    pub max_rows: Option<usize>,

    /// Minimum run of blanks that separates two columns.
    #[arg(long, default_value_t = DEFAULT_MIN_SPLIT_SPACES)]
    pub min_split_spaces: usize,

    /// Split lines like a shell would split arguments instead of on runs of blanks.
    #[arg(long)]
    pub shell_split: bool,

    /// Print the rows as JSON (objects keyed by header when there is one).
    #[arg(long)]
    pub json: bool,

    /// Working directory of the command.
    #[arg(long)]
    pub cwd: Option<String>,

    /// Kill the command once it has run this long (milliseconds, 0 = never).
    #[arg(long, default_value_t = 0)]
    pub timeout_ms: u64,

    /// The command line to run.
    pub line: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parse() {
        let args = RunArgs::try_parse_from([
            "--parallel",
            "-e",
            "A=1",
            "--env",
            "B=2",
            "--timeout-ms",
            "500",
            "ls -la",
            "echo hi",
        ])
        .unwrap();
        assert!(args.parallel);
        assert_eq!(args.env, vec!["A=1", "B=2"]);
        assert_eq!(args.timeout_ms, 500);
        assert_eq!(args.group, DEFAULT_GROUP);
        assert_eq!(args.lines, vec!["ls -la", "echo hi"]);
    }

    #[test]
    fn test_run_args_require_a_line() {
        assert!(RunArgs::try_parse_from(["--parallel"]).is_err());
    }

    #[test]
    fn test_table_args_defaults() {
        let args = TableArgs::try_parse_from(["ps aux"]).unwrap();
        assert!(!args.no_header);
        assert_eq!(args.min_split_spaces, DEFAULT_MIN_SPLIT_SPACES);
        assert_eq!(args.max_rows, None);
        assert_eq!(args.line, "ps aux");
    }
}
