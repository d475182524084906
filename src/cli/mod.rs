// src/cli/mod.rs

use clap::Parser;

pub mod args;
pub mod handlers;

/// procrun: runs external commands under supervision and streams their output.
///
/// Actions:
///
/// - `procrun run [OPTIONS] <LINE>...`   run command lines, print their output
/// - `procrun jobs [OPTIONS] <FILE>`     run every command of a TOML job file
/// - `procrun table [OPTIONS] <LINE>`    parse column-aligned output into rows
///
/// `procrun <action> --help` describes the options of each action. Logging is controlled by the
/// `PROCRUN_LOG` environment variable (e.g. `PROCRUN_LOG=debug`).
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// The action to perform: `run`, `jobs` or `table`.
    pub action: Option<String>,

    /// Arguments handed to the action.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
