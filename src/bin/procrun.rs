// src/bin/procrun.rs

use anyhow::{Result, anyhow};
use clap::Parser;
use colored::*;
use procrun::{
    cli::{Cli, handlers},
    constants::LOG_ENV_VAR,
};

// --- Command Definition and Registry ---

/// An action of the binary, its aliases and its handler.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Vec<String>) -> Result<()>,
}

static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "run",
        aliases: &[],
        handler: handlers::run::handle,
    },
    CommandDefinition {
        name: "jobs",
        aliases: &["job"],
        handler: handlers::jobs::handle,
    },
    CommandDefinition {
        name: "table",
        aliases: &["tab"],
        handler: handlers::table::handle,
    },
];

/// Finds a command definition in the registry by its name or alias.
fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

/// Sets up logging, parses arguments, dispatches to the handler and reports errors.
fn main() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(LOG_ENV_VAR, "warn")).init();

    if let Err(e) = run_cli(Cli::parse()) {
        // Usage errors and `--help` of an action are rendered by clap itself.
        if let Some(clap_err) = e.downcast_ref::<clap::Error>() {
            clap_err.exit();
        }
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let Some(action) = cli.action else {
        let names: Vec<&str> = COMMAND_REGISTRY.iter().map(|cmd| cmd.name).collect();
        println!("Usage: procrun <{}> [ARGS]... (see --help)", names.join("|"));
        return Ok(());
    };
    let command = find_command(&action).ok_or_else(|| {
        anyhow!(
            "Unknown action '{}'. Expected one of: run, jobs, table.",
            action.cyan()
        )
    })?;
    (command.handler)(cli.args)
}
