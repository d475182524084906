// src/cli/handlers/table.rs

use crate::{
    cli::args::TableArgs,
    core::{
        config_loader,
        sinks::{SharedSink, SplitMode, TabularCollector, line_fn},
    },
    system::runner::{CmdOptions, ProcessRunner},
};
use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::sync::Arc;
use std::time::Duration;

/// Main entry point for the `table` action.
pub fn handle(args: Vec<String>) -> Result<()> {
    let table_args = TableArgs::try_parse_from(&args)?;

    let mut builder = TabularCollector::builder()
        .expect_header(!table_args.no_header)
        .min_split_spaces(table_args.min_split_spaces)
        .split_mode(if table_args.shell_split {
            SplitMode::ShellArgs
        } else {
            SplitMode::Whitespace
        });
    if let Some(max_rows) = table_args.max_rows {
        builder = builder.max_rows(max_rows);
    }
    let table = Arc::new(builder.build());

    let mut opts = CmdOptions::new(table_args.line.clone())
        .fail_on_exit_code(true)
        .timeout(Duration::from_millis(table_args.timeout_ms))
        .stderr(line_fn(|line| eprintln!("{}", line)));
    if let Some(cwd) = &table_args.cwd {
        opts = opts.dir(config_loader::expand_dir(cwd, None)?);
    }

    let runner = ProcessRunner::serial("table")?;
    let task = runner.cmd(opts, Some(Arc::clone(&table) as SharedSink))?;
    let outcome = task.wait_for(None);
    runner.close();
    outcome.with_context(|| format!("Command '{}' did not complete", task.command()))?;

    if table_args.json {
        let json = if table.header().is_empty() {
            serde_json::to_string_pretty(&table.rows())?
        } else {
            serde_json::to_string_pretty(table.named_rows().as_ref())?
        };
        println!("{}", json);
        return Ok(());
    }

    let header = table.header();
    if !header.is_empty() {
        println!("{}", header.join(" | ").bold());
    }
    for row in table.rows() {
        println!("{}", row.join(" | "));
    }
    log::debug!("Parsed {} row(s) from '{}'.", table.len(), task.command());
    Ok(())
}
