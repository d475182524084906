// src/cli/handlers/run.rs

use crate::{
    cli::{args::RunArgs, handlers::commons},
    core::config_loader::{self, RunnerConfig},
    models::RunMode,
    system::runner::{CmdOptions, ProcessRunner},
};
use anyhow::{Result, bail};
use clap::Parser;
use colored::*;
use std::time::Duration;

/// Main entry point for the `run` action.
///
/// Every line is submitted before any is awaited, so with `--parallel` they run concurrently;
/// results are then reported in submission order.
pub fn handle(args: Vec<String>) -> Result<()> {
    let run_args = RunArgs::try_parse_from(&args)?;
    let env = commons::parse_key_value_pairs(&run_args.env)?;
    let cwd = run_args
        .cwd
        .as_deref()
        .map(|dir| config_loader::expand_dir(dir, None))
        .transpose()?;

    let runner = ProcessRunner::with_config(RunnerConfig {
        mode: if run_args.parallel {
            RunMode::Parallel
        } else {
            RunMode::Serial
        },
        group: run_args.group.clone(),
        verbose: run_args.verbose,
        workers: run_args.workers,
        ..RunnerConfig::default()
    })?;
    log::debug!("Running {} line(s) on {:?}", run_args.lines.len(), runner);

    let mut launched = Vec::with_capacity(run_args.lines.len());
    for line in &run_args.lines {
        let output = commons::collector(run_args.max_output);
        let opts = CmdOptions {
            dir: cwd.clone(),
            env: env.clone(),
            ..CmdOptions::new(line.clone())
        }
        .fail_on_exit_code(run_args.fail_on_exit_code)
        .fail_on_timeout(run_args.fail_on_timeout)
        .timeout(Duration::from_millis(run_args.timeout_ms));
        let task = runner.cmd(opts, Some(commons::as_sink(&output)))?;
        launched.push((line, task, output));
    }

    let total = launched.len();
    let mut failed = 0;
    for (line, task, output) in launched {
        let outcome = task.wait_for(None);
        if !commons::report_task(line, &task, &outcome) {
            failed += 1;
        }
        commons::print_output(&output);
    }
    runner.close();

    if failed > 0 {
        bail!("{} of {} command(s) failed.", failed, total);
    }
    println!("\n{}", format!("All {} command(s) succeeded.", total).green());
    Ok(())
}
