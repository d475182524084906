// src/cli/handlers/jobs.rs

use crate::{
    cli::{args::JobsArgs, handlers::commons},
    core::config_loader,
    models::RunMode,
    system::runner::ProcessRunner,
};
use anyhow::{Result, bail};
use clap::Parser;
use colored::*;

/// Main entry point for the `jobs` action: runs every command of a job file.
pub fn handle(args: Vec<String>) -> Result<()> {
    let jobs_args = JobsArgs::try_parse_from(&args)?;
    let mut job = config_loader::load_job_file(&jobs_args.file)?;
    if jobs_args.parallel {
        job.runner.mode = RunMode::Parallel;
    }
    if jobs_args.verbose {
        job.runner.verbose = true;
    }

    let specs = job.specs()?;
    if specs.is_empty() {
        println!("{}", "Job file declares no commands. Nothing to execute.".yellow());
        return Ok(());
    }

    let runner = ProcessRunner::with_config(job.runner.clone())?;
    let mut launched = Vec::with_capacity(specs.len());
    for (name, spec) in specs {
        let capture = !jobs_args.quiet && !spec.inherits_io();
        let stdout = capture.then(|| commons::collector(0));
        let stderr = (capture && !spec.merges_stderr()).then(|| commons::collector(0));
        let task = runner.submit(
            spec,
            stdout.as_ref().map(commons::as_sink),
            stderr.as_ref().map(commons::as_sink),
        )?;
        launched.push((name, task, stdout, stderr));
    }

    let total = launched.len();
    let mut failed = 0;
    for (name, task, stdout, stderr) in launched {
        let outcome = task.wait_for(None);
        if !commons::report_task(&name, &task, &outcome) {
            failed += 1;
        }
        if let Some(stdout) = &stdout {
            commons::print_output(stdout);
        }
        if let Some(stderr) = stderr.filter(|collector| !collector.is_empty()) {
            println!("{}", "--- stderr".dimmed());
            commons::print_output(&stderr);
        }
    }
    runner.close();

    if failed > 0 {
        bail!("{} of {} job(s) failed.", failed, total);
    }
    println!("\n{}", format!("All {} job(s) succeeded.", total).green());
    Ok(())
}
