// src/cli/handlers/run.rs

use crate::{
    CancellationToken,
    cli::{
        args::{RunArgs, UsageError},
        handlers::commons,
    },
    core::{
        settings::Settings,
        task_runner::{self, RuntimeContext},
    },
};
use anyhow::Result;
use clap::Parser;
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// The main handler for the `run` command.
/// Loads (and if needed refreshes) the task cache, then runs the target.
pub fn handle(root: Option<PathBuf>, args: Vec<String>, cancel: &CancellationToken) -> Result<()> {
    let args = RunArgs::try_parse_from(&args)?;
    let settings = Settings::load(root.as_deref())?;
    let contents = commons::load_cache(&settings)?;

    if !contents.tasks.contains_key(&args.task) {
        return Err(UsageError::UnknownTask(args.task).into());
    }

    let started = Instant::now();
    let mut ctx = RuntimeContext::new(settings.project_root.clone(), Arc::clone(cancel));
    task_runner::run(&mut ctx, &args.task, &contents.tasks, args.dry_run, args.force)?;

    if args.dry_run {
        log::info!("{} '{}'", t!("run.info.dry_run_done"), args.task);
    } else {
        println!(
            "{} '{}' {} {:.2}s",
            "✓".green(),
            args.task.cyan(),
            t!("run.success.finished"),
            started.elapsed().as_secs_f64()
        );
    }
    Ok(())
}
