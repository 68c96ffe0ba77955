// src/cli/handlers/list.rs

use crate::{
    CancellationToken,
    cli::{args::ListArgs, handlers::commons},
    core::settings::Settings,
};
use anyhow::Result;
use clap::Parser;
use colored::*;
use std::path::PathBuf;

/// The main handler for the `list` command.
pub fn handle(root: Option<PathBuf>, args: Vec<String>, _cancel: &CancellationToken) -> Result<()> {
    let args = ListArgs::try_parse_from(&args)?;
    let settings = Settings::load(root.as_deref())?;
    let contents = commons::load_cache(&settings)?;

    let tasks: Vec<_> = contents
        .tasks
        .values()
        .filter(|task| args.all || !task.hidden)
        .collect();

    if tasks.is_empty() {
        println!("{}", t!("list.info.no_tasks").yellow());
        return Ok(());
    }

    let width = tasks.iter().map(|t| t.short_name.len()).max().unwrap_or(0);
    println!("{}", t!("list.header").bold());
    for task in tasks {
        println!(
            "  {:<width$}  {}",
            task.short_name.cyan(),
            task.description.dimmed(),
            width = width
        );
    }
    Ok(())
}
