// src/cli/handlers/configure.rs

use crate::{
    CancellationToken,
    cli::{
        args::{ConfigureArgs, parse_option_pairs},
        handlers::commons,
    },
    core::{
        cache::{self, CacheContents},
        script,
        settings::Settings,
    },
    models::OptionValues,
};
use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::{Path, PathBuf};

/// The main handler for the `configure` command.
/// Evaluates the build script and replaces the task cache.
pub fn handle(root: Option<PathBuf>, args: Vec<String>, _cancel: &CancellationToken) -> Result<()> {
    let args = ConfigureArgs::try_parse_from(&args)?;
    let settings = Settings::load(root.as_deref())?;
    let script_path = commons::script_path(&settings, args.script.as_deref())?;

    let mut supplied = settings.options.clone();
    supplied.extend(parse_option_pairs(&args.options)?);

    if !args.reconfigure && is_up_to_date(&settings, &script_path, &supplied) {
        println!(
            "{} {}",
            "✓".green(),
            t!("configure.info.up_to_date")
        );
        return Ok(());
    }

    let shown = commons::simplify(&settings, &script_path);
    log::debug!("Configuring from '{}' with options {:?}", shown, supplied);
    let evaluation = script::evaluate(&settings.project_root, &script_path, &supplied)
        .with_context(|| format!("Failed to configure from '{}'", shown))?;

    let contents = CacheContents {
        options: evaluation.option_values,
        tasks: evaluation.tasks,
        script_files: evaluation.script_files,
    };
    cache::write(&settings.cache_dir, &contents).context("Failed to write the task cache")?;

    let visible = contents.tasks.values().filter(|t| !t.hidden).count();
    println!(
        "{} {} '{}': {} {} ({} {})",
        "✓".green(),
        t!("configure.success.configured"),
        shown.cyan(),
        contents.tasks.len(),
        t!("configure.label.tasks"),
        visible,
        t!("configure.label.visible")
    );
    Ok(())
}

/// True when the cache came from `script`, nothing it read has changed and
/// every supplied option already has the cached value.
fn is_up_to_date(settings: &Settings, script: &Path, supplied: &OptionValues) -> bool {
    let Ok(contents) = cache::read(&settings.cache_dir) else {
        return false;
    };
    if contents.script_files.first().map(PathBuf::as_path) != Some(script) {
        return false;
    }
    if !matches!(cache::newer_file(&settings.cache_dir, &contents.script_files), Ok(None)) {
        return false;
    }
    supplied
        .iter()
        .all(|(key, value)| contents.options.get(key) == Some(value))
}
