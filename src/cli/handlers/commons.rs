// src/cli/handlers/commons.rs

// Shared helpers for the command handlers.

use crate::{
    cli::args::UsageError,
    core::{
        cache::{self, CacheContents, CacheError},
        paths::PathContext,
        script,
        settings::Settings,
    },
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Resolves a script argument against the current directory, or falls back to
/// the project's default script.
pub fn script_path(settings: &Settings, arg: Option<&str>) -> Result<PathBuf> {
    let Some(arg) = arg else {
        return Ok(settings.script.clone());
    };
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    let cwd = dunce::canonicalize(&cwd).unwrap_or(cwd);
    Ok(PathContext::new(settings.project_root.clone(), cwd).resolve(arg))
}

/// Loads the task cache, re-evaluating the script first when one of the files
/// it read has changed since the cache was written.
pub fn load_cache(settings: &Settings) -> Result<CacheContents> {
    let contents = match cache::read(&settings.cache_dir) {
        Ok(contents) => contents,
        Err(CacheError::Missing(_)) => return Err(UsageError::NotConfigured.into()),
        Err(e) => return Err(e).context("Failed to load the task cache"),
    };

    let changed = cache::newer_file(&settings.cache_dir, &contents.script_files)
        .context("Failed to check the task cache")?;
    let Some(changed) = changed else {
        return Ok(contents);
    };
    let Some(main_script) = contents.script_files.first().cloned() else {
        return Ok(contents);
    };

    log::info!(
        "{} '{}', {}",
        t!("cache.info.changed"),
        simplify(settings, &changed),
        t!("cache.info.reconfiguring")
    );
    refresh(settings, &main_script, &contents)
}

fn refresh(settings: &Settings, main_script: &Path, previous: &CacheContents) -> Result<CacheContents> {
    let evaluation = script::evaluate(&settings.project_root, main_script, &previous.options)
        .with_context(|| format!("Failed to re-evaluate '{}'", simplify(settings, main_script)))?;
    let contents = CacheContents {
        options: evaluation.option_values,
        tasks: evaluation.tasks,
        script_files: evaluation.script_files,
    };
    cache::write(&settings.cache_dir, &contents).context("Failed to write the task cache")?;
    Ok(contents)
}

/// `//relative` form of a path under the project root.
pub fn simplify(settings: &Settings, path: &Path) -> String {
    PathContext::new(settings.project_root.clone(), settings.project_root.clone()).simplify(path)
}
