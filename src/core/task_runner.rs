// src/core/task_runner.rs

//! # Task Runner
//!
//! Executes a task after its dependencies, depth first. Each task is checked
//! against its own rules before its commands run: a task is skipped when every
//! `skip_if_exists` path exists, and is up to date when its newest output is
//! at least as new as its newest input. Shell fragments run through the
//! embedded shell with the task's environment; task references run inline.
//!
//! The run-state map doubles as cycle detection: a task that is entered again
//! while still in flight was called recursively.

use crate::constants::{OUTPUT_SPREAD_WARNING_SECS, ROUTED_COMMANDS};
use crate::core::paths::{PathContext, clean};
use crate::models::{Command, Task, TaskList};
use crate::system::console::{self, ConsoleError};
use crate::system::environ;
use crate::system::shell::exec::{self, DefaultExec, DefaultOpen, ExecHandler, HandlerContext, OpenHandler, OpenMode};
use crate::system::shell::{Runner, ShellError, parse};
use crate::{CancellationToken, system::tools};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime};
use std::{fs, io};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task '{0}' not found")]
    NotFound(String),
    #[error("Task '{0}' was called recursively")]
    Recursive(String),
    #[error("Operation was cancelled by the user.")]
    Cancelled,
    #[error("{task}: invalid pattern '{pattern}': {source}")]
    Pattern {
        task: String,
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("{task}: failed to expand '{pattern}': {source}")]
    Glob {
        task: String,
        pattern: String,
        #[source]
        source: glob::GlobError,
    },
    #[error("{task}: cannot check input '{path}': {source}")]
    Input {
        task: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{task}: cannot check output '{path}': {source}")]
    Output {
        task: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Task '{task}' failed due to its dependency '{dep}'")]
    Dependency {
        task: String,
        dep: String,
        #[source]
        source: Box<TaskError>,
    },
    #[error("Task '{task}' failed: {source}")]
    Command {
        task: String,
        #[source]
        source: ShellError,
    },
    #[error("{task}: {source}")]
    Console {
        task: String,
        #[source]
        source: ConsoleError,
    },
    #[error("{task}: failed to stamp output '{path}': {source}")]
    Stamp {
        task: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TaskError {
    /// The error behind any chain of dependency failures.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Dependency { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Per-invocation execution state.
#[derive(Debug)]
pub struct RuntimeContext {
    pub project_root: PathBuf,
    /// Absent: not started. `false`: in flight. `true`: completed.
    pub run_state: HashMap<String, bool>,
    pub cancel: CancellationToken,
}

impl RuntimeContext {
    pub fn new(project_root: impl Into<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            project_root: project_root.into(),
            run_state: HashMap::new(),
            cancel,
        }
    }

    fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(TaskError::Cancelled);
        }
        Ok(())
    }
}

/// Runs `target` and everything it depends on.
pub fn run(
    ctx: &mut RuntimeContext,
    target: &str,
    tasks: &TaskList,
    dry_run: bool,
    force: bool,
) -> Result<(), TaskError> {
    let task = tasks
        .get(target)
        .ok_or_else(|| TaskError::NotFound(target.to_string()))?;
    run_task(ctx, task, tasks, dry_run, force)
}

fn run_task(
    ctx: &mut RuntimeContext,
    task: &Arc<Task>,
    tasks: &TaskList,
    dry_run: bool,
    force: bool,
) -> Result<(), TaskError> {
    let name = task.short_name.as_str();
    match ctx.run_state.get(name) {
        Some(true) => return Ok(()),
        Some(false) => return Err(TaskError::Recursive(name.to_string())),
        None => {}
    }
    ctx.run_state.insert(name.to_string(), false);

    for dep in &task.deps {
        ctx.check_cancelled()?;
        match run(ctx, dep, tasks, dry_run, false) {
            Ok(()) => {}
            Err(TaskError::Cancelled) => return Err(TaskError::Cancelled),
            Err(source) => {
                return Err(TaskError::Dependency {
                    task: name.to_string(),
                    dep: dep.clone(),
                    source: Box::new(source),
                });
            }
        }
    }

    if !force {
        if should_skip(ctx, task)? {
            log::info!("{}: skipped, all skip_if_exists paths exist", name);
            ctx.run_state.insert(name.to_string(), true);
            return Ok(());
        }
        if !needs_run(ctx, task)? {
            ctx.run_state.insert(name.to_string(), true);
            return Ok(());
        }
    }

    let mut runner = Runner::builder(&task.base_dir)
        .env(environ::compose_env(&task.env))
        .errexit(!task.ignore_exit)
        .exec_handler(Rc::new(RoutedExec))
        .open_handler(Rc::new(NullDeviceOpen))
        .cancellation(Arc::clone(&ctx.cancel))
        .build();

    for command in &task.commands {
        ctx.check_cancelled()?;
        match command {
            Command::TaskRef(target) => run_task(ctx, target, tasks, dry_run, force)?,
            Command::Shell(fragment) => {
                let stmts = parse(&fragment.content, &fragment.source_name()).map_err(|e| TaskError::Command {
                    task: name.to_string(),
                    source: e.into(),
                })?;
                for stmt in &stmts {
                    ctx.check_cancelled()?;
                    log::info!("{}: {}", name, stmt);
                    if dry_run {
                        continue;
                    }
                    let result = runner.run(stmt);
                    if let Err(source) = console::reset_console() {
                        if !environ::is_ci() {
                            return Err(TaskError::Console {
                                task: name.to_string(),
                                source,
                            });
                        }
                        log::debug!("{}: ignoring console reset failure under CI", name);
                    }
                    match result {
                        Ok(()) => {}
                        Err(ShellError::ExitStatus(code)) if task.ignore_exit => {
                            log::debug!("{}: ignoring exit status {}", name, code);
                        }
                        Err(ShellError::Cancelled) => return Err(TaskError::Cancelled),
                        Err(source) => {
                            return Err(TaskError::Command {
                                task: name.to_string(),
                                source,
                            });
                        }
                    }
                    if runner.exited() {
                        log::debug!("{}: shell exited, remaining commands are skipped", name);
                        ctx.run_state.insert(name.to_string(), true);
                        return Ok(());
                    }
                }
            }
        }
    }

    ctx.run_state.insert(name.to_string(), true);
    if !dry_run {
        stamp_outputs(ctx, task)?;
    }
    Ok(())
}

fn should_skip(ctx: &RuntimeContext, task: &Task) -> Result<bool, TaskError> {
    if task.skip_if_exists.is_empty() {
        return Ok(false);
    }
    let paths = resolve_patterns(ctx, task, &task.skip_if_exists)?;
    Ok(!paths.is_empty() && paths.iter().all(|p| p.exists()))
}

fn modified(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

/// Timestamp check. Missing outputs force a run; unreadable inputs are errors.
fn needs_run(ctx: &RuntimeContext, task: &Task) -> Result<bool, TaskError> {
    let name = task.short_name.as_str();
    let inputs = resolve_patterns(ctx, task, &task.inputs)?;
    if inputs.is_empty() {
        return Ok(true);
    }

    let mut newest_input: Option<(SystemTime, &PathBuf)> = None;
    for path in &inputs {
        let time = modified(path).map_err(|source| TaskError::Input {
            task: name.to_string(),
            path: path.clone(),
            source,
        })?;
        if newest_input.is_none_or(|(newest, _)| time > newest) {
            newest_input = Some((time, path));
        }
    }

    let outputs = resolve_patterns(ctx, task, &task.outputs)?;
    if outputs.is_empty() {
        return Ok(true);
    }
    let mut oldest_output: Option<SystemTime> = None;
    let mut newest_output: Option<(SystemTime, &PathBuf)> = None;
    for path in &outputs {
        let time = match modified(path) {
            Ok(time) => time,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("{}: output '{}' is missing", name, path.display());
                return Ok(true);
            }
            Err(source) => {
                return Err(TaskError::Output {
                    task: name.to_string(),
                    path: path.clone(),
                    source,
                });
            }
        };
        if oldest_output.is_none_or(|oldest| time < oldest) {
            oldest_output = Some(time);
        }
        if newest_output.is_none_or(|(newest, _)| time > newest) {
            newest_output = Some((time, path));
        }
    }

    let (Some((input_time, input_path)), Some(oldest), Some((output_time, output_path))) =
        (newest_input, oldest_output, newest_output)
    else {
        return Ok(true);
    };

    let spread = output_time.duration_since(oldest).unwrap_or_default();
    if spread > Duration::from_secs(OUTPUT_SPREAD_WARNING_SECS) {
        log::warn!(
            "{}: outputs were written {} seconds apart, some of them may be stale",
            name,
            spread.as_secs()
        );
    }

    if output_time >= input_time {
        let margin = output_time.duration_since(input_time).unwrap_or_default();
        log::info!("{}: nothing to do (output is {} seconds newer)", name, margin.as_secs());
        return Ok(false);
    }
    log::info!(
        "{}: rebuild necessary since '{}' is newer than '{}'",
        name,
        input_path.display(),
        output_path.display()
    );
    Ok(true)
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Expands patterns against the task's base directory. Patterns that match
/// nothing are dropped; literal paths are kept whether they exist or not.
fn resolve_patterns(ctx: &RuntimeContext, task: &Task, patterns: &[String]) -> Result<Vec<PathBuf>, TaskError> {
    let paths = PathContext::new(ctx.project_root.clone(), task.base_dir.clone());
    let options = glob::MatchOptions {
        require_literal_leading_dot: false,
        ..glob::MatchOptions::new()
    };

    let mut resolved = Vec::new();
    for pattern in patterns {
        if !has_glob_meta(pattern) {
            resolved.push(paths.resolve(pattern));
            continue;
        }
        let text = glob_text(&paths, pattern);
        let matches = glob::glob_with(&text, options).map_err(|source| TaskError::Pattern {
            task: task.short_name.clone(),
            pattern: pattern.clone(),
            source,
        })?;
        for entry in matches {
            let entry = entry.map_err(|source| TaskError::Glob {
                task: task.short_name.clone(),
                pattern: pattern.clone(),
                source,
            })?;
            resolved.push(clean(&entry));
        }
    }
    Ok(resolved)
}

/// Glob text for `pattern` with the directory it hangs off escaped, so
/// metacharacters in the project or base path match literally.
fn glob_text(paths: &PathContext, pattern: &str) -> String {
    let (base, rest) = match pattern.strip_prefix("//") {
        Some(rest) => (paths.project_root(), rest.trim_start_matches('/')),
        None if pattern.starts_with('/') || Path::new(pattern).is_absolute() => {
            return paths.resolve(pattern).to_string_lossy().into_owned();
        }
        None => (paths.anchor(), pattern),
    };
    format!("{}/{}", glob::Pattern::escape(&base.to_string_lossy()), rest)
}

fn stamp_outputs(ctx: &RuntimeContext, task: &Task) -> Result<(), TaskError> {
    let now = SystemTime::now();
    for path in resolve_patterns(ctx, task, &task.outputs)? {
        match tools::stamp(&path, now) {
            Ok(()) => log::trace!("{}: stamped '{}'", task.short_name, path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(TaskError::Stamp {
                    task: task.short_name.clone(),
                    path,
                    source,
                });
            }
        }
    }
    Ok(())
}

/// Sends `cp`, `mv`, `rm`, `mkdir`, `touch` and `sleep` to the in-process
/// file tools. Everything else spawns a process.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RoutedExec;

impl ExecHandler for RoutedExec {
    fn exec(&self, hc: &mut HandlerContext<'_>, args: &[String]) -> Result<i32, ShellError> {
        match args.first() {
            Some(program) if ROUTED_COMMANDS.contains(&program.as_str()) => {
                Ok(exec::run_tool(args, hc.dir, &hc.stdout, &hc.stderr))
            }
            _ => DefaultExec.exec(hc, args),
        }
    }
}

/// Maps `/dev/null` to the host's null device.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct NullDeviceOpen;

impl OpenHandler for NullDeviceOpen {
    fn open(&self, dir: &Path, path: &str, mode: OpenMode) -> io::Result<File> {
        if cfg!(windows) && path == "/dev/null" {
            return DefaultOpen.open(dir, "NUL", mode);
        }
        DefaultOpen.open(dir, path, mode)
    }
}
