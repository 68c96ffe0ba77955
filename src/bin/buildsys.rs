// src/bin/buildsys.rs

use anyhow::Result;
use buildsys::{
    CancellationToken,
    cli::{
        Cli,
        args::UsageError,
        handlers,
    },
    constants::{ENV_DEBUG, ENV_LOG},
    core::{script::ScriptError, task_runner::TaskError},
    system::{shell::ShellError, tools::ToolError},
};
use clap::Parser;
use colored::*;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

// --- Command Definition and Registry ---

/// A command, its aliases, and its handler.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Option<PathBuf>, Vec<String>, &CancellationToken) -> Result<()>,
}

static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "configure",
        aliases: &["config"],
        handler: handlers::configure::handle,
    },
    CommandDefinition {
        name: "run",
        aliases: &[],
        handler: handlers::run::handle,
    },
    CommandDefinition {
        name: "list",
        aliases: &["ls"],
        handler: handlers::list::handle,
    },
    CommandDefinition {
        name: "options",
        aliases: &[],
        handler: handlers::options::handle,
    },
    CommandDefinition {
        name: "tool",
        aliases: &[],
        handler: handlers::tool::handle,
    },
];

/// Finds a command definition in the registry by its name or alias.
fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

fn main() {
    let cancellation_token = Arc::new(AtomicBool::new(false));
    init_logging();

    if let Err(e) = run_cli(Cli::parse(), &cancellation_token) {
        // Help and usage errors of a command's own arguments.
        if let Some(clap_err) = e.downcast_ref::<clap::Error>() {
            let _ = clap_err.print();
            std::process::exit(clap_err.exit_code());
        }

        let code = exit_code(&e);
        if code != 130 {
            eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        }
        std::process::exit(code);
    }
}

fn run_cli(cli: Cli, cancellation_token: &CancellationToken) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let Some(name) = cli.command else {
        return Err(UsageError::MissingCommand.into());
    };
    let command = find_command(&name).ok_or(UsageError::UnknownCommand(name))?;
    (command.handler)(cli.root, cli.args, cancellation_token)
}

/// 3 for script errors, 2 for usage errors, 130 for cancellation, 1 otherwise.
fn exit_code(error: &anyhow::Error) -> i32 {
    for cause in error.chain() {
        if cause.downcast_ref::<ScriptError>().is_some() {
            return 3;
        }
        if matches!(cause.downcast_ref::<TaskError>(), Some(TaskError::Cancelled))
            || matches!(cause.downcast_ref::<ShellError>(), Some(ShellError::Cancelled))
        {
            return 130;
        }
        if cause.downcast_ref::<UsageError>().is_some()
            || matches!(cause.downcast_ref::<ToolError>(), Some(ToolError::Usage(_)))
        {
            return 2;
        }
    }
    1
}

/// `info` by default, `BUILDSYS_LOG` for a custom filter, `BUILDSYS_DEBUG` for
/// debug records with their module path.
fn init_logging() {
    let debug = std::env::var(ENV_DEBUG).is_ok_and(|v| !v.is_empty());
    let default_filter = if debug { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::new().filter_or(ENV_LOG, default_filter))
        .format(move |buf, record| {
            let level = match record.level() {
                log::Level::Error => "error".red().bold(),
                log::Level::Warn => "warn".yellow().bold(),
                log::Level::Info => "info".green(),
                log::Level::Debug => "debug".blue(),
                log::Level::Trace => "trace".dimmed(),
            };
            if debug {
                writeln!(buf, "{} {} {}", level, record.target().dimmed(), record.args())
            } else {
                writeln!(buf, "{} {}", level, record.args())
            }
        })
        .init();
}
