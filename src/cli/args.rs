// src/cli/args.rs

use crate::models::OptionValues;
use clap::Parser;
use thiserror::Error;

/// A command line that parsed but cannot be acted on.
#[derive(Error, Debug)]
pub enum UsageError {
    #[error("Invalid option '{0}', expected KEY=VALUE")]
    MalformedOption(String),
    #[error("Task '{0}' is not defined. Use 'buildsys list' to see the available tasks.")]
    UnknownTask(String),
    #[error("No task cache found. Run 'buildsys configure' first.")]
    NotConfigured,
    #[error("Missing command. Use 'buildsys --help' for usage.")]
    MissingCommand,
    #[error("Unknown command '{0}'. Use 'buildsys --help' for usage.")]
    UnknownCommand(String),
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Evaluates the build script and writes the task cache.")]
pub struct ConfigureArgs {
    /// Build script to evaluate. Defaults to the project's `build.rhai`.
    pub script: Option<String>,

    /// Sets a script option (repeatable).
    #[arg(long = "option", short = 'o', value_name = "KEY=VALUE")]
    pub options: Vec<String>,

    /// Evaluates the script even when the cache is up to date.
    #[arg(long)]
    pub reconfigure: bool,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Runs a task and its dependencies.")]
pub struct RunArgs {
    /// Name of the task to run.
    pub task: String,

    /// Prints the commands without executing them.
    #[arg(long, short = 'n')]
    pub dry_run: bool,

    /// Ignores timestamps and skip conditions of the target task.
    #[arg(long, short)]
    pub force: bool,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Lists the configured tasks.")]
pub struct ListArgs {
    /// Includes hidden and anonymous tasks.
    #[arg(long, short)]
    pub all: bool,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Lists the options a build script declares.")]
pub struct OptionsArgs {
    /// Build script to inspect. Defaults to the project's `build.rhai`.
    pub script: Option<String>,
}

/// Parses `KEY=VALUE` pairs. Later pairs win.
pub fn parse_option_pairs(pairs: &[String]) -> Result<OptionValues, UsageError> {
    let mut values = OptionValues::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                values.insert(key.trim().to_string(), value.to_string());
            }
            _ => return Err(UsageError::MalformedOption(pair.clone())),
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_pairs() {
        let pairs = vec!["mode=release".to_string(), "flags=-O2 -g".to_string(), "mode=debug".to_string()];
        let values = parse_option_pairs(&pairs).unwrap();
        assert_eq!(values["mode"], "debug");
        assert_eq!(values["flags"], "-O2 -g");

        assert!(matches!(
            parse_option_pairs(&["novalue".to_string()]),
            Err(UsageError::MalformedOption(_))
        ));
        assert!(parse_option_pairs(&["=x".to_string()]).is_err());
        assert_eq!(parse_option_pairs(&["empty=".to_string()]).unwrap()["empty"], "");
    }

    #[test]
    fn test_configure_args() {
        let args = ConfigureArgs::try_parse_from(["build.rhai", "-o", "a=1", "--option", "b=2", "--reconfigure"]).unwrap();
        assert_eq!(args.script.as_deref(), Some("build.rhai"));
        assert_eq!(args.options, vec!["a=1".to_string(), "b=2".to_string()]);
        assert!(args.reconfigure);
    }
}
