// src/cli/handlers/tool.rs

use crate::{
    CancellationToken,
    system::tools::{self, ToolError},
};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// The main handler for the `tool` command: the in-process file tools, for
/// use outside of build scripts. Relative paths resolve against the current
/// directory, not the project root.
pub fn handle(_root: Option<PathBuf>, args: Vec<String>, _cancel: &CancellationToken) -> Result<()> {
    let command = match tools::parse(&args) {
        Ok(command) => command,
        Err(ToolError::Help(text)) => {
            println!("{}", text.trim_end());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    tools::run(&command, &cwd).with_context(|| format!("'{}' failed", command.name()))
}
