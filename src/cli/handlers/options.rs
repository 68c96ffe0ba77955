// src/cli/handlers/options.rs

use crate::{
    CancellationToken,
    cli::{args::OptionsArgs, handlers::commons},
    core::{script, settings::Settings},
};
use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::PathBuf;

/// The main handler for the `options` command.
/// Runs only the script's top level and prints the options it declares.
pub fn handle(root: Option<PathBuf>, args: Vec<String>, _cancel: &CancellationToken) -> Result<()> {
    let args = OptionsArgs::try_parse_from(&args)?;
    let settings = Settings::load(root.as_deref())?;
    let script_path = commons::script_path(&settings, args.script.as_deref())?;

    let shown = commons::simplify(&settings, &script_path);
    let evaluation = script::evaluate_options(&settings.project_root, &script_path, &settings.options)
        .with_context(|| format!("Failed to read the options of '{}'", shown))?;

    if evaluation.options.is_empty() {
        println!("{}", t!("options.info.none").yellow());
        return Ok(());
    }

    println!("{} '{}'", t!("options.header").bold(), shown);
    for (name, option) in &evaluation.options {
        let current = evaluation.option_values.get(name).map(String::as_str).unwrap_or_default();
        println!("  {} = {}", name.cyan(), current.green());
        if !option.help.is_empty() {
            println!("      {}", option.help);
        }
        println!("      {} {}", t!("options.label.default").dimmed(), option.default.dimmed());
    }
    Ok(())
}
