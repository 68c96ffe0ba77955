// src/cli/handlers/mod.rs

// One module per CLI command.

pub mod commons;
pub mod configure;
pub mod list;
pub mod options;
pub mod run;
pub mod tool;
