// src/lib.rs

//! # buildsys
//!
//! A programmable build orchestrator. A Rhai build script declares options and
//! tasks in two phases (top level, then `configure()`); the resulting task graph
//! is cached on disk and later executed with timestamp-aware incremental rebuilds
//! through an embedded shell interpreter.

include!(concat!(env!("OUT_DIR"), "/translations.rs"));

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Shared cancellation flag. Setting it to `true` stops task execution at the
/// next command boundary and kills running child processes.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;
