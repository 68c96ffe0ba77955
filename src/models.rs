// src/models.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

// --- RUNTIME MODELS ---
// Built by the script evaluator and consumed by the task runner. Tasks are
// immutable once the configure phase ends, so they are shared through `Arc`.

/// A raw shell snippet attached to a task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShellFragment {
    /// Owning task, used to prefix logs and parse errors.
    pub task_name: String,
    /// Position of the fragment in the task's command list.
    pub index: usize,
    pub content: String,
}

impl ShellFragment {
    /// Name reported by the shell parser: `task[index]`.
    pub fn source_name(&self) -> String {
        format!("{}[{}]", self.task_name, self.index)
    }
}

/// One item of a task's command list.
#[derive(Debug, Clone)]
pub enum Command {
    Shell(ShellFragment),
    /// Another task, executed inline.
    TaskRef(Arc<Task>),
}

#[derive(Debug, Clone, Default)]
pub struct Task {
    pub short_name: String,
    pub description: String,
    pub hidden: bool,
    /// Absolute working directory of every command.
    pub base_dir: PathBuf,
    /// Names of tasks that must complete first. Resolved at run time.
    pub deps: Vec<String>,
    pub skip_if_exists: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub commands: Vec<Command>,
    pub ignore_exit: bool,
}

/// The build graph, keyed by short name.
pub type TaskList = BTreeMap<String, Arc<Task>>;

/// Effective option values, keyed by option name.
pub type OptionValues = BTreeMap<String, String>;

/// An option declared by `option(...)` during the init phase.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOption {
    pub default: String,
    pub help: String,
}

// --- CACHE MODELS ---
// Serializable mirror of the runtime graph. Task references are stored by
// name and turned back into shared pointers by `core::graph`.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum CachedCommand {
    Shell(ShellFragment),
    TaskRef(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CachedTask {
    pub short_name: String,
    pub description: String,
    pub hidden: bool,
    pub base_dir: PathBuf,
    pub deps: Vec<String>,
    pub skip_if_exists: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub commands: Vec<CachedCommand>,
    pub ignore_exit: bool,
}
