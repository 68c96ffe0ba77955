// src/core/script/context.rs

use crate::core::paths::PathContext;
use crate::models::{OptionValues, ScriptOption, TaskList};
use rhai::{Module, NativeCallContext, Position, Shared};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// State of a module in the loader's memo table.
#[derive(Debug, Clone)]
pub(crate) enum ModuleSlot {
    /// Evaluation has started but not finished; a second import is circular.
    Loading,
    Loaded(Shared<Module>),
}

/// Per-evaluation state shared by every builtin.
#[derive(Debug)]
pub(crate) struct ParserCtx {
    pub(crate) project_root: PathBuf,
    /// Script currently being evaluated at top level.
    pub(crate) filepath: PathBuf,
    /// True until `configure()` starts.
    pub(crate) init_phase: bool,
    pub(crate) options: BTreeMap<String, ScriptOption>,
    /// Values supplied by the invoker.
    pub(crate) supplied: OptionValues,
    pub(crate) env_overrides: BTreeMap<String, String>,
    pub(crate) modules: HashMap<PathBuf, ModuleSlot>,
    pub(crate) yaml_cache: HashMap<PathBuf, Rc<serde_yaml::Value>>,
    pub(crate) tasks: TaskList,
    /// Main script first, then modules and data files in the order they were read.
    pub(crate) script_files: Vec<PathBuf>,
    /// `ldconfig -p` output, loaded on first use.
    pub(crate) ldconfig: Option<HashMap<String, String>>,
}

pub(crate) type SharedCtx = Rc<RefCell<ParserCtx>>;

impl ParserCtx {
    pub(crate) fn new(project_root: PathBuf, script: PathBuf, supplied: OptionValues) -> Self {
        Self {
            project_root,
            filepath: script,
            init_phase: true,
            options: BTreeMap::new(),
            supplied,
            env_overrides: BTreeMap::new(),
            modules: HashMap::new(),
            yaml_cache: HashMap::new(),
            tasks: TaskList::new(),
            script_files: Vec::new(),
            ldconfig: None,
        }
    }

    pub(crate) fn track(&mut self, file: &Path) {
        if !self.script_files.iter().any(|f| f == file) {
            self.script_files.push(file.to_path_buf());
        }
    }

    /// Path context anchored at the script a builtin was called from.
    pub(crate) fn paths_for(&self, call: &NativeCallContext<'_>) -> PathContext {
        let script = call
            .source()
            .map_or_else(|| self.filepath.clone(), PathBuf::from);
        PathContext::for_script(self.project_root.clone(), &script)
    }

    /// `//script.rhai:line:col` for log records and errors.
    pub(crate) fn location(&self, call: &NativeCallContext<'_>) -> String {
        let script = call
            .source()
            .map_or_else(|| self.filepath.clone(), PathBuf::from);
        let ctx = PathContext::new(self.project_root.clone(), self.project_root.clone());
        format_location(&ctx.simplify(&script), call.position())
    }
}

pub(crate) fn format_location(file: &str, pos: Position) -> String {
    match (pos.line(), pos.position()) {
        (Some(line), Some(col)) => format!("{}:{}:{}", file, line, col),
        (Some(line), None) => format!("{}:{}", file, line),
        _ => file.to_string(),
    }
}
