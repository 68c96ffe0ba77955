// src/core/script/values.rs

//! Host types exposed to scripts and the conversions between them and
//! `Dynamic` values.

use crate::core::assembler::CmdToken;
use crate::models::Task;
use crate::system::shell::syntax::Word;
use rhai::{Array, Dynamic, Engine};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A resolved path. Distinct from a string so the assembler knows to rewrite it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPath(pub PathBuf);

impl fmt::Display for ScriptPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Pre-parsed shell arguments from `parse_shell_args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellArgs(pub Vec<Word>);

impl fmt::Display for ShellArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&words.join(" "))
    }
}

/// A declared task, usable inside another task's `cmds`.
#[derive(Debug, Clone)]
pub struct TaskHandle(pub Arc<Task>);

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

pub(super) fn register_types(engine: &mut Engine) {
    engine
        .register_type_with_name::<ScriptPath>("path")
        .register_fn("to_string", |p: &mut ScriptPath| p.to_string())
        .register_fn("to_debug", |p: &mut ScriptPath| format!("path({})", p))
        .register_fn("==", |a: &mut ScriptPath, b: ScriptPath| *a == b)
        .register_fn("!=", |a: &mut ScriptPath, b: ScriptPath| *a != b);

    engine
        .register_type_with_name::<ShellArgs>("shell_args")
        .register_fn("to_string", |a: &mut ShellArgs| a.to_string())
        .register_fn("to_debug", |a: &mut ShellArgs| format!("shell_args({})", a))
        .register_fn("len", |a: &mut ShellArgs| i64::try_from(a.0.len()).unwrap_or(i64::MAX));

    engine
        .register_type_with_name::<TaskHandle>("task")
        .register_get("short_name", |t: &mut TaskHandle| t.0.short_name.clone())
        .register_get("description", |t: &mut TaskHandle| t.0.description.clone())
        .register_fn("to_string", |t: &mut TaskHandle| t.0.short_name.clone())
        .register_fn("to_debug", |t: &mut TaskHandle| format!("task({})", t.0.short_name))
        .register_fn("==", |a: &mut TaskHandle, b: TaskHandle| *a == b);
}

/// Friendly type name for error messages.
pub(super) fn type_of(value: &Dynamic) -> &'static str {
    if value.is::<ScriptPath>() {
        "path"
    } else if value.is::<ShellArgs>() {
        "shell_args"
    } else if value.is::<TaskHandle>() {
        "task"
    } else if value.is_string() {
        "string"
    } else if value.is_bool() {
        "bool"
    } else if value.is_int() {
        "int"
    } else if value.is_float() {
        "float"
    } else if value.is_array() {
        "array"
    } else if value.is_map() {
        "map"
    } else if value.is_unit() {
        "()"
    } else {
        "unknown"
    }
}

/// Text of a string or path value.
pub(super) fn path_text(value: &Dynamic) -> Option<String> {
    if value.is_string() {
        return value.clone().into_string().ok();
    }
    value
        .clone()
        .try_cast::<ScriptPath>()
        .map(|p| p.0.display().to_string())
}

/// Text of a scalar: string, path, bool, int or float.
pub(super) fn scalar_text(value: &Dynamic) -> Option<String> {
    if let Some(text) = path_text(value) {
        return Some(text);
    }
    if value.is_bool() || value.is_int() || value.is_float() {
        return Some(value.to_string());
    }
    None
}

/// Converts one element of a token-form command. Nested arrays are flattened.
pub(super) fn push_tokens(value: Dynamic, tokens: &mut Vec<CmdToken>) -> Result<(), String> {
    if value.is_array() {
        let items: Array = value.into_array().unwrap_or_default();
        for item in items {
            push_tokens(item, tokens)?;
        }
        return Ok(());
    }
    if value.is_string() {
        tokens.push(CmdToken::Str(value.into_string().unwrap_or_default()));
        return Ok(());
    }
    if value.is_int() || value.is_float() || value.is_bool() {
        tokens.push(CmdToken::Str(value.to_string()));
        return Ok(());
    }
    let kind = type_of(&value);
    if let Some(path) = value.clone().try_cast::<ScriptPath>() {
        tokens.push(CmdToken::Path(path.0));
        return Ok(());
    }
    if let Some(args) = value.try_cast::<ShellArgs>() {
        tokens.push(CmdToken::ShellArgs(args.0));
        return Ok(());
    }
    Err(format!("expected a string, path or shell_args token, got {}", kind))
}
