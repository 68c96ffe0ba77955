// src/core/script/builtins.rs

//! Builtins that declare the build: options, tasks, paths, predicates and
//! script-side logging.

use super::FnResult;
use super::context::SharedCtx;
use super::values::{ScriptPath, ShellArgs, TaskHandle, path_text, push_tokens, scalar_text, type_of};
use crate::constants::{AUTO_TASK_PREFIX, CONFIGURE_FN};
use crate::core::assembler::{self, CmdToken};
use crate::core::bool_expr::BoolExpr;
use crate::core::paths;
use crate::models::{Command, ScriptOption, ShellFragment, Task};
use crate::system::shell::print_stmts;
use crate::system::shell::syntax::Stmt;
use rhai::{Dynamic, Engine, Map, NativeCallContext};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

const TASK_FIELDS: &[&str] = &[
    "short",
    "desc",
    "hidden",
    "base",
    "deps",
    "skip_if_exists",
    "inputs",
    "outputs",
    "env",
    "cmds",
    "ignore_exit",
];

pub(super) fn register(engine: &mut Engine, ctx: &SharedCtx) {
    let c = Rc::clone(ctx);
    engine.register_fn("__enter_configure_phase", move || {
        c.borrow_mut().init_phase = false;
    });

    // --- Options ---
    let c = Rc::clone(ctx);
    engine.register_fn("option", move |name: &str| declare_option(&c, name, &Dynamic::UNIT, ""));
    let c = Rc::clone(ctx);
    engine.register_fn("option", move |name: &str, default: Dynamic| {
        declare_option(&c, name, &default, "")
    });
    let c = Rc::clone(ctx);
    engine.register_fn("option", move |name: &str, default: Dynamic, help: &str| {
        declare_option(&c, name, &default, help)
    });

    // --- Tasks ---
    let c = Rc::clone(ctx);
    engine.register_fn("task", move |call: NativeCallContext, fields: Map| declare_task(&c, &call, None, fields));
    let c = Rc::clone(ctx);
    engine.register_fn("task", move |call: NativeCallContext, short: &str, fields: Map| {
        declare_task(&c, &call, Some(short.to_string()), fields)
    });
    let c = Rc::clone(ctx);
    engine.register_fn("hastask", move |name: &str| c.borrow().tasks.contains_key(name));

    // --- Paths ---
    let c = Rc::clone(ctx);
    engine.register_fn("resolve_path", move |call: NativeCallContext, a: Dynamic| {
        resolve_path(&c, &call, &[a])
    });
    let c = Rc::clone(ctx);
    engine.register_fn("resolve_path", move |call: NativeCallContext, a: Dynamic, b: Dynamic| {
        resolve_path(&c, &call, &[a, b])
    });
    let c = Rc::clone(ctx);
    engine.register_fn(
        "resolve_path",
        move |call: NativeCallContext, a: Dynamic, b: Dynamic, d: Dynamic| resolve_path(&c, &call, &[a, b, d]),
    );
    let c = Rc::clone(ctx);
    engine.register_fn(
        "resolve_path",
        move |call: NativeCallContext, a: Dynamic, b: Dynamic, d: Dynamic, e: Dynamic| {
            resolve_path(&c, &call, &[a, b, d, e])
        },
    );
    let c = Rc::clone(ctx);
    engine.register_fn("relative_to", move |call: NativeCallContext, p: &mut ScriptPath, base: Dynamic| {
        relative_path(&c, &call, &p.0, &base)
    });
    let c = Rc::clone(ctx);
    engine.register_fn("relative_path", move |call: NativeCallContext, p: Dynamic, base: Dynamic| {
        let text = path_text(&p).ok_or_else(|| format!("relative_path: expected a path, got {}", type_of(&p)))?;
        relative_path(&c, &call, Path::new(&text), &base)
    });
    engine.register_fn("to_slashes", |p: Dynamic| -> FnResult<String> {
        let text = path_text(&p).ok_or_else(|| format!("to_slashes: expected a path, got {}", type_of(&p)))?;
        Ok(paths::to_slashes(Path::new(&text)))
    });

    // --- Logging ---
    let c = Rc::clone(ctx);
    engine.register_fn("info", move |call: NativeCallContext, msg: Dynamic| {
        log::info!("{}: {}", c.borrow().location(&call), msg);
    });
    let c = Rc::clone(ctx);
    engine.register_fn("warn", move |call: NativeCallContext, msg: Dynamic| {
        log::warn!("{}: {}", c.borrow().location(&call), msg);
    });
    let c = Rc::clone(ctx);
    engine.register_fn("error", move |call: NativeCallContext, msg: Dynamic| -> FnResult<()> {
        let location = c.borrow().location(&call);
        log::error!("{}: {}", location, msg);
        Err(format!("{}: {}", location, msg).into())
    });

    // --- Predicates and shell helpers ---
    engine.register_fn("check_condition", check_condition);
    engine.register_fn("parse_shell_args", |src: &str| -> FnResult<ShellArgs> {
        assembler::parse_shell_args(src)
            .map(ShellArgs)
            .map_err(|e| format!("parse_shell_args: {}", e).into())
    });
}

fn declare_option(ctx: &SharedCtx, name: &str, default: &Dynamic, help: &str) -> FnResult<String> {
    let mut c = ctx.borrow_mut();
    if !c.init_phase {
        return Err(format!(
            "option('{}') can only be called before configure() runs",
            name
        )
        .into());
    }
    if c.options.contains_key(name) {
        return Err(format!("option '{}' is already declared", name).into());
    }
    let default = if default.is_unit() {
        String::new()
    } else {
        scalar_text(default).ok_or_else(|| {
            format!(
                "option('{}'): default must be a string, bool or number, got {}",
                name,
                type_of(default)
            )
        })?
    };
    let value = c.supplied.get(name).cloned().unwrap_or_else(|| default.clone());
    c.options.insert(
        name.to_string(),
        ScriptOption {
            default,
            help: help.to_string(),
        },
    );
    Ok(value)
}

fn field_error(field: &str, item: Option<usize>, value: &Dynamic, expected: &str) -> String {
    let position = item.map(|i| format!(" item {}", i)).unwrap_or_default();
    format!(
        "task: field '{}'{}: expected {}, got {}",
        field,
        position,
        expected,
        type_of(value)
    )
}

fn take_string(fields: &mut Map, field: &str) -> Result<Option<String>, String> {
    match fields.remove(field) {
        None => Ok(None),
        Some(value) if value.is_string() => Ok(value.into_string().ok()),
        Some(value) => Err(field_error(field, None, &value, "a string")),
    }
}

fn take_bool(fields: &mut Map, field: &str) -> Result<Option<bool>, String> {
    match fields.remove(field) {
        None => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .map_err(|_| field_error(field, None, &value, "a bool")),
    }
}

/// A list of strings or paths. A single value counts as a one-item list.
fn take_patterns(fields: &mut Map, field: &str) -> Result<Vec<String>, String> {
    let Some(value) = fields.remove(field) else {
        return Ok(Vec::new());
    };
    if !value.is_array() {
        return path_text(&value)
            .map(|text| vec![text])
            .ok_or_else(|| field_error(field, None, &value, "a list of strings or paths"));
    }
    let mut patterns = Vec::new();
    for (i, item) in value.into_array().unwrap_or_default().into_iter().enumerate() {
        let text = path_text(&item).ok_or_else(|| field_error(field, Some(i), &item, "a string or path"))?;
        patterns.push(text);
    }
    Ok(patterns)
}

fn take_deps(fields: &mut Map) -> Result<Vec<String>, String> {
    let Some(value) = fields.remove("deps") else {
        return Ok(Vec::new());
    };
    let items = if value.is_array() {
        value.into_array().unwrap_or_default()
    } else {
        vec![value]
    };
    let mut deps = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        if item.is_string() {
            deps.push(item.into_string().unwrap_or_default());
        } else if let Some(handle) = item.clone().try_cast::<TaskHandle>() {
            deps.push(handle.0.short_name.clone());
        } else {
            return Err(field_error("deps", Some(i), &item, "a task name or task"));
        }
    }
    Ok(deps)
}

fn take_env(fields: &mut Map) -> Result<BTreeMap<String, String>, String> {
    let Some(value) = fields.remove("env") else {
        return Ok(BTreeMap::new());
    };
    let Some(map) = value.clone().try_cast::<Map>() else {
        return Err(field_error("env", None, &value, "a map"));
    };
    let mut env = BTreeMap::new();
    for (key, item) in map {
        let text = scalar_text(&item).ok_or_else(|| {
            format!(
                "task: field 'env' key '{}': expected a string, path or number, got {}",
                key,
                type_of(&item)
            )
        })?;
        env.insert(key.to_string(), text);
    }
    Ok(env)
}

fn take_commands(fields: &mut Map, task_name: &str, base_dir: &Path) -> Result<Vec<Command>, String> {
    let Some(value) = fields.remove("cmds") else {
        return Ok(Vec::new());
    };
    let items = if value.is_array() {
        value.into_array().unwrap_or_default()
    } else {
        vec![value]
    };

    let mut commands = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let fragment = |content: String| {
            Command::Shell(ShellFragment {
                task_name: task_name.to_string(),
                index,
                content,
            })
        };
        if item.is_string() {
            commands.push(fragment(item.into_string().unwrap_or_default()));
            continue;
        }
        if let Some(handle) = item.clone().try_cast::<TaskHandle>() {
            commands.push(Command::TaskRef(handle.0));
            continue;
        }
        if item.is_array() || item.is::<ShellArgs>() {
            let mut tokens: Vec<CmdToken> = Vec::new();
            push_tokens(item, &mut tokens).map_err(|e| format!("task: field 'cmds' item {}: {}", index, e))?;
            let call = assembler::assemble(&tokens, base_dir)
                .map_err(|e| format!("task: field 'cmds' item {}: {}", index, e))?;
            commands.push(fragment(print_stmts(&[Stmt::from_call(call)])));
            continue;
        }
        return Err(field_error("cmds", Some(index), &item, "a string, token list or task"));
    }
    Ok(commands)
}

fn declare_task(
    ctx: &SharedCtx,
    call: &NativeCallContext<'_>,
    short: Option<String>,
    mut fields: Map,
) -> FnResult<TaskHandle> {
    if let Some(key) = fields.keys().find(|k| !TASK_FIELDS.contains(&k.as_str())) {
        return Err(format!("task: unknown field '{}'", key).into());
    }
    let short = match short {
        Some(name) if fields.contains_key("short") => {
            return Err(format!("task('{}'): the name is also given as 'short'", name).into());
        }
        Some(name) => name,
        None => take_string(&mut fields, "short")?.unwrap_or_default(),
    };

    let (paths, location) = {
        let c = ctx.borrow();
        (c.paths_for(call), c.location(call))
    };

    let (short_name, hidden_by_default) = if short.is_empty() {
        (format!("{}{}", AUTO_TASK_PREFIX, Uuid::new_v4().simple()), true)
    } else {
        (short, false)
    };
    if short_name == CONFIGURE_FN {
        return Err(format!("task: '{}' is a reserved name", CONFIGURE_FN).into());
    }

    let base_dir = match fields.remove("base") {
        None => paths.anchor().to_path_buf(),
        Some(value) => {
            let text = path_text(&value).ok_or_else(|| field_error("base", None, &value, "a string or path"))?;
            paths.resolve(&text)
        }
    };

    let description = take_string(&mut fields, "desc")?.unwrap_or_default();
    let hidden = take_bool(&mut fields, "hidden")?.unwrap_or(hidden_by_default);
    let ignore_exit = take_bool(&mut fields, "ignore_exit")?.unwrap_or(false);
    let deps = take_deps(&mut fields)?;
    let skip_if_exists = take_patterns(&mut fields, "skip_if_exists")?;
    let inputs = take_patterns(&mut fields, "inputs")?;
    let outputs = take_patterns(&mut fields, "outputs")?;
    let env = take_env(&mut fields)?;
    let commands = take_commands(&mut fields, &short_name, &base_dir)?;

    if !inputs.is_empty() && outputs.is_empty() {
        log::warn!(
            "{}: task '{}' has inputs but no outputs and will always run",
            location,
            short_name
        );
    }

    let task = Arc::new(Task {
        short_name: short_name.clone(),
        description,
        hidden,
        base_dir,
        deps,
        skip_if_exists,
        inputs,
        outputs,
        env,
        commands,
        ignore_exit,
    });

    let mut c = ctx.borrow_mut();
    if c.tasks.contains_key(&short_name) {
        return Err(format!("task {} already declared", short_name).into());
    }
    log::debug!("{}: declared task '{}'", location, short_name);
    c.tasks.insert(short_name, Arc::clone(&task));
    Ok(TaskHandle(task))
}

fn resolve_path(ctx: &SharedCtx, call: &NativeCallContext<'_>, parts: &[Dynamic]) -> FnResult<ScriptPath> {
    let mut fragments = Vec::with_capacity(parts.len());
    for (i, part) in parts.iter().enumerate() {
        let text = path_text(part).ok_or_else(|| {
            format!(
                "resolve_path: argument {} must be a string or path, got {}",
                i + 1,
                type_of(part)
            )
        })?;
        fragments.push(text);
    }
    Ok(ScriptPath(ctx.borrow().paths_for(call).normalize(&fragments)))
}

fn relative_path(ctx: &SharedCtx, call: &NativeCallContext<'_>, path: &Path, base: &Dynamic) -> FnResult<ScriptPath> {
    let base_text = path_text(base).ok_or_else(|| format!("base must be a string or path, got {}", type_of(base)))?;
    let resolver = ctx.borrow().paths_for(call);
    let path: PathBuf = resolver.resolve(&path.to_string_lossy());
    let base = resolver.resolve(&base_text);
    paths::relative_to(&path, &base)
        .map(ScriptPath)
        .map_err(|e| e.to_string().into())
}

fn check_condition(expr: &str, vars: Map) -> FnResult<bool> {
    let parsed = BoolExpr::parse(expr).map_err(|e| format!("check_condition('{}'): {}", expr, e))?;
    let mut values = HashMap::with_capacity(vars.len());
    for (name, value) in vars {
        let flag = value
            .as_bool()
            .map_err(|_| format!("check_condition: '{}' must be a bool, got {}", name, type_of(&value)))?;
        values.insert(name.to_string(), flag);
    }
    Ok(parsed.eval(&values))
}
