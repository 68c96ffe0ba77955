// src/core/script/host.rs

//! Builtins that touch the host: filesystem queries, YAML data, process
//! execution and the environment overrides.

use super::FnResult;
use super::context::SharedCtx;
use super::values::{ScriptPath, push_tokens, scalar_text, type_of, path_text};
use crate::core::assembler::{self, CmdToken};
use crate::core::task_runner::{NullDeviceOpen, RoutedExec};
use crate::system::environ::{self, LIST_SEPARATOR};
use crate::system::shell::syntax::Stmt;
use crate::system::shell::{Input, Runner, ShellError, Sink, parse};
use lazy_static::lazy_static;
use regex::Regex;
use rhai::{Dynamic, Engine, NativeCallContext};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::Command as StdCommand;
use std::rc::Rc;

lazy_static! {
    // `	libz.so.1 (libc6,x86-64) => /lib/x86_64-linux-gnu/libz.so.1`
    static ref LDCONFIG_LINE: Regex = Regex::new(r"^\s*([^ ]+) \([^)]+\) => (.*)$").expect("valid regex");
}

pub(super) fn register(engine: &mut Engine, ctx: &SharedCtx) {
    // --- Filesystem ---
    let c = Rc::clone(ctx);
    engine.register_fn("isdir", move |call: NativeCallContext, p: Dynamic| -> FnResult<bool> {
        Ok(host_path(&c, &call, "isdir", &p)?.is_dir())
    });
    let c = Rc::clone(ctx);
    engine.register_fn("isfile", move |call: NativeCallContext, p: Dynamic| -> FnResult<bool> {
        Ok(host_path(&c, &call, "isfile", &p)?.is_file())
    });
    let c = Rc::clone(ctx);
    engine.register_fn(
        "write_file",
        move |call: NativeCallContext, p: Dynamic, content: Dynamic| -> FnResult<()> {
            let path = host_path(&c, &call, "write_file", &p)?;
            fs::write(&path, content.to_string())
                .map_err(|e| format!("write_file: failed to write '{}': {}", path.display(), e).into())
        },
    );

    // --- YAML ---
    let c = Rc::clone(ctx);
    engine.register_fn("read_yaml", move |call: NativeCallContext, file: Dynamic, key: &str| {
        read_yaml(&c, &call, &file, key, Dynamic::UNIT)
    });
    let c = Rc::clone(ctx);
    engine.register_fn(
        "read_yaml",
        move |call: NativeCallContext, file: Dynamic, key: &str, default: Dynamic| {
            read_yaml(&c, &call, &file, key, default)
        },
    );

    // --- Processes ---
    let c = Rc::clone(ctx);
    engine.register_fn("execute", move |call: NativeCallContext, cmd: Dynamic| {
        execute(&c, &call, cmd, "text", false)
    });
    let c = Rc::clone(ctx);
    engine.register_fn("execute", move |call: NativeCallContext, cmd: Dynamic, format: &str| {
        execute(&c, &call, cmd, format, false)
    });
    let c = Rc::clone(ctx);
    engine.register_fn(
        "execute",
        move |call: NativeCallContext, cmd: Dynamic, format: &str, show_error: bool| {
            execute(&c, &call, cmd, format, show_error)
        },
    );

    // --- Environment ---
    let c = Rc::clone(ctx);
    engine.register_fn("getenv", move |key: &str| -> String {
        let overridden = environ::lookup(&c.borrow().env_overrides, key).cloned();
        overridden
            .or_else(|| environ::process_var(key))
            .unwrap_or_default()
    });
    let c = Rc::clone(ctx);
    engine.register_fn("setenv", move |key: &str, value: Dynamic| -> FnResult<()> {
        let mut c = c.borrow_mut();
        if value.is_unit() {
            let existing = override_key(&c.env_overrides, key);
            c.env_overrides.remove(&existing);
            return Ok(());
        }
        let text = scalar_text(&value)
            .ok_or_else(|| format!("setenv('{}'): expected a string, path or number, got {}", key, type_of(&value)))?;
        let existing = override_key(&c.env_overrides, key);
        c.env_overrides.insert(existing, text);
        Ok(())
    });
    let c = Rc::clone(ctx);
    engine.register_fn("prepend_path", move |call: NativeCallContext, dir: Dynamic| -> FnResult<()> {
        let dir = host_path(&c, &call, "prepend_path", &dir)?;
        let mut c = c.borrow_mut();
        let key = override_key(&c.env_overrides, "PATH");
        let current = c
            .env_overrides
            .get(&key)
            .cloned()
            .or_else(|| environ::process_var("PATH"))
            .unwrap_or_default();
        let value = if current.is_empty() {
            dir.display().to_string()
        } else {
            format!("{}{}{}", dir.display(), LIST_SEPARATOR, current)
        };
        log::debug!("PATH override is now '{}'", value);
        c.env_overrides.insert(key, value);
        Ok(())
    });

    // --- Toolchain probes ---
    let c = Rc::clone(ctx);
    engine.register_fn("load_vcvars", move || load_vcvars(&c, "amd64"));
    let c = Rc::clone(ctx);
    engine.register_fn("load_vcvars", move |arch: &str| load_vcvars(&c, arch));
    let c = Rc::clone(ctx);
    engine.register_fn("lookup_lib", move |name: &str| lookup_lib(&c, name));
}

fn host_path(ctx: &SharedCtx, call: &NativeCallContext<'_>, builtin: &str, value: &Dynamic) -> FnResult<PathBuf> {
    let text = path_text(value)
        .ok_or_else(|| format!("{}: expected a string or path, got {}", builtin, type_of(value)))?;
    Ok(ctx.borrow().paths_for(call).resolve(&text))
}

/// The key an override is stored under. On Windows an existing entry that
/// differs only in case is reused.
fn override_key(overrides: &std::collections::BTreeMap<String, String>, key: &str) -> String {
    if cfg!(windows) {
        if let Some(existing) = overrides.keys().find(|k| k.eq_ignore_ascii_case(key)) {
            return existing.clone();
        }
    }
    key.to_string()
}

fn read_yaml(
    ctx: &SharedCtx,
    call: &NativeCallContext<'_>,
    file: &Dynamic,
    key: &str,
    default: Dynamic,
) -> FnResult<Dynamic> {
    let path = host_path(ctx, call, "read_yaml", file)?;

    let cached = ctx.borrow().yaml_cache.get(&path).cloned();
    let document = match cached {
        Some(doc) => doc,
        None => {
            let text = fs::read_to_string(&path)
                .map_err(|e| format!("read_yaml: failed to read '{}': {}", path.display(), e))?;
            let doc: serde_yaml::Value = serde_yaml::from_str(&text)
                .map_err(|e| format!("read_yaml: failed to parse '{}': {}", path.display(), e))?;
            let doc = Rc::new(doc);
            let mut c = ctx.borrow_mut();
            c.track(&path);
            c.yaml_cache.insert(path.clone(), Rc::clone(&doc));
            doc
        }
    };

    match lookup_key(&document, key) {
        Some(value) => rhai::serde::to_dynamic(value),
        None => Ok(default),
    }
}

/// Follows a dotted key (`a.b.0.c`) through mappings and sequences. An empty
/// key returns the whole document.
fn lookup_key<'a>(document: &'a serde_yaml::Value, key: &str) -> Option<&'a serde_yaml::Value> {
    if key.is_empty() {
        return Some(document);
    }
    key.split('.').try_fold(document, |node, segment| match node {
        serde_yaml::Value::Mapping(map) => map.get(segment),
        serde_yaml::Value::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn execute(
    ctx: &SharedCtx,
    call: &NativeCallContext<'_>,
    command: Dynamic,
    format: &str,
    show_error: bool,
) -> FnResult<Dynamic> {
    if !matches!(format, "text" | "json") {
        return Err(format!("execute: unknown format '{}' (expected \"text\" or \"json\")", format).into());
    }
    let (dir, env) = {
        let c = ctx.borrow();
        let dir = c.paths_for(call).anchor().to_path_buf();
        (dir, environ::compose_env(&c.env_overrides))
    };

    let (stmts, shown) = if command.is_string() {
        let src = command.into_string().unwrap_or_default();
        let stmts = parse(&src, "execute").map_err(|e| format!("execute: {}", e))?;
        (stmts, src)
    } else {
        let mut tokens: Vec<CmdToken> = Vec::new();
        push_tokens(command, &mut tokens).map_err(|e| format!("execute: {}", e))?;
        let call_expr = assembler::assemble(&tokens, &dir).map_err(|e| format!("execute: {}", e))?;
        let stmt = Stmt::from_call(call_expr);
        let shown = stmt.to_string();
        (vec![stmt], shown)
    };
    log::debug!("execute: {}", shown);

    let (stdout, captured) = Sink::buffer();
    let stderr = if show_error { Sink::Stderr } else { Sink::Null };
    let mut runner = Runner::builder(dir)
        .env(env)
        .errexit(true)
        .stdin(Input::Null)
        .stdout(stdout)
        .stderr(stderr)
        .exec_handler(Rc::new(RoutedExec))
        .open_handler(Rc::new(NullDeviceOpen))
        .build();

    match runner.run_all(&stmts) {
        Ok(()) => {}
        Err(ShellError::ExitStatus(code)) => {
            log::debug!("execute: '{}' exited with status {}", shown, code);
            return Ok(Dynamic::FALSE);
        }
        Err(e) => return Err(format!("execute: '{}': {}", shown, e).into()),
    }

    let output = String::from_utf8_lossy(&captured.take()).into_owned();
    if format == "json" {
        let value: serde_json::Value = serde_json::from_str(&output)
            .map_err(|e| format!("execute: output of '{}' is not valid JSON: {}", shown, e))?;
        return rhai::serde::to_dynamic(value);
    }
    Ok(output.trim_end().into())
}

#[cfg(windows)]
fn load_vcvars(ctx: &SharedCtx, arch: &str) -> FnResult<bool> {
    const KEPT: &[&str] = &["PATH", "INCLUDE", "LIBPATH", "LIB"];

    let program_files = environ::process_var("ProgramFiles(x86)")
        .unwrap_or_else(|| r"C:\Program Files (x86)".to_string());
    let vswhere = PathBuf::from(program_files)
        .join("Microsoft Visual Studio")
        .join("Installer")
        .join("vswhere.exe");
    let output = StdCommand::new(&vswhere)
        .args(["-latest", "-products", "*", "-property", "installationPath"])
        .output()
        .map_err(|e| format!("load_vcvars: failed to run '{}': {}", vswhere.display(), e))?;
    let install = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || install.is_empty() {
        return Err("load_vcvars: no Visual Studio installation found".into());
    }

    let vcvarsall = PathBuf::from(&install)
        .join("VC")
        .join("Auxiliary")
        .join("Build")
        .join("vcvarsall.bat");
    let output = StdCommand::new("cmd")
        .arg("/c")
        .arg(format!("\"{}\" {} >nul && set", vcvarsall.display(), arch))
        .output()
        .map_err(|e| format!("load_vcvars: failed to run '{}': {}", vcvarsall.display(), e))?;
    if !output.status.success() {
        return Err(format!("load_vcvars: '{}' {} failed", vcvarsall.display(), arch).into());
    }

    let mut c = ctx.borrow_mut();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let upper = key.to_uppercase();
        if KEPT.contains(&upper.as_str()) {
            let key = override_key(&c.env_overrides, &upper);
            c.env_overrides.insert(key, value.to_string());
        }
    }
    log::info!("Loaded MSVC environment for '{}' from {}", arch, install);
    Ok(true)
}

#[cfg(not(windows))]
fn load_vcvars(_ctx: &SharedCtx, arch: &str) -> FnResult<bool> {
    log::debug!("load_vcvars('{}') has no effect on this host", arch);
    Ok(true)
}

#[cfg(unix)]
fn lookup_lib(ctx: &SharedCtx, name: &str) -> FnResult<Dynamic> {
    if ctx.borrow().ldconfig.is_none() {
        let table = load_ldconfig()?;
        ctx.borrow_mut().ldconfig = Some(table);
    }
    let c = ctx.borrow();
    Ok(c.ldconfig
        .as_ref()
        .map_or(Dynamic::UNIT, |table| library_value(table, name)))
}

#[cfg(not(unix))]
fn lookup_lib(_ctx: &SharedCtx, name: &str) -> FnResult<Dynamic> {
    log::debug!("lookup_lib('{}') is not supported on this host", name);
    Ok(Dynamic::UNIT)
}

/// The library's path as a script path, or `()` when the cache does not list it.
#[cfg_attr(not(unix), allow(dead_code))]
fn library_value(table: &HashMap<String, String>, name: &str) -> Dynamic {
    match table.get(name) {
        Some(path) => Dynamic::from(ScriptPath(PathBuf::from(path))),
        None => Dynamic::UNIT,
    }
}

/// Runs `ldconfig -p`. A failure is an error and is not memoized.
#[cfg(unix)]
fn load_ldconfig() -> FnResult<HashMap<String, String>> {
    log::debug!("Running ldconfig -p");
    let mut failures = Vec::new();
    for program in ["ldconfig", "/sbin/ldconfig"] {
        match StdCommand::new(program).arg("-p").output() {
            Ok(output) if output.status.success() => {
                return Ok(parse_ldconfig(&String::from_utf8_lossy(&output.stdout)));
            }
            Ok(output) => failures.push(format!(
                "'{} -p' exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Err(e) => failures.push(format!("'{} -p': {}", program, e)),
        }
    }
    Err(format!("lookup_lib: failed to run ldconfig ({})", failures.join("; ")).into())
}

/// Parses `ldconfig -p` output. A name listed twice keeps its last entry.
#[cfg_attr(not(unix), allow(dead_code))]
fn parse_ldconfig(text: &str) -> HashMap<String, String> {
    let mut table = HashMap::new();
    for line in text.lines().skip(1).filter(|line| !line.trim().is_empty()) {
        match LDCONFIG_LINE.captures(line) {
            Some(caps) => {
                if let (Some(name), Some(path)) = (caps.get(1), caps.get(2)) {
                    table.insert(name.as_str().to_string(), path.as_str().to_string());
                }
            }
            None => log::warn!("Skipping unexpected line from ldconfig: {}", line),
        }
    }
    table
}
