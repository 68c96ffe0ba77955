// src/core/script/mod.rs

//! # Script Evaluator
//!
//! Runs a Rhai build script in two phases. The top level runs first (the init
//! phase), where `option(...)` declares the knobs the invoker may set. Then the
//! script's `configure()` function runs and the tasks it declares become the
//! build graph. Environment overrides collected along the way are frozen into
//! every task at the end.
//!
//! Every builtin shares one [`ParserCtx`](context::ParserCtx) for the duration
//! of an evaluation. Engines are never reused across evaluations.

mod builtins;
mod context;
mod host;
mod modules;
pub mod values;

use crate::constants::CONFIGURE_FN;
use crate::core::graph::{self, GraphError};
use crate::core::paths::PathContext;
use crate::models::{OptionValues, ScriptOption, TaskList};
use context::{ParserCtx, SharedCtx, format_location};
use modules::ScriptModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::{fs, io};
use thiserror::Error;

pub(crate) type FnResult<T> = Result<T, Box<EvalAltResult>>;

/// Called after the init phase; closes `option(...)` and starts the build graph.
const CONFIGURE_TRAILER: &str = "__enter_configure_phase(); configure();";

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to read script '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Syntax error in {location}: {message}")]
    Syntax { location: String, message: String },
    #[error("Script evaluation failed: {0}")]
    Eval(String),
    #[error("Script '{0}' does not define a 'configure()' function")]
    MissingConfigure(String),
    #[error("Unknown option '{0}' (not declared by the script)")]
    UnknownOption(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Everything one evaluation produced.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub tasks: TaskList,
    /// Declared options, by name.
    pub options: BTreeMap<String, ScriptOption>,
    /// Effective value of every declared option.
    pub option_values: OptionValues,
    /// The main script followed by every module and data file it read.
    pub script_files: Vec<PathBuf>,
}

/// Evaluates `script` in both phases with the `supplied` option values.
pub fn evaluate(project_root: &Path, script: &Path, supplied: &OptionValues) -> Result<Evaluation, ScriptError> {
    run(project_root, script, supplied, true)
}

/// Runs only the init phase, to list the options a script declares.
pub fn evaluate_options(
    project_root: &Path,
    script: &Path,
    supplied: &OptionValues,
) -> Result<Evaluation, ScriptError> {
    run(project_root, script, supplied, false)
}

fn run(project_root: &Path, script: &Path, supplied: &OptionValues, configure: bool) -> Result<Evaluation, ScriptError> {
    let shown = PathContext::new(project_root, project_root).simplify(script);
    let source = fs::read_to_string(script).map_err(|source| ScriptError::Read {
        path: script.to_path_buf(),
        source,
    })?;

    let ctx: SharedCtx = Rc::new(RefCell::new(ParserCtx::new(
        project_root.to_path_buf(),
        script.to_path_buf(),
        supplied.clone(),
    )));
    ctx.borrow_mut().track(script);
    let engine = build_engine(&ctx);

    let mut ast = engine.compile(&source).map_err(|e| ScriptError::Syntax {
        location: format_location(&shown, e.1),
        message: e.0.to_string(),
    })?;
    ast.set_source(script.display().to_string());

    if configure {
        let has_configure = ast
            .iter_functions()
            .any(|f| f.name == CONFIGURE_FN && f.params.is_empty());
        if !has_configure {
            return Err(ScriptError::MissingConfigure(shown));
        }
        let trailer = engine.compile(CONFIGURE_TRAILER).map_err(|e| ScriptError::Syntax {
            location: "<configure>".to_string(),
            message: e.0.to_string(),
        })?;
        ast = ast.merge(&trailer);
    }

    log::debug!("Evaluating '{}' (configure: {})", shown, configure);
    engine
        .run_ast(&ast)
        .map_err(|e| ScriptError::Eval(describe(&shown, &e)))?;
    drop(engine);

    let mut c = ctx.borrow_mut();
    if let Some(name) = supplied.keys().find(|name| !c.options.contains_key(*name)) {
        return Err(ScriptError::UnknownOption(name.clone()));
    }

    let options = std::mem::take(&mut c.options);
    let option_values = options
        .iter()
        .map(|(name, option)| {
            let value = supplied.get(name).cloned().unwrap_or_else(|| option.default.clone());
            (name.clone(), value)
        })
        .collect();

    let tasks = if configure {
        graph::finalize(&c.tasks, &c.env_overrides)?
    } else {
        TaskList::new()
    };
    let script_files = std::mem::take(&mut c.script_files);
    log::debug!(
        "Evaluated '{}': {} option(s), {} task(s), {} tracked file(s)",
        shown,
        options.len(),
        tasks.len(),
        script_files.len()
    );

    Ok(Evaluation {
        tasks,
        options,
        option_values,
        script_files,
    })
}

fn build_engine(ctx: &SharedCtx) -> Engine {
    let mut engine = Engine::new();

    values::register_types(&mut engine);
    builtins::register(&mut engine, ctx);
    host::register(&mut engine, ctx);
    engine.set_module_resolver(ScriptModuleResolver::new(Rc::clone(ctx)));

    engine.on_var(|name, _, _| {
        Ok(match name {
            "OS" => Some(Dynamic::from(std::env::consts::OS.to_string())),
            "ARCH" => Some(Dynamic::from(std::env::consts::ARCH.to_string())),
            _ => None,
        })
    });

    engine.on_print(|text| log::info!("{}", text));
    let c = Rc::clone(ctx);
    engine.on_debug(move |text, source, pos| {
        let c = c.borrow();
        let script = source.map_or_else(|| c.filepath.clone(), PathBuf::from);
        let shown = PathContext::new(c.project_root.clone(), c.project_root.clone()).simplify(&script);
        log::debug!("{}: {}", format_location(&shown, pos), text);
    });

    engine
}

fn describe(shown: &str, error: &EvalAltResult) -> String {
    let position = error.position();
    if position.is_none() {
        format!("{}: {}", shown, error)
    } else {
        format!("{}: {}", format_location(shown, position), error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Command;
    use std::sync::Arc;

    struct Project {
        dir: tempfile::TempDir,
    }

    impl Project {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn root(&self) -> PathBuf {
            dunce::canonicalize(self.dir.path()).unwrap()
        }

        fn write(&self, name: &str, content: &str) -> PathBuf {
            let path = self.root().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, content).unwrap();
            path
        }

        fn eval(&self, script: &str, supplied: &[(&str, &str)]) -> Result<Evaluation, ScriptError> {
            let path = self.write("build.rhai", script);
            let supplied = supplied
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            evaluate(&self.root(), &path, &supplied)
        }
    }

    fn shell_texts(task: &crate::models::Task) -> Vec<String> {
        task.commands
            .iter()
            .filter_map(|c| match c {
                Command::Shell(f) => Some(f.content.clone()),
                Command::TaskRef(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_tasks_from_configure() {
        let project = Project::new();
        let eval = project
            .eval(
                r#"
                fn configure() {
                    let gen = task("gen", #{ desc: "generate", outputs: ["gen.h"], cmds: ["touch gen.h"] });
                    task(#{ short: "build", deps: [gen], inputs: "main.c", outputs: ["app"], cmds: [gen, "cc main.c -o app"] });
                }
                "#,
                &[],
            )
            .unwrap();

        assert_eq!(eval.tasks.len(), 2);
        let build = &eval.tasks["build"];
        assert_eq!(build.deps, vec!["gen".to_string()]);
        assert_eq!(build.inputs, vec!["main.c".to_string()]);
        assert_eq!(build.base_dir, project.root());
        match &build.commands[0] {
            Command::TaskRef(target) => assert!(Arc::ptr_eq(target, &eval.tasks["gen"])),
            Command::Shell(_) => panic!("expected a task reference"),
        }
        assert_eq!(shell_texts(build), vec!["cc main.c -o app".to_string()]);
        assert_eq!(eval.tasks["gen"].description, "generate");
        assert_eq!(eval.script_files, vec![project.root().join("build.rhai")]);
    }

    #[test]
    fn test_options_flow_into_configure() {
        let project = Project::new();
        let script = r#"
            const MODE = option("mode", "debug", "Build flavour");
            const LTO = option("lto", false);
            fn configure() {
                task("build", #{ cmds: ["echo " + global::MODE + " " + global::LTO] });
            }
        "#;
        let eval = project.eval(script, &[]).unwrap();
        assert_eq!(shell_texts(&eval.tasks["build"]), vec!["echo debug false".to_string()]);
        assert_eq!(eval.options["mode"].help, "Build flavour");
        assert_eq!(eval.option_values["lto"], "false");

        let eval = project.eval(script, &[("mode", "release")]).unwrap();
        assert_eq!(shell_texts(&eval.tasks["build"]), vec!["echo release false".to_string()]);
        assert_eq!(eval.option_values["mode"], "release");

        assert!(matches!(
            project.eval(script, &[("nope", "1")]),
            Err(ScriptError::UnknownOption(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_option_inside_configure_fails() {
        let project = Project::new();
        let err = project
            .eval(r#"fn configure() { option("late", "x"); }"#, &[])
            .unwrap_err();
        assert!(matches!(err, ScriptError::Eval(message) if message.contains("before configure")));
    }

    #[test]
    fn test_missing_configure_and_syntax_errors() {
        let project = Project::new();
        assert!(matches!(
            project.eval("let x = 1;", &[]),
            Err(ScriptError::MissingConfigure(name)) if name == "//build.rhai"
        ));
        assert!(matches!(
            project.eval("fn configure() {", &[]),
            Err(ScriptError::Syntax { location, .. }) if location.starts_with("//build.rhai")
        ));
    }

    #[test]
    fn test_task_declaration_errors() {
        let project = Project::new();
        let cases = [
            (r#"task("configure", #{});"#, "reserved"),
            (r#"task("a", #{}); task("a", #{});"#, "task a already declared"),
            (r#"task("a", #{ cmdz: [] });"#, "unknown field 'cmdz'"),
            (r#"task("a", #{ inputs: ["x", 3] });"#, "field 'inputs' item 1"),
            (r#"task("a", #{ hidden: "yes" });"#, "field 'hidden'"),
        ];
        for (body, expected) in cases {
            let script = format!("fn configure() {{ {} }}", body);
            match project.eval(&script, &[]) {
                Err(ScriptError::Eval(message)) => {
                    assert!(message.contains(expected), "'{}' should mention '{}'", message, expected)
                }
                other => panic!("expected an evaluation error for {}, got {:?}", body, other),
            }
        }
    }

    #[test]
    fn test_anonymous_tasks_are_hidden() {
        let project = Project::new();
        let eval = project
            .eval(r#"fn configure() { let t = task(#{ cmds: ["echo hi"] }); task("all", #{ cmds: [t] }); }"#, &[])
            .unwrap();
        let auto: Vec<_> = eval.tasks.values().filter(|t| t.short_name.starts_with("auto#")).collect();
        assert_eq!(auto.len(), 1);
        assert!(auto[0].hidden);
        assert!(!eval.tasks["all"].hidden);
    }

    #[test]
    fn test_token_commands_and_paths() {
        let project = Project::new();
        let eval = project
            .eval(
                r#"
                fn configure() {
                    let src = resolve_path("src", "main.c");
                    let out = resolve_path("//out/app");
                    let flags = parse_shell_args("-O2 -DNAME=\"a b\"");
                    task("build", #{
                        cmds: [["CC=gcc", "cc", flags, src, "-o", out, "two words"]],
                    });
                }
                "#,
                &[],
            )
            .unwrap();
        assert_eq!(
            shell_texts(&eval.tasks["build"]),
            vec!["CC=gcc cc -O2 -DNAME=\"a b\" src/main.c -o out/app 'two words'".to_string()]
        );
    }

    #[test]
    fn test_environment_overrides_are_frozen_into_tasks() {
        let project = Project::new();
        let eval = project
            .eval(
                r#"
                setenv("EARLY", "1");
                fn configure() {
                    setenv("GREETING", "hello");
                    setenv("EARLY", ());
                    if getenv("GREETING") != "hello" { error("getenv did not see the override"); }
                    task("a", #{ env: #{ GREETING: "task wins", LEVEL: 3 } });
                    task("b", #{});
                }
                "#,
                &[],
            )
            .unwrap();
        assert_eq!(eval.tasks["a"].env["GREETING"], "task wins");
        assert_eq!(eval.tasks["a"].env["LEVEL"], "3");
        assert_eq!(eval.tasks["b"].env["GREETING"], "hello");
        assert!(!eval.tasks["b"].env.contains_key("EARLY"));
    }

    #[test]
    fn test_modules_resolve_relative_to_themselves() {
        let project = Project::new();
        project.write(
            "lib/common.rhai",
            r#"
            fn lib_dir() { resolve_path(".") }
            fn declare() { task("from_lib", #{}); }
            "#,
        );
        let eval = project
            .eval(
                r#"
                import "//lib/common" as common;
                fn configure() {
                    common::declare();
                    task("check", #{ base: common::lib_dir() });
                }
                "#,
                &[],
            )
            .unwrap();
        assert_eq!(eval.tasks["from_lib"].base_dir, project.root().join("lib"));
        assert_eq!(eval.tasks["check"].base_dir, project.root().join("lib"));
        assert!(eval.script_files.contains(&project.root().join("lib").join("common.rhai")));
    }

    #[test]
    fn test_circular_import_fails() {
        let project = Project::new();
        project.write("a.rhai", r#"import "b" as b;"#);
        project.write("b.rhai", r#"import "a" as a;"#);
        let err = project
            .eval(r#"import "a" as a; fn configure() {}"#, &[])
            .unwrap_err();
        assert!(matches!(err, ScriptError::Eval(message) if message.contains("circular import")));
    }

    #[test]
    fn test_yaml_and_file_builtins() {
        let project = Project::new();
        project.write("data.yaml", "version:\n  major: 2\nitems:\n  - first\n  - second\n");
        let eval = project
            .eval(
                r#"
                fn configure() {
                    let major = read_yaml("data.yaml", "version.major");
                    let item = read_yaml("data.yaml", "items.1");
                    let missing = read_yaml("data.yaml", "nope", "fallback");
                    write_file("out.txt", `${major}-${item}-${missing}`);
                    if !isfile("out.txt") || isdir("out.txt") || !isdir(".") { error("stat failed"); }
                    task("t", #{ desc: read_yaml("out.txt", "") });
                }
                "#,
                &[],
            )
            .unwrap();
        assert_eq!(fs::read_to_string(project.root().join("out.txt")).unwrap(), "2-second-fallback");
        assert_eq!(eval.tasks["t"].description, "2-second-fallback");
        assert!(eval.script_files.contains(&project.root().join("data.yaml")));
    }

    #[test]
    fn test_execute_builtin() {
        let project = Project::new();
        let eval = project
            .eval(
                r#"
                fn configure() {
                    let text = execute("echo hello; echo");
                    let failed = execute("false");
                    let json = execute(["echo", "{\"n\": 4}"], "json");
                    task("t", #{ desc: `${text}|${failed}|${json.n}` });
                }
                "#,
                &[],
            )
            .unwrap();
        assert_eq!(eval.tasks["t"].description, "hello|false|4");
    }

    #[test]
    fn test_condition_and_logging_builtins() {
        let project = Project::new();
        let eval = project
            .eval(
                r#"
                fn configure() {
                    info("declaring");
                    print("printed");
                    if check_condition("a && (b || !c)", #{ a: true, b: false, c: false }) {
                        task("yes", #{});
                    }
                    if hastask("yes") { task("after", #{}); }
                    task("os", #{ desc: OS + "/" + ARCH });
                }
                "#,
                &[],
            )
            .unwrap();
        assert!(eval.tasks.contains_key("yes"));
        assert!(eval.tasks.contains_key("after"));
        assert_eq!(
            eval.tasks["os"].description,
            format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH)
        );

        let err = project
            .eval(r#"fn configure() { error("stop here"); }"#, &[])
            .unwrap_err();
        assert!(matches!(err, ScriptError::Eval(message) if message.contains("stop here")));
    }

    #[test]
    fn test_evaluate_options_skips_configure() {
        let project = Project::new();
        let path = project.write(
            "build.rhai",
            r#"option("jobs", 4, "Parallel jobs"); fn configure() { error("must not run"); }"#,
        );
        let eval = evaluate_options(&project.root(), &path, &OptionValues::new()).unwrap();
        assert!(eval.tasks.is_empty());
        assert_eq!(eval.options["jobs"].default, "4");
        assert_eq!(eval.option_values["jobs"], "4");
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_path_and_prepend_path() {
        let project = Project::new();
        let eval = project
            .eval(
                r#"
                fn configure() {
                    let rel = resolve_path("//a/b/c").relative_to("//a");
                    prepend_path("//tools");
                    task("t", #{ desc: to_slashes(rel) + "|" + relative_path("//x", "//a/b").to_string() });
                }
                "#,
                &[],
            )
            .unwrap();
        let task = &eval.tasks["t"];
        assert_eq!(task.description, "b/c|../../x");
        let expected = project.root().join("tools").display().to_string();
        assert!(task.env["PATH"].starts_with(&expected));
    }
}
