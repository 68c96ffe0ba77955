//! Library-level workflow: evaluate a script, round-trip the cache, run tasks.

mod common;

use buildsys::core::{cache, script, task_runner};
use buildsys::core::cache::CacheContents;
use buildsys::models::{Command, OptionValues};
use common::{SAMPLE_SCRIPT, TestProject};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn configure(project: &TestProject, options: &[(&str, &str)]) -> CacheContents {
    let script_path = project.path().join("build.rhai");
    let supplied: OptionValues = options
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let evaluation = script::evaluate(&project.path(), &script_path, &supplied).unwrap();
    let contents = CacheContents {
        options: evaluation.option_values,
        tasks: evaluation.tasks,
        script_files: evaluation.script_files,
    };
    let cache_dir = project.path().join(".buildsys");
    cache::write(&cache_dir, &contents).unwrap();
    cache::read(&cache_dir).unwrap()
}

fn run(project: &TestProject, contents: &CacheContents, target: &str) {
    let mut ctx = task_runner::RuntimeContext::new(project.path(), Arc::new(AtomicBool::new(false)));
    task_runner::run(&mut ctx, target, &contents.tasks, false, false).unwrap();
}

#[test]
fn test_cache_preserves_the_evaluated_graph() {
    let project = TestProject::new();
    project.write(
        "build.rhai",
        &SAMPLE_SCRIPT.replace(
            "task(\"internal\"",
            "task(\"all\", #{ cmds: [gen] }); task(\"internal\"",
        ),
    );

    let contents = configure(&project, &[("mode", "release")]);
    assert_eq!(contents.options["mode"], "release");
    assert_eq!(contents.script_files, vec![project.path().join("build.rhai")]);
    assert_eq!(contents.tasks.len(), 4);
    assert!(contents.tasks["internal"].hidden);

    match contents.tasks["all"].commands.first() {
        Some(Command::TaskRef(target)) => assert!(Arc::ptr_eq(target, &contents.tasks["gen"])),
        other => panic!("expected a task reference, got {:?}", other),
    }
}

#[test]
fn test_configure_then_run_is_incremental() {
    let project = TestProject::new();
    project.write("build.rhai", SAMPLE_SCRIPT);
    project.write("src/main.c", "int main() { return 0; }\n");

    let contents = configure(&project, &[]);
    run(&project, &contents, "build");
    assert_eq!(project.read("gen/config.h"), "debug\n");
    assert_eq!(project.read("out/app.txt"), "int main() { return 0; }\n");
    assert_eq!(project.read("build.log"), "built\n");

    // Nothing changed: neither task runs again.
    run(&project, &contents, "build");
    assert_eq!(project.read("build.log"), "built\n");

    // A newer source forces a rebuild of `build` only.
    project.set_age("src/main.c", 5);
    run(&project, &contents, "build");
    assert_eq!(project.read("build.log"), "built\nbuilt\n");
}
