//! Command surface: listing, options, tools and exit codes.

mod common;

use common::{SAMPLE_SCRIPT, TestProject};
use predicates::prelude::*;

fn sample() -> TestProject {
    let project = TestProject::new();
    project.write("build.rhai", SAMPLE_SCRIPT);
    project.write("src/main.c", "int main;\n");
    project
}

#[test]
fn test_list_hides_hidden_tasks_unless_all() {
    let project = sample();
    project.cmd().arg("configure").assert().success();

    project
        .cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("build").and(predicate::str::contains("internal").not()));

    project
        .cmd()
        .args(["ls", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("internal"));
}

#[test]
fn test_options_shows_current_and_default() {
    let project = sample();
    project.cmd().args(["configure", "-o", "mode=release"]).assert().success();
    project
        .cmd()
        .arg("options")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("mode = ")
                .and(predicate::str::contains("Build flavour"))
                .and(predicate::str::contains("default: debug")),
        );
}

#[test]
fn test_configure_twice_reports_up_to_date() {
    let project = sample();
    project.cmd().arg("configure").assert().success().stdout(predicate::str::contains("Configured"));
    project
        .cmd()
        .arg("configure")
        .assert()
        .success()
        .stdout(predicate::str::contains("up to date"));
    project
        .cmd()
        .args(["configure", "--reconfigure"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configured"));
}

#[test]
fn test_script_errors_exit_with_three() {
    let project = TestProject::new();
    project.write("build.rhai", "fn configure() { task(\"a\", #{ bogus: 1 }); }");
    project
        .cmd()
        .arg("configure")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("unknown field 'bogus'"));
}

#[test]
fn test_usage_errors_exit_with_two() {
    let project = sample();
    project.cmd().args(["run", "build"]).assert().code(2);
    project.cmd().args(["configure", "-o", "novalue"]).assert().code(2);
    project.cmd().arg("frobnicate").assert().code(2);
    project.cmd().assert().code(2);

    project.cmd().arg("configure").assert().success();
    project
        .cmd()
        .args(["run", "nope"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_help_exits_cleanly() {
    let project = TestProject::new();
    project
        .cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("configure"));
    project.cmd().args(["run", "--help"]).assert().success();
}

#[test]
fn test_tool_commands_work_outside_scripts() {
    let project = TestProject::new();
    project.cmd().args(["tool", "mkdir", "-p", "a/b"]).assert().success();
    project.cmd().args(["tool", "touch", "a/b/f.txt"]).assert().success();
    project.cmd().args(["tool", "cp", "-r", "a", "copy"]).assert().success();
    assert!(project.exists("copy/b/f.txt"));

    project.cmd().args(["tool", "mv", "copy", "moved"]).assert().success();
    assert!(project.exists("moved/b/f.txt"));
    assert!(!project.exists("copy"));

    project
        .cmd()
        .args(["tool", "rm", "moved"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("rm"));
    project.cmd().args(["tool", "rm", "-r", "moved"]).assert().success();
    assert!(!project.exists("moved"));

    project.cmd().args(["tool", "rm", "-f", "missing"]).assert().success();
    project.cmd().args(["tool", "cp", "only-one"]).assert().code(2);
}
