//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// A scratch project directory.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Canonical project root.
    pub fn path(&self) -> PathBuf {
        dunce::canonicalize(self.dir.path()).unwrap()
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path().join(name)).unwrap_or_default()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path().join(name).exists()
    }

    /// Moves a file's modification time by `offset_secs` relative to now.
    pub fn set_age(&self, name: &str, offset_secs: i64) {
        set_mtime(&self.path().join(name), offset_secs);
    }

    /// A `buildsys` command running inside the project.
    pub fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::new(env!("CARGO_BIN_EXE_buildsys"));
        cmd.current_dir(self.path())
            .env("BUILDSYS_LOG", "info")
            .env_remove("BUILDSYS_DEBUG")
            .env("NO_COLOR", "1");
        cmd
    }
}

pub fn set_mtime(path: &Path, offset_secs: i64) {
    let now = SystemTime::now();
    let time = if offset_secs >= 0 {
        now + Duration::from_secs(offset_secs.unsigned_abs())
    } else {
        now - Duration::from_secs(offset_secs.unsigned_abs())
    };
    fs::OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

/// A build script exercising the common task shapes.
pub const SAMPLE_SCRIPT: &str = r#"
const MODE = option("mode", "debug", "Build flavour");

fn configure() {
    let gen = task("gen", #{
        desc: "Generate the header",
        inputs: ["//build.rhai"],
        outputs: ["gen/config.h"],
        cmds: ["mkdir -p gen", "echo " + global::MODE + " > gen/config.h"],
    });
    task("build", #{
        desc: "Build the app",
        deps: [gen],
        inputs: ["src/*.c", "gen/config.h"],
        outputs: ["out/app.txt"],
        cmds: [
            "mkdir -p out",
            ["cp", resolve_path("src", "main.c"), resolve_path("//out/app.txt")],
            "echo built >> build.log",
        ],
    });
    task("internal", #{ hidden: true, cmds: ["echo internal"] });
}
"#;
