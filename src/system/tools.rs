// src/system/tools.rs

//! Portable replacements for the handful of file utilities build scripts rely
//! on. Commands are routed here by the task runner, so `cp`, `mv`, `rm`,
//! `mkdir`, `touch` and `sleep` behave the same on every host.

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::fs::{self, DirBuilder, File, FileTimes, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ToolError {
    /// Help or version text requested with `--help` / `--version`.
    #[error("{0}")]
    Help(String),
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

fn io_error(context: String) -> impl FnOnce(io::Error) -> ToolError {
    move |source| ToolError::Io { context, source }
}

#[derive(Parser, Debug)]
#[command(name = "tool", no_binary_name = true, disable_help_subcommand = true)]
struct ToolCli {
    #[command(subcommand)]
    command: ToolCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ToolCommand {
    /// Copy files, or directories with -r.
    Cp {
        #[arg(short = 'r', short_alias = 'R')]
        recursive: bool,
        /// Replace destination files that cannot be opened.
        #[arg(short = 'f')]
        force: bool,
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
    },
    /// Move or rename files and directories.
    Mv {
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
    },
    /// Remove files, or directories with -r.
    Rm {
        #[arg(short = 'r', short_alias = 'R')]
        recursive: bool,
        /// Ignore missing paths.
        #[arg(short = 'f')]
        force: bool,
        paths: Vec<String>,
    },
    /// Create directories.
    Mkdir {
        /// Create parents as needed; existing directories are not an error.
        #[arg(short = 'p')]
        parents: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Create files or update their timestamps.
    Touch {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Wait for a number of seconds (fractions allowed).
    Sleep { seconds: f64 },
}

impl ToolCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cp { .. } => "cp",
            Self::Mv { .. } => "mv",
            Self::Rm { .. } => "rm",
            Self::Mkdir { .. } => "mkdir",
            Self::Touch { .. } => "touch",
            Self::Sleep { .. } => "sleep",
        }
    }
}

/// Parses `args` (without the leading `tool`).
pub fn parse(args: &[String]) -> Result<ToolCommand, ToolError> {
    match ToolCli::try_parse_from(args) {
        Ok(cli) => Ok(cli.command),
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => Err(ToolError::Help(e.to_string())),
            _ => Err(ToolError::Usage(e.to_string().trim_end().to_string())),
        },
    }
}

/// Runs a parsed tool command with relative paths taken from `dir`.
pub fn run(command: &ToolCommand, dir: &Path) -> Result<(), ToolError> {
    match command {
        ToolCommand::Cp {
            recursive,
            force,
            paths,
        } => {
            let paths = expand_paths(paths, dir);
            let (dest, sources) = split_destination(&paths)?;
            for source in sources {
                let target = target_for(source, dest)?;
                if source.is_dir() {
                    if !recursive {
                        return Err(ToolError::Invalid(format!(
                            "-r not specified; omitting directory '{}'",
                            source.display()
                        )));
                    }
                    copy_tree(source, &target, *force)?;
                } else {
                    copy_file(source, &target, *force)?;
                }
            }
            Ok(())
        }
        ToolCommand::Mv { paths } => {
            let paths = expand_paths(paths, dir);
            let (dest, sources) = split_destination(&paths)?;
            for source in sources {
                let target = target_for(source, dest)?;
                move_path(source, &target)?;
            }
            Ok(())
        }
        ToolCommand::Rm {
            recursive,
            force,
            paths,
        } => {
            for path in expand_paths(paths, dir) {
                remove_path(&path, *recursive, *force)?;
            }
            Ok(())
        }
        ToolCommand::Mkdir { parents, paths } => {
            for path in expand_paths(paths, dir) {
                make_dir(&path, *parents)?;
            }
            Ok(())
        }
        ToolCommand::Touch { paths } => {
            let now = SystemTime::now();
            for path in expand_paths(paths, dir) {
                touch(&path, now)?;
            }
            Ok(())
        }
        ToolCommand::Sleep { seconds } => {
            let interval = Duration::try_from_secs_f64(*seconds)
                .map_err(|_| ToolError::Invalid(format!("invalid time interval '{}'", seconds)))?;
            thread::sleep(interval);
            Ok(())
        }
    }
}

/// Sets both access and modification time of `path`. Works on directories.
pub fn stamp(path: &Path, time: SystemTime) -> io::Result<()> {
    let file = match open_for_stamp(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e),
        Err(_) => File::open(path)?,
    };
    file.set_times(FileTimes::new().set_accessed(time).set_modified(time))
}

fn open_for_stamp(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        // FILE_FLAG_BACKUP_SEMANTICS, required to open directory handles.
        options.custom_flags(0x0200_0000);
    }
    options.open(path)
}

/// Arguments resolve against `dir`. Windows shells do not glob, so patterns
/// are expanded here on that host only.
fn expand_paths(args: &[String], dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        let path = dir.join(arg);
        if cfg!(windows) && arg.contains(['*', '?', '[']) {
            if let Ok(entries) = glob::glob(&path.to_string_lossy()) {
                let matches: Vec<PathBuf> = entries.flatten().collect();
                if !matches.is_empty() {
                    out.extend(matches);
                    continue;
                }
            }
        }
        out.push(path);
    }
    out
}

fn split_destination(paths: &[PathBuf]) -> Result<(&PathBuf, &[PathBuf]), ToolError> {
    match paths.split_last() {
        Some((dest, sources)) if !sources.is_empty() => {
            if sources.len() > 1 && !dest.is_dir() {
                return Err(ToolError::Invalid(format!(
                    "target '{}' is not a directory",
                    dest.display()
                )));
            }
            Ok((dest, sources))
        }
        _ => Err(ToolError::Usage("missing destination operand".to_string())),
    }
}

fn target_for(source: &Path, dest: &Path) -> Result<PathBuf, ToolError> {
    if !dest.is_dir() {
        return Ok(dest.to_path_buf());
    }
    match source.file_name() {
        Some(name) => Ok(dest.join(name)),
        None => Err(ToolError::Invalid(format!(
            "cannot use '{}' as a source",
            source.display()
        ))),
    }
}

fn copy_file(source: &Path, target: &Path, force: bool) -> Result<(), ToolError> {
    let context = || format!("cannot copy '{}' to '{}'", source.display(), target.display());
    match fs::copy(source, target) {
        Ok(_) => {}
        Err(_) if force && target.exists() => {
            fs::remove_file(target).map_err(io_error(context()))?;
            fs::copy(source, target).map_err(io_error(context()))?;
        }
        Err(e) => return Err(io_error(context())(e)),
    }
    stamp(target, SystemTime::now()).map_err(io_error(context()))
}

fn copy_tree(source: &Path, target: &Path, force: bool) -> Result<(), ToolError> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| {
            let context = format!("cannot read '{}'", source.display());
            io_error(context)(io::Error::other(e))
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)
                .map_err(io_error(format!("cannot create directory '{}'", destination.display())))?;
        } else {
            copy_file(entry.path(), &destination, force)?;
        }
    }
    Ok(())
}

fn move_path(source: &Path, target: &Path) -> Result<(), ToolError> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    // Cross-device moves fall back to copy and delete.
    log::debug!("Rename of '{}' failed, copying instead", source.display());
    let context = || format!("cannot move '{}' to '{}'", source.display(), target.display());
    if source.is_dir() {
        copy_tree(source, target, true)?;
        fs::remove_dir_all(source).map_err(io_error(context()))
    } else {
        copy_file(source, target, true)?;
        fs::remove_file(source).map_err(io_error(context()))
    }
}

fn remove_path(path: &Path, recursive: bool, force: bool) -> Result<(), ToolError> {
    let context = || format!("cannot remove '{}'", path.display());
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if force && e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_error(context())(e)),
    };
    if metadata.is_dir() {
        if !recursive {
            return Err(ToolError::Invalid(format!("{}: Is a directory", context())));
        }
        fs::remove_dir_all(path).map_err(io_error(context()))
    } else {
        fs::remove_file(path).map_err(io_error(context()))
    }
}

fn make_dir(path: &Path, parents: bool) -> Result<(), ToolError> {
    let mut builder = DirBuilder::new();
    builder.recursive(parents);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o770);
    }
    builder
        .create(path)
        .map_err(io_error(format!("cannot create directory '{}'", path.display())))
}

fn touch(path: &Path, now: SystemTime) -> Result<(), ToolError> {
    let context = || format!("cannot touch '{}'", path.display());
    if !path.exists() {
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o660);
        }
        options.open(path).map_err(io_error(context()))?;
    }
    stamp(path, now).map_err(io_error(context()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    fn run_args(list: &[&str], dir: &Path) -> Result<(), ToolError> {
        run(&parse(&args(list))?, dir)
    }

    #[test]
    fn test_parse_accepts_flags() {
        let command = parse(&args(&["cp", "-R", "-f", "a", "b"])).unwrap();
        assert_eq!(
            command,
            ToolCommand::Cp {
                recursive: true,
                force: true,
                paths: args(&["a", "b"]),
            }
        );
        assert!(matches!(parse(&args(&["cp", "a"])), Err(ToolError::Usage(_))));
        assert!(matches!(parse(&args(&["--help"])), Err(ToolError::Help(_))));
        assert!(matches!(parse(&args(&["chmod", "x"])), Err(ToolError::Usage(_))));
    }

    #[test]
    fn test_cp_file_and_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "A").unwrap();
        fs::write(dir.path().join("b.txt"), "B").unwrap();
        fs::create_dir(dir.path().join("out")).unwrap();

        run_args(&["cp", "a.txt", "c.txt"], dir.path()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("c.txt")).unwrap(), "A");

        run_args(&["cp", "a.txt", "b.txt", "out"], dir.path()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("out/b.txt")).unwrap(), "B");

        let err = run_args(&["cp", "a.txt", "b.txt", "c.txt"], dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_cp_directory_requires_recursive() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/nested/f"), "x").unwrap();

        assert!(run_args(&["cp", "src", "dst"], dir.path()).is_err());
        run_args(&["cp", "-r", "src", "dst"], dir.path()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("dst/nested/f")).unwrap(), "x");
    }

    #[test]
    fn test_mv_renames() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old"), "data").unwrap();
        run_args(&["mv", "old", "new"], dir.path()).unwrap();
        assert!(!dir.path().join("old").exists());
        assert_eq!(fs::read_to_string(dir.path().join("new")).unwrap(), "data");
    }

    #[test]
    fn test_rm_rules() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("d")).unwrap();
        fs::write(dir.path().join("d/f"), "").unwrap();

        let err = run_args(&["rm", "d"], dir.path()).unwrap_err();
        assert!(err.to_string().contains("Is a directory"));
        assert!(run_args(&["rm", "missing"], dir.path()).is_err());
        run_args(&["rm", "-f", "missing"], dir.path()).unwrap();
        run_args(&["rm", "-r", "d"], dir.path()).unwrap();
        assert!(!dir.path().join("d").exists());
    }

    #[test]
    fn test_mkdir_parents() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_args(&["mkdir", "a/b/c"], dir.path()).is_err());
        run_args(&["mkdir", "-p", "a/b/c"], dir.path()).unwrap();
        run_args(&["mkdir", "-p", "a/b/c"], dir.path()).unwrap();
        assert!(dir.path().join("a/b/c").is_dir());
        assert!(run_args(&["mkdir", "a"], dir.path()).is_err());
    }

    #[test]
    fn test_touch_creates_and_stamps() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stamp");
        run_args(&["touch", "stamp"], dir.path()).unwrap();
        assert!(file.is_file());

        let past = SystemTime::now() - Duration::from_secs(3600);
        stamp(&file, past).unwrap();
        assert_eq!(fs::metadata(&file).unwrap().modified().unwrap(), past);

        run_args(&["touch", "stamp"], dir.path()).unwrap();
        assert!(fs::metadata(&file).unwrap().modified().unwrap() > past);
    }

    #[test]
    fn test_stamp_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = stamp(&dir.path().join("nope"), SystemTime::now()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_sleep_rejects_invalid_intervals() {
        let dir = tempfile::tempdir().unwrap();
        run_args(&["sleep", "0"], dir.path()).unwrap();
        assert!(run_args(&["sleep", "--", "-1"], dir.path()).is_err());
        assert!(matches!(
            run_args(&["sleep", "1e300"], dir.path()),
            Err(ToolError::Invalid(_))
        ));
        assert!(matches!(run_args(&["sleep", "inf"], dir.path()), Err(ToolError::Invalid(_))));
    }
}
