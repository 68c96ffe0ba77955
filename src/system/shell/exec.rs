// src/system/shell/exec.rs

//! Process execution for the embedded shell.
//!
//! The interpreter never spawns processes itself: it hands the expanded argument
//! list to an [`ExecHandler`] and opens redirection targets through an
//! [`OpenHandler`]. [`DefaultExec`] spawns real child processes with a
//! cancellation-aware wait loop; callers wrap it to intercept commands.
//!
//! Inside a pipeline, an external stage writing to a [`Sink::Pipe`] is started
//! and left running with its stdout handed to the next stage as an
//! [`Input::Stream`]. The interpreter reaps such stages once the last one ends.

use super::ShellError;
use crate::{
    CancellationToken,
    system::{environ, tools},
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command as StdCommand, ExitStatus, Stdio};
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

/// Where a command's output goes.
#[derive(Debug, Clone)]
pub enum Sink {
    Stdout,
    Stderr,
    Null,
    Buffer(Rc<RefCell<Vec<u8>>>),
    File(Rc<File>),
    /// Write end of a pipeline stage.
    Pipe(Rc<RefCell<PipeSlot>>),
}

/// What a pipeline stage produced: bytes written by builtins and tools, or the
/// stdout of a process that is still running.
#[derive(Debug, Default)]
pub struct PipeSlot {
    bytes: Vec<u8>,
    stream: Option<ChildStdout>,
}

impl PipeSlot {
    /// Turns the stage output into the next stage's input.
    pub fn into_input(self) -> Input {
        match self.stream {
            Some(stream) => {
                if !self.bytes.is_empty() {
                    log::debug!("Dropping {} bytes written next to a streaming stage", self.bytes.len());
                }
                Input::Stream(Rc::new(RefCell::new(Some(stream))))
            }
            None => Input::Bytes(Rc::new(self.bytes)),
        }
    }
}

impl Sink {
    /// A fresh in-memory buffer and a sink writing into it.
    pub fn buffer() -> (Self, Rc<RefCell<Vec<u8>>>) {
        let buffer = Rc::new(RefCell::new(Vec::new()));
        (Self::Buffer(Rc::clone(&buffer)), buffer)
    }

    /// A pipeline stage sink and the slot it fills.
    pub fn pipe() -> (Self, Rc<RefCell<PipeSlot>>) {
        let slot = Rc::new(RefCell::new(PipeSlot::default()));
        (Self::Pipe(Rc::clone(&slot)), slot)
    }

    pub fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Self::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(bytes)?;
                out.flush()
            }
            Self::Stderr => io::stderr().lock().write_all(bytes),
            Self::Null => Ok(()),
            Self::Buffer(buffer) => {
                buffer.borrow_mut().extend_from_slice(bytes);
                Ok(())
            }
            Self::File(file) => {
                let mut handle: &File = file;
                handle.write_all(bytes)
            }
            Self::Pipe(slot) => {
                slot.borrow_mut().bytes.extend_from_slice(bytes);
                Ok(())
            }
        }
    }

    /// Best-effort diagnostic line (the shell's own error messages).
    pub fn report(&self, message: &str) {
        if let Err(e) = self.write_all(format!("{}\n", message).as_bytes()) {
            log::debug!("Failed to write shell diagnostic: {}", e);
        }
    }

    fn to_stdio(&self, background: bool) -> io::Result<(Stdio, bool)> {
        Ok(match self {
            Self::Stdout => (Stdio::from(io::stdout()), false),
            Self::Stderr => (Stdio::from(io::stderr()), false),
            Self::Null => (Stdio::null(), false),
            Self::Buffer(_) | Self::Pipe(_) if background => (Stdio::null(), false),
            Self::Buffer(_) | Self::Pipe(_) => (Stdio::piped(), true),
            Self::File(file) => (Stdio::from(file.try_clone()?), false),
        })
    }
}

/// Where a command's input comes from.
#[derive(Debug, Clone)]
pub enum Input {
    Inherit,
    Null,
    Bytes(Rc<Vec<u8>>),
    File(Rc<File>),
    /// Stdout of the previous pipeline stage. The first command to read it takes it.
    Stream(Rc<RefCell<Option<ChildStdout>>>),
}

impl Input {
    /// Reads the whole input (used by builtins that consume stdin).
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        match self {
            Self::Inherit => {
                io::stdin().lock().read_to_end(&mut data)?;
            }
            Self::Null => {}
            Self::Bytes(bytes) => data.extend_from_slice(bytes),
            Self::File(file) => {
                let mut handle: &File = file;
                handle.read_to_end(&mut data)?;
            }
            Self::Stream(stream) => {
                if let Some(mut pipe) = stream.borrow_mut().take() {
                    pipe.read_to_end(&mut data)?;
                }
            }
        }
        Ok(data)
    }

    fn to_stdio(&self) -> io::Result<(Stdio, Option<Vec<u8>>)> {
        Ok(match self {
            Self::Inherit => (Stdio::inherit(), None),
            Self::Null => (Stdio::null(), None),
            Self::Bytes(bytes) => (Stdio::piped(), Some(bytes.to_vec())),
            Self::File(file) => (Stdio::from(file.try_clone()?), None),
            Self::Stream(stream) => match stream.borrow_mut().take() {
                Some(pipe) => (Stdio::from(pipe), None),
                None => (Stdio::null(), None),
            },
        })
    }
}

/// Everything a handler needs to run one command.
pub struct HandlerContext<'a> {
    pub dir: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    pub stdin: Input,
    pub stdout: Sink,
    pub stderr: Sink,
    pub background: bool,
    pub cancel: &'a CancellationToken,
    pub jobs: &'a mut Vec<Child>,
    /// Pipeline stages left running; reaped after the last stage.
    pub stages: &'a mut Vec<Child>,
}

impl fmt::Debug for HandlerContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("dir", &self.dir)
            .field("background", &self.background)
            .finish_non_exhaustive()
    }
}

/// Runs a non-builtin command and returns its exit status.
pub trait ExecHandler: fmt::Debug {
    fn exec(&self, hc: &mut HandlerContext<'_>, args: &[String]) -> Result<i32, ShellError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

/// Opens redirection targets. `path` is the target as written; relative
/// targets resolve against `dir`.
pub trait OpenHandler: fmt::Debug {
    fn open(&self, dir: &Path, path: &str, mode: OpenMode) -> io::Result<File>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultOpen;

impl OpenHandler for DefaultOpen {
    fn open(&self, dir: &Path, path: &str, mode: OpenMode) -> io::Result<File> {
        let path = dir.join(path);
        match mode {
            OpenMode::Read => File::open(path),
            OpenMode::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path),
            OpenMode::Append => OpenOptions::new().append(true).create(true).open(path),
        }
    }
}

/// Spawns external programs found on the runner's `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExec;

impl ExecHandler for DefaultExec {
    fn exec(&self, hc: &mut HandlerContext<'_>, args: &[String]) -> Result<i32, ShellError> {
        let Some((program, rest)) = args.split_first() else {
            return Ok(0);
        };

        let executable = match lookup_executable(program, hc.dir, hc.env) {
            Ok(executable) => executable,
            Err(e) => {
                log::debug!("Lookup of '{}' failed: {}", program, e);
                hc.stderr.report(&format!("{}: command not found", program));
                return Ok(127);
            }
        };

        let io_error = |source: io::Error| ShellError::Io {
            context: format!("Command '{}' could not be executed", program),
            source,
        };

        let (stdin, stdin_data) = hc.stdin.to_stdio().map_err(io_error)?;
        let (stdout, capture_out) = hc.stdout.to_stdio(hc.background).map_err(io_error)?;
        let (stderr, capture_err) = hc.stderr.to_stdio(hc.background).map_err(io_error)?;

        let mut command = StdCommand::new(&executable);
        command
            .args(rest)
            .current_dir(dunce::simplified(hc.dir))
            .env_clear()
            .envs(hc.env.iter())
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                hc.stderr.report(&format!("{}: {}", program, e));
                return Ok(126);
            }
        };

        // Feed stdin from a thread so a child writing lots of output cannot deadlock us.
        let writer = stdin_data.and_then(|data| {
            child.stdin.take().map(|mut pipe| {
                thread::spawn(move || {
                    let _ = pipe.write_all(&data);
                })
            })
        });

        if hc.background {
            log::debug!("Started background job '{}' (PID: {})", program, child.id());
            hc.jobs.push(child);
            return Ok(0);
        }

        // A pipeline stage keeps running while the next stage reads from it.
        if let (Sink::Pipe(slot), false) = (&hc.stdout, capture_err) {
            if let Some(stream) = child.stdout.take() {
                log::debug!("Started pipeline stage '{}' (PID: {})", program, child.id());
                slot.borrow_mut().stream = Some(stream);
                hc.stages.push(child);
                return Ok(0);
            }
        }

        let out_reader = if capture_out {
            child.stdout.take().map(spawn_reader)
        } else {
            None
        };
        let err_reader = if capture_err {
            child.stderr.take().map(spawn_reader)
        } else {
            None
        };

        let status = wait_with_cancellation(&mut child, program, hc.cancel)?;

        if let Some(handle) = writer {
            let _ = handle.join();
        }
        if let Some(handle) = out_reader {
            let bytes = handle.join().unwrap_or_default();
            hc.stdout.write_all(&bytes).map_err(io_error)?;
        }
        if let Some(handle) = err_reader {
            let bytes = handle.join().unwrap_or_default();
            hc.stderr.write_all(&bytes).map_err(io_error)?;
        }

        Ok(exit_code(status))
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        buffer
    })
}

/// Non-blocking wait loop so the cancellation token is honoured while a child runs.
fn wait_with_cancellation(
    child: &mut Child,
    program: &str,
    cancel: &CancellationToken,
) -> Result<ExitStatus, ShellError> {
    let mut delay = Duration::from_millis(1);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if cancel.load(Ordering::SeqCst) {
                    log::debug!(
                        "Cancellation requested, killing child process (PID: {})...",
                        child.id()
                    );
                    if let Err(e) = child.kill() {
                        log::warn!("Failed to kill child process {}: {}", child.id(), e);
                    }
                    child.wait().ok();
                    return Err(ShellError::Cancelled);
                }
                thread::sleep(delay);
                delay = (delay * 2).min(Duration::from_millis(50));
            }
            Err(source) => {
                return Err(ShellError::Io {
                    context: format!("Failed to wait for '{}'", program),
                    source,
                });
            }
        }
    }
}

/// Waits for pipeline stages that were left running. Once one wait fails, the
/// remaining stages are killed.
pub fn reap_stages(stages: &mut Vec<Child>, cancel: &CancellationToken) -> Result<(), ShellError> {
    let mut result = Ok(());
    for mut child in stages.drain(..) {
        if result.is_err() {
            kill_child(&mut child);
            continue;
        }
        match wait_with_cancellation(&mut child, "pipeline stage", cancel) {
            Ok(status) => log::debug!("Pipeline stage exited with {}", exit_code(status)),
            Err(e) => result = Err(e),
        }
    }
    result
}

/// Kills and reaps every stage, for pipelines that failed part way.
pub fn kill_stages(stages: &mut Vec<Child>) {
    for mut child in stages.drain(..) {
        kill_child(&mut child);
    }
}

fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("Failed to kill process {}: {}", child.id(), e);
    }
    child.wait().ok();
}

/// Waits for every background job. Returns the status of the last one that failed.
pub fn wait_jobs(jobs: &mut Vec<Child>, cancel: &CancellationToken) -> Result<i32, ShellError> {
    let mut status = 0;
    for mut child in jobs.drain(..) {
        let code = exit_code(wait_with_cancellation(&mut child, "background job", cancel)?);
        if code != 0 {
            status = code;
        }
    }
    Ok(status)
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Runs one of the in-process file tools. `args` excludes the `tool` sentinel.
pub fn run_tool(args: &[String], dir: &Path, stdout: &Sink, stderr: &Sink) -> i32 {
    match tools::parse(args) {
        Ok(command) => match tools::run(&command, dir) {
            Ok(()) => 0,
            Err(e) => {
                stderr.report(&format!("{}: {}", command.name(), e));
                1
            }
        },
        Err(tools::ToolError::Help(text)) => {
            stdout.report(text.trim_end());
            0
        }
        Err(e) => {
            stderr.report(&e.to_string());
            2
        }
    }
}

/// Resolves `program` the way a POSIX shell does: names with a separator are
/// taken relative to `dir`, bare names are searched on the `PATH` of `env`.
pub fn lookup_executable(
    program: &str,
    dir: &Path,
    env: &BTreeMap<String, String>,
) -> Result<PathBuf, which::Error> {
    which::which_in(program, environ::lookup(env, "PATH"), dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let env = BTreeMap::from([("PATH".to_string(), dir.path().display().to_string())]);
        assert!(lookup_executable("definitely-not-a-program", dir.path(), &env).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_lookup_honours_runner_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        let script = bin.join("hello");
        std::fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let env = BTreeMap::from([("PATH".to_string(), bin.display().to_string())]);
        assert!(lookup_executable("hello", dir.path(), &env).unwrap().ends_with("bin/hello"));
        assert!(lookup_executable("./bin/hello", dir.path(), &env).is_ok());

        // Not executable, so not a match.
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(lookup_executable("hello", dir.path(), &env).is_err());
    }

    #[test]
    fn test_pipe_slot_prefers_bytes_without_stream() {
        let (sink, slot) = Sink::pipe();
        sink.write_all(b"abc").unwrap();
        let slot = std::mem::take(&mut *slot.borrow_mut());
        match slot.into_input() {
            Input::Bytes(bytes) => assert_eq!(bytes.as_slice(), b"abc"),
            other => panic!("unexpected input {:?}", other),
        }
    }
}
