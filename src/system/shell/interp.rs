// src/system/shell/interp.rs

//! The statement interpreter.
//!
//! A [`Runner`] owns the state a POSIX shell keeps between statements: working
//! directory, exported environment, shell variables, `-e` mode and the status of
//! the last command. In a pipeline, external commands run concurrently and are
//! connected by OS pipes; the output of builtins, tools, groups and subshells is
//! collected and fed to the next stage once it completes.

use super::ShellError;
use super::exec::{self, DefaultExec, DefaultOpen, ExecHandler, HandlerContext, Input, OpenHandler, OpenMode, Sink};
use super::syntax::{AndOr, CallExpr, Command, LogicOp, Pipeline, RedirOp, Redirect, Stmt};
use crate::{CancellationToken, constants::TOOL_SENTINEL, core::paths, system::environ};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const BUILTINS: &[&str] = &[
    ":", "true", "false", "echo", "cd", "pwd", "exit", "export", "unset", "set", "wait", TOOL_SENTINEL,
];

#[derive(Debug)]
pub struct Runner {
    pub(super) dir: PathBuf,
    pub(super) env: BTreeMap<String, String>,
    pub(super) vars: BTreeMap<String, String>,
    errexit: bool,
    exited: bool,
    pub(super) status: i32,
    stdin: Input,
    pub(super) stdout: Sink,
    stderr: Sink,
    exec: Rc<dyn ExecHandler>,
    open: Rc<dyn OpenHandler>,
    cancel: CancellationToken,
    pub(super) jobs: Vec<Child>,
    stages: Vec<Child>,
}

#[derive(Debug)]
pub struct RunnerBuilder {
    dir: PathBuf,
    env: Option<BTreeMap<String, String>>,
    errexit: bool,
    stdin: Input,
    pub(super) stdout: Sink,
    stderr: Sink,
    exec: Option<Rc<dyn ExecHandler>>,
    open: Option<Rc<dyn OpenHandler>>,
    cancel: Option<CancellationToken>,
}

impl RunnerBuilder {
    /// Replaces the environment. Defaults to the process environment.
    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn errexit(mut self, enabled: bool) -> Self {
        self.errexit = enabled;
        self
    }

    pub fn stdin(mut self, input: Input) -> Self {
        self.stdin = input;
        self
    }

    pub fn stdout(mut self, sink: Sink) -> Self {
        self.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: Sink) -> Self {
        self.stderr = sink;
        self
    }

    pub fn exec_handler(mut self, handler: Rc<dyn ExecHandler>) -> Self {
        self.exec = Some(handler);
        self
    }

    pub fn open_handler(mut self, handler: Rc<dyn OpenHandler>) -> Self {
        self.open = Some(handler);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Runner {
        let dir = paths::clean(&self.dir);
        let mut env = self
            .env
            .unwrap_or_else(|| environ::compose_env(&BTreeMap::new()));
        env.insert("PWD".to_string(), dir.display().to_string());
        Runner {
            dir,
            env,
            vars: BTreeMap::new(),
            errexit: self.errexit,
            exited: false,
            status: 0,
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
            exec: self.exec.unwrap_or_else(|| Rc::new(DefaultExec)),
            open: self.open.unwrap_or_else(|| Rc::new(DefaultOpen)),
            cancel: self
                .cancel
                .unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
            jobs: Vec::new(),
            stages: Vec::new(),
        }
    }
}

struct SavedIo {
    stdin: Input,
    pub(super) stdout: Sink,
    stderr: Sink,
}

impl Runner {
    pub fn builder(dir: impl Into<PathBuf>) -> RunnerBuilder {
        RunnerBuilder {
            dir: dir.into(),
            env: None,
            errexit: false,
            stdin: Input::Inherit,
            stdout: Sink::Stdout,
            stderr: Sink::Stderr,
            exec: None,
            open: None,
            cancel: None,
        }
    }

    /// Runs one statement. Returns [`ShellError::ExitStatus`] when it leaves a
    /// nonzero status behind.
    pub fn run(&mut self, stmt: &Stmt) -> Result<(), ShellError> {
        self.run_stmt(stmt)?;
        match self.status {
            0 => Ok(()),
            code => Err(ShellError::ExitStatus(code)),
        }
    }

    /// Runs statements in order, stopping at the first failure.
    pub fn run_all(&mut self, stmts: &[Stmt]) -> Result<(), ShellError> {
        for stmt in stmts {
            if self.exited {
                break;
            }
            self.run(stmt)?;
        }
        Ok(())
    }

    /// True once `exit` ran.
    pub fn exited(&self) -> bool {
        self.exited
    }

    pub fn status(&self) -> i32 {
        self.status
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Value of a shell variable or exported variable.
    pub fn var(&self, name: &str) -> Option<&String> {
        self.vars
            .get(name)
            .or_else(|| environ::lookup(&self.env, name))
    }

    pub(super) fn subshell(&self) -> Self {
        Self {
            dir: self.dir.clone(),
            env: self.env.clone(),
            vars: self.vars.clone(),
            errexit: self.errexit,
            exited: false,
            status: self.status,
            stdin: self.stdin.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            exec: Rc::clone(&self.exec),
            open: Rc::clone(&self.open),
            cancel: Arc::clone(&self.cancel),
            jobs: Vec::new(),
            stages: Vec::new(),
        }
    }

    fn check_cancelled(&self) -> Result<(), ShellError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(ShellError::Cancelled);
        }
        Ok(())
    }

    pub(super) fn run_list(&mut self, stmts: &[Stmt]) -> Result<(), ShellError> {
        for stmt in stmts {
            if self.exited || (self.errexit && self.status != 0) {
                break;
            }
            self.run_stmt(stmt)?;
        }
        Ok(())
    }

    fn run_stmt(&mut self, stmt: &Stmt) -> Result<(), ShellError> {
        self.check_cancelled()?;
        if stmt.background {
            return self.run_background(&stmt.list);
        }
        self.run_and_or(&stmt.list)
    }

    fn run_and_or(&mut self, list: &AndOr) -> Result<(), ShellError> {
        self.run_pipeline(&list.first)?;
        for (op, pipeline) in &list.rest {
            if self.exited {
                break;
            }
            let proceed = match op {
                LogicOp::And => self.status == 0,
                LogicOp::Or => self.status != 0,
            };
            if proceed {
                self.run_pipeline(pipeline)?;
            }
        }
        Ok(())
    }

    fn run_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ShellError> {
        match pipeline.commands.as_slice() {
            [] => {}
            [single] => self.run_command(single)?,
            [init @ .., last] => {
                let mut stages = Vec::new();
                match self.run_stages(init, last, &mut stages) {
                    Ok(()) => exec::reap_stages(&mut stages, &self.cancel)?,
                    Err(e) => {
                        exec::kill_stages(&mut stages);
                        return Err(e);
                    }
                }
            }
        }
        if pipeline.negated {
            self.status = i32::from(self.status == 0);
        }
        Ok(())
    }

    /// Runs every stage of a pipeline. External stages that are still running
    /// are left in `stages`.
    fn run_stages(&mut self, init: &[Command], last: &Command, stages: &mut Vec<Child>) -> Result<(), ShellError> {
        let mut input = self.stdin.clone();
        for command in init {
            let mut stage = self.subshell();
            stage.stdin = input;
            input = if let Command::Call(_) = command {
                let (sink, slot) = Sink::pipe();
                stage.stdout = sink;
                let result = stage.run_command(command);
                self.jobs.append(&mut stage.jobs);
                stages.append(&mut stage.stages);
                result?;
                drop(stage);
                slot.take().into_input()
            } else {
                let (sink, buffer) = Sink::buffer();
                stage.stdout = sink;
                let result = stage.run_command(command);
                self.jobs.append(&mut stage.jobs);
                result?;
                Input::Bytes(Rc::new(buffer.take()))
            };
        }
        let mut stage = self.subshell();
        stage.stdin = input;
        let result = stage.run_command(last);
        self.jobs.append(&mut stage.jobs);
        stages.append(&mut stage.stages);
        self.status = stage.status;
        result
    }

    fn run_command(&mut self, command: &Command) -> Result<(), ShellError> {
        match command {
            Command::Call(call) => self.run_call(call),
            Command::Subshell { body, redirs } => {
                let mut sub = self.subshell();
                let saved = sub.save_io();
                if let Err(message) = sub.apply_redirects(redirs)? {
                    sub.restore_io(saved);
                    self.stderr.report(&message);
                    self.status = 1;
                    return Ok(());
                }
                let result = sub.run_list(body);
                self.jobs.append(&mut sub.jobs);
                self.status = sub.status;
                result
            }
            Command::Group { body, redirs } => {
                let saved = self.save_io();
                if let Err(message) = self.apply_redirects(redirs)? {
                    self.restore_io(saved);
                    self.stderr.report(&message);
                    self.status = 1;
                    return Ok(());
                }
                let result = self.run_list(body);
                self.restore_io(saved);
                result
            }
        }
    }

    fn run_call(&mut self, call: &CallExpr) -> Result<(), ShellError> {
        let mut assigns = Vec::with_capacity(call.assigns.len());
        for assign in &call.assigns {
            assigns.push((assign.name.clone(), self.expand_single(&assign.value)?));
        }
        let mut fields = Vec::new();
        for word in &call.args {
            fields.extend(self.expand_fields(word)?);
        }

        if fields.is_empty() {
            for (name, value) in assigns {
                self.set_var(name, value);
            }
            // Redirections without a command still create their targets.
            let saved = self.save_io();
            let outcome = self.apply_redirects(&call.redirs)?;
            self.restore_io(saved);
            self.status = match outcome {
                Ok(()) => 0,
                Err(message) => {
                    self.stderr.report(&message);
                    1
                }
            };
            return Ok(());
        }

        let saved = self.save_io();
        if let Err(message) = self.apply_redirects(&call.redirs)? {
            self.restore_io(saved);
            self.stderr.report(&message);
            self.status = 1;
            return Ok(());
        }
        let result = self.dispatch(&fields, assigns);
        self.restore_io(saved);
        self.status = result?;
        Ok(())
    }

    fn set_var(&mut self, name: String, value: String) {
        if self.env.contains_key(&name) {
            self.env.insert(name, value);
        } else {
            self.vars.insert(name, value);
        }
    }

    fn dispatch(&mut self, fields: &[String], assigns: Vec<(String, String)>) -> Result<i32, ShellError> {
        let Some((name, args)) = fields.split_first() else {
            return Ok(0);
        };
        match name.as_str() {
            ":" | "true" => Ok(0),
            "false" => Ok(1),
            "echo" => Ok(self.builtin_echo(args)),
            "cd" => Ok(self.builtin_cd(args)),
            "pwd" => {
                let line = format!("{}\n", self.dir.display());
                Ok(self.write_stdout(line.as_bytes()))
            }
            "exit" => Ok(self.builtin_exit(args)),
            "export" => {
                self.builtin_export(args);
                Ok(0)
            }
            "unset" => {
                for name in args {
                    self.vars.remove(name);
                    self.env.remove(name);
                }
                Ok(0)
            }
            "set" => Ok(self.builtin_set(args)),
            "wait" => exec::wait_jobs(&mut self.jobs, &self.cancel),
            TOOL_SENTINEL => Ok(exec::run_tool(args, &self.dir, &self.stdout, &self.stderr)),
            _ => self.run_external(fields, assigns, false),
        }
    }

    fn run_external(
        &mut self,
        fields: &[String],
        assigns: Vec<(String, String)>,
        background: bool,
    ) -> Result<i32, ShellError> {
        let mut env = self.env.clone();
        env.extend(assigns);
        let handler = Rc::clone(&self.exec);
        let mut hc = HandlerContext {
            dir: &self.dir,
            env: &env,
            stdin: self.stdin.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            background,
            cancel: &self.cancel,
            jobs: &mut self.jobs,
            stages: &mut self.stages,
        };
        handler.exec(&mut hc, fields)
    }

    /// A lone external command is started and left running; anything more complex
    /// runs to completion first. Either way the status is 0.
    fn run_background(&mut self, list: &AndOr) -> Result<(), ShellError> {
        if list.rest.is_empty() && !list.first.negated {
            if let [Command::Call(call)] = list.first.commands.as_slice() {
                let mut fields = Vec::new();
                for word in &call.args {
                    fields.extend(self.expand_fields(word)?);
                }
                let external = fields
                    .first()
                    .is_some_and(|name| !BUILTINS.contains(&name.as_str()));
                if external {
                    let mut assigns = Vec::with_capacity(call.assigns.len());
                    for assign in &call.assigns {
                        assigns.push((assign.name.clone(), self.expand_single(&assign.value)?));
                    }
                    let saved = self.save_io();
                    let outcome = self.apply_redirects(&call.redirs)?;
                    let result = match outcome {
                        Ok(()) => self.run_external(&fields, assigns, true).map(|_| ()),
                        Err(message) => {
                            self.stderr.report(&message);
                            Ok(())
                        }
                    };
                    self.restore_io(saved);
                    self.status = 0;
                    return result;
                }
            }
        }
        log::debug!("Running background statement in the foreground");
        self.run_and_or(list)?;
        self.status = 0;
        Ok(())
    }

    fn save_io(&self) -> SavedIo {
        SavedIo {
            stdin: self.stdin.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }

    fn restore_io(&mut self, saved: SavedIo) {
        self.stdin = saved.stdin;
        self.stdout = saved.stdout;
        self.stderr = saved.stderr;
    }

    /// Applies redirections in order. The inner `Err` carries the message to
    /// report when a target cannot be opened; the command is then skipped.
    fn apply_redirects(&mut self, redirs: &[Redirect]) -> Result<Result<(), String>, ShellError> {
        for redirect in redirs {
            let fd = redirect.fd.unwrap_or_else(|| redirect.op.default_fd());
            let target = self.expand_single(&redirect.target)?;
            match redirect.op {
                RedirOp::DupOut => {
                    let sink = match target.as_str() {
                        "1" => self.stdout.clone(),
                        "2" => self.stderr.clone(),
                        other => return Ok(Err(format!("{}: bad file descriptor", other))),
                    };
                    if let Err(message) = self.set_output(fd, sink) {
                        return Ok(Err(message));
                    }
                }
                RedirOp::Read => {
                    if fd != 0 {
                        return Ok(Err(format!("{}: unsupported input descriptor", fd)));
                    }
                    match self.open.open(&self.dir, &target, OpenMode::Read) {
                        Ok(file) => self.stdin = Input::File(Rc::new(file)),
                        Err(e) => return Ok(Err(format!("{}: {}", target, e))),
                    }
                }
                RedirOp::Write | RedirOp::Append | RedirOp::WriteAll => {
                    let mode = if redirect.op == RedirOp::Append {
                        OpenMode::Append
                    } else {
                        OpenMode::Write
                    };
                    let file = match self.open.open(&self.dir, &target, mode) {
                        Ok(file) => Rc::new(file),
                        Err(e) => return Ok(Err(format!("{}: {}", target, e))),
                    };
                    if redirect.op == RedirOp::WriteAll {
                        self.stdout = Sink::File(Rc::clone(&file));
                        self.stderr = Sink::File(file);
                    } else if let Err(message) = self.set_output(fd, Sink::File(file)) {
                        return Ok(Err(message));
                    }
                }
            }
        }
        Ok(Ok(()))
    }

    fn set_output(&mut self, fd: u32, sink: Sink) -> Result<(), String> {
        match fd {
            1 => self.stdout = sink,
            2 => self.stderr = sink,
            other => return Err(format!("{}: unsupported file descriptor", other)),
        }
        Ok(())
    }

    fn write_stdout(&self, bytes: &[u8]) -> i32 {
        match self.stdout.write_all(bytes) {
            Ok(()) => 0,
            Err(e) => {
                self.stderr.report(&format!("write error: {}", e));
                1
            }
        }
    }

    fn builtin_echo(&self, args: &[String]) -> i32 {
        let (newline, words) = match args.split_first() {
            Some((flag, rest)) if flag == "-n" => (false, rest),
            _ => (true, args),
        };
        let mut line = words.join(" ");
        if newline {
            line.push('\n');
        }
        self.write_stdout(line.as_bytes())
    }

    fn builtin_cd(&mut self, args: &[String]) -> i32 {
        let target = match args.first() {
            Some(target) => target.clone(),
            None => match environ::lookup(&self.env, "HOME") {
                Some(home) => home.clone(),
                None => {
                    self.stderr.report("cd: HOME not set");
                    return 1;
                }
            },
        };
        let new_dir = paths::clean(&self.dir.join(&target));
        if !new_dir.is_dir() {
            self.stderr
                .report(&format!("cd: {}: No such file or directory", target));
            return 1;
        }
        self.env
            .insert("PWD".to_string(), new_dir.display().to_string());
        self.dir = new_dir;
        0
    }

    fn builtin_exit(&mut self, args: &[String]) -> i32 {
        self.exited = true;
        match args.first() {
            None => self.status,
            Some(code) => code.parse::<i32>().unwrap_or_else(|_| {
                self.stderr
                    .report(&format!("exit: {}: numeric argument required", code));
                2
            }),
        }
    }

    fn builtin_export(&mut self, args: &[String]) {
        for arg in args {
            match arg.split_once('=') {
                Some((name, value)) => {
                    self.vars.remove(name);
                    self.env.insert(name.to_string(), value.to_string());
                }
                None => {
                    if let Some(value) = self.vars.remove(arg) {
                        self.env.insert(arg.clone(), value);
                    }
                }
            }
        }
    }

    fn builtin_set(&mut self, args: &[String]) -> i32 {
        for arg in args {
            match arg.as_str() {
                "-e" => self.errexit = true,
                "+e" => self.errexit = false,
                other => {
                    self.stderr
                        .report(&format!("set: {}: unsupported option", other));
                    return 2;
                }
            }
        }
        0
    }
}
