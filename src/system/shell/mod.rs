// src/system/shell/mod.rs

//! # Embedded Shell
//!
//! A small, in-process interpreter for the POSIX `sh` subset used by build
//! commands: lists, pipelines, subshells, groups, redirections, quoting,
//! parameter and command substitution, and pathname expansion. Running commands
//! in-process keeps behavior identical across hosts, including Windows where no
//! `sh` is available.

pub mod exec;
mod expand;
pub mod interp;
pub mod parser;
pub mod printer;
pub mod syntax;

pub use exec::{DefaultExec, DefaultOpen, ExecHandler, HandlerContext, Input, OpenHandler, OpenMode, Sink};
pub use interp::{Runner, RunnerBuilder};
pub use parser::{ParseError, parse, parse_word};
pub use printer::print_stmts;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// A statement finished with a nonzero status.
    #[error("exit status {0}")]
    ExitStatus(i32),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Operation was cancelled by the user.")]
    Cancelled,
}

impl ShellError {
    /// True for the interpreter's own nonzero-exit error.
    pub fn is_exit_status(&self) -> bool {
        matches!(self, Self::ExitStatus(_))
    }
}
