// src/system/shell/syntax.rs

//! Syntax tree of the embedded shell language.

/// A single top-level statement: an and-or list, optionally run in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub list: AndOr,
    pub background: bool,
}

/// Pipelines joined by `&&` and `||`, evaluated left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndOr {
    pub first: Pipeline,
    pub rest: Vec<(LogicOp, Pipeline)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub negated: bool,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Call(CallExpr),
    /// `( ... )`: runs in a copy of the shell state.
    Subshell { body: Vec<Stmt>, redirs: Vec<Redirect> },
    /// `{ ...; }`: runs in the current shell state.
    Group { body: Vec<Stmt>, redirs: Vec<Redirect> },
}

/// A simple command: leading assignments, arguments and redirections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallExpr {
    pub assigns: Vec<Assign>,
    pub args: Vec<Word>,
    pub redirs: Vec<Redirect>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assign {
    pub name: String,
    pub value: Word,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Explicit file descriptor (`2>`), if any.
    pub fd: Option<u32>,
    pub op: RedirOp,
    pub target: Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirOp {
    /// `<`
    Read,
    /// `>`
    Write,
    /// `>>`
    Append,
    /// `>&`
    DupOut,
    /// `&>`
    WriteAll,
}

impl RedirOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "<",
            Self::Write => ">",
            Self::Append => ">>",
            Self::DupOut => ">&",
            Self::WriteAll => "&>",
        }
    }

    /// The descriptor a redirection applies to when none is written.
    pub fn default_fd(self) -> u32 {
        match self {
            Self::Read => 0,
            _ => 1,
        }
    }
}

/// A shell word, made of adjacent parts (`a"b"$c` is one word of three parts).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordPart {
    /// Unquoted text as written, backslash escapes included.
    Lit(String),
    /// Contents of `'...'`.
    SglQuoted(String),
    /// Contents of `"..."`. Inner literals keep their backslash escapes.
    DblQuoted(Vec<WordPart>),
    /// `$NAME` or `${NAME}`.
    Param { name: String, braced: bool },
    /// `$( ... )`.
    CmdSubst(Vec<Stmt>),
}

impl Word {
    /// A word holding one unquoted literal.
    pub fn lit(text: impl Into<String>) -> Self {
        Self {
            parts: vec![WordPart::Lit(text.into())],
        }
    }

    /// Returns the literal text when the word has no quoting or expansions.
    pub fn as_plain_literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [WordPart::Lit(text)] if !text.contains('\\') => Some(text),
            _ => None,
        }
    }
}

impl Pipeline {
    pub fn single(command: Command) -> Self {
        Self {
            negated: false,
            commands: vec![command],
        }
    }
}

impl Stmt {
    /// Wraps a call expression into a foreground statement.
    pub fn from_call(call: CallExpr) -> Self {
        Self {
            list: AndOr {
                first: Pipeline::single(Command::Call(call)),
                rest: Vec::new(),
            },
            background: false,
        }
    }

    /// Returns the call expression when the statement is exactly one simple command.
    pub fn as_call(&self) -> Option<&CallExpr> {
        if self.background || !self.list.rest.is_empty() || self.list.first.negated {
            return None;
        }
        match self.list.first.commands.as_slice() {
            [Command::Call(call)] => Some(call),
            _ => None,
        }
    }
}
