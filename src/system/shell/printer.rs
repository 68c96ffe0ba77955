// src/system/shell/printer.rs

//! Renders syntax nodes back to compact, single-line shell source.

use super::syntax::{AndOr, Assign, CallExpr, Command, LogicOp, Pipeline, Redirect, Stmt, Word, WordPart};
use std::fmt::{self, Display, Formatter};

/// Prints a statement list on one line.
pub fn print_stmts(stmts: &[Stmt]) -> String {
    let mut out = String::new();
    for (i, stmt) in stmts.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&stmt.to_string());
        if i + 1 < stmts.len() && !stmt.background {
            out.push(';');
        }
    }
    out
}

/// Like [`print_stmts`] but always terminated, as required inside `{ ...; }`.
fn print_terminated(stmts: &[Stmt]) -> String {
    let mut out = print_stmts(stmts);
    if stmts.last().is_some_and(|s| !s.background) {
        out.push(';');
    }
    out
}

impl Display for Word {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            write_part(f, part)?;
        }
        Ok(())
    }
}

fn write_part(f: &mut Formatter<'_>, part: &WordPart) -> fmt::Result {
    match part {
        WordPart::Lit(text) => f.write_str(text),
        WordPart::SglQuoted(text) => write!(f, "'{}'", text),
        WordPart::DblQuoted(inner) => {
            f.write_str("\"")?;
            for part in inner {
                write_part(f, part)?;
            }
            f.write_str("\"")
        }
        WordPart::Param { name, braced: true } => write!(f, "${{{}}}", name),
        WordPart::Param { name, braced: false } => write!(f, "${}", name),
        WordPart::CmdSubst(body) => write!(f, "$({})", print_stmts(body)),
    }
}

impl Display for Assign {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

impl Display for Redirect {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(fd) = self.fd {
            write!(f, "{}", fd)?;
        }
        write!(f, "{}{}", self.op.as_str(), self.target)
    }
}

fn join<T: Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

impl Display for CallExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let pieces: Vec<String> = [join(&self.assigns), join(&self.args), join(&self.redirs)]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();
        f.write_str(&pieces.join(" "))
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call(call) => write!(f, "{}", call),
            Self::Subshell { body, redirs } => {
                write!(f, "({})", print_stmts(body))?;
                if !redirs.is_empty() {
                    write!(f, " {}", join(redirs))?;
                }
                Ok(())
            }
            Self::Group { body, redirs } => {
                write!(f, "{{ {} }}", print_terminated(body))?;
                if !redirs.is_empty() {
                    write!(f, " {}", join(redirs))?;
                }
                Ok(())
            }
        }
    }
}

impl Display for Pipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("! ")?;
        }
        let commands: Vec<String> = self.commands.iter().map(ToString::to_string).collect();
        f.write_str(&commands.join(" | "))
    }
}

impl Display for AndOr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first)?;
        for (op, pipeline) in &self.rest {
            let op = match op {
                LogicOp::And => "&&",
                LogicOp::Or => "||",
            };
            write!(f, " {} {}", op, pipeline)?;
        }
        Ok(())
    }
}

impl Display for Stmt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.list)?;
        if self.background {
            f.write_str(" &")?;
        }
        Ok(())
    }
}
