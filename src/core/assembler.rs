// src/core/assembler.rs

//! # Shell Fragment Assembler
//!
//! Builds a shell call expression from the token form of a command. Leading
//! `KEY=VALUE` strings become assignments, strings are quoted only when the
//! shell would otherwise alter them, paths are made relative to the task's
//! base directory and written with forward slashes, and pre-parsed shell
//! arguments are spliced in as they are.

use crate::core::paths::{self, PathError};
use crate::system::shell::parser::{parse, parse_word};
use crate::system::shell::syntax::{Assign, CallExpr, Word, WordPart};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AssembleError {
    #[error("malformed env var '{0}'")]
    MalformedEnv(String),
    #[error("invalid value in '{token}': {message}")]
    BadValue { token: String, message: String },
    #[error("'{source_text}' is not a plain argument list: {message}")]
    NotArguments { source_text: String, message: String },
    #[error(transparent)]
    Path(#[from] PathError),
}

/// One element of a token-form command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdToken {
    Str(String),
    Path(PathBuf),
    /// Words from [`parse_shell_args`], spliced without quoting.
    ShellArgs(Vec<Word>),
}

/// Assembles `tokens` into a single call expression. Absolute paths are
/// rewritten relative to `base`.
pub fn assemble(tokens: &[CmdToken], base: &Path) -> Result<CallExpr, AssembleError> {
    let mut call = CallExpr::default();
    let mut in_args = false;
    for token in tokens {
        match token {
            CmdToken::Str(text) if !in_args && text.contains('=') => {
                call.assigns.push(env_assign(text)?);
            }
            CmdToken::Str(text) => {
                in_args = true;
                call.args.push(quote(text));
            }
            CmdToken::Path(path) => {
                in_args = true;
                call.args.push(quote(&render_path(path, base)?));
            }
            CmdToken::ShellArgs(words) => {
                in_args = true;
                call.args.extend(words.iter().cloned());
            }
        }
    }
    Ok(call)
}

fn env_assign(token: &str) -> Result<Assign, AssembleError> {
    let (name, value) = token
        .split_once('=')
        .ok_or_else(|| AssembleError::MalformedEnv(token.to_string()))?;
    if !is_name(name) {
        return Err(AssembleError::MalformedEnv(token.to_string()));
    }
    let value = if value.is_empty() {
        Word::default()
    } else {
        parse_word(value, "env").map_err(|e| AssembleError::BadValue {
            token: token.to_string(),
            message: e.message,
        })?
    };
    Ok(Assign {
        name: name.to_string(),
        value,
    })
}

fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn render_path(path: &Path, base: &Path) -> Result<String, AssembleError> {
    let path = if path.is_absolute() {
        paths::relative_to(path, base)?
    } else {
        path.to_path_buf()
    };
    let text = paths::to_slashes(&path);
    Ok(if text.is_empty() { ".".to_string() } else { text })
}

fn needs_quoting(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '$' | '\'' | '"' | '`' | '\\' | ';' | '&' | '|' | '<' | '>' | '(' | ')' | '{' | '}' | '#'
        )
}

/// Renders one string as a shell word that expands back to exactly `text`.
/// Glob characters are left active.
pub fn quote(text: &str) -> Word {
    if text.is_empty() {
        return Word {
            parts: vec![WordPart::SglQuoted(String::new())],
        };
    }
    if !text.chars().any(needs_quoting) {
        return Word::lit(text);
    }
    if !text.contains('\'') {
        return Word {
            parts: vec![WordPart::SglQuoted(text.to_string())],
        };
    }
    let mut escaped = String::with_capacity(text.len() + 4);
    for c in text.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Word {
        parts: vec![WordPart::DblQuoted(vec![WordPart::Lit(escaped)])],
    }
}

/// Parses a shell argument list such as `-O2 -DNAME="a b"`. Anything that is
/// not a single simple command without assignments or redirections is rejected.
pub fn parse_shell_args(src: &str) -> Result<Vec<Word>, AssembleError> {
    let reject = |message: &str| AssembleError::NotArguments {
        source_text: src.to_string(),
        message: message.to_string(),
    };
    let stmts = parse(src, "shell_args").map_err(|e| reject(&e.to_string()))?;
    match stmts.as_slice() {
        [] => Ok(Vec::new()),
        [stmt] => {
            let call = stmt
                .as_call()
                .ok_or_else(|| reject("expected a plain list of arguments"))?;
            if !call.assigns.is_empty() {
                return Err(reject("variable assignments are not allowed"));
            }
            if !call.redirs.is_empty() {
                return Err(reject("redirections are not allowed"));
            }
            Ok(call.args.clone())
        }
        _ => Err(reject("expected a single command line")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::shell::{Runner, Sink, print_stmts, syntax::Stmt};

    fn strs(list: &[&str]) -> Vec<CmdToken> {
        list.iter().map(|s| CmdToken::Str(s.to_string())).collect()
    }

    fn printed(call: CallExpr) -> String {
        print_stmts(&[Stmt::from_call(call)])
    }

    #[test]
    fn test_env_prefix_and_arguments() {
        let call = assemble(&strs(&["CC=gcc", "make", "A=1", "all"]), Path::new("/p")).unwrap();
        assert_eq!(call.assigns.len(), 1);
        assert_eq!(printed(call), "CC=gcc make A=1 all");

        let err = assemble(&strs(&["1X=2", "make"]), Path::new("/p")).unwrap_err();
        assert_eq!(err, AssembleError::MalformedEnv("1X=2".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_paths_are_relative_with_slashes() {
        let tokens = vec![
            CmdToken::Str("cc".to_string()),
            CmdToken::Path(PathBuf::from("/p/src/main.c")),
            CmdToken::Path(PathBuf::from("/p")),
            CmdToken::Path(PathBuf::from("/other/lib.a")),
        ];
        let call = assemble(&tokens, Path::new("/p")).unwrap();
        assert_eq!(printed(call), "cc src/main.c . ../other/lib.a");
    }

    #[test]
    fn test_quoting_choices() {
        assert_eq!(quote("plain-word.c").to_string(), "plain-word.c");
        assert_eq!(quote("two words").to_string(), "'two words'");
        assert_eq!(quote("$HOME").to_string(), "'$HOME'");
        assert_eq!(quote("it's $x").to_string(), "\"it's \\$x\"");
        assert_eq!(quote("").to_string(), "''");
    }

    #[test]
    fn test_plain_tokens_round_trip_through_parser() {
        let tokens = ["gcc", "-O2", "-c", "src/a.c", "-o", "out/a.o", "--flag=value"];
        let call = assemble(&strs(&tokens), Path::new("/p")).unwrap();
        let reparsed = parse(&printed(call), "t").unwrap();
        let args: Vec<&str> = reparsed[0]
            .as_call()
            .unwrap()
            .args
            .iter()
            .map(|w| w.as_plain_literal().unwrap())
            .collect();
        assert_eq!(args, tokens);
    }

    #[test]
    fn test_quoted_tokens_expand_back_to_original() {
        let dir = tempfile::tempdir().unwrap();
        let call = assemble(&strs(&["echo", "a  b", "it's", "$HOME", "x\"y"]), dir.path()).unwrap();
        let stmts = parse(&printed(call), "t").unwrap();
        let (sink, buffer) = Sink::buffer();
        let mut runner = Runner::builder(dir.path()).stdout(sink).build();
        runner.run_all(&stmts).unwrap();
        assert_eq!(String::from_utf8(buffer.take()).unwrap(), "a  b it's $HOME x\"y\n");
    }

    #[test]
    fn test_shell_args_are_spliced() {
        let args = parse_shell_args("-O2 -DNAME=\"a b\" $EXTRA").unwrap();
        assert_eq!(args.len(), 3);
        let mut tokens = strs(&["cc"]);
        tokens.push(CmdToken::ShellArgs(args));
        let call = assemble(&tokens, Path::new("/p")).unwrap();
        assert_eq!(printed(call), "cc -O2 -DNAME=\"a b\" $EXTRA");
    }

    #[test]
    fn test_shell_args_rejections() {
        assert!(parse_shell_args("A=1 b").is_err());
        assert!(parse_shell_args("a > out").is_err());
        assert!(parse_shell_args("a; b").is_err());
        assert!(parse_shell_args("a | b").is_err());
        assert_eq!(parse_shell_args("").unwrap(), Vec::<Word>::new());
    }
}
