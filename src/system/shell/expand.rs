// src/system/shell/expand.rs

//! Word expansion: quote removal, parameter and command substitution, field
//! splitting of unquoted results and pathname expansion.

use super::ShellError;
use super::exec::Sink;
use super::interp::Runner;
use super::syntax::{Stmt, Word, WordPart};
use crate::system::environ;
use glob::{MatchOptions, Pattern};
use std::path::Path;

#[derive(Debug, Default)]
struct Field {
    text: String,
    /// `text` with quoted characters glob-escaped.
    pattern: String,
    globbable: bool,
    quoted: bool,
}

#[derive(Debug, Default)]
struct Fields {
    done: Vec<Field>,
    current: Option<Field>,
}

fn is_ifs(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n')
}

impl Fields {
    fn current(&mut self) -> &mut Field {
        self.current.get_or_insert_with(Field::default)
    }

    fn finish(&mut self) {
        if let Some(field) = self.current.take() {
            self.done.push(field);
        }
    }

    fn push_quoted(&mut self, text: &str) {
        let field = self.current();
        field.text.push_str(text);
        field.pattern.push_str(&Pattern::escape(text));
        field.quoted = true;
    }

    fn push_active(&mut self, c: char) {
        let field = self.current();
        field.text.push(c);
        field.pattern.push(c);
        if matches!(c, '*' | '?' | '[') {
            field.globbable = true;
        }
    }

    fn push_escaped(&mut self, c: char) {
        let mut buf = [0u8; 4];
        self.push_quoted(c.encode_utf8(&mut buf));
    }

    /// Unquoted literal text: backslash escapes are removed and glob
    /// characters stay active.
    fn push_unquoted_literal(&mut self, raw: &str) {
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('\n') => {}
                    Some(escaped) => self.push_escaped(escaped),
                    None => self.push_escaped('\\'),
                },
                other => self.push_active(other),
            }
        }
    }

    /// Unquoted expansion result, split on blanks.
    fn push_split(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        let words: Vec<&str> = value.split(is_ifs).filter(|w| !w.is_empty()).collect();
        if value.starts_with(is_ifs) {
            self.finish();
        }
        for (i, word) in words.iter().enumerate() {
            if i > 0 {
                self.finish();
            }
            for c in word.chars() {
                self.push_active(c);
            }
        }
        if value.ends_with(is_ifs) && !words.is_empty() {
            self.finish();
        }
    }
}

/// Removes the backslashes that are special inside double quotes.
fn unescape_double(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next @ ('$' | '`' | '"' | '\\')) => {
                    out.push(next);
                    chars.next();
                    continue;
                }
                Some('\n') => {
                    chars.next();
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

fn unescape_plain(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\n') => {}
                Some(escaped) => out.push(escaped),
                None => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

impl Runner {
    /// Expands a word into zero or more fields.
    pub(super) fn expand_fields(&mut self, word: &Word) -> Result<Vec<String>, ShellError> {
        let mut fields = Fields::default();
        for part in &word.parts {
            self.expand_part(part, &mut fields, false)?;
        }
        fields.finish();

        let mut out = Vec::with_capacity(fields.done.len());
        for field in fields.done {
            if field.globbable {
                if let Some(matches) = self.glob(&field.pattern) {
                    out.extend(matches);
                    continue;
                }
            }
            if field.text.is_empty() && !field.quoted {
                continue;
            }
            out.push(field.text);
        }
        Ok(out)
    }

    /// Expands a word into exactly one string, without splitting or globbing.
    pub(super) fn expand_single(&mut self, word: &Word) -> Result<String, ShellError> {
        let mut out = String::new();
        for part in &word.parts {
            out.push_str(&self.part_text(part, false)?);
        }
        Ok(out)
    }

    fn expand_part(&mut self, part: &WordPart, fields: &mut Fields, quoted: bool) -> Result<(), ShellError> {
        match part {
            WordPart::Lit(raw) if quoted => fields.push_quoted(&unescape_double(raw)),
            WordPart::Lit(raw) => fields.push_unquoted_literal(raw),
            WordPart::SglQuoted(text) => fields.push_quoted(text),
            WordPart::DblQuoted(inner) => {
                fields.current().quoted = true;
                for part in inner {
                    self.expand_part(part, fields, true)?;
                }
            }
            WordPart::Param { name, .. } => {
                let value = self.param(name);
                if quoted {
                    fields.push_quoted(&value);
                } else {
                    fields.push_split(&value);
                }
            }
            WordPart::CmdSubst(body) => {
                let value = self.command_output(body)?;
                if quoted {
                    fields.push_quoted(&value);
                } else {
                    fields.push_split(&value);
                }
            }
        }
        Ok(())
    }

    fn part_text(&mut self, part: &WordPart, quoted: bool) -> Result<String, ShellError> {
        Ok(match part {
            WordPart::Lit(raw) if quoted => unescape_double(raw),
            WordPart::Lit(raw) => unescape_plain(raw),
            WordPart::SglQuoted(text) => text.clone(),
            WordPart::DblQuoted(inner) => {
                let mut out = String::new();
                for part in inner {
                    out.push_str(&self.part_text(part, true)?);
                }
                out
            }
            WordPart::Param { name, .. } => self.param(name),
            WordPart::CmdSubst(body) => self.command_output(body)?,
        })
    }

    fn param(&self, name: &str) -> String {
        match name {
            "?" => self.status.to_string(),
            "$" => std::process::id().to_string(),
            "#" => "0".to_string(),
            "@" | "*" => String::new(),
            _ => self
                .vars
                .get(name)
                .or_else(|| environ::lookup(&self.env, name))
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Runs `body` in a subshell and captures its output, minus trailing newlines.
    fn command_output(&mut self, body: &[Stmt]) -> Result<String, ShellError> {
        let (sink, buffer) = Sink::buffer();
        let mut sub = self.subshell();
        sub.stdout = sink;
        let result = sub.run_list(body);
        self.status = sub.status;
        self.jobs.append(&mut sub.jobs);
        result?;
        let mut text = String::from_utf8_lossy(&buffer.borrow()).into_owned();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        Ok(text)
    }

    /// Matches `pattern` relative to the working directory. `None` when
    /// nothing matches.
    fn glob(&self, pattern: &str) -> Option<Vec<String>> {
        let absolute = Path::new(pattern).is_absolute();
        let full = if absolute {
            pattern.to_string()
        } else {
            format!("{}/{}", Pattern::escape(&self.dir.to_string_lossy()), pattern)
        };
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };
        let entries = match glob::glob_with(&full, options) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Invalid glob pattern '{}': {}", pattern, e);
                return None;
            }
        };
        let matches: Vec<String> = entries
            .flatten()
            .map(|entry| {
                if absolute {
                    return entry.to_string_lossy().into_owned();
                }
                entry
                    .strip_prefix(&self.dir)
                    .map_or_else(|_| entry.to_string_lossy().into_owned(), |p| p.to_string_lossy().into_owned())
            })
            .collect();
        if matches.is_empty() { None } else { Some(matches) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::shell::parser::parse_word;
    use std::collections::BTreeMap;
    use std::fs;

    fn runner(dir: &Path) -> Runner {
        Runner::builder(dir)
            .env(BTreeMap::from([("GREETING".to_string(), "hello  big world".to_string())]))
            .stdout(Sink::Null)
            .stderr(Sink::Null)
            .build()
    }

    fn fields(sh: &mut Runner, src: &str) -> Vec<String> {
        sh.expand_fields(&parse_word(src, "test").unwrap()).unwrap()
    }

    #[test]
    fn test_quoting_and_splitting() {
        let dir = tempfile::tempdir().unwrap();
        let mut sh = runner(dir.path());
        assert_eq!(fields(&mut sh, "$GREETING"), ["hello", "big", "world"]);
        assert_eq!(fields(&mut sh, "\"$GREETING\""), ["hello  big world"]);
        assert_eq!(fields(&mut sh, "'$GREETING'"), ["$GREETING"]);
        assert_eq!(fields(&mut sh, "a\\ b"), ["a b"]);
        assert_eq!(fields(&mut sh, "\"a \\\"q\\\" \\$x\""), ["a \"q\" $x"]);
        assert_eq!(fields(&mut sh, "x${GREETING}y"), ["xhello", "big", "worldy"]);
    }

    #[test]
    fn test_empty_unquoted_fields_vanish() {
        let dir = tempfile::tempdir().unwrap();
        let mut sh = runner(dir.path());
        assert!(fields(&mut sh, "$UNSET").is_empty());
        assert_eq!(fields(&mut sh, "\"$UNSET\""), [""]);
        assert_eq!(fields(&mut sh, "''"), [""]);
    }

    #[test]
    fn test_command_substitution_trims_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let mut sh = runner(dir.path());
        assert_eq!(fields(&mut sh, "\"$(echo one; echo two)\""), ["one\ntwo"]);
        assert_eq!(fields(&mut sh, "$(echo one two)"), ["one", "two"]);
    }

    #[test]
    fn test_globbing_is_relative_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.c", "a.c", "x.h", ".hidden.c"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let mut sh = runner(dir.path());
        assert_eq!(fields(&mut sh, "*.c"), ["a.c", "b.c"]);
        assert_eq!(fields(&mut sh, "'*.c'"), ["*.c"]);
        assert_eq!(fields(&mut sh, "\\*.c"), ["*.c"]);
        assert_eq!(fields(&mut sh, "*.rs"), ["*.rs"]);
    }

    #[test]
    fn test_single_expansion_keeps_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let mut sh = runner(dir.path());
        let word = parse_word("pre-$GREETING", "test").unwrap();
        assert_eq!(sh.expand_single(&word).unwrap(), "pre-hello  big world");
    }
}
