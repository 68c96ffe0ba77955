// src/system/shell/parser.rs

//! Recursive-descent parser for the embedded shell language.
//!
//! The parser works directly on characters; there is no separate lexer because
//! word boundaries depend on quoting context. Literal text is stored exactly as
//! written (backslashes included) and unescaped during expansion.

use super::syntax::{
    AndOr, Assign, CallExpr, Command, LogicOp, Pipeline, RedirOp, Redirect, Stmt, Word, WordPart,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}:{line}:{col}: {message}")]
pub struct ParseError {
    pub name: String,
    pub line: usize,
    pub col: usize,
    pub message: String,
}

/// Parses `src` into a list of statements. `name` labels error positions.
pub fn parse(src: &str, name: &str) -> Result<Vec<Stmt>, ParseError> {
    let mut parser = Parser::new(src, name);
    parser.parse_list(ListEnd::Eof)
}

/// Parses `src` as exactly one shell word (no blanks or operators outside quotes).
pub fn parse_word(src: &str, name: &str) -> Result<Word, ParseError> {
    let mut parser = Parser::new(src, name);
    let word = parser.parse_word()?;
    if parser.peek().is_some() {
        return Err(parser.error("expected a single word"));
    }
    Ok(word)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListEnd {
    Eof,
    Paren,
    Brace,
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    name: &'a str,
}

fn is_meta(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | ';' | '&' | '|' | '<' | '>' | '(' | ')')
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<'a> Parser<'a> {
    fn new(src: &str, name: &'a str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            name,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn starts_with(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            name: self.name.to_string(),
            line: self.line,
            col: self.col,
            message: message.into(),
        }
    }

    /// True when the character at `offset` ends a word.
    fn is_word_end(&self, offset: usize) -> bool {
        self.peek_at(offset).is_none_or(is_meta)
    }

    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.bump();
                }
                Some('\\') if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return,
            }
        }
    }

    fn skip_blanks_and_newlines(&mut self) {
        loop {
            self.skip_blanks();
            if self.peek() == Some('\n') {
                self.bump();
            } else {
                return;
            }
        }
    }

    fn parse_list(&mut self, end: ListEnd) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            self.skip_blanks_and_newlines();
            match self.peek() {
                None => {
                    return match end {
                        ListEnd::Eof => Ok(stmts),
                        ListEnd::Paren => Err(self.error("unexpected end of input, expected ')'")),
                        ListEnd::Brace => Err(self.error("unexpected end of input, expected '}'")),
                    };
                }
                Some(')') => {
                    return if end == ListEnd::Paren {
                        Ok(stmts)
                    } else {
                        Err(self.error("unexpected ')'"))
                    };
                }
                Some('}') if end == ListEnd::Brace && self.is_word_end(1) => return Ok(stmts),
                Some(';') => return Err(self.error("unexpected ';'")),
                _ => {}
            }

            stmts.push(self.parse_stmt()?);

            self.skip_blanks();
            match self.peek() {
                Some(';') => {
                    self.bump();
                    if self.peek() == Some(';') {
                        return Err(self.error("';;' is not supported"));
                    }
                }
                Some('\n') => {
                    self.bump();
                }
                _ => {}
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let list = self.parse_and_or()?;
        self.skip_blanks();
        let background = self.peek() == Some('&') && self.peek_at(1) != Some('&');
        if background {
            self.bump();
        }
        Ok(Stmt { list, background })
    }

    fn parse_and_or(&mut self) -> Result<AndOr, ParseError> {
        let first = self.parse_pipeline()?;
        let mut rest = Vec::new();
        loop {
            self.skip_blanks();
            let op = if self.starts_with("&&") {
                LogicOp::And
            } else if self.starts_with("||") {
                LogicOp::Or
            } else {
                break;
            };
            self.bump();
            self.bump();
            self.skip_blanks_and_newlines();
            rest.push((op, self.parse_pipeline()?));
        }
        Ok(AndOr { first, rest })
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline, ParseError> {
        self.skip_blanks();
        let negated = self.peek() == Some('!') && self.is_word_end(1);
        if negated {
            self.bump();
        }
        let mut commands = vec![self.parse_command()?];
        loop {
            self.skip_blanks();
            if self.peek() == Some('|') && self.peek_at(1) != Some('|') {
                self.bump();
                self.skip_blanks_and_newlines();
                commands.push(self.parse_command()?);
            } else {
                break;
            }
        }
        Ok(Pipeline { negated, commands })
    }

    fn parse_command(&mut self) -> Result<Command, ParseError> {
        self.skip_blanks();
        match self.peek() {
            Some('(') => {
                self.bump();
                if self.peek() == Some('(') {
                    return Err(self.error("arithmetic commands are not supported"));
                }
                let body = self.parse_list(ListEnd::Paren)?;
                self.bump();
                let redirs = self.parse_trailing_redirects()?;
                Ok(Command::Subshell { body, redirs })
            }
            Some('{') if self.is_word_end(1) => {
                self.bump();
                let body = self.parse_list(ListEnd::Brace)?;
                self.bump();
                let redirs = self.parse_trailing_redirects()?;
                Ok(Command::Group { body, redirs })
            }
            _ => Ok(Command::Call(self.parse_call()?)),
        }
    }

    fn parse_trailing_redirects(&mut self) -> Result<Vec<Redirect>, ParseError> {
        let mut redirs = Vec::new();
        loop {
            self.skip_blanks();
            match self.try_parse_redirect()? {
                Some(redir) => redirs.push(redir),
                None => return Ok(redirs),
            }
        }
    }

    fn parse_call(&mut self) -> Result<CallExpr, ParseError> {
        let mut call = CallExpr::default();
        loop {
            self.skip_blanks();
            match self.peek() {
                None | Some(';') | Some('\n') | Some('|') | Some(')') => break,
                Some('&') if self.peek_at(1) != Some('>') => break,
                Some('(') => return Err(self.error("unexpected '('")),
                _ => {}
            }
            if let Some(redir) = self.try_parse_redirect()? {
                call.redirs.push(redir);
                continue;
            }
            if call.args.is_empty() {
                if let Some(assign) = self.try_parse_assign()? {
                    call.assigns.push(assign);
                    continue;
                }
            }
            let word = self.parse_word()?;
            if word.parts.is_empty() {
                return Err(self.error("expected a word"));
            }
            call.args.push(word);
        }
        if call.assigns.is_empty() && call.args.is_empty() && call.redirs.is_empty() {
            return Err(match self.peek() {
                Some(c) => self.error(format!("unexpected '{}', expected a command", c)),
                None => self.error("unexpected end of input, expected a command"),
            });
        }
        Ok(call)
    }

    fn try_parse_redirect(&mut self) -> Result<Option<Redirect>, ParseError> {
        if self.starts_with("&>") {
            self.bump();
            self.bump();
            let target = self.parse_redirect_target()?;
            return Ok(Some(Redirect {
                fd: None,
                op: RedirOp::WriteAll,
                target,
            }));
        }

        let mut digits = String::new();
        while let Some(c) = self.peek_at(digits.len()) {
            if c.is_ascii_digit() {
                digits.push(c);
            } else {
                break;
            }
        }
        let op_char = match self.peek_at(digits.len()) {
            Some(c @ ('<' | '>')) => c,
            _ => return Ok(None),
        };
        let fd = if digits.is_empty() {
            None
        } else {
            Some(
                digits
                    .parse::<u32>()
                    .map_err(|_| self.error(format!("invalid file descriptor '{}'", digits)))?,
            )
        };
        for _ in 0..digits.len() {
            self.bump();
        }
        self.bump();

        let op = if op_char == '<' {
            match self.peek() {
                Some('<') => return Err(self.error("here-documents are not supported")),
                Some('&') => return Err(self.error("input duplication is not supported")),
                _ => RedirOp::Read,
            }
        } else {
            match self.peek() {
                Some('>') => {
                    self.bump();
                    RedirOp::Append
                }
                Some('&') => {
                    self.bump();
                    RedirOp::DupOut
                }
                Some('|') => {
                    self.bump();
                    RedirOp::Write
                }
                _ => RedirOp::Write,
            }
        };
        let target = self.parse_redirect_target()?;
        Ok(Some(Redirect { fd, op, target }))
    }

    fn parse_redirect_target(&mut self) -> Result<Word, ParseError> {
        self.skip_blanks();
        let target = self.parse_word()?;
        if target.parts.is_empty() {
            return Err(self.error("missing redirection target"));
        }
        Ok(target)
    }

    fn try_parse_assign(&mut self) -> Result<Option<Assign>, ParseError> {
        match self.peek() {
            Some(c) if is_name_start(c) => {}
            _ => return Ok(None),
        }
        let mut len = 0;
        while self.peek_at(len).is_some_and(is_name_char) {
            len += 1;
        }
        if self.peek_at(len) != Some('=') {
            return Ok(None);
        }
        let mut name = String::new();
        for _ in 0..len {
            if let Some(c) = self.bump() {
                name.push(c);
            }
        }
        self.bump();
        let value = self.parse_word()?;
        Ok(Some(Assign { name, value }))
    }

    /// Reads one word up to the next unquoted metacharacter. May return an empty word.
    fn parse_word(&mut self) -> Result<Word, ParseError> {
        let mut parts = Vec::new();
        let mut lit = String::new();

        while let Some(c) = self.peek() {
            match c {
                c if is_meta(c) => break,
                '\\' => {
                    self.bump();
                    match self.bump() {
                        Some('\n') => {}
                        Some(escaped) => {
                            lit.push('\\');
                            lit.push(escaped);
                        }
                        None => lit.push('\\'),
                    }
                }
                '\'' => {
                    flush_lit(&mut lit, &mut parts);
                    self.bump();
                    let mut quoted = String::new();
                    loop {
                        match self.bump() {
                            Some('\'') => break,
                            Some(q) => quoted.push(q),
                            None => return Err(self.error("unclosed single quote")),
                        }
                    }
                    parts.push(WordPart::SglQuoted(quoted));
                }
                '"' => {
                    flush_lit(&mut lit, &mut parts);
                    self.bump();
                    parts.push(WordPart::DblQuoted(self.parse_double_quoted()?));
                }
                '$' => {
                    flush_lit(&mut lit, &mut parts);
                    parts.push(self.parse_dollar()?);
                }
                '`' => {
                    return Err(self.error("backquotes are not supported, use $(...)"));
                }
                other => {
                    lit.push(other);
                    self.bump();
                }
            }
        }
        flush_lit(&mut lit, &mut parts);
        Ok(Word { parts })
    }

    fn parse_double_quoted(&mut self) -> Result<Vec<WordPart>, ParseError> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unclosed double quote")),
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    match self.peek() {
                        Some('\n') => {
                            self.bump();
                        }
                        Some(c @ ('$' | '`' | '"' | '\\')) => {
                            self.bump();
                            lit.push('\\');
                            lit.push(c);
                        }
                        Some(_) => lit.push('\\'),
                        None => return Err(self.error("unclosed double quote")),
                    }
                }
                Some('$') => {
                    flush_lit(&mut lit, &mut parts);
                    parts.push(self.parse_dollar()?);
                }
                Some('`') => {
                    return Err(self.error("backquotes are not supported, use $(...)"));
                }
                Some(c) => {
                    lit.push(c);
                    self.bump();
                }
            }
        }
        flush_lit(&mut lit, &mut parts);
        Ok(parts)
    }

    fn parse_dollar(&mut self) -> Result<WordPart, ParseError> {
        self.bump();
        match self.peek() {
            Some('{') => {
                self.bump();
                let mut name = String::new();
                loop {
                    match self.bump() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(self.error("unclosed '${'")),
                    }
                }
                let valid = match name.chars().next() {
                    Some(first) if is_name_start(first) => name.chars().all(is_name_char),
                    Some(_) => name.len() == 1 || name.chars().all(|c| c.is_ascii_digit()),
                    None => false,
                };
                if !valid {
                    return Err(self.error(format!("unsupported parameter expansion '${{{}}}'", name)));
                }
                Ok(WordPart::Param { name, braced: true })
            }
            Some('(') => {
                self.bump();
                if self.peek() == Some('(') {
                    return Err(self.error("arithmetic expansion is not supported"));
                }
                let body = self.parse_list(ListEnd::Paren)?;
                self.bump();
                Ok(WordPart::CmdSubst(body))
            }
            Some(c) if is_name_start(c) => {
                let mut name = String::new();
                while let Some(c) = self.peek() {
                    if is_name_char(c) {
                        name.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                Ok(WordPart::Param {
                    name,
                    braced: false,
                })
            }
            Some(c) if c.is_ascii_digit() || matches!(c, '?' | '$' | '#' | '@' | '*' | '!') => {
                self.bump();
                Ok(WordPart::Param {
                    name: c.to_string(),
                    braced: false,
                })
            }
            _ => Ok(WordPart::Lit("$".to_string())),
        }
    }
}

fn flush_lit(lit: &mut String, parts: &mut Vec<WordPart>) {
    if lit.is_empty() {
        return;
    }
    // Adjacent literals merge so `$` fallbacks do not fragment words.
    if let Some(WordPart::Lit(prev)) = parts.last_mut() {
        prev.push_str(lit);
        lit.clear();
        return;
    }
    parts.push(WordPart::Lit(std::mem::take(lit)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(src: &str) -> CallExpr {
        let stmts = parse(src, "test").unwrap();
        assert_eq!(stmts.len(), 1);
        stmts[0].as_call().unwrap().clone()
    }

    #[test]
    fn test_statements_split_on_newline_and_semicolon() {
        let stmts = parse("echo a; echo b\n\n echo c # trailing\n", "t").unwrap();
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn test_empty_input_has_no_statements() {
        assert!(parse("", "t").unwrap().is_empty());
        assert!(parse("  # just a comment\n", "t").unwrap().is_empty());
    }

    #[test]
    fn test_assignments_args_and_redirects() {
        let c = call("CC=gcc OPT=-O2 make -j4 all > build.log 2>&1");
        assert_eq!(c.assigns.len(), 2);
        assert_eq!(c.assigns[0].name, "CC");
        assert_eq!(c.args.len(), 3);
        assert_eq!(c.redirs.len(), 2);
        assert_eq!(c.redirs[0].op, RedirOp::Write);
        assert_eq!(c.redirs[1].fd, Some(2));
        assert_eq!(c.redirs[1].op, RedirOp::DupOut);
        assert_eq!(c.redirs[1].target, Word::lit("1"));
    }

    #[test]
    fn test_quotes_and_params() {
        let c = call(r#"echo 'a b' "x $HOME ${USER}y" \$z"#);
        assert_eq!(c.args[1].parts, vec![WordPart::SglQuoted("a b".into())]);
        assert_eq!(
            c.args[2].parts,
            vec![WordPart::DblQuoted(vec![
                WordPart::Lit("x ".into()),
                WordPart::Param {
                    name: "HOME".into(),
                    braced: false
                },
                WordPart::Lit(" ".into()),
                WordPart::Param {
                    name: "USER".into(),
                    braced: true
                },
                WordPart::Lit("y".into()),
            ])]
        );
        assert_eq!(c.args[3].parts, vec![WordPart::Lit("\\$z".into())]);
    }

    #[test]
    fn test_lists_pipelines_and_groups() {
        let stmts = parse("a && b || ! c | d; (e; f) > out & { g; }", "t").unwrap();
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[0].list.rest.len(), 2);
        let (op, pipeline) = &stmts[0].list.rest[1];
        assert_eq!(*op, LogicOp::Or);
        assert!(pipeline.negated);
        assert_eq!(pipeline.commands.len(), 2);
        assert!(stmts[1].background);
        assert!(matches!(
            &stmts[1].list.first.commands[0],
            Command::Subshell { body, redirs } if body.len() == 2 && redirs.len() == 1
        ));
        assert!(matches!(
            &stmts[2].list.first.commands[0],
            Command::Group { body, .. } if body.len() == 1
        ));
    }

    #[test]
    fn test_command_substitution_nests() {
        let c = call("echo $(basename $(pwd))");
        match &c.args[1].parts[0] {
            WordPart::CmdSubst(body) => assert_eq!(body.len(), 1),
            other => panic!("unexpected part {:?}", other),
        }
    }

    #[test]
    fn test_errors_carry_position() {
        let err = parse("echo ok\necho 'open", "build:0").unwrap_err();
        assert_eq!(err.name, "build:0");
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unclosed single quote"));
        assert!(parse("echo a |", "t").is_err());
        assert!(parse("( echo a", "t").is_err());
        assert!(parse("; echo", "t").is_err());
        assert!(parse("cat <<EOF", "t").is_err());
    }

    #[test]
    fn test_parse_word_rejects_multiple_words() {
        assert_eq!(parse_word("-O2", "t").unwrap(), Word::lit("-O2"));
        assert!(parse_word("a b", "t").is_err());
    }
}
