//! Indentation-aware lexer for the tool language

use crate::error::SandboxError;

/// A token with the line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Newline,
    Indent,
    Dedent,
    EndOfFile,

    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// f-string parts: literals and raw expression source.
    FString(Vec<RawFsPart>),

    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Pipe,
    Amp,
    Caret,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    Assign,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Arrow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawFsPart {
    Literal(String),
    /// Source text of an interpolated expression (format specs dropped).
    Expr(String),
}

/// Tab stops are 8 columns, matching CPython's tokenizer.
const TAB_WIDTH: usize = 8;

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    indent_stack: Vec<usize>,
    bracket_depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            indent_stack: vec![0],
            bracket_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(source: &str) -> Result<Vec<Token>, SandboxError> {
        let mut lexer = Self::new(source);
        lexer.run()?;
        Ok(lexer.tokens)
    }

    fn err(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::SyntaxError {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token { tok, line: self.line });
    }

    fn run(&mut self) -> Result<(), SandboxError> {
        while self.pos < self.chars.len() {
            if self.at_line_start && self.bracket_depth == 0 {
                self.handle_line_start()?;
                if self.pos >= self.chars.len() {
                    break;
                }
            }

            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' => {
                    self.bump();
                }
                '\r' => {
                    self.bump();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '\n' => {
                    self.bump();
                    if self.bracket_depth == 0 {
                        // Suppress empty logical lines
                        if matches!(
                            self.tokens.last().map(|t| &t.tok),
                            Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent) | None
                        ) {
                            self.at_line_start = true;
                        } else {
                            self.push(Tok::Newline);
                            self.at_line_start = true;
                        }
                    }
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    // Explicit line continuation
                    self.bump();
                    self.bump();
                }
                '\'' | '"' => self.lex_string(false, false)?,
                c if c.is_ascii_digit() => self.lex_number()?,
                c if c.is_alphanumeric() || c == '_' => self.lex_name_or_prefixed_string()?,
                _ => self.lex_operator()?,
            }
        }

        // Close the final logical line and any open blocks
        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            Some(Tok::Newline) | None
        ) {
            self.push(Tok::Newline);
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::EndOfFile);
        Ok(())
    }

    fn handle_line_start(&mut self) -> Result<(), SandboxError> {
        loop {
            // Measure indentation of the upcoming line
            let mut width = 0usize;
            let start = self.pos;
            while let Some(c) = self.peek() {
                match c {
                    ' ' => {
                        width += 1;
                        self.bump();
                    }
                    '\t' => {
                        width = (width / TAB_WIDTH + 1) * TAB_WIDTH;
                        self.bump();
                    }
                    _ => break,
                }
            }

            match self.peek() {
                // Blank or comment-only lines carry no indentation meaning
                Some('\n') | Some('\r') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                    continue;
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    continue;
                }
                None => {
                    self.pos = start.max(self.pos);
                    self.at_line_start = false;
                    return Ok(());
                }
                Some(_) => {
                    let current = *self.indent_stack.last().expect("indent stack non-empty");
                    if width > current {
                        self.indent_stack.push(width);
                        self.push(Tok::Indent);
                    } else if width < current {
                        while *self.indent_stack.last().expect("indent stack non-empty") > width {
                            self.indent_stack.pop();
                            self.push(Tok::Dedent);
                        }
                        if *self.indent_stack.last().expect("indent stack non-empty") != width {
                            return Err(self.err("unindent does not match any outer indentation level"));
                        }
                    }
                    self.at_line_start = false;
                    return Ok(());
                }
            }
        }
    }

    fn lex_name_or_prefixed_string(&mut self) -> Result<(), SandboxError> {
        // String prefixes: f, r, fr, rf (any case)
        let mut prefix = String::new();
        let mut offset = 0;
        while let Some(c) = self.peek_at(offset) {
            if offset < 2 && matches!(c.to_ascii_lowercase(), 'f' | 'r') {
                prefix.push(c.to_ascii_lowercase());
                offset += 1;
            } else {
                break;
            }
        }
        if !prefix.is_empty() && matches!(self.peek_at(offset), Some('\'') | Some('"')) {
            for _ in 0..offset {
                self.bump();
            }
            let is_fstring = prefix.contains('f');
            let is_raw = prefix.contains('r');
            return self.lex_string(is_fstring, is_raw);
        }

        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        self.push(Tok::Name(name));
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), SandboxError> {
        let mut text = String::new();
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false) {
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign_offset = if matches!(self.peek_at(1), Some('+') | Some('-')) { 2 } else { 1 };
            if self
                .peek_at(sign_offset)
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
            {
                is_float = true;
                for _ in 0..sign_offset {
                    text.push(self.bump().expect("exponent chars present"));
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }

        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.err(format!("invalid float literal '{text}'")))?;
            self.push(Tok::Float(value));
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| self.err(format!("integer literal too large: '{text}'")))?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    fn lex_string(&mut self, is_fstring: bool, is_raw: bool) -> Result<(), SandboxError> {
        let quote = self.bump().expect("string quote present");
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut raw = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.err("unterminated string literal"));
            };
            if c == quote {
                if triple {
                    if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                        self.bump();
                        self.bump();
                        self.bump();
                        break;
                    }
                    raw.push(c);
                    self.bump();
                } else {
                    self.bump();
                    break;
                }
            } else if c == '\n' && !triple {
                return Err(self.err("unterminated string literal"));
            } else if c == '\\' && !is_raw {
                self.bump();
                let Some(escaped) = self.bump() else {
                    return Err(self.err("unterminated string literal"));
                };
                raw.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    '\\' => '\\',
                    '\'' => '\'',
                    '"' => '"',
                    '\n' => continue,
                    other => other,
                });
            } else {
                raw.push(c);
                self.bump();
            }
        }

        if is_fstring {
            self.push(Tok::FString(split_fstring(&raw, self.line)?));
        } else {
            self.push(Tok::Str(raw));
        }
        Ok(())
    }

    fn lex_operator(&mut self) -> Result<(), SandboxError> {
        let c = self.bump().expect("operator char present");
        let next = self.peek();
        let tok = match (c, next) {
            ('*', Some('*')) => {
                self.bump();
                Tok::DoubleStar
            }
            ('*', Some('=')) => {
                self.bump();
                Tok::StarEq
            }
            ('*', _) => Tok::Star,
            ('/', Some('/')) => {
                self.bump();
                Tok::DoubleSlash
            }
            ('/', Some('=')) => {
                self.bump();
                Tok::SlashEq
            }
            ('/', _) => Tok::Slash,
            ('+', Some('=')) => {
                self.bump();
                Tok::PlusEq
            }
            ('+', _) => Tok::Plus,
            ('-', Some('=')) => {
                self.bump();
                Tok::MinusEq
            }
            ('-', Some('>')) => {
                self.bump();
                Tok::Arrow
            }
            ('-', _) => Tok::Minus,
            ('=', Some('=')) => {
                self.bump();
                Tok::EqEq
            }
            ('=', _) => Tok::Assign,
            ('!', Some('=')) => {
                self.bump();
                Tok::NotEq
            }
            ('<', Some('=')) => {
                self.bump();
                Tok::Le
            }
            ('<', _) => Tok::Lt,
            ('>', Some('=')) => {
                self.bump();
                Tok::Ge
            }
            ('>', _) => Tok::Gt,
            ('%', _) => Tok::Percent,
            ('|', _) => Tok::Pipe,
            ('&', _) => Tok::Amp,
            ('^', _) => Tok::Caret,
            ('(', _) => {
                self.bracket_depth += 1;
                Tok::LParen
            }
            (')', _) => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Tok::RParen
            }
            ('[', _) => {
                self.bracket_depth += 1;
                Tok::LBracket
            }
            (']', _) => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Tok::RBracket
            }
            ('{', _) => {
                self.bracket_depth += 1;
                Tok::LBrace
            }
            ('}', _) => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Tok::RBrace
            }
            (',', _) => Tok::Comma,
            (':', _) => Tok::Colon,
            ('.', _) => Tok::Dot,
            (other, _) => return Err(self.err(format!("unexpected character '{other}'"))),
        };
        self.push(tok);
        Ok(())
    }
}

/// Split an f-string body into literal and expression parts. `{{`/`}}`
/// escape braces; format specs after `:` at top level are dropped.
fn split_fstring(raw: &str, line: usize) -> Result<Vec<RawFsPart>, SandboxError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '{' => {
                if !literal.is_empty() {
                    parts.push(RawFsPart::Literal(std::mem::take(&mut literal)));
                }
                let mut depth = 1usize;
                let mut expr = String::new();
                i += 1;
                while i < chars.len() && depth > 0 {
                    let c = chars[i];
                    match c {
                        '{' | '[' | '(' => depth += 1,
                        '}' | ']' | ')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    expr.push(c);
                    i += 1;
                }
                if depth != 0 {
                    return Err(SandboxError::SyntaxError {
                        line,
                        message: "unbalanced braces in f-string".to_string(),
                    });
                }
                i += 1; // consume the closing brace
                // Drop a top-level format spec
                let expr_part = match top_level_colon(&expr) {
                    Some(pos) => expr[..pos].to_string(),
                    None => expr,
                };
                if expr_part.trim().is_empty() {
                    return Err(SandboxError::SyntaxError {
                        line,
                        message: "empty expression in f-string".to_string(),
                    });
                }
                parts.push(RawFsPart::Expr(expr_part));
            }
            '}' => {
                return Err(SandboxError::SyntaxError {
                    line,
                    message: "single '}' in f-string".to_string(),
                });
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        parts.push(RawFsPart::Literal(literal));
    }
    Ok(parts)
}

fn top_level_colon(expr: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_str: Option<char> = None;
    for (i, c) in expr.char_indices() {
        match (in_str, c) {
            (Some(q), c) if c == q => in_str = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => in_str = Some(c),
            (None, '{') | (None, '[') | (None, '(') => depth += 1,
            (None, '}') | (None, ']') | (None, ')') => depth = depth.saturating_sub(1),
            (None, ':') if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        Lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn simple_assignment() {
        assert_eq!(
            toks("x = 1\n"),
            vec![
                Tok::Name("x".into()),
                Tok::Assign,
                Tok::Int(1),
                Tok::Newline,
                Tok::EndOfFile
            ]
        );
    }

    #[test]
    fn indentation_produces_indent_dedent() {
        let tokens = toks("if x:\n    y = 1\nz = 2\n");
        assert!(tokens.contains(&Tok::Indent));
        assert!(tokens.contains(&Tok::Dedent));
    }

    #[test]
    fn nested_blocks_close_at_eof() {
        let tokens = toks("def f():\n    if x:\n        return 1");
        let dedents = tokens.iter().filter(|t| **t == Tok::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(tokens.last(), Some(&Tok::EndOfFile));
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let tokens = toks("x = 1\n\n# comment\n   \ny = 2\n");
        let newlines = tokens.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn brackets_suppress_newlines() {
        let tokens = toks("x = [\n    1,\n    2,\n]\n");
        let newlines = tokens.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!tokens.contains(&Tok::Indent));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            toks(r#"s = "a\nb""#)[2],
            Tok::Str("a\nb".to_string())
        );
        assert_eq!(toks(r"s = r'a\nb'")[2], Tok::Str("a\\nb".to_string()));
    }

    #[test]
    fn triple_quoted_strings_span_lines() {
        let tokens = toks("s = \"\"\"line1\nline2\"\"\"\n");
        assert_eq!(tokens[2], Tok::Str("line1\nline2".to_string()));
    }

    #[test]
    fn fstring_parts() {
        let tokens = toks(r#"s = f"v={x + 1}!""#);
        match &tokens[2] {
            Tok::FString(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], RawFsPart::Literal("v=".to_string()));
                assert_eq!(parts[1], RawFsPart::Expr("x + 1".to_string()));
                assert_eq!(parts[2], RawFsPart::Literal("!".to_string()));
            }
            other => panic!("expected f-string, got {other:?}"),
        }
    }

    #[test]
    fn fstring_format_spec_is_dropped() {
        let tokens = toks(r#"s = f"{x:.2f}""#);
        match &tokens[2] {
            Tok::FString(parts) => assert_eq!(parts[0], RawFsPart::Expr("x".to_string())),
            other => panic!("expected f-string, got {other:?}"),
        }
    }

    #[test]
    fn numbers() {
        assert_eq!(toks("x = 42\n")[2], Tok::Int(42));
        assert_eq!(toks("x = 3.5\n")[2], Tok::Float(3.5));
        assert_eq!(toks("x = 1e3\n")[2], Tok::Float(1000.0));
    }

    #[test]
    fn operators() {
        assert_eq!(
            toks("x ** 2 // 3 != y\n"),
            vec![
                Tok::Name("x".into()),
                Tok::DoubleStar,
                Tok::Int(2),
                Tok::DoubleSlash,
                Tok::Int(3),
                Tok::NotEq,
                Tok::Name("y".into()),
                Tok::Newline,
                Tok::EndOfFile
            ]
        );
    }

    #[test]
    fn bad_dedent_is_an_error() {
        assert!(Lexer::tokenize("if x:\n    y = 1\n  z = 2\n").is_err());
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(Lexer::tokenize("x = 'oops\n").is_err());
    }
}
