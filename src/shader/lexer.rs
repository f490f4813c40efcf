// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Byte-oriented lexer for shader source.
//!
//! Preprocessor lines are skipped whole; the subset has no macros.

use super::Diagnostic;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Lexeme {
    Ident(String),
    Int { value: u64, unsigned: bool },
    Float(f32),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub(crate) lexeme: Lexeme,
    pub(crate) line: u32,
    pub(crate) col: u32,
}

/// Longest first, so `<<=` wins over `<<` and `<`.
const PUNCTUATION: &[&str] = &[
    "<<=", ">>=", "->", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "==", "!=",
    "<=", ">=", "&&", "||", "<<", ">>", "::", "+", "-", "*", "/", "%", "=", "<", ">", "!", "&",
    "|", "^", "~", "(", ")", "{", "}", "[", "]", ",", ";", ".", "?", ":",
];

pub(crate) struct Lexer<'src> {
    source: &'src [u8],
    pos: usize,
    line: u32,
    line_start: usize,
    /// No token has been produced yet on the current line.
    at_line_start: bool,
}

impl<'src> Lexer<'src> {
    pub(crate) fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
            line: 1,
            line_start: 0,
            at_line_start: true,
        }
    }

    pub(crate) fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.lexeme == Lexeme::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn col(&self) -> u32 {
        (self.pos - self.line_start) as u32 + 1
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(self.line, self.col(), message)
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.source.get(self.pos + ahead).copied()
    }

    fn newline(&mut self) {
        self.line += 1;
        self.line_start = self.pos + 1;
        self.at_line_start = true;
    }

    fn next_token(&mut self) -> Result<Token, Diagnostic> {
        self.skip_whitespace_and_comments()?;
        let (line, col) = (self.line, self.col());
        let Some(ch) = self.peek(0) else {
            return Ok(Token {
                lexeme: Lexeme::Eof,
                line,
                col,
            });
        };
        self.at_line_start = false;
        let lexeme = if is_ident_start(ch) {
            self.scan_ident()
        } else if ch.is_ascii_digit()
            || (ch == b'.' && self.peek(1).is_some_and(|c| c.is_ascii_digit()))
        {
            self.scan_number()?
        } else {
            self.scan_symbol()?
        };
        Ok(Token { lexeme, line, col })
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), Diagnostic> {
        loop {
            while let Some(ch) = self.peek(0) {
                if !ch.is_ascii_whitespace() {
                    break;
                }
                if ch == b'\n' {
                    self.newline();
                }
                self.pos += 1;
            }
            match (self.peek(0), self.peek(1)) {
                (Some(b'#'), _) if self.at_line_start => {
                    while self.peek(0).is_some_and(|c| c != b'\n') {
                        self.pos += 1;
                    }
                }
                (Some(b'/'), Some(b'/')) => {
                    while self.peek(0).is_some_and(|c| c != b'\n') {
                        self.pos += 1;
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    let open = self.error("unterminated comment");
                    self.pos += 2;
                    loop {
                        match (self.peek(0), self.peek(1)) {
                            (None, _) => return Err(open),
                            (Some(b'*'), Some(b'/')) => {
                                self.pos += 2;
                                break;
                            }
                            (Some(b'\n'), _) => {
                                self.newline();
                                // a comment does not start a line of code
                                self.at_line_start = false;
                                self.pos += 1;
                            }
                            _ => self.pos += 1,
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn scan_ident(&mut self) -> Lexeme {
        let start = self.pos;
        while self.peek(0).is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        Lexeme::Ident(String::from_utf8_lossy(&self.source[start..self.pos]).into_owned())
    }

    fn scan_number(&mut self) -> Result<Lexeme, Diagnostic> {
        let start = self.pos;
        if self.peek(0) == Some(b'0') && matches!(self.peek(1), Some(b'x' | b'X')) {
            self.pos += 2;
            let digits = self.pos;
            while self.peek(0).is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let text = String::from_utf8_lossy(&self.source[digits..self.pos]).into_owned();
            let value = u64::from_str_radix(&text, 16)
                .map_err(|_| self.error(format!("invalid hexadecimal literal '0x{text}'")))?;
            let unsigned = self.take_suffix(b"uU");
            self.reject_trailing_ident()?;
            return Ok(Lexeme::Int { value, unsigned });
        }

        let mut is_float = false;
        while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek(0) == Some(b'.') {
            is_float = true;
            self.pos += 1;
            while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(0), Some(b'e' | b'E')) {
            let exponent_digit = match self.peek(1) {
                Some(b'+' | b'-') => self.peek(2),
                other => other,
            };
            if exponent_digit.is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += if matches!(self.peek(1), Some(b'+' | b'-')) { 2 } else { 1 };
                while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        let float_suffix = self.take_suffix(b"fFhH");
        let unsigned = !float_suffix && !is_float && self.take_suffix(b"uU");
        self.reject_trailing_ident()?;

        if is_float || float_suffix {
            let value = text
                .parse::<f32>()
                .map_err(|_| self.error(format!("invalid floating-point literal '{text}'")))?;
            Ok(Lexeme::Float(value))
        } else {
            let value = text
                .parse::<u64>()
                .ok()
                .filter(|v| *v <= u32::MAX as u64)
                .ok_or_else(|| self.error(format!("integer literal '{text}' is too large")))?;
            Ok(Lexeme::Int { value, unsigned })
        }
    }

    fn take_suffix(&mut self, accepted: &[u8]) -> bool {
        match self.peek(0) {
            Some(c) if accepted.contains(&c) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn reject_trailing_ident(&self) -> Result<(), Diagnostic> {
        match self.peek(0) {
            Some(c) if is_ident_continue(c) => Err(self.error(format!(
                "invalid suffix '{}' on numeric literal",
                c as char
            ))),
            _ => Ok(()),
        }
    }

    fn scan_symbol(&mut self) -> Result<Lexeme, Diagnostic> {
        let rest = &self.source[self.pos..];
        for &punct in PUNCTUATION {
            if rest.starts_with(punct.as_bytes()) {
                self.pos += punct.len();
                return Ok(Lexeme::Punct(punct));
            }
        }
        let ch = String::from_utf8_lossy(&rest[..1]).into_owned();
        Err(self.error(format!("unexpected character '{ch}'")))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Lexeme> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.lexeme)
            .collect()
    }

    #[test]
    fn skips_preprocessor_and_comments() {
        let toks = lex("#include <metal_stdlib>\n// hi\n/* a\n b */ using");
        assert_eq!(toks, vec![Lexeme::Ident("using".into()), Lexeme::Eof]);
    }

    #[test]
    fn numbers() {
        let toks = lex("1 2u 0x10 1.5f .5 3e2 1.");
        assert_eq!(
            toks,
            vec![
                Lexeme::Int { value: 1, unsigned: false },
                Lexeme::Int { value: 2, unsigned: true },
                Lexeme::Int { value: 16, unsigned: false },
                Lexeme::Float(1.5),
                Lexeme::Float(0.5),
                Lexeme::Float(300.0),
                Lexeme::Float(1.0),
                Lexeme::Eof,
            ]
        );
    }

    #[test]
    fn attribute_brackets_and_operators() {
        let toks = lex("a[[b]] <<= ->");
        assert_eq!(toks[1], Lexeme::Punct("["));
        assert_eq!(toks[2], Lexeme::Punct("["));
        assert_eq!(toks[4], Lexeme::Punct("]"));
        assert_eq!(toks[6], Lexeme::Punct("<<="));
        assert_eq!(toks[7], Lexeme::Punct("->"));
    }

    #[test]
    fn positions_and_errors() {
        let tokens = Lexer::new("\n  foo").tokenize().unwrap();
        assert_eq!((tokens[0].line, tokens[0].col), (2, 3));
        let err = Lexer::new("a $").tokenize().unwrap_err();
        assert_eq!((err.line, err.col), (1, 3));
        assert!(Lexer::new("12abc").tokenize().is_err());
    }
}
