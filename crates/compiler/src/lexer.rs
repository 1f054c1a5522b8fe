//! Indentation-tracking lexer.
//!
//! Produces one [`Token`] at a time from a two-codepoint lookahead buffer
//! over the source text. Indentation is turned into explicit `NL`/`INDENT`/
//! `DEDENT` tokens here rather than in the parser: at each physical newline
//! the lexer captures the new line's leading run of spacing characters and
//! compares it against a stack of indentation levels seen so far.
//!
//! `INDENT` records the indent level being left behind (what a later
//! `DEDENT` must return to, to close the block this `INDENT` opened).
//! `DEDENT` records the indent level being returned to. A single `DEDENT`
//! token can close several nested blocks at once -- the parser, not the
//! lexer, is responsible for propagating one `DEDENT` outward through every
//! enclosing block whose opening indent it doesn't yet match (see
//! `Parser::parse_indented_block`).

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Nl,
    /// Carries the indent level of the block being opened (i.e. the indent
    /// a matching `DEDENT` must report to close it).
    Indent(String),
    /// Carries the indent level now current.
    Dedent(String),
    Eoi,
    Id(String),
    Int(i32),
    Real(f64),
    Str(String),
    Sym(String),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Nl => write!(f, "newline"),
            TokenKind::Indent(_) => write!(f, "indent"),
            TokenKind::Dedent(_) => write!(f, "dedent"),
            TokenKind::Eoi => write!(f, "end of input"),
            TokenKind::Id(s) => write!(f, "identifier '{s}'"),
            TokenKind::Int(n) => write!(f, "int '{n}'"),
            TokenKind::Real(n) => write!(f, "real '{n}'"),
            TokenKind::Str(s) => write!(f, "string {s:?}"),
            TokenKind::Sym(s) => write!(f, "'{s}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

/// Covers both lexer and parser failures, as §7 of the design specifies --
/// fatal at the first offending character or token, always carrying the
/// source line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error: {} (line {})", self.message, self.line)
    }
}

impl std::error::Error for ParseError {}

fn is_id_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_id_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn digit_value(c: char) -> Option<u32> {
    c.to_digit(36)
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    indent_stack: Vec<String>,
    at_line_start: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Lexer {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            indent_stack: vec![String::new()],
            at_line_start: true,
        }
    }

    fn cur(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 2).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.cur();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError { message: message.into(), line: self.line }
    }

    /// Produces the next token, skipping blank lines and inline whitespace
    /// transparently.
    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        loop {
            if self.at_line_start {
                let indent = self.read_indent_prefix();
                if self.cur() == Some('\n') {
                    // Blank line: its indentation doesn't count.
                    self.bump();
                    self.line += 1;
                    continue;
                }
                self.at_line_start = false;
                let line = self.line;
                let kind = self.indentation(indent)?;
                return Ok(Token { kind, line });
            }
            match self.cur() {
                None => {
                    if self.indent_stack.len() > 1 {
                        let line = self.line;
                        let kind = self.indentation(String::new())?;
                        return Ok(Token { kind, line });
                    }
                    return Ok(Token { kind: TokenKind::Eoi, line: self.line });
                }
                Some('\n') => {
                    self.bump();
                    self.line += 1;
                    self.at_line_start = true;
                    continue;
                }
                Some(c) if c == ' ' || c == '\t' => {
                    self.bump();
                    continue;
                }
                Some(c) if c.is_ascii_digit() => return self.lex_number(),
                Some(c) if c == '"' || c == '\'' => return self.lex_string(c),
                Some(c) if is_id_start(c) => return self.lex_id(),
                Some(_) => return self.lex_symbol(),
            }
        }
    }

    fn read_indent_prefix(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.cur() {
            if c == ' ' || c == '\t' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        s
    }

    /// Compares `new_indent` against the indent stack, returning the right
    /// token kind or an "invalid indentation" error when the two indents
    /// share no common prefix relationship.
    fn indentation(&mut self, new_indent: String) -> Result<TokenKind, ParseError> {
        let cur_indent = self.indent_stack.last().unwrap().clone();
        if new_indent == cur_indent {
            Ok(TokenKind::Nl)
        } else if new_indent.starts_with(&cur_indent) {
            self.indent_stack.push(new_indent);
            Ok(TokenKind::Indent(cur_indent))
        } else if cur_indent.starts_with(&new_indent) {
            while self.indent_stack.len() > 1 && self.indent_stack.last().unwrap() != &new_indent {
                self.indent_stack.pop();
            }
            if self.indent_stack.last().unwrap() != &new_indent {
                return Err(self.error("invalid indentation"));
            }
            Ok(TokenKind::Dedent(new_indent))
        } else {
            Err(self.error("invalid indentation"))
        }
    }

    fn lex_id(&mut self) -> Result<Token, ParseError> {
        let line = self.line;
        let mut s = String::new();
        while let Some(c) = self.cur() {
            if is_id_continue(c) {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Ok(Token { kind: TokenKind::Id(s), line })
    }

    fn lex_number(&mut self) -> Result<Token, ParseError> {
        let line = self.line;
        if self.cur() == Some('0') && matches!(self.peek(), Some('b') | Some('o') | Some('x')) {
            let base = match self.peek().unwrap() {
                'b' => 2,
                'o' => 8,
                'x' => 16,
                _ => unreachable!(),
            };
            self.bump();
            self.bump();
            let start = self.pos;
            let mut acc: i64 = 0;
            let mut any = false;
            while let Some(c) = self.cur() {
                match digit_value(c) {
                    Some(d) if (d as u32) < base => {
                        acc = acc * base as i64 + d as i64;
                        if acc > i64::from(u32::MAX) {
                            return Err(self.error("numeric literal overflow"));
                        }
                        any = true;
                        self.bump();
                    }
                    _ => break,
                }
            }
            if !any || self.pos == start {
                return Err(self.error("malformed numeric literal"));
            }
            if acc > i64::from(i32::MAX) && acc > i64::from(u32::MAX) {
                return Err(self.error("numeric literal overflow"));
            }
            // Bases other than 10 are written as unsigned magnitudes and
            // wrap into i32 the same way the VM's own arithmetic wraps.
            let as_i32 = acc as u32 as i32;
            return Ok(Token { kind: TokenKind::Int(as_i32), line });
        }

        let mut digits = String::new();
        while let Some(c) = self.cur() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.bump();
            } else {
                break;
            }
        }

        let mut is_real = false;
        if self.cur() == Some('.') && matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            is_real = true;
            digits.push('.');
            self.bump();
            while let Some(c) = self.cur() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }

        if matches!(self.cur(), Some('e') | Some('E')) {
            let has_sign = matches!(self.peek(), Some('+') | Some('-'));
            let exp_digit_ahead = if has_sign {
                matches!(self.peek2(), Some(c) if c.is_ascii_digit())
            } else {
                matches!(self.peek(), Some(c) if c.is_ascii_digit())
            };
            if exp_digit_ahead {
                is_real = true;
                digits.push('e');
                self.bump();
                if has_sign {
                    digits.push(self.cur().unwrap());
                    self.bump();
                }
                while let Some(c) = self.cur() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }

        if is_real {
            let v: f64 = digits.parse().map_err(|_| self.error("malformed numeric literal"))?;
            Ok(Token { kind: TokenKind::Real(v), line })
        } else {
            match digits.parse::<i32>() {
                Ok(v) => Ok(Token { kind: TokenKind::Int(v), line }),
                Err(_) => Err(self.error("numeric literal overflow")),
            }
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<Token, ParseError> {
        let line = self.line;
        self.bump();
        let mut s = String::new();
        loop {
            match self.cur() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    self.lex_escape(&mut s)?;
                }
                Some(c) => {
                    s.push(c);
                    self.bump();
                }
            }
        }
        Ok(Token { kind: TokenKind::Str(s), line })
    }

    fn lex_escape(&mut self, out: &mut String) -> Result<(), ParseError> {
        let c = self.cur().ok_or_else(|| self.error("unterminated string"))?;
        match c {
            'n' => {
                out.push('\n');
                self.bump();
            }
            'r' => {
                out.push('\r');
                self.bump();
            }
            't' => {
                out.push('\t');
                self.bump();
            }
            '\\' => {
                out.push('\\');
                self.bump();
            }
            '\'' => {
                out.push('\'');
                self.bump();
            }
            '"' => {
                out.push('"');
                self.bump();
            }
            'u' => {
                self.bump();
                let cp = self.read_hex_digits(4)?;
                out.push(char::from_u32(cp).ok_or_else(|| self.error("invalid unicode escape"))?);
            }
            'U' => {
                self.bump();
                let cp = self.read_hex_digits(6)?;
                out.push(char::from_u32(cp).ok_or_else(|| self.error("invalid unicode escape"))?);
            }
            _ => return Err(self.error(format!("unknown escape sequence '\\{c}'"))),
        }
        Ok(())
    }

    fn read_hex_digits(&mut self, n: usize) -> Result<u32, ParseError> {
        let mut v: u32 = 0;
        for _ in 0..n {
            let c = self.cur().ok_or_else(|| self.error("unterminated string"))?;
            let d = c.to_digit(16).ok_or_else(|| self.error("invalid unicode escape"))?;
            v = v * 16 + d;
            self.bump();
        }
        Ok(v)
    }

    fn lex_symbol(&mut self) -> Result<Token, ParseError> {
        let line = self.line;
        let c = self.bump().unwrap();
        let two = match (c, self.cur()) {
            ('=', Some('=')) => Some("=="),
            ('!', Some('=')) => Some("!="),
            ('<', Some('=')) => Some("<="),
            ('>', Some('=')) => Some(">="),
            _ => None,
        };
        if let Some(sym) = two {
            self.bump();
            return Ok(Token { kind: TokenKind::Sym(sym.to_string()), line });
        }
        const SINGLE: &str = "=,():+-*/^%<>[].;";
        if SINGLE.contains(c) {
            Ok(Token { kind: TokenKind::Sym(c.to_string()), line })
        } else {
            Err(self.error(format!("unexpected character '{c}'")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(src: &str) -> Vec<TokenKind> {
        let mut lex = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let t = lex.next_token().unwrap();
            let done = t.kind == TokenKind::Eoi;
            out.push(t.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn lexes_simple_arithmetic() {
        let kinds = tokenize("1 + 2 * 3\n");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Int(1),
                TokenKind::Sym("+".into()),
                TokenKind::Int(2),
                TokenKind::Sym("*".into()),
                TokenKind::Int(3),
                TokenKind::Nl,
                TokenKind::Eoi,
            ]
        );
    }

    #[test]
    fn tracks_indent_and_dedent() {
        let kinds = tokenize("if true:\n    log(1)\nlog(2)\n");
        assert!(matches!(kinds[5], TokenKind::Indent(_)));
        assert!(kinds.contains(&TokenKind::Dedent(String::new())));
    }

    #[test]
    fn rejects_incompatible_dedent() {
        let mut lex = Lexer::new("if true:\n    log(1)\n  log(2)\n");
        let mut err = None;
        loop {
            match lex.next_token() {
                Ok(t) if t.kind == TokenKind::Eoi => break,
                Ok(_) => {}
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        assert!(err.is_some());
    }

    #[test]
    fn lexes_bases_and_floats() {
        assert_eq!(tokenize("0xFF")[0], TokenKind::Int(255));
        assert_eq!(tokenize("0b101")[0], TokenKind::Int(5));
        assert_eq!(tokenize("0o17")[0], TokenKind::Int(15));
        assert_eq!(tokenize("1.5e2")[0], TokenKind::Real(150.0));
    }

    #[test]
    fn lexes_string_escapes() {
        let kinds = tokenize(r#""a\nbA""#);
        assert_eq!(kinds[0], TokenKind::Str("a\nbA".to_string()));
    }

    #[test]
    fn two_char_symbols_win_over_one_char() {
        assert_eq!(tokenize("==")[0], TokenKind::Sym("==".into()));
        assert_eq!(tokenize("!=")[0], TokenKind::Sym("!=".into()));
    }
}
