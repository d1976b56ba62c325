//! Indentation-aware tokenizer.
//!
//! Produces `Indent`/`Dedent`/`Newline` tokens the way Python's tokenizer
//! does. Newlines inside brackets are ignored, as are blank and comment-only
//! lines.

use crate::core::{CompileError, CompileResult, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Str(String),
    // Keywords
    Def,
    Class,
    Return,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Pass,
    And,
    Or,
    Not,
    True,
    False,
    None,
    Yield,
    // Punctuation and operators
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Dot,
    Arrow,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Amp,
    Pipe,
    Caret,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub span: Span,
}

pub fn tokenize(source: &str) -> CompileResult<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    indents: Vec<u32>,
    depth: u32,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            indents: vec![0],
            depth: 0,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn push(&mut self, tok: Tok, span: Span) {
        self.tokens.push(Token { tok, span });
    }

    fn error(&self, span: Span, message: impl Into<String>) -> CompileError {
        CompileError::Parse {
            span,
            message: message.into(),
        }
    }

    fn run(mut self) -> CompileResult<Vec<Token>> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if self.handle_indentation()? {
                    continue;
                }
                at_line_start = false;
            }

            let Some(ch) = self.peek() else { break };
            match ch {
                '\n' => {
                    let span = self.span();
                    self.advance();
                    if self.depth == 0 {
                        self.push(Tok::Newline, span);
                        at_line_start = true;
                    }
                }
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.advance();
                    self.advance();
                }
                c if c.is_ascii_digit() => self.lex_number()?,
                c if c.is_alphabetic() || c == '_' => self.lex_word(),
                '"' | '\'' => self.lex_string(ch)?,
                _ => self.lex_operator()?,
            }
        }

        let span = self.span();
        if !matches!(
            self.tokens.last(),
            Some(Token { tok: Tok::Newline, .. }) | None
        ) {
            self.push(Tok::Newline, span);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, span);
        }
        self.push(Tok::Eof, span);
        Ok(self.tokens)
    }

    /// Measure the indentation of a new logical line. Returns true when the
    /// line was blank or comment-only and has been consumed.
    fn handle_indentation(&mut self) -> CompileResult<bool> {
        let mut width = 0u32;
        while let Some(ch) = self.peek() {
            match ch {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\r' => {}
                _ => break,
            }
            self.advance();
        }

        match self.peek() {
            None => return Ok(true),
            Some('\n') => {
                self.advance();
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.advance();
                }
                return Ok(true);
            }
            _ => {}
        }

        let span = self.span();
        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent, span);
        } else {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent, span);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(self.error(span, "inconsistent dedent"));
            }
        }
        Ok(false)
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn lex_number(&mut self) -> CompileResult<()> {
        let span = self.span();
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                if ch != '_' {
                    text.push(ch);
                }
                self.advance();
            } else {
                break;
            }
        }
        let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16)
        } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
            i64::from_str_radix(bin, 2)
        } else {
            text.parse::<i64>()
        };
        let value = parsed.map_err(|_| self.error(span, format!("invalid integer literal '{}'", text)))?;
        self.push(Tok::Int(value), span);
        Ok(())
    }

    fn lex_word(&mut self) {
        let span = self.span();
        let mut word = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        let tok = match word.as_str() {
            "def" => Tok::Def,
            "class" => Tok::Class,
            "return" => Tok::Return,
            "if" => Tok::If,
            "elif" => Tok::Elif,
            "else" => Tok::Else,
            "while" => Tok::While,
            "for" => Tok::For,
            "in" => Tok::In,
            "break" => Tok::Break,
            "continue" => Tok::Continue,
            "pass" => Tok::Pass,
            "and" => Tok::And,
            "or" => Tok::Or,
            "not" => Tok::Not,
            "True" => Tok::True,
            "False" => Tok::False,
            "None" => Tok::None,
            "yield" => Tok::Yield,
            _ => Tok::Name(word),
        };
        self.push(tok, span);
    }

    fn lex_string(&mut self, quote: char) -> CompileResult<()> {
        let span = self.span();
        self.advance();
        let mut text = String::new();
        loop {
            match self.advance() {
                Some(ch) if ch == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some(other) => text.push(other),
                    None => return Err(self.error(span, "unterminated string literal")),
                },
                Some('\n') | None => return Err(self.error(span, "unterminated string literal")),
                Some(ch) => text.push(ch),
            }
        }
        self.push(Tok::Str(text), span);
        Ok(())
    }

    fn lex_operator(&mut self) -> CompileResult<()> {
        let span = self.span();
        let ch = self.peek().unwrap_or('\0');
        let next = self.peek_at(1);
        let (tok, width) = match (ch, next) {
            ('-', Some('>')) => (Tok::Arrow, 2),
            ('=', Some('=')) => (Tok::EqEq, 2),
            ('!', Some('=')) => (Tok::NotEq, 2),
            ('<', Some('=')) => (Tok::Le, 2),
            ('>', Some('=')) => (Tok::Ge, 2),
            ('/', Some('/')) => (Tok::DoubleSlash, 2),
            ('+', Some('=')) => (Tok::PlusAssign, 2),
            ('-', Some('=')) => (Tok::MinusAssign, 2),
            ('*', Some('=')) => (Tok::StarAssign, 2),
            ('(', _) => (Tok::LParen, 1),
            (')', _) => (Tok::RParen, 1),
            ('[', _) => (Tok::LBracket, 1),
            (']', _) => (Tok::RBracket, 1),
            (':', _) => (Tok::Colon, 1),
            (',', _) => (Tok::Comma, 1),
            ('.', _) => (Tok::Dot, 1),
            ('=', _) => (Tok::Assign, 1),
            ('+', _) => (Tok::Plus, 1),
            ('-', _) => (Tok::Minus, 1),
            ('*', _) => (Tok::Star, 1),
            ('/', _) => (Tok::Slash, 1),
            ('&', _) => (Tok::Amp, 1),
            ('|', _) => (Tok::Pipe, 1),
            ('^', _) => (Tok::Caret, 1),
            ('<', _) => (Tok::Lt, 1),
            ('>', _) => (Tok::Gt, 1),
            _ => return Err(self.error(span, format!("unexpected character '{}'", ch))),
        };
        for _ in 0..width {
            self.advance();
        }
        match tok {
            Tok::LParen | Tok::LBracket => self.depth += 1,
            Tok::RParen | Tok::RBracket => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.push(tok, span);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn test_indent_dedent() {
        let toks = kinds("def f():\n    return 1\n");
        assert_eq!(
            toks,
            vec![
                Tok::Def,
                Tok::Name("f".to_string()),
                Tok::LParen,
                Tok::RParen,
                Tok::Colon,
                Tok::Newline,
                Tok::Indent,
                Tok::Return,
                Tok::Int(1),
                Tok::Newline,
                Tok::Dedent,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_blank_and_comment_lines_ignored() {
        let toks = kinds("x = 1\n\n   # note\ny = 2  # trailing\n");
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 2);
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn test_newlines_inside_brackets() {
        let toks = kinds("f(1,\n  2)\n");
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 1);
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn test_operators() {
        let toks = kinds("a // b -> c <= d != e += 1\n");
        assert!(toks.contains(&Tok::DoubleSlash));
        assert!(toks.contains(&Tok::Arrow));
        assert!(toks.contains(&Tok::Le));
        assert!(toks.contains(&Tok::NotEq));
        assert!(toks.contains(&Tok::PlusAssign));
    }

    #[test]
    fn test_inconsistent_dedent_is_error() {
        let err = tokenize("def f():\n        x = 1\n    y = 2\n").unwrap_err();
        assert!(err.to_string().contains("inconsistent dedent"));
    }

    #[test]
    fn test_spans() {
        let tokens = tokenize("x = 1\nyy = 22\n").expect("tokenize");
        let yy = tokens
            .iter()
            .find(|t| t.tok == Tok::Name("yy".to_string()))
            .expect("yy");
        assert_eq!(yy.span, Span::new(2, 1));
        let lit = tokens.iter().find(|t| t.tok == Tok::Int(22)).expect("22");
        assert_eq!(lit.span, Span::new(2, 6));
    }
}
