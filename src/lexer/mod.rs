//! # Lexer
//!
//! Hand-written scanner producing [`Token`]s with source spans. The
//! scanner never fails hard: unknown characters are reported and
//! skipped so the parser can keep going.

pub mod token;

pub use token::{keyword, SourceSpan, Token, TokenKind};

/// Scans source text into tokens.
pub struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
    /// Characters the scanner had to skip, with their locations
    pub skipped: Vec<(char, SourceSpan)>,
}

impl<'a> Scanner<'a> {
    /// New scanner over a source string.
    pub fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            skipped: Vec::new(),
        }
    }

    /// Scan the whole input.
    pub fn scan_tokens(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                break;
            }
        }
        tokens
    }

    fn peek(&self) -> u8 {
        self.src.get(self.pos).copied().unwrap_or(0)
    }

    fn peek2(&self) -> u8 {
        self.src.get(self.pos + 1).copied().unwrap_or(0)
    }

    fn bump(&mut self) -> u8 {
        let c = self.peek();
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        c
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b'/' if self.peek2() == b'/' => {
                    while self.peek() != b'\n' && self.peek() != 0 {
                        self.bump();
                    }
                }
                b'/' if self.peek2() == b'*' => {
                    self.bump();
                    self.bump();
                    while !(self.peek() == b'*' && self.peek2() == b'/') && self.peek() != 0 {
                        self.bump();
                    }
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }
    }

    fn span_here(&self, len: u32) -> SourceSpan {
        SourceSpan::new(self.line, self.col, len)
    }

    fn next_token(&mut self) -> Token {
        self.skip_trivia();
        let span = self.span_here(1);
        let c = self.peek();

        if c == 0 {
            return Token {
                kind: TokenKind::Eof,
                span,
            };
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            return self.ident_or_keyword();
        }
        if c.is_ascii_digit() {
            return self.number();
        }
        if c == b'\'' || c == b'"' {
            return self.string(c);
        }

        self.bump();
        let two = |s: &mut Self, kind| {
            s.bump();
            kind
        };
        let kind = match (c, self.peek()) {
            (b'=', b'=') => two(self, TokenKind::Eq),
            (b'!', b'=') => two(self, TokenKind::NotEq),
            (b'<', b'=') => two(self, TokenKind::LtEq),
            (b'>', b'=') => two(self, TokenKind::GtEq),
            (b'<', b'<') => two(self, TokenKind::Shl),
            (b'>', b'>') => two(self, TokenKind::Shr),
            (b'&', b'&') => two(self, TokenKind::AndAnd),
            (b'|', b'|') => two(self, TokenKind::OrOr),
            (b'+', b'+') => two(self, TokenKind::PlusPlus),
            (b'-', b'-') => two(self, TokenKind::MinusMinus),
            (b'(', _) => TokenKind::LParen,
            (b')', _) => TokenKind::RParen,
            (b'{', _) => TokenKind::LBrace,
            (b'}', _) => TokenKind::RBrace,
            (b'[', _) => TokenKind::LBracket,
            (b']', _) => TokenKind::RBracket,
            (b',', _) => TokenKind::Comma,
            (b';', _) => TokenKind::Semicolon,
            (b':', _) => TokenKind::Colon,
            (b'.', _) => TokenKind::Dot,
            (b'?', _) => TokenKind::Question,
            (b'+', _) => TokenKind::Plus,
            (b'-', _) => TokenKind::Minus,
            (b'*', _) => TokenKind::Star,
            (b'/', _) => TokenKind::Slash,
            (b'%', _) => TokenKind::Percent,
            (b'=', _) => TokenKind::Assign,
            (b'<', _) => TokenKind::Lt,
            (b'>', _) => TokenKind::Gt,
            (b'!', _) => TokenKind::Not,
            (b'&', _) => TokenKind::Amp,
            (b'|', _) => TokenKind::Pipe,
            (b'^', _) => TokenKind::Caret,
            (b'~', _) => TokenKind::Tilde,
            _ => {
                self.skipped.push((c as char, span));
                return self.next_token();
            }
        };
        Token { kind, span }
    }

    fn ident_or_keyword(&mut self) -> Token {
        let span = self.span_here(0);
        let start = self.pos;
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or("")
            .to_string();
        let span = SourceSpan::new(span.line, span.col, text.len() as u32);
        let kind = keyword(&text).unwrap_or(TokenKind::Ident(text));
        Token { kind, span }
    }

    fn number(&mut self) -> Token {
        let span = self.span_here(0);
        let start = self.pos;

        if self.peek() == b'0' && (self.peek2() == b'x' || self.peek2() == b'X') {
            self.bump();
            self.bump();
            while self.peek().is_ascii_hexdigit() {
                self.bump();
            }
            let text = std::str::from_utf8(&self.src[start + 2..self.pos]).unwrap_or("0");
            let v = u64::from_str_radix(text, 16).unwrap_or(0);
            return Token {
                kind: TokenKind::Int(v),
                span: SourceSpan::new(span.line, span.col, (self.pos - start) as u32),
            };
        }

        let mut is_float = false;
        while self.peek().is_ascii_digit() {
            self.bump();
        }
        if self.peek() == b'.' && self.peek2().is_ascii_digit() {
            is_float = true;
            self.bump();
            while self.peek().is_ascii_digit() {
                self.bump();
            }
        }
        if self.peek() == b'f' {
            // trailing f32 suffix, consumed; the parser narrows the type
            is_float = true;
            self.bump();
        }

        let end = if self.src.get(self.pos.wrapping_sub(1)) == Some(&b'f') {
            self.pos - 1
        } else {
            self.pos
        };
        let text = std::str::from_utf8(&self.src[start..end]).unwrap_or("0");
        let span = SourceSpan::new(span.line, span.col, (self.pos - start) as u32);
        let kind = if is_float {
            TokenKind::Float(text.parse().unwrap_or(0.0))
        } else {
            TokenKind::Int(text.parse().unwrap_or(0))
        };
        Token { kind, span }
    }

    fn string(&mut self, quote: u8) -> Token {
        let span = self.span_here(0);
        self.bump();
        let mut out = String::new();
        while self.peek() != quote && self.peek() != 0 {
            let c = self.bump();
            if c == b'\\' {
                let esc = self.bump();
                out.push(match esc {
                    b'n' => '\n',
                    b't' => '\t',
                    b'r' => '\r',
                    b'0' => '\0',
                    other => other as char,
                });
            } else {
                out.push(c as char);
            }
        }
        self.bump();
        let span = SourceSpan::new(span.line, span.col, out.len() as u32 + 2);
        Token {
            kind: TokenKind::Str(out),
            span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Scanner::new(src).scan_tokens().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scans_arithmetic() {
        assert_eq!(
            kinds("2 + 3 * 4"),
            vec![
                TokenKind::Int(2),
                TokenKind::Plus,
                TokenKind::Int(3),
                TokenKind::Star,
                TokenKind::Int(4),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn scans_keywords_and_idents() {
        assert_eq!(
            kinds("export function main"),
            vec![
                TokenKind::Export,
                TokenKind::Function,
                TokenKind::Ident("main".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn scans_two_char_operators() {
        assert_eq!(
            kinds("a <= b && c != d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::LtEq,
                TokenKind::Ident("b".into()),
                TokenKind::AndAnd,
                TokenKind::Ident("c".into()),
                TokenKind::NotEq,
                TokenKind::Ident("d".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn skips_comments() {
        assert_eq!(
            kinds("1 // line\n/* block */ 2"),
            vec![TokenKind::Int(1), TokenKind::Int(2), TokenKind::Eof]
        );
    }

    #[test]
    fn scans_floats_and_hex() {
        assert_eq!(
            kinds("1.5 0x10"),
            vec![TokenKind::Float(1.5), TokenKind::Int(16), TokenKind::Eof]
        );
    }

    #[test]
    fn tracks_lines() {
        let toks = Scanner::new("a\nbb").scan_tokens();
        assert_eq!(toks[0].span.line, 1);
        assert_eq!(toks[1].span.line, 2);
        assert_eq!(toks[1].span.col, 1);
    }
}
