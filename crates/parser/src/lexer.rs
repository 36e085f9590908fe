//! Hand-written lexer. Tracks 1-based line/column so parse errors can carry
//! a precise position (§4.1: "syntactic error surfaced as REJECT with
//! line/column").

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    IntLiteral(i128),
    /// (unscaled, scale) — e.g. `1.50` -> (150, 2).
    DecimalLiteral(i128, u32),

    KwIntent,
    KwGuard,
    KwSolve,
    KwVerify,
    KwAnd,
    KwOr,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semicolon,
    Dot,

    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    LtLt,
    GtGt,

    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src: src.as_bytes(), pos: 0, line: 1, column: 1 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c == b' ' || c == b'\t' || c == b'\r' || c == b'\n' => {
                    self.advance();
                }
                Some(b'#') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, (usize, usize, String)> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                tokens.push(Token { kind: TokenKind::Eof, line, column });
                break;
            };
            let kind = match c {
                b'(' => { self.advance(); TokenKind::LParen }
                b')' => { self.advance(); TokenKind::RParen }
                b'{' => { self.advance(); TokenKind::LBrace }
                b'}' => { self.advance(); TokenKind::RBrace }
                b'[' => { self.advance(); TokenKind::LBracket }
                b']' => { self.advance(); TokenKind::RBracket }
                b',' => { self.advance(); TokenKind::Comma }
                b':' => { self.advance(); TokenKind::Colon }
                b';' => { self.advance(); TokenKind::Semicolon }
                b'.' => { self.advance(); TokenKind::Dot }
                b'~' => { self.advance(); TokenKind::Tilde }
                b'^' => { self.advance(); TokenKind::Caret }
                b'+' => { self.advance(); TokenKind::Plus }
                b'-' => { self.advance(); TokenKind::Minus }
                b'*' => {
                    self.advance();
                    if self.peek() == Some(b'*') {
                        self.advance();
                        TokenKind::StarStar
                    } else {
                        TokenKind::Star
                    }
                }
                b'/' => {
                    self.advance();
                    if self.peek() == Some(b'/') {
                        self.advance();
                        TokenKind::SlashSlash
                    } else {
                        TokenKind::Slash
                    }
                }
                b'%' => { self.advance(); TokenKind::Percent }
                b'&' => {
                    self.advance();
                    if self.peek() == Some(b'&') {
                        self.advance();
                    }
                    TokenKind::Amp
                }
                b'|' => {
                    self.advance();
                    if self.peek() == Some(b'|') {
                        self.advance();
                    }
                    TokenKind::Pipe
                }
                b'<' => {
                    self.advance();
                    match self.peek() {
                        Some(b'=') => { self.advance(); TokenKind::Le }
                        Some(b'<') => { self.advance(); TokenKind::LtLt }
                        _ => TokenKind::Lt,
                    }
                }
                b'>' => {
                    self.advance();
                    match self.peek() {
                        Some(b'=') => { self.advance(); TokenKind::Ge }
                        Some(b'>') => { self.advance(); TokenKind::GtGt }
                        _ => TokenKind::Gt,
                    }
                }
                b'=' => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        TokenKind::EqEq
                    } else {
                        return Err((line, column, "expected '==' (single '=' is not a valid operator)".into()));
                    }
                }
                b'!' => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        TokenKind::NotEq
                    } else {
                        return Err((line, column, "expected '!=' after '!'".into()));
                    }
                }
                b'0'..=b'9' => self.lex_number(line, column)?,
                c if c.is_ascii_alphabetic() || c == b'_' => self.lex_ident_or_keyword(),
                other => {
                    return Err((line, column, format!("unexpected character '{}'", other as char)));
                }
            };
            tokens.push(Token { kind, line, column });
        }
        Ok(tokens)
    }

    fn lex_number(&mut self, line: usize, column: usize) -> Result<TokenKind, (usize, usize, String)> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            self.advance();
            let frac_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
            let scale = (self.pos - frac_start) as u32;
            let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
            let unscaled: i128 = text
                .replace('.', "")
                .parse()
                .map_err(|_| (line, column, format!("invalid decimal literal '{text}'")))?;
            return Ok(TokenKind::DecimalLiteral(unscaled, scale));
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let value: i128 = text.parse().map_err(|_| (line, column, format!("invalid integer literal '{text}'")))?;
        Ok(TokenKind::IntLiteral(value))
    }

    fn lex_ident_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        match text {
            "intent" => TokenKind::KwIntent,
            "guard" => TokenKind::KwGuard,
            "solve" => TokenKind::KwSolve,
            "verify" => TokenKind::KwVerify,
            "and" => TokenKind::KwAnd,
            "or" => TokenKind::KwOr,
            other => TokenKind::Ident(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_arithmetic_and_comparison() {
        let k = kinds("a + 1 >= old_b");
        assert_eq!(
            k,
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Plus,
                TokenKind::IntLiteral(1),
                TokenKind::Ge,
                TokenKind::Ident("old_b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_decimal_literal_with_scale() {
        let k = kinds("1.50");
        assert_eq!(k[0], TokenKind::DecimalLiteral(150, 2));
    }

    #[test]
    fn lexes_bitwise_or_as_a_single_token_for_the_parser_to_reject() {
        let k = kinds("amount | 0xFF".replace("0xFF", "255").as_str());
        assert_eq!(k[1], TokenKind::Pipe);
    }

    #[test]
    fn single_equals_is_a_lex_error() {
        assert!(Lexer::new("a = b").tokenize().is_err());
    }
}
