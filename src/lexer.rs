// ABOUTME: Hand-written scanner: source text to a flat token stream (spec §4.1)

use crate::ast::Number;
use crate::error::LexError;

pub const KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Number(Number),
    /// Decoded string-literal bytes (escapes already resolved); not
    /// guaranteed valid UTF-8, since Lua strings are raw byte sequences.
    Str(Vec<u8>),

    // Keywords
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // Symbols (maximal-munch, 33 total)
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Caret,
    Hash,
    Amp,
    Tilde,
    Pipe,
    ShiftLeft,
    ShiftRight,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Assign,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Colon,
    DoubleColon,
    Comma,
    Dot,
    DotDot,
    Ellipsis,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
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
        }
        Some(c)
    }

    fn err(&self, message: impl Into<String>) -> LexError {
        LexError::new(self.line, message)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') | Some(0x0c) | Some(0x0b) => {
                    self.advance();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    self.advance();
                    self.advance();
                    if self.peek() == Some(b'[') {
                        if let Some(level) = self.probe_long_bracket() {
                            self.read_long_bracket(level)?;
                            continue;
                        }
                    }
                    // Line comment: consume through end of line.
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
        Ok(())
    }

    /// Non-consuming probe for a `[=*[` opener at the current position.
    /// Returns the level (`=` count) if one is present and consumes it;
    /// otherwise leaves the position untouched and returns `None`.
    fn probe_long_bracket(&mut self) -> Option<usize> {
        let save = self.pos;
        let save_line = self.line;
        if self.peek() != Some(b'[') {
            return None;
        }
        let start = self.pos;
        self.advance();
        let mut level = 0;
        while self.peek() == Some(b'=') {
            self.advance();
            level += 1;
        }
        if self.peek() == Some(b'[') {
            self.advance();
            Some(level)
        } else {
            self.pos = save;
            self.line = save_line;
            let _ = start;
            None
        }
    }

    fn read_long_bracket(&mut self, level: usize) -> Result<Vec<u8>, LexError> {
        // A newline immediately following the opener is consumed.
        if self.peek() == Some(b'\r') {
            self.advance();
            if self.peek() == Some(b'\n') {
                self.advance();
            }
        } else if self.peek() == Some(b'\n') {
            self.advance();
        }

        let mut content = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.err("unfinished long string")),
                Some(b']') => {
                    let save = self.pos;
                    let save_line = self.line;
                    self.advance();
                    let mut close_level = 0;
                    while self.peek() == Some(b'=') {
                        self.advance();
                        close_level += 1;
                    }
                    if close_level == level && self.peek() == Some(b']') {
                        self.advance();
                        return Ok(content);
                    }
                    self.pos = save;
                    self.line = save_line;
                    content.push(b']');
                    self.advance();
                }
                Some(b'\r') => {
                    self.advance();
                    if self.peek() == Some(b'\n') {
                        self.advance();
                    }
                    content.push(b'\n');
                }
                Some(c) => {
                    self.advance();
                    content.push(c);
                }
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace_and_comments()?;
        let line = self.line;
        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                line,
            });
        };

        if c == b'_' || c.is_ascii_alphabetic() {
            return self.read_name_or_keyword(line);
        }
        if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
        {
            return self.read_number(line);
        }
        if c == b'"' || c == b'\'' {
            return self.read_short_string(line);
        }
        if c == b'[' && matches!(self.peek_at(1), Some(b'[') | Some(b'=')) {
            if let Some(level) = self.probe_long_bracket() {
                let content = self.read_long_bracket(level)?;
                return Ok(Token {
                    kind: TokenKind::Str(content),
                    line,
                });
            }
        }

        self.read_symbol(line)
    }

    fn read_name_or_keyword(&mut self, line: u32) -> Result<Token, LexError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'_' || c.is_ascii_alphanumeric() {
                self.advance();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap()
            .to_string();
        let kind = keyword_kind(&text).unwrap_or(TokenKind::Name(text));
        Ok(Token { kind, line })
    }

    fn read_number(&mut self, line: u32) -> Result<Token, LexError> {
        let start = self.pos;
        let is_hex = self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x') | Some(b'X'));
        if is_hex {
            self.advance();
            self.advance();
            self.consume_hex_digits();
            let mut is_float = false;
            if self.peek() == Some(b'.') {
                is_float = true;
                self.advance();
                self.consume_hex_digits();
            }
            if matches!(self.peek(), Some(b'p') | Some(b'P')) {
                is_float = true;
                self.advance();
                if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                    self.advance();
                }
                if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    return Err(self.err("malformed number"));
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
            let text = self.raw_slice(start);
            return self.finish_hex_number(&text, is_float, line);
        }

        self.consume_decimal_digits();
        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek_at(1) != Some(b'.') {
            is_float = true;
            self.advance();
            self.consume_decimal_digits();
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            is_float = true;
            self.advance();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.advance();
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(self.err("malformed number"));
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text = self.raw_slice(start);
        let cleaned: String = text.chars().filter(|c| *c != '_').collect();
        if is_float {
            let value: f64 = cleaned
                .parse()
                .map_err(|_| self.err(format!("malformed number: {text}")))?;
            Ok(Token {
                kind: TokenKind::Number(Number::Float(value)),
                line,
            })
        } else {
            let value: i64 = cleaned
                .parse()
                .map_err(|_| self.err(format!("malformed number: {text}")))?;
            Ok(Token {
                kind: TokenKind::Number(Number::Integer(value)),
                line,
            })
        }
    }

    fn finish_hex_number(&self, text: &str, is_float: bool, line: u32) -> Result<Token, LexError> {
        let cleaned: String = text.chars().filter(|c| *c != '_').collect();
        if is_float {
            let value = parse_hex_float(&cleaned)
                .ok_or_else(|| self.err(format!("malformed number: {text}")))?;
            Ok(Token {
                kind: TokenKind::Number(Number::Float(value)),
                line,
            })
        } else {
            let digits = &cleaned[2..];
            let value = i64::from_str_radix(digits, 16)
                .or_else(|_| u64::from_str_radix(digits, 16).map(|v| v as i64))
                .map_err(|_| self.err(format!("malformed number: {text}")))?;
            Ok(Token {
                kind: TokenKind::Number(Number::Integer(value)),
                line,
            })
        }
    }

    fn raw_slice(&self, start: usize) -> String {
        std::str::from_utf8(&self.src[start..self.pos])
            .unwrap()
            .to_string()
    }

    fn consume_decimal_digits(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == b'_') {
            self.advance();
        }
    }

    fn consume_hex_digits(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit() || c == b'_') {
            self.advance();
        }
    }

    fn read_short_string(&mut self, line: u32) -> Result<Token, LexError> {
        let quote = self.advance().unwrap();
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.err("unfinished string")),
                Some(b'\n') => return Err(self.err("unfinished string")),
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    self.read_escape(&mut out)?;
                }
                Some(c) => {
                    self.advance();
                    out.push(c);
                }
            }
        }
        Ok(Token {
            kind: TokenKind::Str(out),
            line,
        })
    }

    fn read_escape(&mut self, out: &mut Vec<u8>) -> Result<(), LexError> {
        let Some(c) = self.peek() else {
            return Err(self.err("unfinished string"));
        };
        match c {
            b'a' => {
                self.advance();
                out.push(0x07);
            }
            b'b' => {
                self.advance();
                out.push(0x08);
            }
            b'f' => {
                self.advance();
                out.push(0x0c);
            }
            b'n' => {
                self.advance();
                out.push(b'\n');
            }
            b'r' => {
                self.advance();
                out.push(b'\r');
            }
            b't' => {
                self.advance();
                out.push(b'\t');
            }
            b'v' => {
                self.advance();
                out.push(0x0b);
            }
            b'\\' => {
                self.advance();
                out.push(b'\\');
            }
            b'\'' => {
                self.advance();
                out.push(b'\'');
            }
            b'"' => {
                self.advance();
                out.push(b'"');
            }
            b'\n' => {
                self.advance();
                out.push(b'\n');
            }
            b'\r' => {
                self.advance();
                if self.peek() == Some(b'\n') {
                    self.advance();
                }
                out.push(b'\n');
            }
            b'x' => {
                self.advance();
                let mut hex = String::new();
                for _ in 0..2 {
                    match self.peek() {
                        Some(h) if h.is_ascii_hexdigit() => {
                            hex.push(h as char);
                            self.advance();
                        }
                        _ => return Err(self.err("hexadecimal digit expected")),
                    }
                }
                let value = u8::from_str_radix(&hex, 16).unwrap();
                out.push(value);
            }
            b'u' => {
                self.advance();
                if self.peek() != Some(b'{') {
                    return Err(self.err("missing '{' in \\u{xxxx}"));
                }
                self.advance();
                let mut hex = String::new();
                while let Some(h) = self.peek() {
                    if h.is_ascii_hexdigit() {
                        hex.push(h as char);
                        self.advance();
                    } else {
                        break;
                    }
                }
                if self.peek() != Some(b'}') {
                    return Err(self.err("missing '}' in \\u{xxxx}"));
                }
                self.advance();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.err("invalid unicode escape"))?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(code.encode_utf8(&mut buf).as_bytes());
            }
            b'z' => {
                self.advance();
                while matches!(
                    self.peek(),
                    Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') | Some(0x0c) | Some(0x0b)
                ) {
                    self.advance();
                }
            }
            d if d.is_ascii_digit() => {
                let mut digits = String::new();
                for _ in 0..3 {
                    match self.peek() {
                        Some(dd) if dd.is_ascii_digit() => {
                            digits.push(dd as char);
                            self.advance();
                        }
                        _ => break,
                    }
                }
                let value: u32 = digits.parse().unwrap();
                if value > 255 {
                    return Err(self.err("decimal escape too large"));
                }
                out.push(value as u8);
            }
            other => {
                return Err(self.err(format!("invalid escape sequence '\\{}'", other as char)));
            }
        }
        Ok(())
    }

    fn read_symbol(&mut self, line: u32) -> Result<Token, LexError> {
        let c = self.advance().unwrap();
        let kind = match c {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => {
                if self.peek() == Some(b'/') {
                    self.advance();
                    TokenKind::SlashSlash
                } else {
                    TokenKind::Slash
                }
            }
            b'%' => TokenKind::Percent,
            b'^' => TokenKind::Caret,
            b'#' => TokenKind::Hash,
            b'&' => TokenKind::Amp,
            b'~' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::Ne
                } else {
                    TokenKind::Tilde
                }
            }
            b'|' => TokenKind::Pipe,
            b'<' => {
                if self.peek() == Some(b'<') {
                    self.advance();
                    TokenKind::ShiftLeft
                } else if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.peek() == Some(b'>') {
                    self.advance();
                    TokenKind::ShiftRight
                } else if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b';' => TokenKind::Semi,
            b':' => {
                if self.peek() == Some(b':') {
                    self.advance();
                    TokenKind::DoubleColon
                } else {
                    TokenKind::Colon
                }
            }
            b',' => TokenKind::Comma,
            b'.' => {
                if self.peek() == Some(b'.') {
                    self.advance();
                    if self.peek() == Some(b'.') {
                        self.advance();
                        TokenKind::Ellipsis
                    } else {
                        TokenKind::DotDot
                    }
                } else {
                    TokenKind::Dot
                }
            }
            other => {
                return Err(self.err(format!("unexpected symbol near '{}'", other as char)));
            }
        };
        Ok(Token { kind, line })
    }
}

fn keyword_kind(text: &str) -> Option<TokenKind> {
    Some(match text {
        "and" => TokenKind::And,
        "break" => TokenKind::Break,
        "do" => TokenKind::Do,
        "else" => TokenKind::Else,
        "elseif" => TokenKind::Elseif,
        "end" => TokenKind::End,
        "false" => TokenKind::False,
        "for" => TokenKind::For,
        "function" => TokenKind::Function,
        "goto" => TokenKind::Goto,
        "if" => TokenKind::If,
        "in" => TokenKind::In,
        "local" => TokenKind::Local,
        "nil" => TokenKind::Nil,
        "not" => TokenKind::Not,
        "or" => TokenKind::Or,
        "repeat" => TokenKind::Repeat,
        "return" => TokenKind::Return,
        "then" => TokenKind::Then,
        "true" => TokenKind::True,
        "until" => TokenKind::Until,
        "while" => TokenKind::While,
        _ => return None,
    })
}

/// `float.fromhex`-style parsing for `0x1.8p3`-shaped hex float literals.
fn parse_hex_float(text: &str) -> Option<f64> {
    let body = &text[2..]; // strip "0x"/"0X"
    let (mantissa_part, exp_part) = match body.find(['p', 'P']) {
        Some(idx) => (&body[..idx], Some(&body[idx + 1..])),
        None => (body, None),
    };
    let (int_part, frac_part) = match mantissa_part.find('.') {
        Some(idx) => (&mantissa_part[..idx], &mantissa_part[idx + 1..]),
        None => (mantissa_part, ""),
    };

    let mut value = 0.0f64;
    for c in int_part.chars() {
        value = value * 16.0 + c.to_digit(16)? as f64;
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        value += c.to_digit(16)? as f64 * scale;
        scale /= 16.0;
    }
    let exponent: i32 = match exp_part {
        Some(e) => e.parse().ok()?,
        None => 0,
    };
    Some(value * 2f64.powi(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_win_over_names() {
        assert_eq!(kinds("and"), vec![TokenKind::And, TokenKind::Eof]);
        assert_eq!(
            kinds("android"),
            vec![TokenKind::Name("android".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn symbol_maximal_munch() {
        assert_eq!(
            kinds("<<<="),
            vec![TokenKind::ShiftLeft, TokenKind::Le, TokenKind::Eof]
        );
        assert_eq!(
            kinds("..."),
            vec![TokenKind::Ellipsis, TokenKind::Eof]
        );
        assert_eq!(kinds(".."), vec![TokenKind::DotDot, TokenKind::Eof]);
    }

    #[test]
    fn decimal_and_hex_numbers() {
        assert_eq!(
            kinds("10"),
            vec![TokenKind::Number(Number::Integer(10)), TokenKind::Eof]
        );
        assert_eq!(
            kinds("10.5"),
            vec![TokenKind::Number(Number::Float(10.5)), TokenKind::Eof]
        );
        assert_eq!(
            kinds("0x1A"),
            vec![TokenKind::Number(Number::Integer(26)), TokenKind::Eof]
        );
        assert_eq!(
            kinds("1_000"),
            vec![TokenKind::Number(Number::Integer(1000)), TokenKind::Eof]
        );
    }

    #[test]
    fn short_string_escapes() {
        let toks = kinds(r#""a\tb\110""#);
        assert_eq!(
            toks,
            vec![TokenKind::Str(b"a\tbn".to_vec()), TokenKind::Eof]
        );
    }

    #[test]
    fn hex_escape_is_a_single_raw_byte() {
        let toks = kinds(r#""\xC8""#);
        assert_eq!(toks, vec![TokenKind::Str(vec![0xC8]), TokenKind::Eof]);
    }

    #[test]
    fn decimal_escape_is_a_single_raw_byte() {
        let toks = kinds(r#""\200""#);
        assert_eq!(toks, vec![TokenKind::Str(vec![200]), TokenKind::Eof]);
    }

    #[test]
    fn unterminated_string_is_lex_error() {
        let mut lexer = Lexer::new("\"abc");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn long_bracket_string_skips_leading_newline() {
        let toks = kinds("[[\nhello]]");
        assert_eq!(toks, vec![TokenKind::Str(b"hello".to_vec()), TokenKind::Eof]);
    }

    #[test]
    fn long_bracket_comment_is_skipped() {
        let toks = kinds("--[==[ comment ]==]\n1");
        assert_eq!(
            toks,
            vec![TokenKind::Number(Number::Integer(1)), TokenKind::Eof]
        );
    }

    #[test]
    fn line_comment_consumes_to_newline() {
        let toks = kinds("-- hi\n1");
        assert_eq!(
            toks,
            vec![TokenKind::Number(Number::Integer(1)), TokenKind::Eof]
        );
    }

    #[test]
    fn line_numbers_increment_on_newline() {
        let toks = Lexer::new("1\n2").tokenize().unwrap();
        assert_eq!(toks[0].line, 1);
        assert_eq!(toks[1].line, 2);
    }
}
