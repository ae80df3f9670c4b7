// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tokenizer for template expressions
//!
//! Produces borrowed identifiers and, for string literals without escapes,
//! borrowed text. Offsets are byte offsets into the expression text.

use std::borrow::Cow;
use unicode_xid::UnicodeXID;

use super::span::Spanned;
use crate::error::{ParseError, ParseErrorKind};

/// Result type for tokenizer and parser operations
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Expression token
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'input> {
    /// Number literal, already converted
    Number(f64),
    /// String literal content with escapes resolved
    String(Cow<'input, str>),
    /// Identifier or reserved word
    Identifier(&'input str),

    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `**`
    StarStar,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `!`
    Bang,
    /// `=`
    Assign,
    /// `==`
    EqualEqual,
    /// `===`
    EqualEqualEqual,
    /// `!=`
    NotEqual,
    /// `!==`
    NotEqualEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `??`
    QuestionQuestion,
    /// `?`
    Question,
    /// `?.`
    QuestionDot,
    /// `=>`
    Arrow,
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `[`
    LeftBracket,
    /// `]`
    RightBracket,
    /// `{`
    LeftBrace,
    /// `}`
    RightBrace,
    /// `.`
    Dot,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `;`
    Semicolon,
}

impl<'input> Token<'input> {
    /// Identifier text, if this token is one
    #[inline]
    pub fn as_identifier(&self) -> Option<&'input str> {
        match self {
            Token::Identifier(name) => Some(name),
            _ => None,
        }
    }

    /// Text used in error messages
    pub fn describe(&self) -> String {
        let symbol = match self {
            Token::Number(n) => return format!("number {}", crate::model::format_number(*n)),
            Token::String(s) => return format!("string '{s}'"),
            Token::Identifier(name) => return format!("'{name}'"),
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::StarStar => "**",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Bang => "!",
            Token::Assign => "=",
            Token::EqualEqual => "==",
            Token::EqualEqualEqual => "===",
            Token::NotEqual => "!=",
            Token::NotEqualEqual => "!==",
            Token::LessThan => "<",
            Token::LessThanOrEqual => "<=",
            Token::GreaterThan => ">",
            Token::GreaterThanOrEqual => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::QuestionQuestion => "??",
            Token::Question => "?",
            Token::QuestionDot => "?.",
            Token::Arrow => "=>",
            Token::LeftParen => "(",
            Token::RightParen => ")",
            Token::LeftBracket => "[",
            Token::RightBracket => "]",
            Token::LeftBrace => "{",
            Token::RightBrace => "}",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Semicolon => ";",
        };
        format!("'{symbol}'")
    }
}

/// Identifier start: `$`, `_` or a Unicode XID start character
#[inline]
pub fn is_id_start(ch: char) -> bool {
    ch == '$' || ch == '_' || UnicodeXID::is_xid_start(ch)
}

/// Identifier continuation
#[inline]
pub fn is_id_continue(ch: char) -> bool {
    ch == '$' || ch == '_' || UnicodeXID::is_xid_continue(ch)
}

/// Tokenizer over one expression
#[derive(Clone)]
pub struct Tokenizer<'input> {
    input: &'input str,
    pos: usize,
}

impl<'input> Tokenizer<'input> {
    /// Create a new tokenizer
    #[inline]
    pub fn new(input: &'input str) -> Self {
        Self { input, pos: 0 }
    }

    /// Tokenize the whole input
    pub fn tokenize_all(mut self) -> ParseResult<Vec<Spanned<Token<'input>>>> {
        let mut tokens = Vec::with_capacity(self.input.len() / 3 + 1);
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    #[inline]
    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    #[inline]
    fn peek_byte_at(&self, offset: usize) -> Option<u8> {
        self.input.as_bytes().get(self.pos + offset).copied()
    }

    fn skip_trivia(&mut self) -> ParseResult<()> {
        loop {
            match self.peek_char() {
                Some(ch) if ch.is_whitespace() => self.pos += ch.len_utf8(),
                Some('/') if self.peek_byte_at(1) == Some(b'/') => {
                    match self.input[self.pos..].find('\n') {
                        Some(newline) => self.pos += newline + 1,
                        None => self.pos = self.input.len(),
                    }
                }
                Some('/') if self.peek_byte_at(1) == Some(b'*') => {
                    let start = self.pos;
                    match self.input[self.pos + 2..].find("*/") {
                        Some(close) => self.pos += close + 4,
                        None => {
                            return Err(ParseError::new(
                                ParseErrorKind::UnexpectedEnd,
                                start,
                                "Unclosed multi-line comment",
                            ));
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_identifier(&mut self) -> &'input str {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if !is_id_continue(ch) {
                break;
            }
            self.pos += ch.len_utf8();
        }
        &self.input[start..self.pos]
    }

    fn parse_number(&mut self) -> ParseResult<Token<'input>> {
        let start = self.pos;
        let bytes = self.input.as_bytes();

        if bytes[start] == b'0' && matches!(self.peek_byte_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_hexdigit() {
                self.pos += 1;
            }
            let digits = &self.input[digits_start..self.pos];
            return u64::from_str_radix(digits, 16)
                .map(|v| Token::Number(v as f64))
                .map_err(|_| {
                    ParseError::new(ParseErrorKind::InvalidLiteral, start, "Invalid hex literal")
                });
        }

        while self.pos < bytes.len() && bytes[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if self.pos < bytes.len()
            && bytes[self.pos] == b'.'
            && bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit)
        {
            self.pos += 1;
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }
        if self.pos < bytes.len() && matches!(bytes[self.pos], b'e' | b'E') {
            let mut lookahead = self.pos + 1;
            if matches!(bytes.get(lookahead), Some(b'+' | b'-')) {
                lookahead += 1;
            }
            if bytes.get(lookahead).is_some_and(u8::is_ascii_digit) {
                self.pos = lookahead;
                while self.pos < bytes.len() && bytes[self.pos].is_ascii_digit() {
                    self.pos += 1;
                }
            }
        }
        if self.peek_char().is_some_and(is_id_start) {
            return Err(ParseError::new(
                ParseErrorKind::InvalidLiteral,
                start,
                "Identifier starts immediately after numeric literal",
            ));
        }

        self.input[start..self.pos]
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ParseError::new(ParseErrorKind::InvalidLiteral, start, "Invalid number"))
    }

    fn parse_string_literal(&mut self, quote: char) -> ParseResult<Cow<'input, str>> {
        let start = self.pos;
        self.pos += 1;
        let content_start = self.pos;

        // Fast path: no escapes
        let rest = &self.input[content_start..];
        if let Some(end) = rest.find(|c| c == quote || c == '\\') {
            if rest[end..].starts_with(quote) {
                self.pos = content_start + end + 1;
                return Ok(Cow::Borrowed(&rest[..end]));
            }
        }

        let mut text = String::new();
        let mut chars = self.input[content_start..].char_indices();
        while let Some((offset, ch)) = chars.next() {
            if ch == quote {
                self.pos = content_start + offset + 1;
                return Ok(Cow::Owned(text));
            }
            if ch != '\\' {
                text.push(ch);
                continue;
            }
            let escape_at = content_start + offset;
            let Some((_, escaped)) = chars.next() else {
                break;
            };
            match escaped {
                'n' => text.push('\n'),
                't' => text.push('\t'),
                'r' => text.push('\r'),
                'b' => text.push('\u{0008}'),
                'f' => text.push('\u{000C}'),
                'v' => text.push('\u{000B}'),
                '0' => text.push('\0'),
                'x' => {
                    let hex: String = chars.by_ref().take(2).map(|(_, c)| c).collect();
                    text.push(decode_code_point(&hex, escape_at)?);
                }
                'u' => {
                    let rest = &self.input[escape_at + 2..];
                    let hex = if rest.starts_with('{') {
                        let close = rest.find('}').ok_or_else(|| {
                            ParseError::new(
                                ParseErrorKind::InvalidLiteral,
                                escape_at,
                                "Unterminated unicode escape",
                            )
                        })?;
                        let hex = &rest[1..close];
                        for _ in 0..=close {
                            chars.next();
                        }
                        hex.to_string()
                    } else {
                        chars.by_ref().take(4).map(|(_, c)| c).collect()
                    };
                    text.push(decode_code_point(&hex, escape_at)?);
                }
                '\n' => {}
                other => text.push(other),
            }
        }

        Err(ParseError::new(
            ParseErrorKind::UnexpectedEnd,
            start,
            "Unterminated string literal",
        ))
    }

    /// Next token, `None` at end of input
    pub fn next_token(&mut self) -> ParseResult<Option<Spanned<Token<'input>>>> {
        self.skip_trivia()?;
        let start = self.pos;
        let Some(ch) = self.peek_char() else {
            return Ok(None);
        };

        let next = self.peek_byte_at(1);
        let next2 = self.peek_byte_at(2);
        let (token, width) = match ch {
            '0'..='9' => {
                let token = self.parse_number()?;
                return Ok(Some(Spanned::new(token, start, self.pos)));
            }
            '.' if next.is_some_and(|b| b.is_ascii_digit()) => {
                let token = self.parse_number()?;
                return Ok(Some(Spanned::new(token, start, self.pos)));
            }
            '\'' | '"' | '`' => {
                let text = self.parse_string_literal(ch)?;
                return Ok(Some(Spanned::new(Token::String(text), start, self.pos)));
            }
            c if is_id_start(c) => {
                let name = self.parse_identifier();
                return Ok(Some(Spanned::new(Token::Identifier(name), start, self.pos)));
            }
            '.' => (Token::Dot, 1),
            '(' => (Token::LeftParen, 1),
            ')' => (Token::RightParen, 1),
            '[' => (Token::LeftBracket, 1),
            ']' => (Token::RightBracket, 1),
            '{' => (Token::LeftBrace, 1),
            '}' => (Token::RightBrace, 1),
            ',' => (Token::Comma, 1),
            ':' => (Token::Colon, 1),
            ';' => (Token::Semicolon, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '%' => (Token::Percent, 1),
            '/' => (Token::Slash, 1),
            '*' if next == Some(b'*') => (Token::StarStar, 2),
            '*' => (Token::Star, 1),
            '=' if next == Some(b'=') && next2 == Some(b'=') => (Token::EqualEqualEqual, 3),
            '=' if next == Some(b'=') => (Token::EqualEqual, 2),
            '=' if next == Some(b'>') => (Token::Arrow, 2),
            '=' => (Token::Assign, 1),
            '!' if next == Some(b'=') && next2 == Some(b'=') => (Token::NotEqualEqual, 3),
            '!' if next == Some(b'=') => (Token::NotEqual, 2),
            '!' => (Token::Bang, 1),
            '<' if next == Some(b'=') => (Token::LessThanOrEqual, 2),
            '<' => (Token::LessThan, 1),
            '>' if next == Some(b'=') => (Token::GreaterThanOrEqual, 2),
            '>' => (Token::GreaterThan, 1),
            '&' if next == Some(b'&') => (Token::AndAnd, 2),
            '|' if next == Some(b'|') => (Token::OrOr, 2),
            '?' if next == Some(b'?') => (Token::QuestionQuestion, 2),
            // `a?.5:1` is a conditional, not optional access
            '?' if next == Some(b'.') && !next2.is_some_and(|b| b.is_ascii_digit()) => {
                (Token::QuestionDot, 2)
            }
            '?' => (Token::Question, 1),
            '&' | '|' | '^' | '~' => {
                return Err(ParseError::new(
                    ParseErrorKind::Unsupported,
                    start,
                    format!("Bitwise operator '{ch}' is not supported"),
                ));
            }
            other => {
                return Err(ParseError::new(
                    ParseErrorKind::UnexpectedToken,
                    start,
                    format!("Unexpected character '{other}'"),
                ));
            }
        };
        self.pos += width;
        Ok(Some(Spanned::new(token, start, self.pos)))
    }
}

fn decode_code_point(hex: &str, offset: usize) -> ParseResult<char> {
    u32::from_str_radix(hex, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::InvalidLiteral,
                offset,
                format!("Invalid escape sequence '{hex}'"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(input: &str) -> Vec<Token<'_>> {
        Tokenizer::new(input)
            .tokenize_all()
            .expect("tokenize")
            .into_iter()
            .map(|t| t.value)
            .collect()
    }

    #[test]
    fn tokenizes_member_chain_with_optional_access() {
        assert_eq!(
            tokens("$json?.user.name"),
            vec![
                Token::Identifier("$json"),
                Token::QuestionDot,
                Token::Identifier("user"),
                Token::Dot,
                Token::Identifier("name"),
            ]
        );
    }

    #[test]
    fn question_dot_before_digit_is_conditional() {
        assert_eq!(
            tokens("a?.5:1"),
            vec![
                Token::Identifier("a"),
                Token::Question,
                Token::Number(0.5),
                Token::Colon,
                Token::Number(1.0),
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(tokens("42"), vec![Token::Number(42.0)]);
        assert_eq!(tokens("3.25"), vec![Token::Number(3.25)]);
        assert_eq!(tokens("1e3"), vec![Token::Number(1000.0)]);
        assert_eq!(tokens("0xff"), vec![Token::Number(255.0)]);
    }

    #[test]
    fn strings_resolve_escapes() {
        assert_eq!(
            tokens(r#"'it\'s' "a\nb" `A\u{1F600}`"#),
            vec![
                Token::String(Cow::Owned("it's".to_string())),
                Token::String(Cow::Owned("a\nb".to_string())),
                Token::String(Cow::Owned("A\u{1F600}".to_string())),
            ]
        );
    }

    #[test]
    fn plain_strings_are_borrowed() {
        let toks = tokens("'plain'");
        assert!(matches!(&toks[0], Token::String(Cow::Borrowed("plain"))));
    }

    #[test]
    fn operators_prefer_longest_match() {
        assert_eq!(
            tokens("a === b !== c ?? d ** 2 => x"),
            vec![
                Token::Identifier("a"),
                Token::EqualEqualEqual,
                Token::Identifier("b"),
                Token::NotEqualEqual,
                Token::Identifier("c"),
                Token::QuestionQuestion,
                Token::Identifier("d"),
                Token::StarStar,
                Token::Number(2.0),
                Token::Arrow,
                Token::Identifier("x"),
            ]
        );
    }

    #[test]
    fn unicode_identifiers() {
        assert_eq!(tokens("$json.größe"), vec![
            Token::Identifier("$json"),
            Token::Dot,
            Token::Identifier("größe"),
        ]);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            tokens("1 /* two */ + // rest\n 3"),
            vec![Token::Number(1.0), Token::Plus, Token::Number(3.0)]
        );
    }

    #[test]
    fn unterminated_string_reports_opening_offset() {
        let err = Tokenizer::new("a + 'abc").tokenize_all().unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEnd);
        assert_eq!(err.offset, 4);
    }

    #[test]
    fn bitwise_operators_are_rejected() {
        let err = Tokenizer::new("a & b").tokenize_all().unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Unsupported);
        assert_eq!(err.offset, 2);
    }
}
