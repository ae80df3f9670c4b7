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

//! Pratt parser for template expressions
//!
//! Binding powers follow JavaScript. Arrow functions are recognised in primary
//! position by looking ahead for `=>`, so `(a, b) => a + b` and `(a + b)` share
//! the same entry point.

use std::sync::Arc;

use super::span::Spanned;
use super::tokenizer::{ParseResult, Token, Tokenizer};
use crate::ast::{BinaryOperator, Expression, Literal, Node, UnaryOperator};
use crate::error::{ParseError, ParseErrorKind};

/// Ceiling for both the recursive descent and the height of the built tree
///
/// Left-associative chains (`a + b + c`, `x.a.b.c`) are built in loops, so the
/// tree height is tracked separately from the recursion depth.
pub const MAX_EXPRESSION_DEPTH: usize = 256;

/// Words that start statements or constructs outside the expression subset
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "new", "function", "class", "var", "let", "const", "return", "if", "else", "for", "while",
    "do", "delete", "void", "this", "await", "yield", "throw", "try", "catch", "switch", "with",
    "super", "import", "export", "debugger", "async",
];

/// Operator precedence levels (higher = tighter binding)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    /// `=` (right associative)
    Assignment = 1,
    /// `?:` (right associative)
    Conditional = 2,
    /// `??`
    Nullish = 3,
    /// `||`
    Or = 4,
    /// `&&`
    And = 5,
    /// `== != === !==`
    Equality = 6,
    /// `< <= > >=`
    Relational = 7,
    /// `+ -`
    Additive = 8,
    /// `* / %`
    Multiplicative = 9,
    /// `**` (right associative)
    Exponent = 10,
    /// Prefix operators
    Unary = 11,
    /// Member access, index, call
    Postfix = 12,
}

impl Precedence {
    /// Get the next higher precedence level for left-associative operators
    #[inline(always)]
    pub const fn next_level(self) -> Self {
        match self {
            Precedence::Assignment => Precedence::Conditional,
            Precedence::Conditional => Precedence::Nullish,
            Precedence::Nullish => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Relational,
            Precedence::Relational => Precedence::Additive,
            Precedence::Additive => Precedence::Multiplicative,
            Precedence::Multiplicative => Precedence::Exponent,
            Precedence::Exponent => Precedence::Unary,
            Precedence::Unary => Precedence::Postfix,
            Precedence::Postfix => Precedence::Postfix,
        }
    }

    /// Check if this precedence is right associative
    #[inline(always)]
    pub const fn is_right_associative(self) -> bool {
        matches!(
            self,
            Precedence::Assignment | Precedence::Conditional | Precedence::Exponent
        )
    }
}

#[inline(always)]
fn binary_operator(token: &Token<'_>) -> Option<(BinaryOperator, Precedence)> {
    let pair = match token {
        Token::Plus => (BinaryOperator::Add, Precedence::Additive),
        Token::Minus => (BinaryOperator::Subtract, Precedence::Additive),
        Token::Star => (BinaryOperator::Multiply, Precedence::Multiplicative),
        Token::Slash => (BinaryOperator::Divide, Precedence::Multiplicative),
        Token::Percent => (BinaryOperator::Modulo, Precedence::Multiplicative),
        Token::StarStar => (BinaryOperator::Power, Precedence::Exponent),
        Token::EqualEqual => (BinaryOperator::Equal, Precedence::Equality),
        Token::NotEqual => (BinaryOperator::NotEqual, Precedence::Equality),
        Token::EqualEqualEqual => (BinaryOperator::StrictEqual, Precedence::Equality),
        Token::NotEqualEqual => (BinaryOperator::StrictNotEqual, Precedence::Equality),
        Token::LessThan => (BinaryOperator::LessThan, Precedence::Relational),
        Token::LessThanOrEqual => (BinaryOperator::LessThanOrEqual, Precedence::Relational),
        Token::GreaterThan => (BinaryOperator::GreaterThan, Precedence::Relational),
        Token::GreaterThanOrEqual => (BinaryOperator::GreaterThanOrEqual, Precedence::Relational),
        Token::AndAnd => (BinaryOperator::And, Precedence::And),
        Token::OrOr => (BinaryOperator::Or, Precedence::Or),
        Token::QuestionQuestion => (BinaryOperator::Nullish, Precedence::Nullish),
        _ => return None,
    };
    Some(pair)
}

/// Pratt parser over a pre-tokenized expression
pub struct PrattParser<'input> {
    tokens: Vec<Spanned<Token<'input>>>,
    pos: usize,
    input_len: usize,
    depth: usize,
    /// Height of the node most recently returned by a `parse_*` method
    height: usize,
}

impl<'input> PrattParser<'input> {
    /// Tokenize `input` and prepare a parser
    pub fn new(input: &'input str) -> ParseResult<Self> {
        Ok(Self {
            tokens: Tokenizer::new(input).tokenize_all()?,
            pos: 0,
            input_len: input.len(),
            depth: 0,
            height: 0,
        })
    }

    /// Parse the whole input as one expression
    pub fn parse(&mut self) -> ParseResult<Node> {
        if self.tokens.is_empty() {
            return Ok(Spanned::new(Expression::Literal(Literal::Undefined), 0, 0));
        }
        let node = self.parse_expression_with_precedence(Precedence::Assignment)?;
        match self.tokens.get(self.pos) {
            None => Ok(node),
            Some(token) if token.value == Token::Semicolon => Err(ParseError::new(
                ParseErrorKind::Unsupported,
                token.start,
                "Statements are not supported; use a single expression",
            )),
            Some(token) => Err(self.unexpected(token)),
        }
    }

    #[inline]
    fn current(&self) -> Option<&Token<'input>> {
        self.tokens.get(self.pos).map(|t| &t.value)
    }

    #[inline]
    fn peek(&self, ahead: usize) -> Option<&Token<'input>> {
        self.tokens.get(self.pos + ahead).map(|t| &t.value)
    }

    #[inline]
    fn advance(&mut self) -> Option<Spanned<Token<'input>>> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, token: &Spanned<Token<'input>>) -> ParseError {
        ParseError::new(
            ParseErrorKind::UnexpectedToken,
            token.start,
            format!("Unexpected token {}", token.value.describe()),
        )
    }

    fn unexpected_end(&self, expected: &str) -> ParseError {
        ParseError::new(
            ParseErrorKind::UnexpectedEnd,
            self.input_len,
            format!("Unexpected end of expression, expected {expected}"),
        )
    }

    fn expect(&mut self, expected: Token<'input>) -> ParseResult<Spanned<Token<'input>>> {
        match self.tokens.get(self.pos) {
            Some(token) if token.value == expected => {
                let token = token.clone();
                self.pos += 1;
                Ok(token)
            }
            Some(token) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken,
                token.start,
                format!(
                    "Expected {} but found {}",
                    expected.describe(),
                    token.value.describe()
                ),
            )),
            None => Err(self.unexpected_end(&expected.describe())),
        }
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_EXPRESSION_DEPTH {
            let offset = self.tokens.get(self.pos).map_or(self.input_len, |t| t.start);
            return Err(too_deep(offset));
        }
        Ok(())
    }

    /// Record the height of the node about to be returned
    fn grow(&mut self, height: usize, offset: usize) -> ParseResult<()> {
        if height > MAX_EXPRESSION_DEPTH {
            return Err(too_deep(offset));
        }
        self.height = height;
        Ok(())
    }

    fn parse_expression_with_precedence(&mut self, min: Precedence) -> ParseResult<Node> {
        self.enter()?;
        let result = self.parse_binary(min);
        self.depth -= 1;
        result
    }

    fn parse_binary(&mut self, min: Precedence) -> ParseResult<Node> {
        let mut left = self.parse_unary()?;
        let mut height = self.height;

        while let Some(token) = self.current() {
            match token {
                Token::Question if min <= Precedence::Conditional => {
                    self.pos += 1;
                    let consequent = self.parse_expression_with_precedence(Precedence::Assignment)?;
                    let consequent_height = self.height;
                    self.expect(Token::Colon)?;
                    let alternate = self.parse_expression_with_precedence(Precedence::Assignment)?;
                    height = 1 + height.max(consequent_height).max(self.height);
                    self.grow(height, left.start)?;
                    let (start, end) = (left.start, alternate.end);
                    left = Spanned::new(
                        Expression::Conditional {
                            test: Box::new(left),
                            consequent: Box::new(consequent),
                            alternate: Box::new(alternate),
                        },
                        start,
                        end,
                    );
                }
                Token::Assign if min <= Precedence::Assignment => {
                    self.pos += 1;
                    let value = self.parse_expression_with_precedence(Precedence::Assignment)?;
                    height = 1 + height.max(self.height);
                    self.grow(height, left.start)?;
                    let (start, end) = (left.start, value.end);
                    left = Spanned::new(
                        Expression::Assign {
                            target: Box::new(left),
                            value: Box::new(value),
                        },
                        start,
                        end,
                    );
                }
                other => {
                    let Some((operator, precedence)) = binary_operator(other) else {
                        break;
                    };
                    if precedence < min {
                        break;
                    }
                    self.pos += 1;
                    let next_min = if precedence.is_right_associative() {
                        precedence
                    } else {
                        precedence.next_level()
                    };
                    let right = self.parse_expression_with_precedence(next_min)?;
                    height = 1 + height.max(self.height);
                    self.grow(height, left.start)?;
                    let (start, end) = (left.start, right.end);
                    left = Spanned::new(
                        Expression::Binary {
                            operator,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        start,
                        end,
                    );
                }
            }
        }

        self.height = height;
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Node> {
        let Some(token) = self.tokens.get(self.pos) else {
            return Err(self.unexpected_end("an expression"));
        };
        let start = token.start;
        let operator = match &token.value {
            Token::Bang => Some(UnaryOperator::Not),
            Token::Minus => Some(UnaryOperator::Negate),
            Token::Plus => Some(UnaryOperator::Plus),
            Token::Identifier("typeof") => Some(UnaryOperator::TypeOf),
            _ => None,
        };
        match operator {
            Some(operator) => {
                self.pos += 1;
                self.enter()?;
                let operand = self.parse_unary();
                self.depth -= 1;
                let operand = operand?;
                self.grow(self.height + 1, start)?;
                let end = operand.end;
                Ok(Spanned::new(
                    Expression::Unary {
                        operator,
                        operand: Box::new(operand),
                    },
                    start,
                    end,
                ))
            }
            None => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    /// Member, index and call suffixes; `self.height` tracks the height of `left`
    fn parse_postfix(&mut self, mut left: Node) -> ParseResult<Node> {
        while let Some(token) = self.current() {
            match token {
                Token::Dot => {
                    self.pos += 1;
                    left = self.parse_member(left, false)?;
                }
                Token::QuestionDot => {
                    self.pos += 1;
                    left = match self.current() {
                        Some(Token::LeftBracket) => self.parse_index(left, true)?,
                        Some(Token::LeftParen) => self.parse_call(left, true)?,
                        _ => self.parse_member(left, true)?,
                    };
                }
                Token::LeftBracket => left = self.parse_index(left, false)?,
                Token::LeftParen => left = self.parse_call(left, false)?,
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_member(&mut self, object: Node, optional: bool) -> ParseResult<Node> {
        match self.advance() {
            Some(Spanned {
                value: Token::Identifier(name),
                end,
                ..
            }) => {
                let start = object.start;
                self.grow(self.height + 1, start)?;
                Ok(Spanned::new(
                    Expression::Member {
                        object: Box::new(object),
                        property: name.to_string(),
                        optional,
                    },
                    start,
                    end,
                ))
            }
            Some(token) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken,
                token.start,
                format!("Expected property name but found {}", token.value.describe()),
            )),
            None => Err(self.unexpected_end("a property name")),
        }
    }

    fn parse_index(&mut self, object: Node, optional: bool) -> ParseResult<Node> {
        let object_height = self.height;
        self.expect(Token::LeftBracket)?;
        let index = self.parse_expression_with_precedence(Precedence::Assignment)?;
        let close = self.expect(Token::RightBracket)?;
        let start = object.start;
        self.grow(1 + object_height.max(self.height), start)?;
        Ok(Spanned::new(
            Expression::Index {
                object: Box::new(object),
                index: Box::new(index),
                optional,
            },
            start,
            close.end,
        ))
    }

    fn parse_call(&mut self, callee: Node, optional: bool) -> ParseResult<Node> {
        let mut height = self.height;
        self.expect(Token::LeftParen)?;
        let mut arguments = Vec::new();
        loop {
            if self.current() == Some(&Token::RightParen) {
                break;
            }
            arguments.push(self.parse_expression_with_precedence(Precedence::Assignment)?);
            height = height.max(self.height);
            match self.current() {
                Some(Token::Comma) => self.pos += 1,
                _ => break,
            }
        }
        let close = self.expect(Token::RightParen)?;
        let start = callee.start;
        self.grow(height + 1, start)?;
        Ok(Spanned::new(
            Expression::Call {
                callee: Box::new(callee),
                arguments,
                optional,
            },
            start,
            close.end,
        ))
    }

    fn parse_primary(&mut self) -> ParseResult<Node> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err(self.unexpected_end("an expression"));
        };
        let (start, end) = (token.start, token.end);
        self.height = 1;
        let literal = |literal: Literal| Ok(Spanned::new(Expression::Literal(literal), start, end));

        match &token.value {
            Token::Number(n) => {
                self.pos += 1;
                literal(Literal::Number(*n))
            }
            Token::String(text) => {
                self.pos += 1;
                literal(Literal::String(text.to_string()))
            }
            Token::Identifier(name) => {
                let name = *name;
                if self.peek(1) == Some(&Token::Arrow) {
                    return self.parse_lambda(vec![name.to_string()], start);
                }
                self.pos += 1;
                match name {
                    "true" => literal(Literal::Boolean(true)),
                    "false" => literal(Literal::Boolean(false)),
                    "null" => literal(Literal::Null),
                    "undefined" => literal(Literal::Undefined),
                    "NaN" => literal(Literal::Number(f64::NAN)),
                    "Infinity" => literal(Literal::Number(f64::INFINITY)),
                    keyword if UNSUPPORTED_KEYWORDS.contains(&keyword) => Err(ParseError::new(
                        ParseErrorKind::Unsupported,
                        start,
                        format!("'{keyword}' is not supported in expressions"),
                    )),
                    _ => Ok(Spanned::new(Expression::identifier(name), start, end)),
                }
            }
            Token::LeftParen => {
                if let Some(params) = self.arrow_parameters() {
                    return self.parse_lambda(params, start);
                }
                self.pos += 1;
                let inner = self.parse_expression_with_precedence(Precedence::Assignment)?;
                let close = self.expect(Token::RightParen)?;
                Ok(Spanned::new(inner.value, start, close.end))
            }
            Token::LeftBracket => self.parse_array(),
            Token::LeftBrace => self.parse_object(),
            _ => Err(self.unexpected(&token)),
        }
    }

    /// Parameter list when the tokens at `(` form `(a, b) =>`
    fn arrow_parameters(&self) -> Option<Vec<String>> {
        let mut params = Vec::new();
        let mut i = 1;
        if self.peek(i) == Some(&Token::RightParen) {
            return (self.peek(i + 1) == Some(&Token::Arrow)).then_some(params);
        }
        loop {
            params.push(self.peek(i)?.as_identifier()?.to_string());
            i += 1;
            match self.peek(i)? {
                Token::Comma => i += 1,
                Token::RightParen => break,
                _ => return None,
            }
        }
        (self.peek(i + 1) == Some(&Token::Arrow)).then_some(params)
    }

    fn parse_lambda(&mut self, params: Vec<String>, start: usize) -> ParseResult<Node> {
        // Skip the parameter list up to and including `=>`
        while let Some(token) = self.advance() {
            if token.value == Token::Arrow {
                break;
            }
        }
        if self.current() == Some(&Token::LeftBrace)
            && matches!(self.peek(1), Some(Token::Identifier("return")))
        {
            let offset = self.tokens[self.pos].start;
            return Err(ParseError::new(
                ParseErrorKind::Unsupported,
                offset,
                "Block bodies are not supported; use an expression body",
            ));
        }
        let body = self.parse_expression_with_precedence(Precedence::Assignment)?;
        self.grow(self.height + 1, start)?;
        let end = body.end;
        Ok(Spanned::new(
            Expression::Lambda {
                params,
                body: Arc::new(body),
            },
            start,
            end,
        ))
    }

    fn parse_array(&mut self) -> ParseResult<Node> {
        let open = self.expect(Token::LeftBracket)?;
        let mut items = Vec::new();
        let mut height = 0;
        loop {
            if self.current() == Some(&Token::RightBracket) {
                break;
            }
            items.push(self.parse_expression_with_precedence(Precedence::Assignment)?);
            height = height.max(self.height);
            match self.current() {
                Some(Token::Comma) => self.pos += 1,
                _ => break,
            }
        }
        let close = self.expect(Token::RightBracket)?;
        self.grow(height + 1, open.start)?;
        Ok(Spanned::new(Expression::Array(items), open.start, close.end))
    }

    fn parse_object(&mut self) -> ParseResult<Node> {
        let open = self.expect(Token::LeftBrace)?;
        let mut entries = Vec::new();
        let mut height = 0;
        loop {
            let Some(token) = self.advance() else {
                return Err(self.unexpected_end("'}'"));
            };
            let is_identifier = token.value.as_identifier().is_some();
            let key = match &token.value {
                Token::RightBrace => {
                    self.grow(height + 1, open.start)?;
                    return Ok(Spanned::new(
                        Expression::Object(entries),
                        open.start,
                        token.end,
                    ));
                }
                Token::Identifier(name) => name.to_string(),
                Token::String(text) => text.to_string(),
                Token::Number(n) => crate::model::format_number(*n),
                Token::LeftBracket => {
                    return Err(ParseError::new(
                        ParseErrorKind::Unsupported,
                        token.start,
                        "Computed object keys are not supported",
                    ));
                }
                _ => return Err(self.unexpected(&token)),
            };

            let value = match self.current() {
                Some(Token::Colon) => {
                    self.pos += 1;
                    let value = self.parse_expression_with_precedence(Precedence::Assignment)?;
                    height = height.max(self.height);
                    value
                }
                Some(Token::Comma | Token::RightBrace) if is_identifier => {
                    height = height.max(1);
                    Spanned::new(Expression::identifier(key.clone()), token.start, token.end)
                }
                Some(_) => {
                    let next = self.tokens[self.pos].clone();
                    return Err(self.unexpected(&next));
                }
                None => return Err(self.unexpected_end("':'")),
            };
            entries.push((key, value));

            match self.current() {
                Some(Token::Comma) => self.pos += 1,
                Some(Token::RightBrace) => {}
                Some(_) => {
                    let next = self.tokens[self.pos].clone();
                    return Err(self.unexpected(&next));
                }
                None => return Err(self.unexpected_end("'}'")),
            }
        }
    }
}

fn too_deep(offset: usize) -> ParseError {
    ParseError::new(
        ParseErrorKind::TooDeep,
        offset,
        format!("Expression is nested deeper than {MAX_EXPRESSION_DEPTH} levels"),
    )
}

/// Parse a single expression using the Pratt parser
pub fn parse_expression_pratt(input: &str) -> ParseResult<Node> {
    PrattParser::new(input)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn parse(input: &str) -> Expression {
        parse_expression_pratt(input).expect("parse").value
    }

    fn binary(node: &Expression) -> (BinaryOperator, &Expression, &Expression) {
        match node {
            Expression::Binary {
                operator,
                left,
                right,
            } => (*operator, &left.value, &right.value),
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence_ordering() {
        assert!(Precedence::Postfix > Precedence::Unary);
        assert!(Precedence::Multiplicative > Precedence::Additive);
        assert!(Precedence::And > Precedence::Or);
        assert!(Precedence::Or > Precedence::Nullish);
    }

    #[test]
    fn test_multiplication_binds_tighter() {
        let expr = parse("1 + 2 * 3");
        let (op, left, right) = binary(&expr);
        assert_eq!(op, BinaryOperator::Add);
        assert_eq!(left, &Expression::number(1.0));
        assert_eq!(binary(right).0, BinaryOperator::Multiply);
    }

    #[test]
    fn test_associativity() {
        let expr = parse("10 - 4 - 3");
        let (_, left, right) = binary(&expr);
        assert_eq!(binary(left).0, BinaryOperator::Subtract);
        assert_eq!(right, &Expression::number(3.0));

        let expr = parse("2 ** 3 ** 2");
        let (_, left, right) = binary(&expr);
        assert_eq!(left, &Expression::number(2.0));
        assert_eq!(binary(right).0, BinaryOperator::Power);
    }

    #[test]
    fn test_conditional_and_nullish() {
        let expr = parse("$json.a ?? 'x' ? 1 : 2");
        match expr {
            Expression::Conditional { test, .. } => {
                assert_eq!(binary(&test.value).0, BinaryOperator::Nullish)
            }
            other => panic!("expected conditional, got {other:?}"),
        }
    }

    #[test]
    fn test_method_call_with_lambda() {
        let expr = parse("$json.items.filter(x => x.price > 10)");
        let Expression::Call {
            callee, arguments, ..
        } = expr
        else {
            panic!("expected call");
        };
        assert!(matches!(&callee.value, Expression::Member { property, .. } if property == "filter"));
        assert!(
            matches!(&arguments[0].value, Expression::Lambda { params, .. } if params == &["x".to_string()])
        );
    }

    #[test]
    fn test_long_argument_lists() {
        let Expression::Call { arguments, .. } = parse("Math.max(1, 2, 3, 4, 5, f(6, [7]))") else {
            panic!("expected call");
        };
        assert_eq!(arguments.len(), 6);
        assert!(matches!(&arguments[5].value, Expression::Call { arguments, .. } if arguments.len() == 2));
    }

    #[test]
    fn test_parenthesized_lambda_and_grouping() {
        assert!(matches!(parse("(a, b) => a + b"), Expression::Lambda { params, .. } if params.len() == 2));
        assert!(matches!(parse("() => 1"), Expression::Lambda { params, .. } if params.is_empty()));
        assert_eq!(binary(&parse("(1 + 2) * 3")).0, BinaryOperator::Multiply);
    }

    #[test]
    fn test_optional_chaining() {
        let expr = parse("$json?.user?.['name']");
        assert!(matches!(expr, Expression::Index { optional: true, .. }));
    }

    #[test]
    fn test_object_and_array_literals() {
        let expr = parse("{ a: 1, 'b c': [1, 2,], d }");
        let Expression::Object(entries) = expr else {
            panic!("expected object");
        };
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b c", "d"]);
        assert!(matches!(&entries[1].1.value, Expression::Array(items) if items.len() == 2));
    }

    #[test]
    fn test_spans_cover_source() {
        let node = parse_expression_pratt("  $json.a + 1").expect("parse");
        assert_eq!((node.start, node.end), (2, 13));
    }

    #[test]
    fn test_assignment_is_parsed() {
        assert!(matches!(parse("$env.KEY = 'x'"), Expression::Assign { .. }));
    }

    #[test]
    fn test_errors_carry_offsets() {
        let err = parse_expression_pratt("1 +").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEnd);
        assert_eq!(err.offset, 3);

        let err = parse_expression_pratt("a b").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
        assert_eq!(err.offset, 2);

        let err = parse_expression_pratt("new Date()").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Unsupported);
        assert_eq!(err.offset, 0);

        let err = parse_expression_pratt("a; b").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Unsupported);
    }

    #[rstest]
    #[case::additive_chain(vec!["1"; 2000].join(" + "))]
    #[case::member_chain(format!("$json{}", ".a".repeat(200_000)))]
    #[case::index_chain(format!("x{}", "[0]".repeat(5_000)))]
    #[case::call_chain(format!("f{}", "()".repeat(5_000)))]
    #[case::nested_parens(format!("{}1{}", "(".repeat(5_000), ")".repeat(5_000)))]
    #[case::unary_chain(format!("{}1", "!".repeat(5_000)))]
    fn test_deep_expressions_are_rejected(#[case] input: String) {
        let err = parse_expression_pratt(&input).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TooDeep);
    }

    #[test]
    fn test_chains_below_the_ceiling_parse() {
        let input = vec!["1"; MAX_EXPRESSION_DEPTH].join(" + ");
        assert!(parse_expression_pratt(&input).is_ok());

        let input = format!("$json{}", ".a".repeat(MAX_EXPRESSION_DEPTH - 1));
        assert!(parse_expression_pratt(&input).is_ok());

        let input = format!("$json{}", ".a".repeat(MAX_EXPRESSION_DEPTH));
        assert_eq!(
            parse_expression_pratt(&input).unwrap_err().kind,
            ParseErrorKind::TooDeep
        );
    }

    #[test]
    fn test_empty_input_is_undefined() {
        assert_eq!(parse("   "), Expression::Literal(Literal::Undefined));
    }
}
