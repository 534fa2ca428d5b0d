//! Formula parser for Wilkinson-style formulas
//!
//! Parsing happens in two stages. The tokenizer turns the text into factor,
//! operator and parenthesis tokens:
//! - Bare names: `x`, `.x`, `my_var.2`
//! - Escaped names: `` `my var` ``, `[my var]`
//! - Function calls: `log(x)`, `poly(x, 2)`, `C(A, levels=['b', 'a'])`
//! - Embedded expressions: `{x + 1}`
//! - Literals: `1`, `0.5`, `1e-3`, `'text'`
//!
//! The parser is a precedence climber over those tokens producing an [`Ast`].
//! Precedence (loosest first): `~`, `+ -`, unary `-`, `* /`, `:`, `**`.
//! `**` associates to the right, everything else to the left.

use std::iter::Peekable;
use std::str::CharIndices;

use log::trace;

use crate::formula::ast::{Ast, Operator};
use crate::formula::error::{FormulaError, FormulaResult};
use crate::formula::factor::{is_identifier_char, is_identifier_start, Factor};

/// A lexical unit of a formula
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Factor(Factor),
    Operator(String),
    LeftParen,
    RightParen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

/// Formula tokenizer
pub struct Tokenizer<'a> {
    chars: Peekable<CharIndices<'a>>,
    source: &'a str,
}

impl<'a> Tokenizer<'a> {
    /// Create a new tokenizer
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            source,
        }
    }

    /// Tokenize the entire formula
    pub fn tokenize(source: &str) -> FormulaResult<Vec<Token>> {
        let mut tokenizer = Tokenizer::new(source);
        let mut tokens = Vec::new();
        while let Some(token) = tokenizer.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn error(&self, position: usize, message: impl Into<String>) -> FormulaError {
        FormulaError::syntax_with_context(position, message, self.source)
    }

    fn next_token(&mut self) -> FormulaResult<Option<Token>> {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let Some(&(position, c)) = self.chars.peek() else {
            return Ok(None);
        };

        let kind = match c {
            '(' => {
                self.chars.next();
                TokenKind::LeftParen
            }
            ')' => {
                self.chars.next();
                TokenKind::RightParen
            }
            '*' => {
                self.chars.next();
                if self.chars.next_if(|(_, c)| *c == '*').is_some() {
                    TokenKind::Operator("**".to_string())
                } else {
                    TokenKind::Operator("*".to_string())
                }
            }
            '~' | '+' | '-' | '/' | ':' | '^' => {
                self.chars.next();
                TokenKind::Operator(c.to_string())
            }
            '`' => TokenKind::Factor(Factor::lookup(self.read_delimited('`', '`')?)),
            '[' => TokenKind::Factor(Factor::lookup(self.read_delimited('[', ']')?)),
            '{' => {
                let source = self.read_braced()?;
                if source.trim().is_empty() {
                    return Err(self.error(position, "Empty embedded expression"));
                }
                TokenKind::Factor(Factor::expression(source.trim()))
            }
            '\'' | '"' => {
                let text = self.read_quoted()?;
                TokenKind::Factor(Factor::literal(text))
            }
            c if c.is_ascii_digit() || (c == '.' && self.peek_second_is_digit()) => {
                TokenKind::Factor(Factor::literal(self.read_number()))
            }
            c if is_identifier_start(c) => self.read_name()?,
            other => {
                return Err(self.error(position, format!("Unexpected character '{}'", other)));
            }
        };

        Ok(Some(Token { kind, position }))
    }

    fn peek_second_is_digit(&self) -> bool {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next().is_some_and(|(_, c)| c.is_ascii_digit())
    }

    /// Read `open ... close` and return the raw text between the delimiters
    fn read_delimited(&mut self, open: char, close: char) -> FormulaResult<String> {
        let Some((start, _)) = self.chars.next() else {
            return Err(self.error(self.source.len(), format!("Expected '{}'", open)));
        };
        let mut text = String::new();
        let mut closed = false;
        for (_, c) in self.chars.by_ref() {
            if c == close {
                closed = true;
                break;
            }
            text.push(c);
        }

        match (closed, text.is_empty()) {
            (false, _) => Err(self.error(start, format!("Missing closing delimiter '{}'", close))),
            (true, true) => Err(self.error(start, "Empty escaped name")),
            (true, false) => Ok(text),
        }
    }

    /// Read a quoted string literal, keeping the quotes
    fn read_quoted(&mut self) -> FormulaResult<String> {
        let Some((start, quote)) = self.chars.next() else {
            return Err(self.error(self.source.len(), "Expected a quote"));
        };
        let mut text = String::from(quote);
        let mut escaped = false;
        for (_, c) in self.chars.by_ref() {
            text.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                return Ok(text);
            }
        }
        Err(self.error(start, format!("Missing closing quote {}", quote)))
    }

    /// Read `{ ... }` allowing nested braces and quoted text
    fn read_braced(&mut self) -> FormulaResult<String> {
        let Some((start, _)) = self.chars.next() else {
            return Err(self.error(self.source.len(), "Expected '{'"));
        };
        let mut depth = 1usize;
        let mut quote: Option<char> = None;
        let mut text = String::new();
        for (_, c) in self.chars.by_ref() {
            match quote {
                Some(q) => {
                    if c == q {
                        quote = None;
                    }
                }
                None => match c {
                    '\'' | '"' => quote = Some(c),
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(text);
                        }
                    }
                    _ => {}
                },
            }
            text.push(c);
        }
        Err(self.error(start, "Missing closing delimiter '}'"))
    }

    fn read_number(&mut self) -> String {
        let mut text = String::new();
        let mut prev = ' ';
        while let Some(&(_, c)) = self.chars.peek() {
            let exponent_sign = (c == '+' || c == '-') && (prev == 'e' || prev == 'E');
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
                text.push(c);
                prev = c;
                self.chars.next();
            } else {
                break;
            }
        }
        text
    }

    /// Read a bare name, or a whole call when the name is followed by `(`
    fn read_name(&mut self) -> FormulaResult<TokenKind> {
        let mut name = String::new();
        while let Some((_, c)) = self.chars.next_if(|(_, c)| is_identifier_char(*c)) {
            name.push(c);
        }

        match self.chars.peek() {
            Some(&(open, '(')) => {
                let arguments = self.read_call_arguments(open)?;
                Ok(TokenKind::Factor(Factor::expression(format!(
                    "{}({})",
                    name, arguments
                ))))
            }
            _ => Ok(TokenKind::Factor(Factor::lookup(name))),
        }
    }

    /// Read a balanced `( ... )` and return its normalized contents
    ///
    /// Whitespace runs collapse to one space, commas are followed by exactly
    /// one space, and quoted text is kept verbatim.
    fn read_call_arguments(&mut self, open: usize) -> FormulaResult<String> {
        self.chars.next();
        let mut depth = 1usize;
        let mut quote: Option<char> = None;
        let mut out = String::new();
        let mut pending_space = false;

        for (_, c) in self.chars.by_ref() {
            if let Some(q) = quote {
                out.push(c);
                if c == q {
                    quote = None;
                }
                continue;
            }

            if c.is_whitespace() {
                pending_space = true;
                continue;
            }

            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(out);
                    }
                }
                _ => {}
            }

            if pending_space && !out.is_empty() && !out.ends_with(['(', ' ']) && c != ')' && c != ',' {
                out.push(' ');
            }
            pending_space = false;

            match c {
                ',' => out.push_str(", "),
                '\'' | '"' => {
                    quote = Some(c);
                    out.push(c);
                }
                _ => out.push(c),
            }
        }

        Err(self.error(open, "Missing closing delimiter ')'"))
    }
}

/// Formula parser
pub struct FormulaParser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
    source: String,
}

impl FormulaParser {
    /// Create a new parser
    pub fn new(source: &str) -> FormulaResult<Self> {
        Ok(Self {
            tokens: Tokenizer::tokenize(source)?,
            position: 0,
            depth: 0,
            source: source.to_string(),
        })
    }

    /// Parse a formula into its (optional) left-hand side and right-hand side
    ///
    /// The implicit intercept is added to the right-hand side only.
    pub fn parse(source: &str) -> FormulaResult<(Option<Ast>, Ast)> {
        let mut parser = FormulaParser::new(source)?;
        parser.parse_formula()
    }

    fn parse_formula(&mut self) -> FormulaResult<(Option<Ast>, Ast)> {
        if self.tokens.is_empty() {
            return Err(FormulaError::syntax(0, "Empty formula"));
        }

        let (lhs, rhs) = if self.peek_operator() == Some("~") {
            self.position += 1;
            (None, self.parse_expression(Operator::Tilde.precedence())?)
        } else {
            let tree = self.parse_expression(0)?;
            match tree {
                Ast::Binary {
                    operator: Operator::Tilde,
                    lhs,
                    rhs,
                } => (Some(*lhs), *rhs),
                tree => (None, tree),
            }
        };

        if let Some(token) = self.tokens.get(self.position) {
            let message = match &token.kind {
                TokenKind::RightParen => "Unmatched ')'",
                TokenKind::Operator(op) if op == "~" => "Formula may contain at most one '~'",
                _ => "Unexpected token",
            };
            return Err(self.error(token.position, message));
        }

        trace!("parsed formula '{}'", self.source);
        Ok((lhs, Ast::with_intercept(rhs)))
    }

    fn error(&self, position: usize, message: impl Into<String>) -> FormulaError {
        FormulaError::syntax_with_context(position, message, self.source.clone())
    }

    fn end_position(&self) -> usize {
        self.source.len()
    }

    fn peek_operator(&self) -> Option<&str> {
        match self.tokens.get(self.position).map(|t| &t.kind) {
            Some(TokenKind::Operator(op)) => Some(op.as_str()),
            _ => None,
        }
    }

    fn parse_expression(&mut self, min_precedence: u16) -> FormulaResult<Ast> {
        let mut lhs = self.parse_prefix()?;

        while let Some(token) = self.tokens.get(self.position) {
            let position = token.position;
            let operator = match &token.kind {
                TokenKind::RightParen => break,
                TokenKind::Factor(_) | TokenKind::LeftParen => {
                    return Err(self.error(position, "Missing operator between operands"));
                }
                TokenKind::Operator(symbol) => Operator::binary(symbol).ok_or_else(|| {
                    self.error(position, format!("Unknown operator '{}'", symbol))
                })?,
            };

            let precedence = operator.precedence();
            if precedence <= min_precedence {
                break;
            }

            if operator == Operator::Tilde {
                if self.depth > 0 {
                    return Err(self.error(position, "'~' must appear at the top level"));
                }
                if matches!(lhs, Ast::Binary { operator: Operator::Tilde, .. }) {
                    return Err(self.error(position, "Formula may contain at most one '~'"));
                }
            }

            self.position += 1;
            let next_min = if operator.is_right_associative() {
                precedence - 1
            } else {
                precedence
            };
            let rhs = self.parse_expression(next_min)?;
            lhs = Ast::binary(operator, lhs, rhs);
        }

        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> FormulaResult<Ast> {
        let Some(token) = self.tokens.get(self.position).cloned() else {
            return Err(self.error(self.end_position(), "Missing operand"));
        };
        self.position += 1;

        match token.kind {
            TokenKind::Factor(factor) => Ok(Ast::Factor(factor)),
            TokenKind::LeftParen => {
                self.depth += 1;
                if matches!(
                    self.tokens.get(self.position).map(|t| &t.kind),
                    Some(TokenKind::RightParen)
                ) {
                    return Err(self.error(token.position, "Empty parentheses"));
                }
                let inner = self.parse_expression(0)?;
                match self.tokens.get(self.position) {
                    Some(Token {
                        kind: TokenKind::RightParen,
                        ..
                    }) => {
                        self.position += 1;
                        self.depth -= 1;
                        Ok(inner)
                    }
                    _ => Err(self.error(token.position, "Unclosed '('")),
                }
            }
            TokenKind::Operator(symbol) if symbol == "-" => {
                let operand = self.parse_expression(Operator::Negate.precedence())?;
                Ok(Ast::unary(Operator::Negate, operand))
            }
            TokenKind::Operator(symbol) if symbol == "~" => Err(self.error(
                token.position,
                if self.depth > 0 {
                    "'~' must appear at the top level"
                } else {
                    "Formula may contain at most one '~'"
                },
            )),
            TokenKind::Operator(symbol) => Err(self.error(
                token.position,
                format!("Missing operand before '{}'", symbol),
            )),
            TokenKind::RightParen => Err(self.error(token.position, "Missing operand before ')'")),
        }
    }
}
