//! Symbolic factors: the atoms of formula terms

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::formula::error::FormulaError;

/// How a factor obtains its values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMethod {
    /// Resolve the name against the data context
    Lookup,
    /// The expression is itself the value (numbers and quoted strings)
    Literal,
    /// Hand the source to a factor evaluator
    Expression,
}

/// The kind of values a factor produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    Numerical,
    Categorical,
    Constant,
    #[default]
    Unknown,
}

impl FactorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactorKind::Numerical => "numerical",
            FactorKind::Categorical => "categorical",
            FactorKind::Constant => "constant",
            FactorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FactorKind {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "numerical" => Ok(FactorKind::Numerical),
            "categorical" => Ok(FactorKind::Categorical),
            "constant" => Ok(FactorKind::Constant),
            "unknown" => Ok(FactorKind::Unknown),
            other => Err(FormulaError::invalid_structure(format!(
                "Unknown factor kind '{}'",
                other
            ))),
        }
    }
}

/// A symbolic reference to the values of one model input
///
/// Identity (equality, hashing and ordering) is the expression text only:
/// the same name always denotes the same factor regardless of how it is
/// evaluated or what kind it was declared as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factor {
    pub expr: String,
    pub eval_method: EvalMethod,
    #[serde(default)]
    pub kind: FactorKind,
}

impl Factor {
    pub fn new(expr: impl Into<String>, eval_method: EvalMethod, kind: FactorKind) -> Self {
        Self {
            expr: expr.into(),
            eval_method,
            kind,
        }
    }

    /// A column lookup
    pub fn lookup(expr: impl Into<String>) -> Self {
        Self::new(expr, EvalMethod::Lookup, FactorKind::Unknown)
    }

    /// A literal constant
    pub fn literal(expr: impl Into<String>) -> Self {
        Self::new(expr, EvalMethod::Literal, FactorKind::Constant)
    }

    /// Source handed to a factor evaluator
    pub fn expression(expr: impl Into<String>) -> Self {
        Self::new(expr, EvalMethod::Expression, FactorKind::Unknown)
    }

    /// Declare the kind of values this factor produces
    pub fn with_kind(mut self, kind: FactorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Whether this is the literal `value` (e.g. `1` for the intercept)
    pub fn is_literal(&self, value: &str) -> bool {
        self.eval_method == EvalMethod::Literal && self.expr == value
    }

    /// Numeric value of a literal factor
    pub fn literal_value(&self) -> Option<f64> {
        match self.eval_method {
            EvalMethod::Literal => self.expr.parse().ok(),
            _ => None,
        }
    }

    /// Names of data columns this factor reads
    ///
    /// Lookups read their own name; expressions read every identifier that is
    /// not immediately called as a function.
    pub fn variables(&self) -> Vec<&str> {
        match self.eval_method {
            EvalMethod::Lookup => vec![self.expr.as_str()],
            EvalMethod::Literal => Vec::new(),
            EvalMethod::Expression => expression_identifiers(&self.expr),
        }
    }

    /// Formula source that parses back to this factor
    pub fn to_source(&self) -> String {
        match self.eval_method {
            EvalMethod::Literal => self.expr.clone(),
            EvalMethod::Lookup if is_identifier(&self.expr) => self.expr.clone(),
            EvalMethod::Lookup => format!("`{}`", self.expr),
            EvalMethod::Expression if is_call(&self.expr) => self.expr.clone(),
            EvalMethod::Expression => format!("{{{}}}", self.expr),
        }
    }
}

impl PartialEq for Factor {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl Eq for Factor {}

impl Hash for Factor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.expr.hash(state);
    }
}

impl PartialOrd for Factor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Factor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.expr.cmp(&other.expr)
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

pub(crate) fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '.'
}

pub(crate) fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_identifier_start(c) => chars.all(is_identifier_char),
        _ => false,
    }
}

/// `name(...)` with the call spanning the whole text
fn is_call(s: &str) -> bool {
    let Some(open) = s.find('(') else {
        return false;
    };
    if !is_identifier(&s[..open]) || !s.ends_with(')') {
        return false;
    }

    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip_while(|(i, _)| *i < open) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return i == s.len() - 1;
                    }
                }
                _ => {}
            },
        }
    }
    false
}

fn expression_identifiers(source: &str) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    let bytes = source.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if c == b'\'' || c == b'"' {
            quote = Some(c);
            i += 1;
            continue;
        }
        if is_identifier_start(c as char) && !(c == b'.' && next_is_digit(bytes, i)) {
            let start = i;
            while i < bytes.len() && is_identifier_char(bytes[i] as char) {
                i += 1;
            }
            let name = &source[start..i];
            let rest = source[i..].trim_start();
            let is_keyword_arg = rest.starts_with('=') && !rest.starts_with("==");
            if !rest.starts_with('(') && !is_keyword_arg && !names.contains(&name) {
                names.push(name);
            }
            continue;
        }
        if c.is_ascii_digit() {
            while i < bytes.len() && (is_identifier_char(bytes[i] as char)) {
                i += 1;
            }
            continue;
        }
        i += 1;
    }

    names
}

fn next_is_digit(bytes: &[u8], i: usize) -> bool {
    bytes.get(i + 1).is_some_and(u8::is_ascii_digit)
}
