//! Wilkinson-style formula parsing and term expansion
//!
//! This module turns formula text such as `y ~ a * b + C(g)` into the
//! ordered terms that a materializer turns into model matrix columns.

pub use crate::formula::error::{FormulaError, FormulaResult};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod ast;
pub mod error;
mod expander;
mod factor;
mod parser;
mod structured;
mod term;


pub use ast::{Ast, Operator};
pub use expander::expand;
pub use factor::{EvalMethod, Factor, FactorKind};
pub use parser::{FormulaParser, Token, TokenKind, Tokenizer};
pub use structured::Structured;
pub use term::{ScopedFactor, ScopedTerm};

pub type Result<T> = std::result::Result<T, FormulaError>;

/// One side of a formula: its operator tree and expanded terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleFormula {
    /// Operator tree, including the implicit intercept on the right-hand side
    pub ast: Ast,

    /// Ordered, deduplicated terms
    pub terms: Vec<ScopedTerm>,

    /// Whether this side carries an implicit intercept
    pub implicit_intercept: bool,
}

impl SimpleFormula {
    /// Expand an operator tree
    pub fn from_ast(ast: Ast, implicit_intercept: bool) -> Result<Self> {
        let terms = expand(&ast)?;
        Ok(Self {
            ast,
            terms,
            implicit_intercept,
        })
    }

    /// Build directly from terms
    pub fn from_terms(terms: Vec<ScopedTerm>, implicit_intercept: bool) -> Self {
        let ast = terms_to_ast(&terms);
        Self {
            ast,
            terms,
            implicit_intercept,
        }
    }

    /// Whether the intercept survived expansion
    pub fn has_intercept(&self) -> bool {
        self.terms.iter().any(ScopedTerm::is_intercept)
    }

    /// Term labels in order
    pub fn term_labels(&self) -> Vec<String> {
        self.terms.iter().map(ScopedTerm::label).collect()
    }

    /// Data column names read by any factor, in order of first use
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = Vec::new();
        for factor in self.terms.iter().flat_map(ScopedTerm::iter_factors) {
            for var in factor.variables() {
                if !vars.contains(&var) {
                    vars.push(var);
                }
            }
        }
        vars
    }
}

impl fmt::Display for SimpleFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self
            .terms
            .iter()
            .filter(|t| !t.is_intercept())
            .map(|t| {
                t.factors
                    .iter()
                    .map(|sf| sf.factor.to_source())
                    .collect::<Vec<_>>()
                    .join(":")
            })
            .collect();

        let intercept = self.has_intercept();
        if labels.is_empty() {
            return f.write_str(if intercept || !self.implicit_intercept {
                "1"
            } else {
                "0"
            });
        }

        if self.implicit_intercept && !intercept {
            write!(f, "0 + ")?;
        } else if !self.implicit_intercept && intercept {
            write!(f, "1 + ")?;
        }
        write!(f, "{}", labels.join(" + "))
    }
}

fn terms_to_ast(terms: &[ScopedTerm]) -> Ast {
    let term_ast = |term: &ScopedTerm| {
        let mut factors = term.factors.iter().map(|f| Ast::Factor(f.factor.clone()));
        let first = factors
            .next()
            .unwrap_or_else(|| Ast::Factor(Factor::literal("1")));
        factors.fold(first, |acc, f| Ast::binary(Operator::Interact, acc, f))
    };

    let mut asts = terms.iter().map(term_ast);
    let first = asts.next().unwrap_or_else(|| Ast::Factor(Factor::literal("0")));
    asts.fold(first, |acc, t| Ast::binary(Operator::Add, acc, t))
}

/// A parsed formula specifying a model matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    /// Original formula string
    pub original: String,

    /// Parsed sides (`Root` for one-sided, `lhs`/`rhs` for two-sided)
    pub structure: Structured<SimpleFormula>,
}

impl Formula {
    /// Parse a formula from a string
    pub fn parse(formula: &str) -> Result<Self> {
        let (lhs, rhs) = FormulaParser::parse(formula)?;
        let rhs = SimpleFormula::from_ast(rhs, true)?;

        let structure = match lhs {
            Some(lhs) => Structured::two_sided(SimpleFormula::from_ast(lhs, false)?, rhs),
            None => Structured::Root(rhs),
        };

        Ok(Self {
            original: formula.to_string(),
            structure,
        })
    }

    /// Parse several independent formulas into one sequence
    pub fn parse_sequence<S: AsRef<str>>(formulas: &[S]) -> Result<Self> {
        let parsed = formulas
            .iter()
            .map(|f| Formula::parse(f.as_ref()).map(|f| f.structure))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            original: formulas
                .iter()
                .map(|f| f.as_ref())
                .collect::<Vec<_>>()
                .join("; "),
            structure: Structured::Sequence(parsed),
        })
    }

    /// Left-hand side, when the formula is two-sided
    pub fn lhs(&self) -> Option<&SimpleFormula> {
        self.structure.get("lhs").and_then(Structured::root)
    }

    /// Right-hand side (the whole formula when one-sided)
    pub fn rhs(&self) -> Option<&SimpleFormula> {
        match &self.structure {
            Structured::Root(rhs) => Some(rhs),
            other => other.get("rhs").and_then(Structured::root),
        }
    }

    /// Check if formula has a left-hand side
    pub fn has_response(&self) -> bool {
        self.lhs().is_some()
    }

    /// Whether the right-hand side keeps its intercept
    pub fn has_intercept(&self) -> bool {
        self.rhs().is_some_and(SimpleFormula::has_intercept)
    }

    /// Terms for every part of the formula
    pub fn terms(&self) -> Structured<&Vec<ScopedTerm>> {
        self.structure.as_ref().map(|side| &side.terms)
    }

    /// Get all data column names mentioned in the formula
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = Vec::new();
        for side in self.structure.iter() {
            for var in side.variables() {
                if !vars.contains(&var) {
                    vars.push(var);
                }
            }
        }
        vars
    }
}

impl FromStr for Formula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self> {
        Formula::parse(s)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_part(f: &mut fmt::Formatter<'_>, part: &Structured<SimpleFormula>) -> fmt::Result {
            match part {
                Structured::Root(rhs) => write!(f, "~ {}", rhs),
                Structured::Named(_) => match (
                    part.get("lhs").and_then(Structured::root),
                    part.get("rhs").and_then(Structured::root),
                ) {
                    (Some(lhs), Some(rhs)) => write!(f, "{} ~ {}", lhs, rhs),
                    _ => write!(f, "{}", part),
                },
                Structured::Sequence(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            f.write_str("; ")?;
                        }
                        write_part(f, item)?;
                    }
                    Ok(())
                }
            }
        }

        write_part(f, &self.structure)
    }
}
