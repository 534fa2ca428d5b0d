//! Term algebra: expanding an operator tree into terms
//!
//! Every subexpression expands to an ordered set of terms. Subtraction is
//! a set difference applied where it is written, so a removed term never
//! reaches enclosing expressions. The intercept is tracked alongside the
//! set: adding `0` or subtracting `1` removes it, subtracting `0` restores
//! it, and a removal carries outward until a later `1` overrides it.

use log::debug;

use crate::formula::ast::{Ast, Operator};
use crate::formula::error::{FormulaError, FormulaResult};
use crate::formula::factor::EvalMethod;
use crate::formula::term::{ScopedFactor, ScopedTerm};

/// Terms of one subexpression
#[derive(Debug, Clone, Default)]
struct TermSet {
    terms: Vec<ScopedTerm>,
    /// The intercept was explicitly removed; never set while `terms` holds it
    removes_intercept: bool,
}

impl TermSet {
    fn single(term: ScopedTerm) -> Self {
        Self {
            terms: vec![term],
            removes_intercept: false,
        }
    }

    fn removal() -> Self {
        Self {
            terms: Vec::new(),
            removes_intercept: true,
        }
    }

    fn has_intercept(&self) -> bool {
        self.terms.iter().any(ScopedTerm::is_intercept)
    }

    fn drop_intercept(&mut self) {
        self.terms.retain(|term| !term.is_intercept());
    }

    fn restore_intercept(&mut self) {
        if !self.has_intercept() {
            self.terms.insert(0, ScopedTerm::intercept());
        }
        self.removes_intercept = false;
    }
}

/// Expand an operator tree into its ordered, deduplicated terms
pub fn expand(ast: &Ast) -> FormulaResult<Vec<ScopedTerm>> {
    let terms = expand_node(ast)?.terms;

    debug!(
        "expanded '{}' into [{}]",
        ast,
        terms
            .iter()
            .map(ScopedTerm::label)
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(terms)
}

fn expand_node(ast: &Ast) -> FormulaResult<TermSet> {
    match ast {
        Ast::Factor(factor) if factor.is_literal("0") => Ok(TermSet::removal()),
        Ast::Factor(factor) => Ok(TermSet::single(ScopedTerm::from_factors([
            factor.clone(),
        ]))),
        Ast::Unary {
            operator: Operator::Negate,
            operand,
        } => Ok(subtract(TermSet::default(), expand_node(operand)?)),
        Ast::Unary { operator, .. } => Err(FormulaError::invalid_structure(format!(
            "'{}' cannot be used as a unary operator",
            operator
        ))),
        Ast::Binary { operator, lhs, rhs } => match operator {
            Operator::Add => Ok(add(expand_node(lhs)?, expand_node(rhs)?)),
            Operator::Subtract => Ok(subtract(expand_node(lhs)?, expand_node(rhs)?)),
            Operator::Interact => Ok(interact(&expand_node(lhs)?, &expand_node(rhs)?)),
            Operator::Multiply => {
                let left = expand_node(lhs)?;
                let right = expand_node(rhs)?;
                let product = interact(&left, &right);
                Ok(add(add(left, right), product))
            }
            Operator::Divide => {
                let left = expand_node(lhs)?;
                let right = expand_node(rhs)?;
                Ok(nest(left, right))
            }
            Operator::Power => power(expand_node(lhs)?, rhs),
            Operator::Tilde => Err(FormulaError::invalid_structure_with_suggestion(
                "'~' can only separate the two sides of a formula",
                "parse the formula instead of expanding a raw tree",
            )),
            Operator::Negate => Err(FormulaError::invalid_structure(
                "unary '-' cannot take two operands",
            )),
        },
    }
}

/// Union of both sets; an intercept removal on the right wins
fn add(mut left: TermSet, right: TermSet) -> TermSet {
    for term in right.terms {
        if !left.terms.contains(&term) {
            left.terms.push(term);
        }
    }
    if right.removes_intercept {
        left.drop_intercept();
        left.removes_intercept = true;
    } else if left.has_intercept() {
        left.removes_intercept = false;
    }
    left
}

/// Terms of `left` that do not appear in `right`
fn subtract(mut left: TermSet, right: TermSet) -> TermSet {
    left.terms.retain(|term| !right.terms.contains(term));
    if right.removes_intercept {
        left.restore_intercept();
    } else if right.has_intercept() {
        left.removes_intercept = true;
    }
    left
}

/// Cartesian product of two term sets
fn interact(left: &TermSet, right: &TermSet) -> TermSet {
    let mut out = TermSet::default();
    for l in &left.terms {
        for r in &right.terms {
            let term = multiply(l, r);
            if !out.terms.contains(&term) {
                out.terms.push(term);
            }
        }
    }
    out
}

/// Product of two terms; `1` is the identity
fn multiply(left: &ScopedTerm, right: &ScopedTerm) -> ScopedTerm {
    let factors: Vec<ScopedFactor> = left
        .factors
        .iter()
        .chain(&right.factors)
        .filter(|f| !f.factor.is_literal("1"))
        .cloned()
        .collect();

    if factors.is_empty() {
        return ScopedTerm::intercept();
    }
    ScopedTerm::new(factors)
}

/// `left / right`: `left + (all factors of left):right`, with the factors
/// contributed by `right` reduced inside the nested interaction
fn nest(left: TermSet, right: TermSet) -> TermSet {
    let outer = ScopedTerm::new(
        left.terms
            .iter()
            .flat_map(|t| t.factors.iter())
            .filter(|f| f.factor.eval_method != EvalMethod::Literal)
            .cloned(),
    );

    let nested = TermSet {
        terms: right
            .terms
            .iter()
            .map(|term| {
                ScopedTerm::new(term.factors.iter().map(|f| {
                    if f.factor.eval_method == EvalMethod::Literal {
                        f.clone()
                    } else {
                        f.to_reduced()
                    }
                }))
            })
            .collect(),
        removes_intercept: false,
    };

    let product = interact(&TermSet::single(outer), &nested);
    add(left, product)
}

/// `base ** n`: every product of up to `n` copies of `base`
fn power(base: TermSet, exponent: &Ast) -> FormulaResult<TermSet> {
    let n = match exponent {
        Ast::Factor(factor) if factor.eval_method == EvalMethod::Literal => {
            factor.expr.parse::<usize>().ok().filter(|&n| n > 0)
        }
        _ => None,
    }
    .ok_or_else(|| {
        FormulaError::invalid_structure_with_suggestion(
            format!("The exponent of '**' must be a positive integer, got '{}'", exponent),
            "write the power as a whole number, e.g. (a + b)**2",
        )
    })?;

    let mut result = base.clone();
    let mut current = base.clone();
    for _ in 1..n {
        current = interact(&current, &base);
        result = add(result, current.clone());
    }
    Ok(result)
}
