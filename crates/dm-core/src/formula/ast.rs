//! Operator tree produced by the formula parser

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::formula::factor::Factor;

/// Formula operators, from loosest to tightest binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// `lhs ~ rhs`
    Tilde,
    /// `a + b`
    Add,
    /// `a - b`
    Subtract,
    /// Unary `-a`
    Negate,
    /// `a * b`
    Multiply,
    /// `a / b`
    Divide,
    /// `a : b`
    Interact,
    /// `a ** n`
    Power,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Tilde => "~",
            Operator::Add => "+",
            Operator::Subtract | Operator::Negate => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Interact => ":",
            Operator::Power => "**",
        }
    }

    pub fn precedence(&self) -> u16 {
        match self {
            Operator::Tilde => 1,
            Operator::Add | Operator::Subtract => 100,
            Operator::Negate => 150,
            Operator::Multiply | Operator::Divide => 200,
            Operator::Interact => 300,
            Operator::Power => 500,
        }
    }

    pub fn is_right_associative(&self) -> bool {
        matches!(self, Operator::Power)
    }

    /// Binary operator spelled by `symbol`
    pub fn binary(symbol: &str) -> Option<Self> {
        match symbol {
            "~" => Some(Operator::Tilde),
            "+" => Some(Operator::Add),
            "-" => Some(Operator::Subtract),
            "*" => Some(Operator::Multiply),
            "/" => Some(Operator::Divide),
            ":" => Some(Operator::Interact),
            "**" | "^" => Some(Operator::Power),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A node of the formula operator tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ast {
    Factor(Factor),
    Unary {
        operator: Operator,
        operand: Box<Ast>,
    },
    Binary {
        operator: Operator,
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
}

impl Ast {
    pub fn unary(operator: Operator, operand: Ast) -> Self {
        Ast::Unary {
            operator,
            operand: Box::new(operand),
        }
    }

    pub fn binary(operator: Operator, lhs: Ast, rhs: Ast) -> Self {
        Ast::Binary {
            operator,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Prefix `tree` with the implicit intercept: `1 + tree`
    pub fn with_intercept(tree: Ast) -> Self {
        Ast::binary(Operator::Add, Ast::Factor(Factor::literal("1")), tree)
    }

    /// Binding strength used when printing; leaves never need parentheses
    fn precedence(&self) -> u16 {
        match self {
            Ast::Factor(_) => u16::MAX,
            Ast::Unary { operator, .. } | Ast::Binary { operator, .. } => operator.precedence(),
        }
    }

    /// All factors at the leaves, left to right
    pub fn factors(&self) -> Vec<&Factor> {
        let mut out = Vec::new();
        self.collect_factors(&mut out);
        out
    }

    fn collect_factors<'a>(&'a self, out: &mut Vec<&'a Factor>) {
        match self {
            Ast::Factor(factor) => out.push(factor),
            Ast::Unary { operand, .. } => operand.collect_factors(out),
            Ast::Binary { lhs, rhs, .. } => {
                lhs.collect_factors(out);
                rhs.collect_factors(out);
            }
        }
    }
}

impl fmt::Display for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ast::Factor(factor) => f.write_str(&factor.to_source()),
            Ast::Unary { operator, operand } => {
                write!(f, "{}", operator)?;
                write_operand(f, operand, operand.precedence() < operator.precedence())
            }
            Ast::Binary { operator, lhs, rhs } => {
                let p = operator.precedence();
                let (wrap_lhs, wrap_rhs) = if operator.is_right_associative() {
                    (lhs.precedence() <= p, rhs.precedence() < p)
                } else {
                    (lhs.precedence() < p, rhs.precedence() <= p)
                };
                write_operand(f, lhs, wrap_lhs)?;
                match operator {
                    Operator::Interact | Operator::Power => write!(f, "{}", operator)?,
                    _ => write!(f, " {} ", operator)?,
                }
                write_operand(f, rhs, wrap_rhs)
            }
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, ast: &Ast, parenthesize: bool) -> fmt::Result {
    if parenthesize {
        write!(f, "({})", ast)
    } else {
        write!(f, "{}", ast)
    }
}
