//! Core building blocks for design matrix construction
//!
//! - [`data`]: column-oriented tables with missing values and row labels
//! - [`formula`]: formula parsing, term algebra and structured formula sides

pub mod data;
pub mod formula;

pub use data::{DataError, DataFrame, DataView, Series};
pub use formula::{
    Ast, EvalMethod, Factor, FactorKind, Formula, FormulaError, ScopedFactor, ScopedTerm,
    SimpleFormula, Structured,
};
