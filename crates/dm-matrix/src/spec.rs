//! Model specifications: everything needed to rebuild a model matrix
//!
//! A [`ModelSpec`] starts out unfitted, holding only a formula side and a
//! [`MaterializeConfig`]. Materializing it records the term structure, the
//! encoder state and the transform state. Materializing a fitted spec against
//! new data replays those decisions instead of deriving them again, so the
//! new matrix has exactly the same columns as the one it was fitted on.

use std::ops::Range;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use dm_core::data::DataView;
use dm_core::formula::{Formula, FactorKind, ScopedTerm, SimpleFormula, Structured};

use crate::config::{MaterializeConfig, OutputKind};
use crate::error::{MaterializeError, Result};
use crate::materializer::{EncodingState, Materializer};
use crate::output::{ModelMatrices, ModelMatrix};

#[cfg(test)]
mod tests;

/// How one formula term was encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermStructure {
    pub term: ScopedTerm,
    /// The scoped terms the term was encoded as, after rank planning
    pub scoped_terms: Vec<ScopedTerm>,
    /// Generated column names, in order
    pub columns: Vec<String>,
}

/// Specification of a single model matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub formula: SimpleFormula,
    pub config: MaterializeConfig,

    /// Recorded term structure; `None` until fitted
    #[serde(default)]
    pub structure: Option<Vec<TermStructure>>,

    /// Resolved kind and encoding decisions per factor
    #[serde(default)]
    pub encoder_state: IndexMap<String, (FactorKind, EncodingState)>,

    /// Stateful transform state per expression factor
    #[serde(default)]
    pub transform_state: IndexMap<String, JsonValue>,
}

impl ModelSpec {
    pub fn new(formula: SimpleFormula, config: MaterializeConfig) -> Self {
        Self {
            formula,
            config,
            structure: None,
            encoder_state: IndexMap::new(),
            transform_state: IndexMap::new(),
        }
    }

    /// Spec for an explicit list of terms
    pub fn from_terms(terms: Vec<ScopedTerm>, config: MaterializeConfig) -> Self {
        Self::new(SimpleFormula::from_terms(terms, false), config)
    }

    pub fn terms(&self) -> &[ScopedTerm] {
        &self.formula.terms
    }

    pub fn is_fitted(&self) -> bool {
        self.structure.is_some()
    }

    /// Same spec with a different output representation
    pub fn with_output(mut self, output: OutputKind) -> Self {
        self.config.output = output;
        self
    }

    /// Column names in matrix order; empty until fitted
    pub fn column_names(&self) -> Vec<&str> {
        self.structure
            .iter()
            .flatten()
            .flat_map(|term| term.columns.iter().map(String::as_str))
            .collect()
    }

    /// Column name to position
    pub fn column_indices(&self) -> IndexMap<&str, usize> {
        self.column_names()
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect()
    }

    /// Term label to the range of columns it generated
    pub fn term_slices(&self) -> IndexMap<String, Range<usize>> {
        let mut start = 0;
        let mut slices = IndexMap::new();
        for term in self.structure.iter().flatten() {
            let end = start + term.columns.len();
            slices.insert(term.term.label(), start..end);
            start = end;
        }
        slices
    }

    /// Columns of a term (by label) or a single column (by name)
    pub fn get_slice(&self, name: &str) -> Result<Range<usize>> {
        if let Some(range) = self.term_slices().get(name) {
            return Ok(range.clone());
        }
        if let Some(&i) = self.column_indices().get(name) {
            return Ok(i..i + 1);
        }
        Err(MaterializeError::materialization(format!(
            "Model specification has no term or column named `{}`.",
            name
        )))
    }

    /// Data columns read by the formula
    pub fn variables(&self) -> Vec<&str> {
        self.formula.variables()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Materialize against `data`, replaying any recorded state
    pub fn get_model_matrix(&self, data: &dyn DataView) -> Result<ModelMatrix> {
        Materializer::new(data).get_model_matrix_for_spec(self.clone())
    }
}

/// Model specs mirroring the structure of their formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpecs(pub Structured<ModelSpec>);

impl ModelSpecs {
    /// One unfitted spec per formula side, all sharing `config`
    pub fn from_formula(formula: &Formula, config: &MaterializeConfig) -> Self {
        Self(
            formula
                .structure
                .clone()
                .map(|side| ModelSpec::new(side, config.clone())),
        )
    }

    pub fn root(&self) -> Option<&ModelSpec> {
        self.0.root()
    }

    pub fn lhs(&self) -> Option<&ModelSpec> {
        self.0.get("lhs").and_then(Structured::root)
    }

    pub fn rhs(&self) -> Option<&ModelSpec> {
        match &self.0 {
            Structured::Root(spec) => Some(spec),
            other => other.get("rhs").and_then(Structured::root),
        }
    }

    pub fn get_model_matrix(&self, data: &dyn DataView) -> Result<ModelMatrices> {
        Materializer::new(data).get_model_matrices(self.clone())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
