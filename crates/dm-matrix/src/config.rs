//! Materialization options

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MaterializeError;

/// Options controlling how a formula is materialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializeConfig {
    /// Reduce the rank of factors that span the intercept
    pub ensure_full_rank: bool,
    /// Missing value policy
    pub na_action: NaAction,
    /// Output matrix type
    pub output: OutputKind,
    /// Term ordering
    pub cluster_by: ClusterBy,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        Self {
            ensure_full_rank: true,
            na_action: NaAction::Drop,
            output: OutputKind::Labeled,
            cluster_by: ClusterBy::None,
        }
    }
}

impl MaterializeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_full_rank(mut self, ensure_full_rank: bool) -> Self {
        self.ensure_full_rank = ensure_full_rank;
        self
    }

    pub fn with_na_action(mut self, na_action: NaAction) -> Self {
        self.na_action = na_action;
        self
    }

    pub fn with_output(mut self, output: OutputKind) -> Self {
        self.output = output;
        self
    }

    pub fn with_cluster_by(mut self, cluster_by: ClusterBy) -> Self {
        self.cluster_by = cluster_by;
        self
    }

    /// Reject option combinations that cannot be materialized
    pub fn validate(&self) -> Result<(), MaterializeError> {
        if self.output == OutputKind::Sparse && self.na_action == NaAction::Ignore {
            return Err(MaterializeError::materialization(
                "Sparse outputs cannot store null values; use `na_action='drop'` or `na_action='raise'`.",
            ));
        }
        Ok(())
    }
}

/// What to do with rows holding missing values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NaAction {
    /// Exclude the row from every output matrix
    #[default]
    Drop,
    /// Keep the row; nulls become `NaN` or all-zero indicator rows
    Ignore,
    /// Fail with [`MaterializeError::NullValues`]
    Raise,
}

impl NaAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NaAction::Drop => "drop",
            NaAction::Ignore => "ignore",
            NaAction::Raise => "raise",
        }
    }
}

impl FromStr for NaAction {
    type Err = MaterializeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop" => Ok(NaAction::Drop),
            "ignore" => Ok(NaAction::Ignore),
            "raise" => Ok(NaAction::Raise),
            other => Err(MaterializeError::materialization(format!(
                "Nominated na_action `{}` is invalid. Available actions are: drop, ignore, raise.",
                other
            ))),
        }
    }
}

impl fmt::Display for NaAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The matrix type produced by a materialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// `ndarray::Array2<f64>`
    Dense,
    /// A [`DataFrame`](dm_core::DataFrame) keeping the retained row labels
    #[default]
    Labeled,
    /// Compressed sparse columns
    Sparse,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Dense => "dense",
            OutputKind::Labeled => "labeled",
            OutputKind::Sparse => "sparse",
        }
    }
}

impl FromStr for OutputKind {
    type Err = MaterializeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dense" => Ok(OutputKind::Dense),
            "labeled" => Ok(OutputKind::Labeled),
            "sparse" => Ok(OutputKind::Sparse),
            other => Err(MaterializeError::materialization(format!(
                "Nominated output `{}` is invalid. Available output types are: dense, labeled, sparse.",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How terms are ordered before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterBy {
    /// Keep the expansion order
    #[default]
    None,
    /// Group terms sharing the same numerical factors, stably
    NumericalFactors,
}

impl FromStr for ClusterBy {
    type Err = MaterializeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ClusterBy::None),
            "numerical_factors" => Ok(ClusterBy::NumericalFactors),
            other => Err(MaterializeError::materialization(format!(
                "Nominated cluster_by `{}` is invalid. Available options are: none, numerical_factors.",
                other
            ))),
        }
    }
}
