//! Materialization error types

use thiserror::Error;

use dm_core::data::DataError;
use dm_core::formula::FormulaError;

/// Errors raised while evaluating, encoding or assembling model matrices
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// Formula parsing or expansion error
    #[error("Formula error: {0}")]
    Formula(#[from] FormulaError),

    /// Data-related error
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// A model spec could not be written or read
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A factor could not be resolved against the data context
    #[error("Unable to evaluate factor `{factor}`: {message}")]
    FactorEvaluation {
        /// Factor expression
        factor: String,
        /// Error message
        message: String,
    },

    /// Evaluated values conflict with the declared or committed encoding
    #[error("{message}")]
    FactorEncoding {
        /// Factor expression
        factor: String,
        /// Error message
        message: String,
    },

    /// Invalid options or inconsistent model structure
    #[error("{message}")]
    Materialization {
        /// Error message
        message: String,
    },

    /// A factor has missing values under the `raise` policy
    #[error("Factor `{factor}` contains {count} null value(s).")]
    NullValues {
        /// Factor expression
        factor: String,
        /// Number of missing values
        count: usize,
    },
}

impl MaterializeError {
    pub fn evaluation(factor: impl Into<String>, message: impl Into<String>) -> Self {
        MaterializeError::FactorEvaluation {
            factor: factor.into(),
            message: message.into(),
        }
    }

    pub fn encoding(factor: impl Into<String>, message: impl Into<String>) -> Self {
        MaterializeError::FactorEncoding {
            factor: factor.into(),
            message: message.into(),
        }
    }

    pub fn materialization(message: impl Into<String>) -> Self {
        MaterializeError::Materialization {
            message: message.into(),
        }
    }
}

/// Result type for materialization
pub type Result<T> = std::result::Result<T, MaterializeError>;
