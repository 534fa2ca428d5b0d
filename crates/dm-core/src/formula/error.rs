//! Formula-specific error types
//!
//! This module provides detailed error types for formula parsing and term
//! expansion.

use thiserror::Error;

/// Errors that can occur during formula parsing and expansion
#[derive(Debug, Error)]
pub enum FormulaError {
    /// Syntax errors in the formula string
    #[error("Syntax error at position {position}: {message}")]
    Syntax {
        position: usize,
        message: String,
        context: Option<String>,
    },

    /// Operands that parse but cannot be expanded into terms
    #[error("Invalid formula structure: {message}")]
    InvalidStructure {
        message: String,
        suggestion: Option<String>,
    },

    /// A named part of a structured formula does not exist
    #[error("Formula has no part named '{key}'. Available parts: {available:?}")]
    MissingPart { key: String, available: Vec<String> },
}

/// Result type alias for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

impl FormulaError {
    /// Create a syntax error
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        FormulaError::Syntax {
            position,
            message: message.into(),
            context: None,
        }
    }

    /// Create a syntax error with context
    pub fn syntax_with_context(
        position: usize,
        message: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        FormulaError::Syntax {
            position,
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create a structure error
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        FormulaError::InvalidStructure {
            message: message.into(),
            suggestion: None,
        }
    }

    /// Create a structure error with a suggested fix
    pub fn invalid_structure_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        FormulaError::InvalidStructure {
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Position of a syntax error within the formula text
    pub fn position(&self) -> Option<usize> {
        match self {
            FormulaError::Syntax { position, .. } => Some(*position),
            _ => None,
        }
    }
}
