//! Tabular data for design matrix construction
//!
//! This module provides the column-oriented containers that formulas are
//! evaluated against. Every column may carry missing values so that the
//! materializer can apply its null policy.

mod builder;
mod dataframe;
mod index;
mod series;
mod traits;

#[cfg(test)]
mod tests;

// Re-exports
pub use builder::DataFrameBuilder;
pub use dataframe::DataFrame;
pub use index::{GenericIndex, Index, IndexValue, RangeIndex};
pub use series::{Series, SeriesValue};
pub use traits::DataView;

// Type aliases for common use cases
pub type FloatArray = ndarray::Array1<f64>;
pub type IntArray = ndarray::Array1<i64>;
pub type BoolArray = ndarray::Array1<bool>;
pub type StringArray = Vec<String>;
pub type NullableStringArray = Vec<Option<String>>;

/// Error types specific to data operations
#[derive(thiserror::Error, Debug)]
pub enum DataError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error("Index out of bounds: index {index}, length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("Operation requires numeric data, got {0}")]
    NonNumericData(&'static str),

    #[error("Value '{value}' is not one of the declared categories {categories:?}")]
    UnknownCategory {
        value: String,
        categories: Vec<String>,
    },
}

/// Result type for data operations
pub type Result<T> = std::result::Result<T, DataError>;
