//! Traits for data operations

use super::*;

/// Trait for data structures that can be viewed as tabular data
///
/// This is the narrow surface the formula machinery needs from a data
/// backend: named columns of equal length plus row labels.
pub trait DataView: Send + Sync {
    /// Get the shape of the data
    fn shape(&self) -> (usize, usize);

    /// Get column names
    fn column_names(&self) -> Vec<&str>;

    /// Get a column by name
    fn get_column(&self, name: &str) -> Option<&Series>;

    /// Row labels
    fn index(&self) -> Index;

    /// Number of rows
    fn nrows(&self) -> usize {
        self.shape().0
    }
}

impl DataView for DataFrame {
    fn shape(&self) -> (usize, usize) {
        self.shape()
    }

    fn column_names(&self) -> Vec<&str> {
        self.column_names()
    }

    fn get_column(&self, name: &str) -> Option<&Series> {
        self.get_column(name)
    }

    fn index(&self) -> Index {
        self.index()
    }
}
