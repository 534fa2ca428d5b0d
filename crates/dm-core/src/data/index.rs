//! Index structures for DataFrames

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index value enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    Integer(usize),
    String(String),
    Float(f64),
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Integer(v) => write!(f, "{}", v),
            IndexValue::String(v) => write!(f, "{}", v),
            IndexValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<usize> for IndexValue {
    fn from(value: usize) -> Self {
        IndexValue::Integer(value)
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        IndexValue::String(value.to_string())
    }
}

/// Default range index
#[derive(Debug, Clone, PartialEq)]
pub struct RangeIndex {
    start: usize,
    end: usize,
    step: usize,
}

impl RangeIndex {
    /// Create a new range index
    pub fn new(start: usize, end: usize, step: usize) -> Self {
        Self {
            start,
            end,
            step: step.max(1),
        }
    }

    /// Create a range index from 0 to n
    pub fn from_len(n: usize) -> Self {
        Self::new(0, n, 1)
    }

    pub fn len(&self) -> usize {
        (self.end.saturating_sub(self.start)).div_ceil(self.step)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Option<IndexValue> {
        let pos = self.start + idx * self.step;
        (pos < self.end).then_some(IndexValue::Integer(pos))
    }
}

/// Index holding explicit labels
#[derive(Debug, Clone, PartialEq)]
pub struct GenericIndex {
    values: Vec<IndexValue>,
}

impl GenericIndex {
    /// Create a new generic index from values
    pub fn new(values: Vec<IndexValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<IndexValue> {
        self.values.get(idx).cloned()
    }
}

/// Enum for different index types
#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    Range(RangeIndex),
    Generic(GenericIndex),
}

impl Index {
    /// Create a range index
    pub fn range(start: usize, end: usize, step: usize) -> Self {
        Self::Range(RangeIndex::new(start, end, step))
    }

    /// Create a generic index
    pub fn generic(values: Vec<IndexValue>) -> Self {
        Self::Generic(GenericIndex::new(values))
    }

    /// Get the length of the index
    pub fn len(&self) -> usize {
        match self {
            Index::Range(idx) => idx.len(),
            Index::Generic(idx) => idx.len(),
        }
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get value at index
    pub fn get(&self, idx: usize) -> Option<IndexValue> {
        match self {
            Index::Range(rdx) => rdx.get(idx),
            Index::Generic(rdx) => rdx.get(idx),
        }
    }

    /// All labels, in row order
    pub fn labels(&self) -> Vec<IndexValue> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    /// Keep the labels of the selected row positions
    ///
    /// The result is always a generic index so that original labels survive
    /// row removal.
    pub fn take(&self, indices: &[usize]) -> Self {
        Index::Generic(GenericIndex::new(
            indices.iter().filter_map(|&i| self.get(i)).collect(),
        ))
    }
}
