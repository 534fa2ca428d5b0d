//! Series data structure for holding homogeneous data
//!
//! A Series is a one-dimensional array that can hold data of a specific type.
//! It's the building block of DataFrames. Missing values are `NaN` for floats
//! and `None` for strings and categoricals; integer and boolean columns are
//! always complete.

use super::*;

use std::collections::{BTreeSet, HashMap};

/// A Series is a typed, one-dimensional array of data
#[derive(Clone, Debug, PartialEq)]
pub enum Series {
    /// Floating point numbers (f64), `NaN` marks a missing value
    Float(FloatArray),
    /// Integer numbers (i64)
    Int(IntArray),
    /// Boolean values
    Bool(BoolArray),
    /// String values
    String(NullableStringArray),
    /// Categorical data (codes into the ordered category list)
    Categorical(Vec<Option<u32>>, Vec<String>), // values, categories
}

impl Series {
    /// Create a new Float series
    pub fn float(data: impl Into<FloatArray>) -> Self {
        Series::Float(data.into())
    }

    /// Create a new Int series
    pub fn int(data: impl Into<IntArray>) -> Self {
        Series::Int(data.into())
    }

    /// Create a new Bool series
    pub fn bool(data: impl Into<BoolArray>) -> Self {
        Series::Bool(data.into())
    }

    /// Create a new String series without missing values
    pub fn string(data: impl Into<StringArray>) -> Self {
        Series::String(data.into().into_iter().map(Some).collect())
    }

    /// Create a new String series that may contain missing values
    pub fn nullable_string<T: AsRef<str>>(data: &[Option<T>]) -> Self {
        Series::String(
            data.iter()
                .map(|v| v.as_ref().map(|s| s.as_ref().to_string()))
                .collect(),
        )
    }

    /// Create a new Categorical series
    ///
    /// Categories are sorted for consistent encoding.
    pub fn categorical<T: AsRef<str>>(data: &[T]) -> Self {
        let values: Vec<Option<&str>> = data.iter().map(|s| Some(s.as_ref())).collect();
        Self::nullable_categorical(&values)
    }

    /// Create a new Categorical series that may contain missing values
    pub fn nullable_categorical<T: AsRef<str>>(data: &[Option<T>]) -> Self {
        let categories: Vec<String> = data
            .iter()
            .flatten()
            .map(|s| s.as_ref().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let category_map: HashMap<&str, u32> = categories
            .iter()
            .enumerate()
            .map(|(i, cat)| (cat.as_str(), i as u32))
            .collect();

        let encoded = data
            .iter()
            .map(|v| {
                v.as_ref()
                    .and_then(|s| category_map.get(s.as_ref()).copied())
            })
            .collect();

        Series::Categorical(encoded, categories)
    }

    /// Create a Categorical series with an explicit category order
    ///
    /// Fails if a value is not one of the declared categories.
    pub fn categorical_with_levels<T: AsRef<str>>(
        data: &[Option<T>],
        categories: Vec<String>,
    ) -> Result<Self> {
        let category_map: HashMap<&str, u32> = categories
            .iter()
            .enumerate()
            .map(|(i, cat)| (cat.as_str(), i as u32))
            .collect();

        let encoded = data
            .iter()
            .map(|v| match v {
                None => Ok(None),
                Some(s) => category_map
                    .get(s.as_ref())
                    .copied()
                    .map(Some)
                    .ok_or_else(|| DataError::UnknownCategory {
                        value: s.as_ref().to_string(),
                        categories: categories.clone(),
                    }),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Series::Categorical(encoded, categories))
    }

    /// Get the length of the series
    pub fn len(&self) -> usize {
        match self {
            Series::Float(arr) => arr.len(),
            Series::Int(arr) => arr.len(),
            Series::Bool(arr) => arr.len(),
            Series::String(arr) => arr.len(),
            Series::Categorical(arr, _) => arr.len(),
        }
    }

    /// Check if the series is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the type name of the series
    pub fn dtype(&self) -> &'static str {
        match self {
            Series::Float(_) => "float64",
            Series::Int(_) => "int64",
            Series::Bool(_) => "bool",
            Series::String(_) => "string",
            Series::Categorical(_, _) => "categorical",
        }
    }

    /// Declared categories, for categorical series
    pub fn categories(&self) -> Option<&[String]> {
        match self {
            Series::Categorical(_, cats) => Some(cats),
            _ => None,
        }
    }

    /// Get a value at index
    pub fn get(&self, idx: usize) -> Option<SeriesValue> {
        if idx >= self.len() {
            return None;
        }

        let value = match self {
            Series::Float(arr) if arr[idx].is_nan() => SeriesValue::Null,
            Series::Float(arr) => SeriesValue::Float(arr[idx]),
            Series::Int(arr) => SeriesValue::Int(arr[idx]),
            Series::Bool(arr) => SeriesValue::Bool(arr[idx]),
            Series::String(arr) => match &arr[idx] {
                Some(v) => SeriesValue::String(v.clone()),
                None => SeriesValue::Null,
            },
            Series::Categorical(arr, cats) => match arr[idx].and_then(|c| cats.get(c as usize)) {
                Some(cat) => SeriesValue::String(cat.clone()),
                None => SeriesValue::Null,
            },
        };
        Some(value)
    }

    /// Per-row missing value flags
    pub fn null_mask(&self) -> Vec<bool> {
        match self {
            Series::Float(arr) => arr.iter().map(|v| v.is_nan()).collect(),
            Series::Int(arr) => vec![false; arr.len()],
            Series::Bool(arr) => vec![false; arr.len()],
            Series::String(arr) => arr.iter().map(Option::is_none).collect(),
            Series::Categorical(arr, _) => arr.iter().map(Option::is_none).collect(),
        }
    }

    /// Number of missing values
    pub fn null_count(&self) -> usize {
        self.null_mask().into_iter().filter(|&null| null).count()
    }

    /// Filter the series with a boolean mask
    pub fn filter(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.len() {
            return Err(DataError::DimensionMismatch {
                expected: format!("mask length {}", self.len()),
                actual: format!("mask length {}", mask.len()),
            });
        }

        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, keep)| **keep)
            .map(|(i, _)| i)
            .collect();
        self.take(&indices)
    }

    /// Select rows by position, in the given order
    pub fn take(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&idx) = indices.iter().find(|&&idx| idx >= self.len()) {
            return Err(DataError::IndexOutOfBounds {
                index: idx,
                len: self.len(),
            });
        }

        Ok(match self {
            Series::Float(arr) => Series::Float(indices.iter().map(|&i| arr[i]).collect()),
            Series::Int(arr) => Series::Int(indices.iter().map(|&i| arr[i]).collect()),
            Series::Bool(arr) => Series::Bool(indices.iter().map(|&i| arr[i]).collect()),
            Series::String(arr) => Series::String(indices.iter().map(|&i| arr[i].clone()).collect()),
            Series::Categorical(arr, cats) => {
                Series::Categorical(indices.iter().map(|&i| arr[i]).collect(), cats.clone())
            }
        })
    }

    /// Convert to float values if possible
    pub fn to_float(&self) -> Result<FloatArray> {
        match self {
            Series::Float(arr) => Ok(arr.clone()),
            Series::Int(arr) => Ok(arr.mapv(|v| v as f64)),
            Series::Bool(arr) => Ok(arr.mapv(|v| if v { 1.0 } else { 0.0 })),
            Series::Categorical(_, _) => Err(DataError::NonNumericData("categorical")),
            Series::String(_) => Err(DataError::NonNumericData("string")),
        }
    }
}

/// Enum for type-safe value access
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    String(String),
    Null,
}

impl std::fmt::Display for SeriesValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeriesValue::Float(v) => write!(f, "{}", v),
            SeriesValue::Int(v) => write!(f, "{}", v),
            SeriesValue::Bool(v) => write!(f, "{}", v),
            SeriesValue::String(v) => write!(f, "{}", v),
            SeriesValue::Null => write!(f, "null"),
        }
    }
}
