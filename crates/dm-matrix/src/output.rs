//! Output adapters for materialized columns

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use dm_core::data::{DataFrame, DataFrameBuilder, Index, IndexValue, Series};
use dm_core::formula::Structured;

use crate::config::OutputKind;
use crate::error::Result;
use crate::materializer::EncodedColumns;
use crate::spec::{ModelSpec, ModelSpecs};

/// Compressed sparse column matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    nrows: usize,
    ncols: usize,
    /// Start of each column in `indices`/`data`, plus the total
    indptr: Vec<usize>,
    /// Row of each stored value
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl SparseMatrix {
    /// Build from dense columns in one pass, storing only non-zero values
    pub fn from_columns<'c, I>(nrows: usize, columns: I) -> Self
    where
        I: IntoIterator<Item = &'c Array1<f64>>,
    {
        let mut indptr = vec![0];
        let mut indices = Vec::new();
        let mut data = Vec::new();

        for column in columns {
            for (row, &value) in column.iter().enumerate() {
                if value != 0.0 {
                    indices.push(row);
                    data.push(value);
                }
            }
            indptr.push(data.len());
        }

        Self {
            nrows,
            ncols: indptr.len() - 1,
            indptr,
            indices,
            data,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    /// Number of stored values
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Row positions and values stored for column `col`
    pub fn column(&self, col: usize) -> Option<(&[usize], &[f64])> {
        let start = *self.indptr.get(col)?;
        let end = *self.indptr.get(col + 1)?;
        Some((&self.indices[start..end], &self.data[start..end]))
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.nrows {
            return None;
        }
        let (rows, values) = self.column(col)?;
        Some(match rows.binary_search(&row) {
            Ok(i) => values[i],
            Err(_) => 0.0,
        })
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.nrows, self.ncols));
        for col in 0..self.ncols {
            if let Some((rows, values)) = self.column(col) {
                for (&row, &value) in rows.iter().zip(values) {
                    dense[(row, col)] = value;
                }
            }
        }
        dense
    }
}

/// Matrix values in the requested representation
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixData {
    Dense(Array2<f64>),
    Sparse(SparseMatrix),
    Labeled(DataFrame),
}

/// A materialized model matrix and the spec that reproduces it
#[derive(Debug, Clone)]
pub struct ModelMatrix {
    pub data: MatrixData,
    pub model_spec: ModelSpec,
    /// Labels of the retained rows
    pub index: Index,
    /// Labels of the rows excluded for missing values
    pub dropped: Vec<IndexValue>,
}

impl ModelMatrix {
    pub(crate) fn assemble(
        columns: EncodedColumns,
        index: Index,
        dropped: Vec<IndexValue>,
        model_spec: ModelSpec,
    ) -> Result<Self> {
        let nrows = index.len();
        let data = match model_spec.config.output {
            OutputKind::Dense => {
                let values: Vec<&Array1<f64>> = columns.values().collect();
                MatrixData::Dense(Array2::from_shape_fn((nrows, values.len()), |(i, j)| {
                    values[j][i]
                }))
            }
            OutputKind::Sparse => MatrixData::Sparse(SparseMatrix::from_columns(nrows, columns.values())),
            OutputKind::Labeled => {
                let mut builder = DataFrameBuilder::new().with_index(index.clone());
                for (name, values) in columns {
                    builder = builder.with_column(name, Series::float(values))?;
                }
                MatrixData::Labeled(builder.build()?)
            }
        };

        Ok(Self {
            data,
            model_spec,
            index,
            dropped,
        })
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        match &self.data {
            MatrixData::Dense(m) => m.dim(),
            MatrixData::Sparse(m) => m.shape(),
            MatrixData::Labeled(df) => df.shape(),
        }
    }

    pub fn nrows(&self) -> usize {
        self.shape().0
    }

    pub fn ncols(&self) -> usize {
        self.shape().1
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.model_spec.column_names()
    }

    /// Values of the column called `name`
    pub fn column(&self, name: &str) -> Option<Array1<f64>> {
        let position = self.column_names().iter().position(|c| *c == name)?;
        match &self.data {
            MatrixData::Dense(m) => Some(m.column(position).to_owned()),
            MatrixData::Sparse(m) => {
                let (rows, values) = m.column(position)?;
                let mut column = Array1::zeros(m.nrows);
                for (&row, &value) in rows.iter().zip(values) {
                    column[row] = value;
                }
                Some(column)
            }
            MatrixData::Labeled(df) => df.get_column(name)?.to_float().ok(),
        }
    }

    /// Dense copy, whatever the representation
    pub fn to_dense(&self) -> Array2<f64> {
        match &self.data {
            MatrixData::Dense(m) => m.clone(),
            MatrixData::Sparse(m) => m.to_dense(),
            MatrixData::Labeled(df) => {
                let (nrows, ncols) = df.shape();
                let columns: Vec<Array1<f64>> = df
                    .iter()
                    .map(|(_, series)| series.to_float().unwrap_or_else(|_| Array1::zeros(nrows)))
                    .collect();
                Array2::from_shape_fn((nrows, ncols), |(i, j)| columns[j][i])
            }
        }
    }

    pub fn as_dense(&self) -> Option<&Array2<f64>> {
        match &self.data {
            MatrixData::Dense(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sparse(&self) -> Option<&SparseMatrix> {
        match &self.data {
            MatrixData::Sparse(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_labeled(&self) -> Option<&DataFrame> {
        match &self.data {
            MatrixData::Labeled(df) => Some(df),
            _ => None,
        }
    }
}

/// Model matrices mirroring the structure of their formula
#[derive(Debug, Clone)]
pub struct ModelMatrices(pub Structured<ModelMatrix>);

impl ModelMatrices {
    /// The matrix of a one-sided formula
    pub fn root(&self) -> Option<&ModelMatrix> {
        self.0.root()
    }

    pub fn into_root(self) -> Option<ModelMatrix> {
        self.0.into_root()
    }

    pub fn lhs(&self) -> Option<&ModelMatrix> {
        self.0.get("lhs").and_then(Structured::root)
    }

    /// Right-hand side; the root of a one-sided formula
    pub fn rhs(&self) -> Option<&ModelMatrix> {
        match &self.0 {
            Structured::Root(matrix) => Some(matrix),
            other => other.get("rhs").and_then(Structured::root),
        }
    }

    /// The specs of every matrix, in the same structure
    pub fn model_specs(&self) -> ModelSpecs {
        ModelSpecs(self.0.as_ref().map(|m| m.model_spec.clone()))
    }
}
