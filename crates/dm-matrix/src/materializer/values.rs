//! Raw factor values and their metadata

use std::collections::BTreeSet;

use indexmap::IndexMap;
use ndarray::Array1;

use dm_core::data::Series;
use dm_core::formula::{Factor, FactorKind};

/// Key of a labeled map that carries metadata rather than values
pub const METADATA_KEY: &str = "__metadata__";

/// Values produced by evaluating a factor, before encoding
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A single number broadcast to every row
    Scalar(f64),
    /// One number per row; `NaN` is missing
    Numeric(Array1<f64>),
    /// One label per row; `None` is missing
    ///
    /// `levels` is the declared category order, if any. Without it levels
    /// are derived from the observed values.
    Categorical {
        values: Vec<Option<String>>,
        levels: Option<Vec<String>>,
    },
    /// Several named sub-values produced by one factor
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Number of rows, `None` for scalars
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Scalar(_) => None,
            Value::Numeric(values) => Some(values.len()),
            Value::Categorical { values, .. } => Some(values.len()),
            Value::Map(fields) => fields
                .iter()
                .filter(|(key, _)| key.as_str() != METADATA_KEY)
                .find_map(|(_, value)| value.len()),
        }
    }

    /// Kind implied by the shape of the values
    pub fn inferred_kind(&self) -> FactorKind {
        match self {
            Value::Scalar(_) => FactorKind::Constant,
            Value::Numeric(_) => FactorKind::Numerical,
            Value::Categorical { .. } => FactorKind::Categorical,
            Value::Map(fields) => {
                let categorical = fields
                    .values()
                    .any(|v| v.inferred_kind() == FactorKind::Categorical);
                if categorical {
                    FactorKind::Categorical
                } else {
                    FactorKind::Numerical
                }
            }
        }
    }

    /// Per-row missing flags; scalars are never missing
    pub fn null_mask(&self, nrows: usize) -> Vec<bool> {
        match self {
            Value::Scalar(_) => vec![false; nrows],
            Value::Numeric(values) => values.iter().map(|v| v.is_nan()).collect(),
            Value::Categorical { values, .. } => values.iter().map(Option::is_none).collect(),
            Value::Map(fields) => {
                let mut mask = vec![false; nrows];
                for (key, value) in fields {
                    if key == METADATA_KEY {
                        continue;
                    }
                    for (m, null) in mask.iter_mut().zip(value.null_mask(nrows)) {
                        *m |= null;
                    }
                }
                mask
            }
        }
    }

    /// Reinterpret numbers as category labels
    pub fn into_categorical(self) -> Value {
        match self {
            Value::Numeric(values) => Value::Categorical {
                values: values
                    .iter()
                    .map(|v| (!v.is_nan()).then(|| v.to_string()))
                    .collect(),
                levels: None,
            },
            Value::Map(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, value.into_categorical()))
                    .collect(),
            ),
            other => other,
        }
    }
}

impl From<&Series> for Value {
    fn from(series: &Series) -> Self {
        match series {
            Series::Float(values) => Value::Numeric(values.clone()),
            Series::Int(values) => Value::Numeric(values.mapv(|v| v as f64)),
            Series::Bool(values) => Value::Numeric(values.mapv(|v| if v { 1.0 } else { 0.0 })),
            Series::String(values) => Value::Categorical {
                values: values.clone(),
                levels: None,
            },
            Series::Categorical(codes, categories) => Value::Categorical {
                values: codes
                    .iter()
                    .map(|code| code.and_then(|c| categories.get(c as usize).cloned()))
                    .collect(),
                levels: Some(categories.clone()),
            },
        }
    }
}

impl From<Array1<f64>> for Value {
    fn from(values: Array1<f64>) -> Self {
        Value::Numeric(values)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Scalar(value)
    }
}

/// Sorted distinct labels; numeric order when every label is a number
pub fn derive_levels<'a, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut levels: Vec<String> = values
        .into_iter()
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    // Labels like "nan" or "inf" parse but have no numeric order
    let numbers: Option<Vec<f64>> = levels
        .iter()
        .map(|l| l.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect();
    if let Some(numbers) = numbers {
        let mut paired: Vec<(f64, String)> = numbers.into_iter().zip(levels).collect();
        paired.sort_by(|a, b| a.0.total_cmp(&b.0));
        levels = paired.into_iter().map(|(_, l)| l).collect();
    }
    levels
}

/// Facts about evaluated values that drive encoding
#[derive(Debug, Clone, PartialEq)]
pub struct FactorMetadata {
    pub kind: FactorKind,
    /// The columns of this factor sum to a constant
    pub spans_intercept: bool,
    /// Map field omitted at reduced rank
    pub drop_field: Option<String>,
    /// Explicitly categorical (e.g. `C(x)`); nulls encode as zero rows
    pub pre_encoded: bool,
}

impl Default for FactorMetadata {
    fn default() -> Self {
        Self {
            kind: FactorKind::Unknown,
            spans_intercept: false,
            drop_field: None,
            pre_encoded: false,
        }
    }
}

/// Values together with their metadata
#[derive(Debug, Clone, PartialEq)]
pub struct FactorValues {
    pub value: Value,
    pub metadata: FactorMetadata,
}

impl FactorValues {
    /// Values with metadata inferred from their shape
    pub fn new(value: impl Into<Value>) -> Self {
        let value = value.into();
        let kind = value.inferred_kind();
        Self {
            metadata: FactorMetadata {
                kind,
                spans_intercept: kind == FactorKind::Categorical,
                ..FactorMetadata::default()
            },
            value,
        }
    }

    pub fn with_kind(mut self, kind: FactorKind) -> Self {
        self.metadata.kind = kind;
        self
    }

    pub fn with_spans_intercept(mut self, spans_intercept: bool) -> Self {
        self.metadata.spans_intercept = spans_intercept;
        self
    }

    pub fn with_drop_field(mut self, field: impl Into<String>) -> Self {
        self.metadata.drop_field = Some(field.into());
        self
    }

    pub fn pre_encoded(mut self) -> Self {
        self.metadata.pre_encoded = true;
        self
    }
}

/// A factor with the values it evaluated to
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedFactor {
    /// The factor as declared in the formula
    pub factor: Factor,
    pub values: FactorValues,
}

impl EvaluatedFactor {
    pub fn new(factor: Factor, values: FactorValues) -> Self {
        Self { factor, values }
    }

    pub fn expr(&self) -> &str {
        &self.factor.expr
    }

    /// Resolved kind of the values
    pub fn kind(&self) -> FactorKind {
        self.values.metadata.kind
    }
}
