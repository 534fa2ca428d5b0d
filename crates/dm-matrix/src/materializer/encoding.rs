//! Turning evaluated factors into named numeric columns
//!
//! Encoding works on the retained row positions of a pass. Every
//! data-dependent choice (currently the category levels) is written to an
//! [`EncodingState`] the first time a factor is encoded and read back from
//! it afterwards, which is what makes a fitted model spec replayable.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use log::warn;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use dm_core::formula::FactorKind;

use super::values::{derive_levels, EvaluatedFactor, Value, METADATA_KEY};
use crate::error::{MaterializeError, Result};

/// Ordered column name to values
pub type EncodedColumns = IndexMap<String, Array1<f64>>;

/// Persisted encoding decisions for one factor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodingState {
    /// Category levels, in column order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub levels: Option<Vec<String>>,

    /// State of each field of a multi-column factor
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub fields: IndexMap<String, EncodingState>,
}

/// Encode `factor` over the row positions `rows`
pub fn encode_factor(
    factor: &EvaluatedFactor,
    rows: &[usize],
    reduced: bool,
    state: &mut EncodingState,
) -> Result<EncodedColumns> {
    let expr = factor.expr();
    let metadata = &factor.values.metadata;

    match &factor.values.value {
        Value::Scalar(v) => {
            let mut columns = EncodedColumns::new();
            columns.insert(expr.to_string(), Array1::from_elem(rows.len(), *v));
            Ok(columns)
        }
        _ if metadata.kind == FactorKind::Constant => Err(MaterializeError::encoding(
            expr,
            format!("Constant factor `{}` did not evaluate to a single number.", expr),
        )),
        Value::Numeric(values) => {
            let mut columns = EncodedColumns::new();
            columns.insert(expr.to_string(), take(values, rows));
            Ok(columns)
        }
        Value::Categorical { values, levels } => Ok(encode_categorical(
            expr,
            values,
            levels.as_deref(),
            rows,
            reduced,
            state,
        )),
        Value::Map(fields) => {
            let mut columns = EncodedColumns::new();
            for (key, value) in fields {
                if key == METADATA_KEY {
                    continue;
                }
                if reduced && metadata.drop_field.as_deref() == Some(key.as_str()) {
                    continue;
                }

                let name = format!("{}[{}]", expr, key);
                let field_state = state.fields.entry(key.clone()).or_default();
                match value {
                    Value::Scalar(v) => {
                        columns.insert(name, Array1::from_elem(rows.len(), *v));
                    }
                    Value::Numeric(values) => {
                        columns.insert(name, take(values, rows));
                    }
                    Value::Categorical { values, levels } => {
                        columns.extend(encode_categorical(
                            &name,
                            values,
                            levels.as_deref(),
                            rows,
                            reduced,
                            field_state,
                        ));
                    }
                    Value::Map(_) => {
                        return Err(MaterializeError::encoding(
                            expr,
                            format!(
                                "Field `{}` of factor `{}` is itself a map, which cannot be encoded.",
                                key, expr
                            ),
                        ))
                    }
                }
            }
            Ok(columns)
        }
    }
}

/// Treatment (dummy) coding; reduced rank drops the first level
fn encode_categorical(
    name: &str,
    values: &[Option<String>],
    declared: Option<&[String]>,
    rows: &[usize],
    reduced: bool,
    state: &mut EncodingState,
) -> EncodedColumns {
    let levels = state
        .levels
        .get_or_insert_with(|| match declared {
            Some(levels) => levels.to_vec(),
            None => derive_levels(rows.iter().filter_map(|&row| values[row].as_deref())),
        })
        .clone();

    let positions: HashMap<&str, usize> = levels
        .iter()
        .enumerate()
        .map(|(i, level)| (level.as_str(), i))
        .collect();

    let mut columns = vec![Array1::<f64>::zeros(rows.len()); levels.len()];
    let mut unseen: BTreeSet<&str> = BTreeSet::new();
    for (i, &row) in rows.iter().enumerate() {
        let Some(value) = values[row].as_deref() else {
            continue;
        };
        match positions.get(value) {
            Some(&j) => columns[j][i] = 1.0,
            None => {
                unseen.insert(value);
            }
        }
    }

    if !unseen.is_empty() {
        warn!(
            "`{}` has levels {:?} that are not in the encoding levels {:?}; they are encoded as all-zero rows",
            name, unseen, levels
        );
    }

    let skip = usize::from(reduced);
    levels
        .iter()
        .zip(columns)
        .skip(skip)
        .map(|(level, column)| (format!("{}[T.{}]", name, level), column))
        .collect()
}

/// Row-wise products of one column from each factor
///
/// The first factor varies fastest. With no factors the result is the
/// `Intercept` column.
pub fn interact(factors: &[EncodedColumns], scale: f64, nrows: usize) -> EncodedColumns {
    let mut products: Vec<(Vec<&str>, Array1<f64>)> =
        vec![(Vec::new(), Array1::from_elem(nrows, scale))];

    for columns in factors.iter().rev() {
        let mut next = Vec::with_capacity(products.len() * columns.len());
        for (names, values) in &products {
            for (name, column) in columns {
                let mut product_names = Vec::with_capacity(names.len() + 1);
                product_names.push(name.as_str());
                product_names.extend(names.iter().copied());
                next.push((product_names, values * column));
            }
        }
        products = next;
    }

    products
        .into_iter()
        .map(|(names, values)| {
            let name = if names.is_empty() {
                "Intercept".to_string()
            } else {
                names.join(":")
            };
            (name, values)
        })
        .collect()
}

fn take(values: &Array1<f64>, rows: &[usize]) -> Array1<f64> {
    rows.iter().map(|&row| values[row]).collect()
}
