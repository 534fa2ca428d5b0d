//! The materialization driver
//!
//! A [`Materializer`] turns formulas or model specs into model matrices
//! against one data source. Each call runs a single pass:
//!
//! 1. every factor of every formula side is evaluated once, and rows with
//!    missing values are collected according to the null policy;
//! 2. each side is rank planned (or its recorded plan is reused), encoded
//!    over the shared retained rows and assembled into the requested output.
//!
//! Evaluated factors and encoded columns are cached for the duration of the
//! pass only.

mod context;
mod encoding;
mod evaluator;
mod rank;
mod values;

#[cfg(test)]
mod tests;

pub use context::{ContextSource, DataLayer, LayeredContext};
pub use encoding::{encode_factor, interact, EncodedColumns, EncodingState};
pub use evaluator::{BuiltinEvaluator, FactorEvaluator};
pub use rank::{cluster_terms, EvaluatedScopedTerm, RankPlan};
pub use values::{derive_levels, EvaluatedFactor, FactorMetadata, FactorValues, Value, METADATA_KEY};

use std::collections::{BTreeSet, HashMap};

use log::{debug, trace};
use serde_json::Value as JsonValue;

use dm_core::data::{DataView, Index, IndexValue};
use dm_core::formula::{EvalMethod, Factor, FactorKind, Formula, Structured};

use crate::config::{MaterializeConfig, NaAction};
use crate::error::{MaterializeError, Result};
use crate::output::{ModelMatrices, ModelMatrix};
use crate::spec::{ModelSpec, ModelSpecs, TermStructure};

static BUILTIN_EVALUATOR: BuiltinEvaluator = BuiltinEvaluator;

/// Builds model matrices from one data source
pub struct Materializer<'a> {
    data: &'a dyn DataView,
    bindings: Option<&'a dyn ContextSource>,
    context: Option<&'a dyn ContextSource>,
    evaluator: &'a dyn FactorEvaluator,
}

impl<'a> Materializer<'a> {
    pub fn new(data: &'a dyn DataView) -> Self {
        Self {
            data,
            bindings: None,
            context: None,
            evaluator: &BUILTIN_EVALUATOR,
        }
    }

    /// Names resolved before the data columns
    pub fn with_bindings(mut self, bindings: &'a dyn ContextSource) -> Self {
        self.bindings = Some(bindings);
        self
    }

    /// Names resolved after the data columns
    pub fn with_context(mut self, context: &'a dyn ContextSource) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_evaluator(mut self, evaluator: &'a dyn FactorEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Parse `formula` and materialize every side of it
    pub fn get_model_matrix(&self, formula: &str, config: &MaterializeConfig) -> Result<ModelMatrices> {
        let formula = Formula::parse(formula)?;
        debug!("materializing `{}`", formula.original);
        self.get_model_matrices(ModelSpecs::from_formula(&formula, config))
    }

    /// Materialize a structure of specs in one pass
    pub fn get_model_matrices(&self, specs: ModelSpecs) -> Result<ModelMatrices> {
        for spec in specs.0.iter() {
            spec.config.validate()?;
        }

        let data = DataLayer(self.data);
        let nrows = self.data.nrows();
        let mut pass = Pass::new(self.layered_context(&data), self.evaluator, nrows);
        let specs = specs.0.try_map(|mut spec| -> Result<ModelSpec> {
            pass.evaluate_spec(&mut spec)?;
            Ok(spec)
        })?;

        let rows: Vec<usize> = (0..nrows).filter(|row| !pass.drop_rows.contains(row)).collect();
        let index = self.data.index();
        let dropped: Vec<IndexValue> = pass
            .drop_rows
            .iter()
            .filter_map(|&row| index.get(row))
            .collect();
        let retained = if dropped.is_empty() {
            index
        } else {
            debug!(
                "dropping {} of {} rows with missing values: {:?}",
                dropped.len(),
                nrows,
                dropped.iter().map(ToString::to_string).collect::<Vec<_>>()
            );
            index.take(&rows)
        };

        let matrices = specs.try_map(|spec| pass.materialize(spec, &rows, &retained, &dropped))?;
        Ok(ModelMatrices(matrices))
    }

    /// Materialize a single spec
    pub fn get_model_matrix_for_spec(&self, spec: ModelSpec) -> Result<ModelMatrix> {
        let matrices = self.get_model_matrices(ModelSpecs(Structured::Root(spec)))?;
        matrices
            .into_root()
            .ok_or_else(|| MaterializeError::materialization("Expected a single model matrix."))
    }

    /// Evaluate one factor against the data, recording transform state in
    /// `spec`
    pub fn evaluate_factor(&self, factor: &Factor, spec: &mut ModelSpec) -> Result<EvaluatedFactor> {
        let data = DataLayer(self.data);
        let mut pass = Pass::new(self.layered_context(&data), self.evaluator, self.data.nrows());
        pass.evaluate(factor, spec)?;
        pass.factor_cache.remove(&factor.expr).ok_or_else(|| {
            MaterializeError::evaluation(&factor.expr, "Factor was not retained after evaluation.")
        })
    }

    /// Encode an evaluated factor over every row, recording encoder state in
    /// `spec`
    pub fn encode_evaluated_factor(
        &self,
        factor: &EvaluatedFactor,
        spec: &mut ModelSpec,
        reduced: bool,
    ) -> Result<EncodedColumns> {
        let rows: Vec<usize> = (0..self.data.nrows()).collect();
        encode_with_cache(&mut HashMap::new(), factor, reduced, &rows, spec)
    }

    /// Bindings shadow the data, which shadows the extra context
    fn layered_context<'c>(&'c self, data: &'c DataLayer<'a>) -> LayeredContext<'c> {
        let mut context = LayeredContext::new();
        if let Some(bindings) = self.bindings {
            context = context.push_layer("bindings", bindings);
        }
        context = context.push_layer("data", data);
        if let Some(extra) = self.context {
            context = context.push_layer("context", extra);
        }
        context
    }
}

type EncodingCache = HashMap<(String, bool), (EncodedColumns, EncodingState)>;

/// State of one materialization call
struct Pass<'p> {
    context: LayeredContext<'p>,
    evaluator: &'p dyn FactorEvaluator,
    nrows: usize,
    factor_cache: HashMap<String, EvaluatedFactor>,
    factor_state: HashMap<String, JsonValue>,
    encoding_cache: EncodingCache,
    drop_rows: BTreeSet<usize>,
}

impl<'p> Pass<'p> {
    fn new(context: LayeredContext<'p>, evaluator: &'p dyn FactorEvaluator, nrows: usize) -> Self {
        Self {
            context,
            evaluator,
            nrows,
            factor_cache: HashMap::new(),
            factor_state: HashMap::new(),
            encoding_cache: HashMap::new(),
            drop_rows: BTreeSet::new(),
        }
    }

    fn evaluate(&mut self, factor: &Factor, spec: &mut ModelSpec) -> Result<()> {
        let expr = factor.expr.as_str();
        if let Some(cached) = self.factor_cache.get(expr) {
            trace!("factor `{}` already evaluated", expr);
            check_committed_kind(expr, cached.kind(), spec)?;
            if let Some(state) = self.factor_state.get(expr) {
                spec.transform_state.insert(expr.to_string(), state.clone());
            }
            return Ok(());
        }

        let values = match factor.eval_method {
            EvalMethod::Lookup => {
                let value = self.context.get(expr).ok_or_else(|| {
                    MaterializeError::evaluation(
                        expr,
                        format!("Name `{}` is not present in the data or context.", expr),
                    )
                })?;
                FactorValues::new(value)
            }
            EvalMethod::Literal => {
                let value = factor.literal_value().ok_or_else(|| {
                    MaterializeError::evaluation(
                        expr,
                        format!("Literal `{}` is not numeric and cannot be evaluated.", expr),
                    )
                })?;
                FactorValues::new(value)
            }
            EvalMethod::Expression => {
                let mut state = spec
                    .transform_state
                    .get(expr)
                    .cloned()
                    .unwrap_or(JsonValue::Null);
                let values = self.evaluator.evaluate(expr, &self.context, &mut state)?;
                let stateful = match &state {
                    JsonValue::Null => false,
                    JsonValue::Object(map) => !map.is_empty(),
                    _ => true,
                };
                if stateful {
                    spec.transform_state.insert(expr.to_string(), state.clone());
                    self.factor_state.insert(expr.to_string(), state);
                }
                values
            }
        };

        let values = resolve_kind(factor, values, spec)?;
        if let Some(len) = values.value.len() {
            if len != self.nrows {
                return Err(MaterializeError::materialization(format!(
                    "Factor `{}` evaluated to {} values, but the data has {} rows.",
                    expr, len, self.nrows
                )));
            }
        }

        self.factor_cache
            .insert(expr.to_string(), EvaluatedFactor::new(factor.clone(), values));
        Ok(())
    }

    /// Evaluate every factor of `spec` and apply its null policy
    fn evaluate_spec(&mut self, spec: &mut ModelSpec) -> Result<()> {
        let mut factors: Vec<Factor> = Vec::new();
        for factor in spec.formula.terms.iter().flat_map(|t| t.iter_factors()) {
            if !factors.contains(factor) {
                factors.push(factor.clone());
            }
        }

        for factor in &factors {
            self.evaluate(factor, spec)?;
        }

        for factor in &factors {
            let Some(evaluated) = self.factor_cache.get(&factor.expr) else {
                continue;
            };
            let nulls: Vec<usize> = evaluated
                .values
                .value
                .null_mask(self.nrows)
                .into_iter()
                .enumerate()
                .filter_map(|(row, null)| null.then_some(row))
                .collect();
            if nulls.is_empty() {
                continue;
            }

            match spec.config.na_action {
                NaAction::Drop => self.drop_rows.extend(nulls),
                NaAction::Ignore => {}
                NaAction::Raise if evaluated.values.metadata.pre_encoded => {}
                NaAction::Raise => {
                    return Err(MaterializeError::NullValues {
                        factor: factor.expr.clone(),
                        count: nulls.len(),
                    })
                }
            }
        }
        Ok(())
    }

    fn materialize(
        &mut self,
        mut spec: ModelSpec,
        rows: &[usize],
        index: &Index,
        dropped: &[IndexValue],
    ) -> Result<ModelMatrix> {
        let recorded = spec.structure.take();
        let plan = match &recorded {
            Some(structure) => RankPlan::from_entries(
                structure
                    .iter()
                    .map(|s| (s.term.clone(), s.scoped_terms.clone()))
                    .collect(),
            ),
            None => {
                let terms = cluster_terms(&spec.formula.terms, spec.config.cluster_by, &self.factor_cache);
                RankPlan::build(&terms, &self.factor_cache, spec.config.ensure_full_rank)?
            }
        };

        let mut columns = EncodedColumns::new();
        let mut structure = Vec::with_capacity(plan.len());
        for (i, (term, scoped_terms)) in plan.iter().enumerate() {
            let mut term_columns = Vec::new();
            for scoped in scoped_terms {
                let evaluated = EvaluatedScopedTerm::resolve(scoped, &self.factor_cache)?;
                let encoded = evaluated
                    .factors
                    .iter()
                    .map(|(factor, reduced)| {
                        encode_with_cache(&mut self.encoding_cache, factor, *reduced, rows, &mut spec)
                    })
                    .collect::<Result<Vec<_>>>()?;

                for (name, values) in interact(&encoded, evaluated.scale, rows.len()) {
                    if columns.contains_key(&name) {
                        return Err(MaterializeError::materialization(format!(
                            "Column `{}` is generated by more than one term.",
                            name
                        )));
                    }
                    term_columns.push(name.clone());
                    columns.insert(name, values);
                }
            }

            if let Some(expected) = recorded.as_ref().and_then(|s| s.get(i)) {
                if expected.columns != term_columns {
                    return Err(MaterializeError::materialization(format!(
                        "Term `{}` generated columns {:?}, but the model specification expects {:?}.",
                        term.label(),
                        term_columns,
                        expected.columns
                    )));
                }
            }

            structure.push(TermStructure {
                term: term.clone(),
                scoped_terms: scoped_terms.to_vec(),
                columns: term_columns,
            });
        }

        spec.structure = Some(structure);
        ModelMatrix::assemble(columns, index.clone(), dropped.to_vec(), spec)
    }
}

/// Check the evaluated kind against the declared kind, then against the
/// kind committed in the spec's encoder state
fn resolve_kind(factor: &Factor, mut values: FactorValues, spec: &ModelSpec) -> Result<FactorValues> {
    let actual = values.metadata.kind;
    match factor.kind {
        FactorKind::Unknown => {}
        FactorKind::Categorical if actual == FactorKind::Numerical => {
            values.value = values.value.into_categorical();
            values.metadata.kind = FactorKind::Categorical;
            values.metadata.spans_intercept = true;
        }
        declared if declared != actual && actual != FactorKind::Constant => {
            return Err(MaterializeError::encoding(
                &factor.expr,
                format!(
                    "Factor `{}` is expecting values of kind '{}', but they are actually of kind '{}'.",
                    factor.expr,
                    declared.as_str(),
                    actual.as_str()
                ),
            ));
        }
        _ => {}
    }

    check_committed_kind(&factor.expr, values.metadata.kind, spec)?;
    Ok(values)
}

fn check_committed_kind(expr: &str, actual: FactorKind, spec: &ModelSpec) -> Result<()> {
    match spec.encoder_state.get(expr) {
        Some((committed, _)) if *committed != actual => Err(MaterializeError::encoding(
            expr,
            format!(
                "The model specification expects factor `{}` to have values of kind `{}`, but they are actually of kind `{}`.",
                expr,
                committed.as_str(),
                actual.as_str()
            ),
        )),
        _ => Ok(()),
    }
}

/// Encode through the pass cache, keeping `spec.encoder_state` in step
///
/// A cached encoding is reused only when it was produced with the state the
/// spec holds for the factor.
fn encode_with_cache(
    cache: &mut EncodingCache,
    factor: &EvaluatedFactor,
    reduced: bool,
    rows: &[usize],
    spec: &mut ModelSpec,
) -> Result<EncodedColumns> {
    let expr = factor.expr();
    let key = (expr.to_string(), reduced);

    if let Some((columns, state)) = cache.get(&key) {
        match spec.encoder_state.get(expr) {
            None => {
                trace!("reusing encoding of `{}` (reduced: {})", expr, reduced);
                spec.encoder_state
                    .insert(expr.to_string(), (factor.kind(), state.clone()));
                return Ok(columns.clone());
            }
            Some((_, committed)) if committed == state => {
                trace!("reusing encoding of `{}` (reduced: {})", expr, reduced);
                return Ok(columns.clone());
            }
            Some(_) => {}
        }
    }

    let mut state = spec
        .encoder_state
        .get(expr)
        .map(|(_, state)| state.clone())
        .unwrap_or_default();
    let columns = encode_factor(factor, rows, reduced, &mut state)?;
    spec.encoder_state
        .insert(expr.to_string(), (factor.kind(), state.clone()));
    cache.insert(key, (columns.clone(), state));
    Ok(columns)
}
