//! Tests for the materializer

use super::*;

use approx::assert_abs_diff_eq;
use indexmap::IndexMap;
use ndarray::array;

use dm_core::data::{DataFrame, DataFrameBuilder, Series};
use dm_core::formula::{ScopedFactor, ScopedTerm};

use crate::config::{ClusterBy, OutputKind};

fn strings(values: &[&str]) -> Series {
    Series::string(values.iter().map(|s| s.to_string()).collect::<Vec<_>>())
}

fn test_data() -> DataFrame {
    DataFrameBuilder::new()
        .with_column("a", Series::float(vec![1.0, 2.0, 3.0]))
        .unwrap()
        .with_column("b", Series::float(vec![1.0, 2.0, 3.0]))
        .unwrap()
        .with_column("A", strings(&["a", "b", "c"]))
        .unwrap()
        .with_column("B", strings(&["a", "b", "c"]))
        .unwrap()
        .with_column("D", strings(&["a", "a", "a"]))
        .unwrap()
        .build()
        .unwrap()
}

fn data_with_nulls() -> DataFrame {
    DataFrameBuilder::new()
        .with_column("a", Series::float(vec![1.0, 2.0, f64::NAN]))
        .unwrap()
        .with_column("A", Series::nullable_string(&[Some("a"), None, Some("c")]))
        .unwrap()
        .with_column("B", Series::nullable_string(&[Some("a"), Some("b"), None]))
        .unwrap()
        .build()
        .unwrap()
}

fn materialize(data: &DataFrame, formula: &str, config: &MaterializeConfig) -> Result<ModelMatrix> {
    Materializer::new(data)
        .get_model_matrix(formula, config)?
        .into_root()
        .ok_or_else(|| MaterializeError::materialization("expected a one-sided formula"))
}

fn full_rank() -> MaterializeConfig {
    MaterializeConfig::default()
}

fn reduced_rank() -> MaterializeConfig {
    MaterializeConfig::default().with_full_rank(false)
}

#[test]
fn test_categorical_full_rank() {
    let data = test_data();

    let mm = materialize(&data, "A", &full_rank()).unwrap();
    assert_eq!(mm.column_names(), vec!["Intercept", "A[T.b]", "A[T.c]"]);
    assert_eq!(mm.shape(), (3, 3));
    assert_abs_diff_eq!(mm.column("A[T.b]").unwrap(), array![0.0, 1.0, 0.0]);

    let mm = materialize(&data, "A", &reduced_rank()).unwrap();
    assert_eq!(
        mm.column_names(),
        vec!["Intercept", "A[T.a]", "A[T.b]", "A[T.c]"]
    );

    let mm = materialize(&data, "C(A)", &full_rank()).unwrap();
    assert_eq!(mm.column_names(), vec!["Intercept", "C(A)[T.b]", "C(A)[T.c]"]);
}

#[test]
fn test_interaction_full_rank() {
    let data = test_data();

    let mm = materialize(&data, "A:B", &full_rank()).unwrap();
    assert_eq!(
        mm.column_names(),
        vec![
            "Intercept",
            "B[T.b]",
            "B[T.c]",
            "A[T.b]:B[T.a]",
            "A[T.c]:B[T.a]",
            "A[T.b]:B[T.b]",
            "A[T.c]:B[T.b]",
            "A[T.b]:B[T.c]",
            "A[T.c]:B[T.c]",
        ]
    );

    let mm = materialize(&data, "A:B", &reduced_rank()).unwrap();
    assert_eq!(mm.ncols(), 10);
    assert_eq!(mm.column_names()[1], "A[T.a]:B[T.a]");
    assert_eq!(mm.column_names()[9], "A[T.c]:B[T.c]");
}

#[test]
fn test_categorical_by_numeric_interaction() {
    let data = test_data();
    let expected = vec!["Intercept", "A[T.a]:a", "A[T.b]:a", "A[T.c]:a"];

    let mm = materialize(&data, "A:a", &full_rank()).unwrap();
    assert_eq!(mm.column_names(), expected);
    assert_abs_diff_eq!(mm.column("A[T.c]:a").unwrap(), array![0.0, 0.0, 3.0]);

    let mm = materialize(&data, "A:a", &reduced_rank()).unwrap();
    assert_eq!(mm.column_names(), expected);
}

#[test]
fn test_main_effects_with_interaction() {
    let data = test_data();
    let mm = materialize(&data, "a * A", &full_rank()).unwrap();
    assert_eq!(
        mm.column_names(),
        vec!["Intercept", "a", "A[T.b]", "A[T.c]", "a:A[T.b]", "a:A[T.c]"]
    );
}

#[test]
fn test_constant_factor_folds_into_scale() {
    let data = test_data();
    let mm = materialize(&data, "a:2", &full_rank()).unwrap();
    assert_eq!(mm.column_names(), vec!["Intercept", "a"]);
    assert_abs_diff_eq!(mm.column("a").unwrap(), array![2.0, 4.0, 6.0]);
}

#[test]
fn test_single_level_categorical() {
    let data = test_data();
    let mm = materialize(&data, "D", &full_rank()).unwrap();
    assert_eq!(mm.column_names(), vec!["Intercept"]);
}

#[test]
fn test_empty_formula() {
    let data = test_data();
    for output in [OutputKind::Dense, OutputKind::Labeled, OutputKind::Sparse] {
        let mm = materialize(&data, "0", &full_rank().with_output(output)).unwrap();
        assert_eq!(mm.shape(), (3, 0), "output {}", output);
        assert!(mm.column_names().is_empty());
    }
}

#[test]
fn test_output_kinds_agree() {
    let data = test_data();
    let dense = materialize(&data, "a + A", &full_rank().with_output(OutputKind::Dense)).unwrap();
    let sparse = materialize(&data, "a + A", &full_rank().with_output(OutputKind::Sparse)).unwrap();
    let labeled = materialize(&data, "a + A", &full_rank()).unwrap();

    let expected = dense.as_dense().unwrap();
    assert_abs_diff_eq!(sparse.as_sparse().unwrap().to_dense(), expected.clone());
    assert_abs_diff_eq!(labeled.to_dense(), expected.clone());

    // Intercept (3) + a (3) + one indicator each for b and c
    assert_eq!(sparse.as_sparse().unwrap().nnz(), 8);
    assert_eq!(sparse.as_sparse().unwrap().get(1, 2), Some(1.0));
    assert_eq!(sparse.as_sparse().unwrap().get(0, 2), Some(0.0));
    assert_eq!(
        labeled.as_labeled().unwrap().column_names(),
        dense.column_names()
    );
}

#[test]
fn test_invalid_output() {
    let err = "invalid".parse::<OutputKind>().unwrap_err();
    assert_eq!(
        err.to_string(),
        "Nominated output `invalid` is invalid. Available output types are: dense, labeled, sparse."
    );
}

#[test]
fn test_sparse_output_rejects_ignored_nulls() {
    let data = data_with_nulls();
    let config = full_rank()
        .with_output(OutputKind::Sparse)
        .with_na_action(NaAction::Ignore);
    assert!(matches!(
        materialize(&data, "a", &config),
        Err(MaterializeError::Materialization { .. })
    ));
}

#[test]
fn test_na_drop() {
    let data = data_with_nulls();
    let cases: [(&str, Vec<&str>, usize); 5] = [
        ("a", vec!["Intercept", "a"], 2),
        ("A", vec!["Intercept", "A[T.c]"], 2),
        ("C(A)", vec!["Intercept", "C(A)[T.c]"], 2),
        ("A:a", vec!["Intercept", "A[T.a]:a"], 1),
        ("A:B", vec!["Intercept"], 1),
    ];

    for (formula, columns, rows) in cases {
        let mm = materialize(&data, formula, &full_rank()).unwrap();
        assert_eq!(mm.column_names(), columns, "formula {}", formula);
        assert_eq!(mm.nrows(), rows, "formula {}", formula);
        assert_eq!(mm.dropped.len(), 3 - rows, "formula {}", formula);
    }
}

#[test]
fn test_na_ignore() {
    let data = data_with_nulls();
    let config = full_rank().with_na_action(NaAction::Ignore);
    let cases = [("a", 2), ("A", 2), ("C(A)", 2), ("A:a", 3)];

    for (formula, ncols) in cases {
        let mm = materialize(&data, formula, &config).unwrap();
        assert_eq!(mm.shape(), (3, ncols), "formula {}", formula);
        assert!(mm.dropped.is_empty());
    }

    let mm = materialize(&data, "A", &config).unwrap();
    assert_abs_diff_eq!(mm.column("A[T.c]").unwrap(), array![0.0, 0.0, 1.0]);
    let mm = materialize(&data, "a", &config).unwrap();
    assert!(mm.column("a").unwrap()[2].is_nan());
}

#[test]
fn test_na_raise() {
    let data = data_with_nulls();
    let config = full_rank().with_na_action(NaAction::Raise);

    for formula in ["a", "A", "A:a", "A:B"] {
        let err = materialize(&data, formula, &config).unwrap_err();
        assert!(
            matches!(err, MaterializeError::NullValues { count: 1, .. }),
            "formula {}: {}",
            formula,
            err
        );
    }

    // Explicit categoricals encode nulls as all-zero rows instead
    let mm = materialize(&data, "C(A)", &config).unwrap();
    assert_eq!(mm.column_names(), vec!["Intercept", "C(A)[T.c]"]);
    assert_eq!(mm.nrows(), 3);
    assert_abs_diff_eq!(mm.column("C(A)[T.c]").unwrap(), array![0.0, 0.0, 1.0]);
}

#[test]
fn test_two_sided_rows_are_aligned() {
    let data = DataFrameBuilder::new()
        .with_column("y", Series::float(vec![1.0, f64::NAN, 3.0, 4.0]))
        .unwrap()
        .with_column("x", Series::float(vec![1.0, 2.0, f64::NAN, 4.0]))
        .unwrap()
        .build()
        .unwrap();

    let matrices = Materializer::new(&data)
        .get_model_matrix("y ~ x", &full_rank())
        .unwrap();
    let lhs = matrices.lhs().unwrap();
    let rhs = matrices.rhs().unwrap();

    assert_eq!(lhs.column_names(), vec!["y"]);
    assert_eq!(rhs.column_names(), vec!["Intercept", "x"]);
    assert_eq!(lhs.nrows(), 2);
    assert_eq!(rhs.nrows(), 2);
    assert_abs_diff_eq!(lhs.column("y").unwrap(), array![1.0, 4.0]);
    assert_abs_diff_eq!(rhs.column("x").unwrap(), array![1.0, 4.0]);
    assert_eq!(lhs.index, rhs.index);
}

#[test]
fn test_index_maintained() {
    let index = Index::generic([0, 2, 4, 6, 8, 10].into_iter().map(IndexValue::from).collect());
    let data = DataFrameBuilder::new()
        .with_column("a", Series::float(vec![1.0, 2.0, 3.0, f64::NAN, 5.0, 6.0]))
        .unwrap()
        .with_index(index)
        .build()
        .unwrap();

    let mm = materialize(&data, "a", &full_rank()).unwrap();
    let expected: Vec<IndexValue> = [0, 2, 4, 8, 10].into_iter().map(IndexValue::from).collect();
    assert_eq!(mm.index.labels(), expected);
    assert_eq!(mm.dropped, vec![IndexValue::from(6)]);
    assert_eq!(mm.as_labeled().unwrap().index().labels(), expected);

    let index = Index::generic(["a", "b", "c"].into_iter().map(IndexValue::from).collect());
    let data = DataFrameBuilder::new()
        .with_column("a", Series::float(vec![f64::NAN, 2.0, 3.0]))
        .unwrap()
        .with_column("A", Series::nullable_string(&[Some("a"), None, Some("c")]))
        .unwrap()
        .with_index(index)
        .build()
        .unwrap();

    let mm = materialize(&data, "a + A", &full_rank()).unwrap();
    assert_eq!(mm.index.labels(), vec![IndexValue::from("c")]);
}

#[test]
fn test_clustering_by_numerical_factors() {
    let data = test_data();
    let formula = "a + b + a:A + b:A";

    let mm = materialize(&data, formula, &full_rank()).unwrap();
    assert_eq!(
        mm.column_names(),
        vec!["Intercept", "a", "b", "a:A[T.b]", "a:A[T.c]", "b:A[T.b]", "b:A[T.c]"]
    );

    let config = full_rank().with_cluster_by(ClusterBy::NumericalFactors);
    let mm = materialize(&data, formula, &config).unwrap();
    assert_eq!(
        mm.column_names(),
        vec!["Intercept", "a", "a:A[T.b]", "a:A[T.c]", "b", "b:A[T.b]", "b:A[T.c]"]
    );
}

#[test]
fn test_category_order_is_sorted_or_declared() {
    let data = DataFrameBuilder::new()
        .with_column("A", strings(&["c", "a", "b"]))
        .unwrap()
        .with_column("N", strings(&["10", "9", "2"]))
        .unwrap()
        .with_column(
            "O",
            Series::categorical_with_levels(
                &[Some("a"), Some("b"), Some("c")],
                vec!["c".to_string(), "b".to_string(), "a".to_string()],
            )
            .unwrap(),
        )
        .unwrap()
        .build()
        .unwrap();

    let mm = materialize(&data, "A", &reduced_rank()).unwrap();
    assert_eq!(mm.column_names(), vec!["Intercept", "A[T.a]", "A[T.b]", "A[T.c]"]);

    let mm = materialize(&data, "N", &reduced_rank()).unwrap();
    assert_eq!(mm.column_names(), vec!["Intercept", "N[T.2]", "N[T.9]", "N[T.10]"]);

    let mm = materialize(&data, "O", &reduced_rank()).unwrap();
    assert_eq!(mm.column_names(), vec!["Intercept", "O[T.c]", "O[T.b]", "O[T.a]"]);

    let mm = materialize(&data, "C(A, levels=['b', 'c', 'a'])", &full_rank()).unwrap();
    assert_eq!(
        mm.column_names(),
        vec!["Intercept", "C(A, levels=['b', 'c', 'a'])[T.c]", "C(A, levels=['b', 'c', 'a'])[T.a]"]
    );
}

#[test]
fn test_derive_levels_non_finite_labels() {
    assert_eq!(derive_levels(["10", "9", "2"]), vec!["2", "9", "10"]);
    assert_eq!(derive_levels(["2", "nan", "1"]), vec!["1", "2", "nan"]);
    assert_eq!(derive_levels(["nan", "1", "2"]), vec!["1", "2", "nan"]);
    assert_eq!(derive_levels(["10", "inf", "9"]), vec!["10", "9", "inf"]);
}

#[test]
fn test_replay_uses_persisted_levels() {
    let data = test_data();
    let mm = materialize(&data, "A", &full_rank()).unwrap();
    let spec = mm.model_spec.clone();
    assert!(spec.is_fitted());
    assert_eq!(
        spec.encoder_state.get("A").and_then(|(_, s)| s.levels.clone()),
        Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
    );

    // Only one level present, plus one the fit never saw
    let new_data = DataFrameBuilder::new()
        .with_column("A", strings(&["c", "c", "d"]))
        .unwrap()
        .build()
        .unwrap();
    let replayed = spec.get_model_matrix(&new_data).unwrap();
    assert_eq!(replayed.column_names(), vec!["Intercept", "A[T.b]", "A[T.c]"]);
    assert_abs_diff_eq!(replayed.column("A[T.b]").unwrap(), array![0.0, 0.0, 0.0]);
    assert_abs_diff_eq!(replayed.column("A[T.c]").unwrap(), array![1.0, 1.0, 0.0]);
}

#[test]
fn test_stateful_transform_replay() {
    let data = DataFrameBuilder::new()
        .with_column("a", Series::float(vec![1.0, 2.0, 3.0]))
        .unwrap()
        .build()
        .unwrap();
    let mm = materialize(&data, "center(a) - 1", &full_rank()).unwrap();
    assert_eq!(mm.column_names(), vec!["center(a)"]);
    assert_abs_diff_eq!(mm.column("center(a)").unwrap(), array![-1.0, 0.0, 1.0]);
    assert!(mm.model_spec.transform_state.contains_key("center(a)"));

    let new_data = DataFrameBuilder::new()
        .with_column("a", Series::float(vec![4.0, 5.0, 6.0]))
        .unwrap()
        .build()
        .unwrap();
    let replayed = mm.model_spec.get_model_matrix(&new_data).unwrap();
    assert_abs_diff_eq!(replayed.column("center(a)").unwrap(), array![2.0, 3.0, 4.0]);
}

#[test]
fn test_replay_rejects_changed_structure() {
    let data = test_data();
    let mut spec = materialize(&data, "A", &full_rank()).unwrap().model_spec;
    if let Some(structure) = spec.structure.as_mut() {
        structure[1].columns = vec!["A[T.z]".to_string()];
    }
    assert!(matches!(
        spec.get_model_matrix(&data),
        Err(MaterializeError::Materialization { .. })
    ));
}

#[test]
fn test_declared_kind_mismatch() {
    let data = test_data();
    let spec = ModelSpec::from_terms(
        vec![ScopedTerm::from_factors([
            Factor::lookup("A").with_kind(FactorKind::Numerical)
        ])],
        full_rank(),
    );
    let err = spec.get_model_matrix(&data).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Factor `A` is expecting values of kind 'numerical', but they are actually of kind 'categorical'."
    );
}

#[test]
fn test_declared_categorical_converts_numbers() {
    let data = test_data();
    let spec = ModelSpec::from_terms(
        vec![ScopedTerm::from_factors([
            Factor::lookup("a").with_kind(FactorKind::Categorical)
        ])],
        full_rank(),
    );
    let mm = spec.get_model_matrix(&data).unwrap();
    assert_eq!(mm.column_names(), vec!["a[T.1]", "a[T.2]", "a[T.3]"]);
}

#[test]
fn test_committed_kind_mismatch() {
    let data = test_data();
    let mut spec = ModelSpec::from_terms(
        vec![ScopedTerm::from_factors([Factor::lookup("a")])],
        full_rank(),
    );
    spec.encoder_state
        .insert("a".to_string(), (FactorKind::Categorical, EncodingState::default()));

    let err = spec.get_model_matrix(&data).unwrap_err();
    assert_eq!(
        err.to_string(),
        "The model specification expects factor `a` to have values of kind `categorical`, but they are actually of kind `numerical`."
    );
}

#[test]
fn test_committed_kind_checked_for_shared_factor() {
    let data = test_data();
    let lhs = ModelSpec::from_terms(
        vec![ScopedTerm::from_factors([Factor::lookup("a")])],
        full_rank(),
    );
    let mut rhs = lhs.clone();
    rhs.encoder_state
        .insert("a".to_string(), (FactorKind::Categorical, EncodingState::default()));

    let specs = ModelSpecs(Structured::two_sided(lhs, rhs));
    let err = Materializer::new(&data).get_model_matrices(specs).unwrap_err();
    assert!(matches!(err, MaterializeError::FactorEncoding { ref factor, .. } if factor == "a"));
}

#[test]
fn test_non_numeric_literal() {
    let data = test_data();
    let spec = ModelSpec::from_terms(
        vec![ScopedTerm::from_factors([Factor::literal("'x'")])],
        full_rank(),
    );
    let err = spec.get_model_matrix(&data).unwrap_err();
    assert!(matches!(err, MaterializeError::FactorEvaluation { ref factor, .. } if factor == "'x'"));
}

#[test]
fn test_missing_name() {
    let data = test_data();
    let err = materialize(&data, "missing", &full_rank()).unwrap_err();
    assert!(matches!(err, MaterializeError::FactorEvaluation { ref factor, .. } if factor == "missing"));
}

#[test]
fn test_bindings_and_context_layers() {
    let data = test_data();
    let mut bindings: IndexMap<String, Value> = IndexMap::new();
    bindings.insert("a".to_string(), Value::Numeric(array![10.0, 20.0, 30.0]));
    let mut extra: IndexMap<String, Value> = IndexMap::new();
    extra.insert("b".to_string(), Value::Numeric(array![0.0, 0.0, 0.0]));
    extra.insert("z".to_string(), Value::Numeric(array![7.0, 8.0, 9.0]));

    let mm = Materializer::new(&data)
        .with_bindings(&bindings)
        .with_context(&extra)
        .get_model_matrix("a + b + z", &full_rank())
        .unwrap()
        .into_root()
        .unwrap();

    assert_abs_diff_eq!(mm.column("a").unwrap(), array![10.0, 20.0, 30.0]);
    assert_abs_diff_eq!(mm.column("b").unwrap(), array![1.0, 2.0, 3.0]);
    assert_abs_diff_eq!(mm.column("z").unwrap(), array![7.0, 8.0, 9.0]);
}

#[test]
fn test_evaluate_factor_sees_all_layers() {
    let data = test_data();
    let mut bindings: IndexMap<String, Value> = IndexMap::new();
    bindings.insert("a".to_string(), Value::Numeric(array![10.0, 20.0, 30.0]));
    bindings.insert("z".to_string(), Value::Numeric(array![4.0, 5.0, 6.0]));
    let mut extra: IndexMap<String, Value> = IndexMap::new();
    extra.insert("w".to_string(), Value::Scalar(2.0));

    let materializer = Materializer::new(&data)
        .with_bindings(&bindings)
        .with_context(&extra);
    let mut spec = ModelSpec::from_terms(Vec::new(), full_rank());

    let z = materializer.evaluate_factor(&Factor::lookup("z"), &mut spec).unwrap();
    assert_eq!(z.values.value, Value::Numeric(array![4.0, 5.0, 6.0]));

    let a = materializer.evaluate_factor(&Factor::lookup("a"), &mut spec).unwrap();
    assert_eq!(a.values.value, Value::Numeric(array![10.0, 20.0, 30.0]));

    let w = materializer.evaluate_factor(&Factor::lookup("w"), &mut spec).unwrap();
    assert_eq!(w.kind(), FactorKind::Constant);
}

#[test]
fn test_layered_context_private_layer() {
    let data = test_data();
    let layer = DataLayer(&data);
    let mut context = LayeredContext::new().push_layer("data", &layer);

    assert_eq!(context.layer_names(), vec!["data"]);
    assert!(context.contains("a"));
    assert!(context.layer("data").is_some());

    context.insert("a", Value::Scalar(1.0));
    assert_eq!(context.get("a"), Some(Value::Scalar(1.0)));
    context.remove("a");
    assert_eq!(context.get("a"), Some(Value::Numeric(array![1.0, 2.0, 3.0])));

    let mut front: IndexMap<String, Value> = IndexMap::new();
    front.insert("A".to_string(), Value::Scalar(0.0));
    let front_layer: &dyn ContextSource = &front;
    let stacked = context.with_layers(vec![("front".to_string(), front_layer)], Vec::new());
    assert_eq!(stacked.layer_names(), vec!["front", "data"]);
    assert_eq!(stacked.get("A"), Some(Value::Scalar(0.0)));
    assert_eq!(stacked.nrows(), Some(3));
}

/// Returns a two-field map that spans the intercept, dropping `x` at
/// reduced rank
struct PairEvaluator;

impl FactorEvaluator for PairEvaluator {
    fn evaluate(
        &self,
        _source: &str,
        context: &LayeredContext<'_>,
        _state: &mut JsonValue,
    ) -> Result<FactorValues> {
        let a = match context.get("a") {
            Some(Value::Numeric(a)) => a,
            _ => return Err(MaterializeError::evaluation("pair(a)", "no column `a`")),
        };
        let mut fields = IndexMap::new();
        fields.insert("x".to_string(), Value::Numeric(a.mapv(|v| v)));
        fields.insert("y".to_string(), Value::Numeric(a.mapv(|v| 1.0 - v)));
        Ok(FactorValues::new(Value::Map(fields))
            .with_spans_intercept(true)
            .with_drop_field("x"))
    }
}

#[test]
fn test_custom_evaluator_with_drop_field() {
    let data = test_data();
    let evaluator = PairEvaluator;
    let materializer = Materializer::new(&data).with_evaluator(&evaluator);

    let mm = materializer
        .get_model_matrix("pair(a)", &full_rank())
        .unwrap()
        .into_root()
        .unwrap();
    assert_eq!(mm.column_names(), vec!["Intercept", "pair(a)[y]"]);

    let mm = materializer
        .get_model_matrix("pair(a) - 1", &full_rank())
        .unwrap()
        .into_root()
        .unwrap();
    assert_eq!(mm.column_names(), vec!["pair(a)[x]", "pair(a)[y]"]);
}

#[test]
fn test_encode_map_values() {
    let mut fields = IndexMap::new();
    fields.insert(METADATA_KEY.to_string(), Value::Scalar(0.0));
    fields.insert("a".to_string(), Value::Numeric(array![1.0, 2.0, 3.0]));
    fields.insert("b".to_string(), Value::Numeric(array![4.0, 5.0, 6.0]));
    let factor = EvaluatedFactor::new(
        Factor::expression("f(x)"),
        FactorValues::new(Value::Map(fields)).with_drop_field("a"),
    );

    let mut state = EncodingState::default();
    let full = encode_factor(&factor, &[0, 1, 2], false, &mut state).unwrap();
    assert_eq!(full.keys().collect::<Vec<_>>(), vec!["f(x)[a]", "f(x)[b]"]);

    let reduced = encode_factor(&factor, &[0, 2], true, &mut state).unwrap();
    assert_eq!(reduced.keys().collect::<Vec<_>>(), vec!["f(x)[b]"]);
    assert_abs_diff_eq!(reduced["f(x)[b]"], array![4.0, 6.0]);
}

#[test]
fn test_encode_nested_categorical() {
    let mut fields = IndexMap::new();
    fields.insert(
        "a".to_string(),
        Value::Categorical {
            values: vec![Some("a".to_string()), Some("b".to_string())],
            levels: None,
        },
    );
    let factor = EvaluatedFactor::new(Factor::lookup("B"), FactorValues::new(Value::Map(fields)));

    let mut state = EncodingState::default();
    let columns = encode_factor(&factor, &[0, 1], false, &mut state).unwrap();
    assert_eq!(columns.keys().collect::<Vec<_>>(), vec!["B[a][T.a]", "B[a][T.b]"]);
    assert_eq!(
        state.fields["a"].levels,
        Some(vec!["a".to_string(), "b".to_string()])
    );
}

#[test]
fn test_encode_constant() {
    let factor = EvaluatedFactor::new(Factor::literal("10"), FactorValues::new(10.0));
    let columns = encode_factor(&factor, &[0, 1, 2], false, &mut EncodingState::default()).unwrap();
    assert_abs_diff_eq!(columns["10"], array![10.0, 10.0, 10.0]);

    let invalid = EvaluatedFactor::new(
        Factor::literal("10"),
        FactorValues::new(array![1.0, 2.0]).with_kind(FactorKind::Constant),
    );
    assert!(matches!(
        encode_factor(&invalid, &[0, 1], false, &mut EncodingState::default()),
        Err(MaterializeError::FactorEncoding { .. })
    ));
}

#[test]
fn test_interact_names_and_products() {
    let mut left = EncodedColumns::new();
    left.insert("x".to_string(), array![1.0, 2.0]);
    left.insert("y".to_string(), array![3.0, 4.0]);
    let mut right = EncodedColumns::new();
    right.insert("z".to_string(), array![2.0, 0.5]);

    let columns = interact(&[left, right], 2.0, 2);
    assert_eq!(columns.keys().collect::<Vec<_>>(), vec!["x:z", "y:z"]);
    assert_abs_diff_eq!(columns["y:z"], array![12.0, 4.0]);

    let intercept = interact(&[], 1.0, 2);
    assert_abs_diff_eq!(intercept["Intercept"], array![1.0, 1.0]);
}

#[test]
fn test_evaluate_and_encode_factor() {
    let data = test_data();
    let materializer = Materializer::new(&data);
    let mut spec = ModelSpec::from_terms(Vec::new(), full_rank());

    let factor = materializer
        .evaluate_factor(&Factor::lookup("A"), &mut spec)
        .unwrap();
    assert_eq!(factor.kind(), FactorKind::Categorical);
    assert!(factor.values.metadata.spans_intercept);

    let columns = materializer
        .encode_evaluated_factor(&factor, &mut spec, true)
        .unwrap();
    assert_eq!(columns.keys().collect::<Vec<_>>(), vec!["A[T.b]", "A[T.c]"]);
    assert_eq!(spec.encoder_state["A"].0, FactorKind::Categorical);

    let scaled = materializer
        .evaluate_factor(&Factor::expression("scale(a)"), &mut spec)
        .unwrap();
    assert!(spec.transform_state.contains_key("scale(a)"));
    match scaled.values.value {
        Value::Numeric(values) => assert_abs_diff_eq!(values, array![-1.0, 0.0, 1.0]),
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn test_rank_plan_records_reduced_factors() {
    let data = test_data();
    let mm = materialize(&data, "A + A:B", &full_rank()).unwrap();
    let structure = mm.model_spec.structure.clone().unwrap();
    let plan = RankPlan::from_entries(
        structure
            .iter()
            .map(|s| (s.term.clone(), s.scoped_terms.clone()))
            .collect(),
    );
    let interaction = ScopedTerm::new([
        ScopedFactor::from(Factor::lookup("A")),
        ScopedFactor::from(Factor::lookup("B")),
    ]);
    assert_eq!(plan.len(), 3);
    assert_eq!(plan.is_reduced(&interaction, "A"), Some(false));
    assert_eq!(plan.is_reduced(&interaction, "B"), Some(true));
    assert_eq!(plan.is_reduced(&interaction, "a"), None);
}

#[test]
fn test_deterministic_materialization() {
    let data = test_data();
    let first = materialize(&data, "a * A + C(B)", &full_rank()).unwrap();
    let second = materialize(&data, "a * A + C(B)", &full_rank()).unwrap();
    assert_eq!(first.column_names(), second.column_names());
    assert_abs_diff_eq!(first.to_dense(), second.to_dense());
    assert_eq!(first.model_spec, second.model_spec);
}

fn evaluate_source(data: &DataFrame, source: &str) -> Result<FactorValues> {
    let layer = DataLayer(data);
    let context = LayeredContext::new().push_layer("data", &layer);
    BuiltinEvaluator.evaluate(source, &context, &mut JsonValue::Null)
}

#[test]
fn test_builtin_arithmetic() {
    let data = test_data();
    let values = evaluate_source(&data, "a * 2 + b ** 2 - -1").unwrap();
    assert_eq!(values.metadata.kind, FactorKind::Numerical);
    match values.value {
        Value::Numeric(v) => assert_abs_diff_eq!(v, array![4.0, 9.0, 16.0]),
        other => panic!("unexpected value {:?}", other),
    }

    let values = evaluate_source(&data, "I(3 / 2)").unwrap();
    assert_eq!(values.value, Value::Scalar(1.5));
    assert_eq!(values.metadata.kind, FactorKind::Constant);
}

#[test]
fn test_builtin_transforms() {
    let data = test_data();

    match evaluate_source(&data, "log(exp(a))").unwrap().value {
        Value::Numeric(v) => assert_abs_diff_eq!(v, array![1.0, 2.0, 3.0], epsilon = 1e-12),
        other => panic!("unexpected value {:?}", other),
    }

    let poly = evaluate_source(&data, "poly(a, 2)").unwrap();
    assert_eq!(poly.metadata.kind, FactorKind::Numerical);
    match poly.value {
        Value::Map(fields) => {
            assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["1", "2"]);
            assert_eq!(fields["2"], Value::Numeric(array![1.0, 4.0, 9.0]));
        }
        other => panic!("unexpected value {:?}", other),
    }

    let categorical = evaluate_source(&data, "C(a)").unwrap();
    assert!(categorical.metadata.pre_encoded);
    assert!(categorical.metadata.spans_intercept);
    assert_eq!(categorical.metadata.kind, FactorKind::Categorical);
}

#[test]
fn test_builtin_errors() {
    let data = test_data();
    let message = |source: &str| evaluate_source(&data, source).unwrap_err().to_string();

    assert!(message("log(a - 2)").contains("log() requires positive values"));
    assert!(message("sqrt(a - 3)").contains("sqrt() requires non-negative values"));
    assert!(message("scale(D)").contains("Arithmetic requires numeric operands"));
    assert!(message("nope(a)").contains("Function 'nope' not supported"));
    assert!(message("log(a, base=2)").contains("unexpected keyword argument 'base'"));
    assert!(message("C(A, levels=['a', 'b'])").contains("Value 'c' is not one of the declared levels"));
    assert!(message("missing + 1").contains("Name 'missing' is not defined"));
    assert!(message("poly(a, 4)").contains("no larger than the number of rows (3)"));
    assert!(message("poly(a, 1000000000000)").contains("poly() degree must be a positive integer"));
}

#[test]
fn test_scale_constant_column_fails() {
    let data = DataFrameBuilder::new()
        .with_column("k", Series::float(vec![2.0, 2.0, 2.0]))
        .unwrap()
        .build()
        .unwrap();
    let err = evaluate_source(&data, "standardize(k)").unwrap_err();
    assert!(err.to_string().contains("Cannot standardize constant variable (std = 0)"));
}

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_sparse_matches_dense(
            values in prop::collection::vec(-5i32..5, 1..20)
        ) {
            let floats: Vec<f64> = values.iter().map(|&v| f64::from(v)).collect();
            let labels: Vec<String> = values.iter().map(|v| format!("l{}", v.rem_euclid(3))).collect();
            let data = DataFrameBuilder::new()
                .with_column("x", Series::float(floats))
                .unwrap()
                .with_column("g", Series::string(labels))
                .unwrap()
                .build()
                .unwrap();

            let dense = materialize(&data, "x * g", &full_rank().with_output(OutputKind::Dense)).unwrap();
            let sparse = materialize(&data, "x * g", &full_rank().with_output(OutputKind::Sparse)).unwrap();
            prop_assert_eq!(dense.column_names(), sparse.column_names());
            prop_assert_eq!(dense.as_dense().unwrap(), &sparse.as_sparse().unwrap().to_dense());
        }

        #[test]
        fn test_level_order_ignores_row_order(
            labels in prop::collection::vec("[a-e]", 1..15)
        ) {
            let mut reversed = labels.clone();
            reversed.reverse();
            let forward = DataFrameBuilder::new()
                .with_column("g", Series::string(labels))
                .unwrap()
                .build()
                .unwrap();
            let backward = DataFrameBuilder::new()
                .with_column("g", Series::string(reversed))
                .unwrap()
                .build()
                .unwrap();

            let a = materialize(&forward, "g", &reduced_rank()).unwrap();
            let b = materialize(&backward, "g", &reduced_rank()).unwrap();
            prop_assert_eq!(a.column_names(), b.column_names());
        }
    }
}
