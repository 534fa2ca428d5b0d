//! Tests for model specifications

use super::*;

use approx::assert_abs_diff_eq;
use ndarray::array;

use dm_core::data::{DataFrame, DataFrameBuilder, Series};

use crate::config::{ClusterBy, NaAction};

fn test_data() -> DataFrame {
    DataFrameBuilder::new()
        .with_column("y", Series::float(vec![2.0, 4.0, 6.0, 8.0]))
        .unwrap()
        .with_column("x", Series::float(vec![1.0, 2.0, 3.0, 4.0]))
        .unwrap()
        .with_column("g", Series::categorical(&["a", "b", "a", "c"]))
        .unwrap()
        .build()
        .unwrap()
}

fn fitted(formula: &str) -> ModelSpec {
    let data = test_data();
    Materializer::new(&data)
        .get_model_matrix(formula, &MaterializeConfig::default())
        .unwrap()
        .into_root()
        .unwrap()
        .model_spec
}

#[test]
fn test_unfitted_spec() {
    let formula = Formula::parse("x + g").unwrap();
    let specs = ModelSpecs::from_formula(&formula, &MaterializeConfig::default());
    let spec = specs.root().unwrap();

    assert!(!spec.is_fitted());
    assert!(spec.column_names().is_empty());
    assert_eq!(spec.terms().len(), 3);
    assert_eq!(spec.variables(), vec!["x", "g"]);
}

#[test]
fn test_column_accessors() {
    let spec = fitted("x + g + x:g");
    assert!(spec.is_fitted());
    assert_eq!(
        spec.column_names(),
        vec!["Intercept", "x", "g[T.b]", "g[T.c]", "x:g[T.b]", "x:g[T.c]"]
    );
    assert_eq!(spec.column_indices()["g[T.c]"], 3);

    let slices = spec.term_slices();
    assert_eq!(slices.keys().collect::<Vec<_>>(), vec!["1", "x", "g", "x:g"]);
    assert_eq!(slices["g"], 2..4);

    assert_eq!(spec.get_slice("x:g").unwrap(), 4..6);
    assert_eq!(spec.get_slice("g[T.b]").unwrap(), 2..3);
    assert!(matches!(
        spec.get_slice("nope"),
        Err(MaterializeError::Materialization { .. })
    ));
}

#[test]
fn test_json_round_trip_replays() {
    let spec = fitted("center(x) + g");
    let json = spec.to_json().unwrap();
    let restored = ModelSpec::from_json(&json).unwrap();
    assert_eq!(restored, spec);
    assert_eq!(restored.column_names(), spec.column_names());

    let new_data = DataFrameBuilder::new()
        .with_column("x", Series::float(vec![10.0, 0.0]))
        .unwrap()
        .with_column("g", Series::categorical(&["c", "c"]))
        .unwrap()
        .build()
        .unwrap();

    let mm = restored.get_model_matrix(&new_data).unwrap();
    assert_eq!(
        mm.column_names(),
        vec!["Intercept", "center(x)", "g[T.b]", "g[T.c]"]
    );
    // Centered on the fitted mean of 2.5
    assert_abs_diff_eq!(mm.column("center(x)").unwrap(), array![7.5, -2.5]);
    assert_abs_diff_eq!(mm.column("g[T.b]").unwrap(), array![0.0, 0.0]);
    assert_abs_diff_eq!(mm.column("g[T.c]").unwrap(), array![1.0, 1.0]);
}

#[test]
fn test_with_output_on_replay() {
    let data = test_data();
    let spec = fitted("x + g").with_output(OutputKind::Dense);
    let mm = spec.get_model_matrix(&data).unwrap();
    assert_eq!(mm.as_dense().unwrap().dim(), (4, 4));
    assert!(mm.as_labeled().is_none());
}

#[test]
fn test_model_specs_two_sided() {
    let data = test_data();
    let formula = Formula::parse("y ~ x").unwrap();
    let specs = ModelSpecs::from_formula(&formula, &MaterializeConfig::default());
    assert!(specs.lhs().is_some());
    assert!(specs.root().is_none());

    let matrices = specs.get_model_matrix(&data).unwrap();
    let fitted = matrices.model_specs();
    assert_eq!(fitted.lhs().unwrap().column_names(), vec!["y"]);
    assert_eq!(fitted.rhs().unwrap().column_names(), vec!["Intercept", "x"]);

    let restored = ModelSpecs::from_json(&fitted.to_json().unwrap()).unwrap();
    assert_eq!(restored, fitted);
    let replayed = restored.get_model_matrix(&data).unwrap();
    assert_abs_diff_eq!(
        replayed.lhs().unwrap().column("y").unwrap(),
        array![2.0, 4.0, 6.0, 8.0]
    );
}

#[test]
fn test_config_round_trip() {
    let config = MaterializeConfig::new()
        .with_full_rank(false)
        .with_na_action(NaAction::Raise)
        .with_output(OutputKind::Sparse)
        .with_cluster_by(ClusterBy::NumericalFactors);

    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("\"numerical_factors\""));
    let restored: MaterializeConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, config);

    assert_eq!("ignore".parse::<NaAction>().unwrap(), NaAction::Ignore);
    assert_eq!("none".parse::<ClusterBy>().unwrap(), ClusterBy::None);
    assert!("sometimes".parse::<NaAction>().is_err());
}
