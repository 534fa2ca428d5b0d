//! Tests for data module

use super::*;

#[test]
fn test_series_creation() {
    // Test float series
    let float_series = Series::float(vec![1.0, 2.0, 3.0]);
    assert_eq!(float_series.len(), 3);
    assert_eq!(float_series.dtype(), "float64");

    // Test int series
    let int_series = Series::int(vec![1, 2, 3]);
    assert_eq!(int_series.len(), 3);
    assert_eq!(int_series.dtype(), "int64");

    // Test bool series
    let bool_series = Series::bool(vec![true, false, true]);
    assert_eq!(bool_series.len(), 3);
    assert_eq!(bool_series.dtype(), "bool");

    // Test string series
    let string_series = Series::string(vec!["a".to_string(), "b".to_string()]);
    assert_eq!(string_series.len(), 2);
    assert_eq!(string_series.dtype(), "string");

    // Test categorical series
    let cat_series = Series::categorical(&["B", "A", "B", "C"]);
    assert_eq!(cat_series.len(), 4);
    assert_eq!(cat_series.dtype(), "categorical");
    assert_eq!(cat_series.categories().unwrap(), &["A", "B", "C"]);
}

#[test]
fn test_series_missing_values() {
    let floats = Series::float(vec![1.0, f64::NAN, 3.0]);
    assert_eq!(floats.null_mask(), vec![false, true, false]);
    assert_eq!(floats.null_count(), 1);
    assert_eq!(floats.get(1), Some(SeriesValue::Null));

    let strings = Series::nullable_string(&[Some("a"), None, Some("c")]);
    assert_eq!(strings.null_count(), 1);
    assert_eq!(strings.get(0), Some(SeriesValue::String("a".to_string())));

    let cats = Series::nullable_categorical(&[Some("b"), None, Some("a")]);
    assert_eq!(cats.categories().unwrap(), &["a", "b"]);
    assert_eq!(cats.null_mask(), vec![false, true, false]);
    assert_eq!(cats.get(2), Some(SeriesValue::String("a".to_string())));

    assert_eq!(Series::int(vec![1, 2]).null_count(), 0);
}

#[test]
fn test_categorical_with_levels() {
    let series = Series::categorical_with_levels(
        &[Some("low"), Some("high"), None],
        vec!["low".to_string(), "mid".to_string(), "high".to_string()],
    )
    .unwrap();

    if let Series::Categorical(codes, cats) = &series {
        assert_eq!(codes, &vec![Some(0), Some(2), None]);
        assert_eq!(cats, &vec!["low", "mid", "high"]);
    } else {
        panic!("Expected Categorical series");
    }

    let err = Series::categorical_with_levels(&[Some("x")], vec!["a".to_string()]);
    assert!(matches!(err, Err(DataError::UnknownCategory { .. })));
}

#[test]
fn test_series_to_float() {
    let ints = Series::int(vec![1, 2, 3]);
    assert_eq!(ints.to_float().unwrap().to_vec(), vec![1.0, 2.0, 3.0]);

    let bools = Series::bool(vec![true, false]);
    assert_eq!(bools.to_float().unwrap().to_vec(), vec![1.0, 0.0]);

    assert!(Series::string(vec!["a".to_string()]).to_float().is_err());
}

#[test]
fn test_dataframe_creation() {
    let df = DataFrame::from_columns(vec![
        ("x", Series::float(vec![1.0, 2.0, 3.0])),
        ("y", Series::int(vec![4, 5, 6])),
    ])
    .unwrap();

    assert_eq!(df.shape(), (3, 2));
    assert_eq!(df.column_names(), vec!["x", "y"]);
    assert_eq!(
        df.index().labels(),
        vec![
            IndexValue::Integer(0),
            IndexValue::Integer(1),
            IndexValue::Integer(2)
        ]
    );
}

#[test]
fn test_dataframe_dimension_mismatch() {
    let result = DataFrameBuilder::new()
        .with_column("a", Series::float(vec![1.0, 2.0]))
        .unwrap()
        .with_column("b", Series::float(vec![1.0, 2.0, 3.0]));

    assert!(matches!(result, Err(DataError::DimensionMismatch { .. })));

    let result = DataFrameBuilder::new()
        .with_column("a", Series::float(vec![1.0, 2.0]))
        .unwrap()
        .with_column("a", Series::float(vec![1.0, 2.0]));

    assert!(matches!(result, Err(DataError::DuplicateColumn(_))));
}

#[test]
fn test_dataframe_select() {
    let df = DataFrame::from_columns(vec![
        ("a", Series::float(vec![1.0, 2.0, 3.0])),
        ("b", Series::float(vec![4.0, 5.0, 6.0])),
        ("c", Series::float(vec![7.0, 8.0, 9.0])),
    ])
    .unwrap();

    let selected = df.select(["a", "c"]).unwrap();
    assert_eq!(selected.shape(), (3, 2));
    assert_eq!(selected.column_names(), vec!["a", "c"]);

    assert!(matches!(
        df.select(["z"]),
        Err(DataError::ColumnNotFound(_))
    ));
}

#[test]
fn test_dataframe_filter_keeps_labels() {
    let df = DataFrameBuilder::new()
        .with_column("x", Series::float(vec![1.0, 2.0, 3.0, 4.0, 5.0]))
        .unwrap()
        .with_column("y", Series::int(vec![1, 2, 3, 4, 5]))
        .unwrap()
        .with_index(Index::generic(
            ["a", "b", "c", "d", "e"].into_iter().map(IndexValue::from).collect(),
        ))
        .build()
        .unwrap();

    let mask = vec![true, false, true, false, true];
    let filtered = df.filter(&mask).unwrap();

    assert_eq!(filtered.shape(), (3, 2));
    assert_eq!(
        filtered.index().labels(),
        vec![
            IndexValue::from("a"),
            IndexValue::from("c"),
            IndexValue::from("e")
        ]
    );

    let x_col = filtered.get_column("x").unwrap();
    if let Series::Float(arr) = x_col {
        assert_eq!(arr.to_vec(), vec![1.0, 3.0, 5.0]);
    } else {
        panic!("Expected Float series");
    }

    assert!(df.filter(&[true]).is_err());
}

#[test]
fn test_range_index_filtering_becomes_generic() {
    let df = DataFrame::from_columns(vec![("x", Series::float(vec![1.0, 2.0, 3.0, 4.0]))])
        .unwrap();

    let taken = df.take_rows(&[1, 3]).unwrap();
    assert_eq!(
        taken.index().labels(),
        vec![IndexValue::Integer(1), IndexValue::Integer(3)]
    );
    assert!(df.take_rows(&[4]).is_err());
}

#[test]
fn test_range_index() {
    let index = Index::range(2, 9, 3);
    assert_eq!(index.len(), 3);
    assert_eq!(
        index.labels(),
        vec![
            IndexValue::Integer(2),
            IndexValue::Integer(5),
            IndexValue::Integer(8)
        ]
    );
    assert!(Index::range(0, 0, 1).is_empty());
}

#[test]
fn test_data_view_trait() {
    let df = DataFrame::from_columns(vec![("x", Series::float(vec![1.0, 2.0]))]).unwrap();
    let view: &dyn DataView = &df;

    assert_eq!(view.nrows(), 2);
    assert!(view.get_column("x").is_some());
    assert!(view.get_column("missing").is_none());
    assert_eq!(view.index().len(), 2);
}

#[test]
fn test_set_index_length_checked() {
    let df = DataFrame::from_columns(vec![("x", Series::float(vec![1.0, 2.0]))]).unwrap();
    assert!(df.clone().set_index(Index::range(0, 3, 1)).is_err());
    let df = df.set_index(Index::range(10, 12, 1)).unwrap();
    assert_eq!(df.index().get(1), Some(IndexValue::Integer(11)));
}
