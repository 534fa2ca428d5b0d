//! Model matrix materialization
//!
//! Turns formulas parsed by [`dm_core`] into numeric model matrices:
//!
//! - [`materializer`]: factor evaluation, rank planning, encoding and the
//!   driver that ties them together
//! - [`spec`]: replayable model specifications
//! - [`output`]: dense, sparse and labeled matrix representations
//! - [`config`]: materialization options
//!
//! ```no_run
//! use dm_core::data::{DataFrameBuilder, Series};
//! use dm_matrix::{MaterializeConfig, Materializer};
//!
//! # fn main() -> dm_matrix::Result<()> {
//! let data = DataFrameBuilder::new()
//!     .with_column("y", Series::float(vec![1.0, 2.0, 3.0]))?
//!     .with_column("g", Series::categorical(&["a", "b", "a"]))?
//!     .build()?;
//!
//! let matrices = Materializer::new(&data).get_model_matrix("y ~ g", &MaterializeConfig::default())?;
//! let rhs = matrices.rhs().expect("two-sided formula");
//! assert_eq!(rhs.column_names(), vec!["Intercept", "g[T.b]"]);
//!
//! // Replay the fitted spec on new data
//! let spec = rhs.model_spec.clone();
//! let replayed = spec.get_model_matrix(&data)?;
//! assert_eq!(replayed.column_names(), rhs.column_names());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod materializer;
pub mod output;
pub mod spec;

pub use config::{ClusterBy, MaterializeConfig, NaAction, OutputKind};
pub use error::{MaterializeError, Result};
pub use materializer::{
    BuiltinEvaluator, ContextSource, EncodingState, EvaluatedFactor, FactorEvaluator, FactorValues,
    LayeredContext, Materializer, Value,
};
pub use output::{MatrixData, ModelMatrices, ModelMatrix, SparseMatrix};
pub use spec::{ModelSpec, ModelSpecs, TermStructure};
