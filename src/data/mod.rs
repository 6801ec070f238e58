//! Data handling module
//!
//! Provides the canonical packet/flow schema, column mapping from arbitrary
//! source tables, feature preprocessing, and missing-value imputation.

pub mod imputer;
pub mod mapping;
pub mod preprocessing;

pub use imputer::MedianImputer;
pub use mapping::{
    apply_mapping, infer_mapping, ColumnMapping, MappedTable, Provenance, RawColumn,
};
pub use preprocessing::{FeaturePreprocessor, PreprocessConfig};
