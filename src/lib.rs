//! A Rust library for design-based population estimation over stratified
//! forest inventories: volume, biomass, trees-per-acre, basal area,
//! mortality, growth and land area, with ratio-of-means estimators and
//! stratified-design variance, backed by a lazy, cost-planned, cached join
//! pipeline over Arrow record batches.

pub mod config;
pub mod error;
pub mod estimate;
pub mod filter;
pub mod join;
pub mod model;
pub mod plan;
pub mod table;

// Re-export the most common types for easier use
// Core types
pub use config::{EstimatorConfig, TableNames};
pub use error::{EstimatorError, Result};
pub use estimate::{EstimationRequest, EstimationType, Estimator};

// Arrow types
pub use arrow::datatypes::Schema as ArrowSchema;
pub use arrow::record_batch::RecordBatch;

// Filtering capabilities
pub use filter::{parse_domain, CmpOp, DomainExpr, Literal};

// Table sources
pub use table::source::{MemorySource, ParquetSource, TableSource};
