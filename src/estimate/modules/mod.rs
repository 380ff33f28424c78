//! Per-estimation-type value calculators.
//!
//! Each module is a pure rowwise computation: it declares the columns and
//! auxiliary joins it needs, then appends its `RESP_*` response columns to
//! the joined rows. No I/O, no assumed row order. Null or zero inputs
//! produce a zero response, never a panic.

pub mod area;
pub mod biomass;
pub mod growth;
pub mod mortality;
pub mod tpa;
pub mod volume;

use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use crate::config::ColumnNames;
use crate::error::Result;
use crate::filter::DomainExpr;

/// Whether a module's responses attach to tree rows or condition rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLevel {
    Tree,
    Condition,
}

/// An auxiliary table joined onto the tree rows before value calculation.
#[derive(Debug, Clone)]
pub struct AuxJoin {
    pub table: String,
    /// (tree column, auxiliary column) join key pairs.
    pub keys: Vec<(String, String)>,
    /// Auxiliary columns to carry besides the join keys.
    pub columns: Vec<String>,
}

/// One response attribute a module produces.
#[derive(Debug, Clone, Copy)]
pub struct ResponseSpec {
    /// Metric name as it appears in output column names (`VOL`, `BIO`, ...).
    pub metric: &'static str,
}

impl ResponseSpec {
    /// Name of the response column the module appends.
    #[must_use]
    pub fn column(&self) -> String {
        format!("RESP_{}", self.metric)
    }
}

/// A value calculator for one estimation type.
///
/// This is the pipeline's only extension point: the workflow stays fixed
/// and each estimation type supplies its required columns, an optional
/// auxiliary join and filter, and the response computation.
pub trait EstimationModule: Send + Sync {
    fn name(&self) -> &'static str;

    fn level(&self) -> ResponseLevel {
        ResponseLevel::Tree
    }

    /// Tree columns the calculation reads beyond the shared defaults.
    fn tree_columns(&self, _cols: &ColumnNames) -> Vec<String> {
        Vec::new()
    }

    fn aux_join(&self, _cols: &ColumnNames) -> Option<AuxJoin> {
        None
    }

    /// Extra predicate applied to the joined rows before calculation.
    fn module_filter(&self, _cols: &ColumnNames) -> Option<DomainExpr> {
        None
    }

    fn responses(&self) -> Vec<ResponseSpec>;

    /// Append the `RESP_*` columns to the joined rows.
    fn calculate_values(&self, batch: &RecordBatch, cols: &ColumnNames) -> Result<RecordBatch>;
}

/// Append named `Float64` columns to a batch.
pub(crate) fn append_f64_columns(
    batch: &RecordBatch,
    extra: Vec<(String, Vec<f64>)>,
) -> Result<RecordBatch> {
    let mut fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    for (name, values) in extra {
        fields.push(Field::new(&name, DataType::Float64, false));
        columns.push(Arc::new(Float64Array::from(values)));
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}
