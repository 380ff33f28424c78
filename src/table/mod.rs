//! Tabular plumbing shared by the pipeline: column widening, row
//! materialization, composite keys, group-by-sum, the lazy DAG and the
//! `TableSource` boundary.

pub mod group;
pub mod key;
pub mod lazy;
pub mod source;

use arrow::array::{Array, Float64Array, UInt32Array};
use arrow::compute::{cast, take};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use crate::error::{EstimatorError, Result};

/// Widen a numeric column to `Float64`.
///
/// FIA tables mix Int32/Int64/Float32/Float64 encodings for measures; all
/// arithmetic in the pipeline happens in f64.
pub fn column_as_f64(batch: &RecordBatch, column: &str) -> Result<Float64Array> {
    let array = batch.column_by_name(column).ok_or_else(|| {
        EstimatorError::validation(format!("missing required column '{column}'"))
    })?;
    let widened = cast(array.as_ref(), &DataType::Float64)?;
    widened
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| EstimatorError::validation(format!("column '{column}' is not numeric")))
}

/// Value of a numeric cell as `f64`, with nulls mapped to `None`.
pub fn f64_at(array: &Float64Array, row: usize) -> Option<f64> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row))
    }
}

/// Materialize the rows of `batch` selected by `indices`.
///
/// Null indices produce null cells, which is how left joins pad unmatched
/// rows.
pub fn take_record_batch(batch: &RecordBatch, indices: &UInt32Array) -> Result<RecordBatch> {
    let columns = batch
        .columns()
        .iter()
        .map(|col| take(col.as_ref(), indices, None))
        .collect::<arrow::error::Result<Vec<_>>>()?;
    let schema = if batch.num_columns() == 0 {
        batch.schema()
    } else {
        // Taking with null indices makes every column nullable.
        std::sync::Arc::new(arrow::datatypes::Schema::new(
            batch
                .schema()
                .fields()
                .iter()
                .map(|f| f.as_ref().clone().with_nullable(true))
                .collect::<Vec<_>>(),
        ))
    };
    Ok(RecordBatch::try_new(schema, columns)?)
}

/// Project `batch` down to `columns`, failing on unknown names.
pub fn project_columns(batch: &RecordBatch, columns: &[String]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let indices = columns
        .iter()
        .map(|name| {
            schema.index_of(name).map_err(|_| {
                EstimatorError::validation(format!("projection references unknown column '{name}'"))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(batch.project(&indices)?)
}

/// Concatenate batches sharing one schema; an empty slice needs the schema.
pub fn concat_batches(
    schema: &arrow::datatypes::SchemaRef,
    batches: &[RecordBatch],
) -> Result<RecordBatch> {
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema.clone()));
    }
    Ok(arrow::compute::concat_batches(schema, batches)?)
}
