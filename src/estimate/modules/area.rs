//! Land area in acres.
//!
//! The only condition-level module: the response is the condition's area
//! proportion itself, so the workflow restricts the numerator conditions by
//! the area domain while the denominator keeps every condition of the land
//! classification.

use arrow::record_batch::RecordBatch;

use crate::config::ColumnNames;
use crate::error::Result;
use crate::table::{column_as_f64, f64_at};

use super::{append_f64_columns, EstimationModule, ResponseLevel, ResponseSpec};

pub struct AreaModule;

impl EstimationModule for AreaModule {
    fn name(&self) -> &'static str {
        "area"
    }

    fn level(&self) -> ResponseLevel {
        ResponseLevel::Condition
    }

    fn responses(&self) -> Vec<ResponseSpec> {
        vec![ResponseSpec { metric: "AREA" }]
    }

    fn calculate_values(&self, batch: &RecordBatch, cols: &ColumnNames) -> Result<RecordBatch> {
        let prop = column_as_f64(batch, &cols.condprop_unadj)?;
        let values = (0..batch.num_rows())
            .map(|row| f64_at(&prop, row).unwrap_or(0.0))
            .collect();
        append_f64_columns(batch, vec![("RESP_AREA".into(), values)])
    }
}
