//! Net cubic-foot volume per acre.

use arrow::record_batch::RecordBatch;

use crate::config::ColumnNames;
use crate::error::Result;
use crate::table::{column_as_f64, f64_at};

use super::{append_f64_columns, EstimationModule, ResponseSpec};

pub struct VolumeModule;

impl EstimationModule for VolumeModule {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn tree_columns(&self, _cols: &ColumnNames) -> Vec<String> {
        vec!["VOLCFNET".into()]
    }

    fn responses(&self) -> Vec<ResponseSpec> {
        vec![ResponseSpec { metric: "VOL" }]
    }

    fn calculate_values(&self, batch: &RecordBatch, cols: &ColumnNames) -> Result<RecordBatch> {
        let volume = column_as_f64(batch, "VOLCFNET")?;
        let tpa = column_as_f64(batch, &cols.tpa_unadj)?;
        let values = (0..batch.num_rows())
            .map(|row| {
                f64_at(&volume, row).unwrap_or(0.0) * f64_at(&tpa, row).unwrap_or(0.0)
            })
            .collect();
        append_f64_columns(batch, vec![("RESP_VOL".into(), values)])
    }
}
