//! Trees per acre and basal area per acre.

use arrow::record_batch::RecordBatch;

use crate::config::ColumnNames;
use crate::error::Result;
use crate::table::{column_as_f64, f64_at};

use super::{append_f64_columns, EstimationModule, ResponseSpec};

/// Square feet of basal area per square inch of diameter squared.
const BA_PER_DIA_SQ: f64 = 0.005_454_154;

pub struct TpaModule;

impl EstimationModule for TpaModule {
    fn name(&self) -> &'static str {
        "tpa"
    }

    fn responses(&self) -> Vec<ResponseSpec> {
        vec![ResponseSpec { metric: "TPA" }, ResponseSpec { metric: "BAA" }]
    }

    fn calculate_values(&self, batch: &RecordBatch, cols: &ColumnNames) -> Result<RecordBatch> {
        let tpa = column_as_f64(batch, &cols.tpa_unadj)?;
        let dia = column_as_f64(batch, &cols.dia)?;
        let mut per_acre = Vec::with_capacity(batch.num_rows());
        let mut basal = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let t = f64_at(&tpa, row).unwrap_or(0.0);
            let d = f64_at(&dia, row).unwrap_or(0.0);
            per_acre.push(t);
            basal.push(BA_PER_DIA_SQ * d * d * t);
        }
        append_f64_columns(
            batch,
            vec![("RESP_TPA".into(), per_acre), ("RESP_BAA".into(), basal)],
        )
    }
}
