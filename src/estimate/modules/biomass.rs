//! Aboveground dry biomass and carbon, short tons per acre.

use arrow::record_batch::RecordBatch;

use crate::config::ColumnNames;
use crate::error::Result;
use crate::table::{column_as_f64, f64_at};

use super::{append_f64_columns, EstimationModule, ResponseSpec};

const LBS_PER_TON: f64 = 2000.0;
/// Fraction of dry biomass counted as carbon.
const CARBON_FRACTION: f64 = 0.5;

pub struct BiomassModule;

impl EstimationModule for BiomassModule {
    fn name(&self) -> &'static str {
        "biomass"
    }

    fn tree_columns(&self, _cols: &ColumnNames) -> Vec<String> {
        vec!["DRYBIO_AG".into()]
    }

    fn responses(&self) -> Vec<ResponseSpec> {
        vec![ResponseSpec { metric: "BIO" }, ResponseSpec { metric: "CARB" }]
    }

    fn calculate_values(&self, batch: &RecordBatch, cols: &ColumnNames) -> Result<RecordBatch> {
        let drybio = column_as_f64(batch, "DRYBIO_AG")?;
        let tpa = column_as_f64(batch, &cols.tpa_unadj)?;
        let mut bio = Vec::with_capacity(batch.num_rows());
        let mut carb = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let tons = f64_at(&drybio, row).unwrap_or(0.0) * f64_at(&tpa, row).unwrap_or(0.0)
                / LBS_PER_TON;
            bio.push(tons);
            carb.push(CARBON_FRACTION * tons);
        }
        append_f64_columns(
            batch,
            vec![("RESP_BIO".into(), bio), ("RESP_CARB".into(), carb)],
        )
    }
}
