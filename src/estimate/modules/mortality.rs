//! Annual mortality of net volume, cubic feet per acre per year.

use arrow::record_batch::RecordBatch;

use crate::config::ColumnNames;
use crate::error::Result;
use crate::filter::{CmpOp, DomainExpr, Literal};
use crate::table::{column_as_f64, f64_at};

use super::{append_f64_columns, AuxJoin, EstimationModule, ResponseSpec};

pub struct MortalityModule;

impl EstimationModule for MortalityModule {
    fn name(&self) -> &'static str {
        "mortality"
    }

    fn tree_columns(&self, _cols: &ColumnNames) -> Vec<String> {
        vec!["VOLCFNET".into()]
    }

    fn aux_join(&self, cols: &ColumnNames) -> Option<AuxJoin> {
        Some(AuxJoin {
            table: "TREE_GRM_COMPONENT".into(),
            keys: vec![(cols.cn.clone(), "TRE_CN".into())],
            columns: vec!["COMPONENT".into(), "TPAMORT_UNADJ".into()],
        })
    }

    fn module_filter(&self, _cols: &ColumnNames) -> Option<DomainExpr> {
        Some(DomainExpr::Cmp {
            column: "COMPONENT".into(),
            op: CmpOp::Eq,
            value: Literal::Str("MORTALITY".into()),
        })
    }

    fn responses(&self) -> Vec<ResponseSpec> {
        vec![ResponseSpec { metric: "MORT" }]
    }

    fn calculate_values(&self, batch: &RecordBatch, _cols: &ColumnNames) -> Result<RecordBatch> {
        let tpa_mort = column_as_f64(batch, "TPAMORT_UNADJ")?;
        let volume = column_as_f64(batch, "VOLCFNET")?;
        let values = (0..batch.num_rows())
            .map(|row| {
                f64_at(&tpa_mort, row).unwrap_or(0.0) * f64_at(&volume, row).unwrap_or(0.0)
            })
            .collect();
        append_f64_columns(batch, vec![("RESP_MORT".into(), values)])
    }
}
