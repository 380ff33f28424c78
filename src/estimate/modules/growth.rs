//! Annual net growth of volume on surviving trees, cubic feet per acre per
//! year.

use arrow::record_batch::RecordBatch;

use crate::config::ColumnNames;
use crate::error::Result;
use crate::filter::{CmpOp, DomainExpr, Literal};
use crate::table::{column_as_f64, f64_at};

use super::{append_f64_columns, AuxJoin, EstimationModule, ResponseSpec};

pub struct GrowthModule;

impl EstimationModule for GrowthModule {
    fn name(&self) -> &'static str {
        "growth"
    }

    fn aux_join(&self, cols: &ColumnNames) -> Option<AuxJoin> {
        Some(AuxJoin {
            table: "TREE_GRM_COMPONENT".into(),
            keys: vec![(cols.cn.clone(), "TRE_CN".into())],
            columns: vec![
                "COMPONENT".into(),
                "TPAGROW_UNADJ".into(),
                "ANN_NET_GROWTH".into(),
            ],
        })
    }

    fn module_filter(&self, _cols: &ColumnNames) -> Option<DomainExpr> {
        Some(DomainExpr::Cmp {
            column: "COMPONENT".into(),
            op: CmpOp::Eq,
            value: Literal::Str("SURVIVOR".into()),
        })
    }

    fn responses(&self) -> Vec<ResponseSpec> {
        vec![ResponseSpec { metric: "GROW" }]
    }

    fn calculate_values(&self, batch: &RecordBatch, _cols: &ColumnNames) -> Result<RecordBatch> {
        let tpa_grow = column_as_f64(batch, "TPAGROW_UNADJ")?;
        let growth = column_as_f64(batch, "ANN_NET_GROWTH")?;
        let values = (0..batch.num_rows())
            .map(|row| {
                f64_at(&tpa_grow, row).unwrap_or(0.0) * f64_at(&growth, row).unwrap_or(0.0)
            })
            .collect();
        append_f64_columns(batch, vec![("RESP_GROW".into(), values)])
    }
}
