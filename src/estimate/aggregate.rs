//! Two-stage plot aggregation.
//!
//! Stage 1 groups response values by (plot, condition[, group key]) and
//! sums; stage 2 regroups the stage-1 output by (plot[, group key]). The
//! two stages are an invariant of the estimators, not an optimization: a
//! single-stage pass that multiplies every tree row by its condition's area
//! proportion counts that proportion once per tree instead of once per
//! condition and systematically underestimates.

use arrow::record_batch::RecordBatch;

use crate::error::Result;
use crate::table::group::sum_by;

/// Stage 1: sum responses per (plot, condition, group key).
pub fn condition_stage(
    batch: &RecordBatch,
    plot_col: &str,
    cond_col: &str,
    group_keys: &[String],
    response_cols: &[String],
) -> Result<RecordBatch> {
    let mut keys = vec![plot_col.to_string(), cond_col.to_string()];
    keys.extend(group_keys.iter().cloned());
    sum_by(batch, &keys, response_cols, None)
}

/// Stage 2: sum stage-1 rows per (plot, group key), with a row-count column
/// when `count_alias` is set.
pub fn plot_stage(
    batch: &RecordBatch,
    plot_col: &str,
    group_keys: &[String],
    response_cols: &[String],
    count_alias: Option<&str>,
) -> Result<RecordBatch> {
    let mut keys = vec![plot_col.to_string()];
    keys.extend(group_keys.iter().cloned());
    sum_by(batch, &keys, response_cols, count_alias)
}

/// Both stages, yielding one row per plot per group.
pub fn two_stage(
    batch: &RecordBatch,
    plot_col: &str,
    cond_col: &str,
    group_keys: &[String],
    response_cols: &[String],
) -> Result<RecordBatch> {
    let stage1 = condition_stage(batch, plot_col, cond_col, group_keys, response_cols)?;
    plot_stage(&stage1, plot_col, group_keys, response_cols, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn tree_rows(conds: &[i64], values: &[f64]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("PLT_CN", DataType::Int64, false),
            Field::new("CONDID", DataType::Int64, false),
            Field::new("RESP_VOL", DataType::Float64, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1; conds.len()])),
                Arc::new(Int64Array::from(conds.to_vec())),
                Arc::new(Float64Array::from(values.to_vec())),
            ],
        )
        .unwrap()
    }

    fn plot_total(batch: &RecordBatch) -> f64 {
        batch
            .column_by_name("RESP_VOL")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap()
            .value(0)
    }

    #[test]
    fn tree_count_per_condition_does_not_change_plot_estimate() {
        // Same condition-level sums (10.0 and 6.0), split over different
        // tree counts.
        let few = tree_rows(&[1, 2], &[10.0, 6.0]);
        let many = tree_rows(&[1, 1, 1, 1, 2, 2, 2], &[4.0, 3.0, 2.0, 1.0, 2.0, 2.0, 2.0]);

        let keys: Vec<String> = Vec::new();
        let resp = vec!["RESP_VOL".to_string()];
        let a = two_stage(&few, "PLT_CN", "CONDID", &keys, &resp).unwrap();
        let b = two_stage(&many, "PLT_CN", "CONDID", &keys, &resp).unwrap();

        assert_eq!(a.num_rows(), 1);
        assert_eq!(b.num_rows(), 1);
        assert!((plot_total(&a) - plot_total(&b)).abs() < 1e-12);
        assert!((plot_total(&a) - 16.0).abs() < 1e-12);
    }

    #[test]
    fn plot_stage_never_exceeds_condition_stage_total() {
        let rows = tree_rows(&[1, 1, 2, 2, 2], &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let keys: Vec<String> = Vec::new();
        let resp = vec!["RESP_VOL".to_string()];
        let stage1 = condition_stage(&rows, "PLT_CN", "CONDID", &keys, &resp).unwrap();
        let stage2 = plot_stage(&stage1, "PLT_CN", &keys, &resp, None).unwrap();

        let sum = |b: &RecordBatch| -> f64 {
            let a = b
                .column_by_name("RESP_VOL")
                .unwrap()
                .as_any()
                .downcast_ref::<Float64Array>()
                .unwrap()
                .clone();
            (0..a.len()).map(|i| a.value(i)).sum()
        };
        assert!(sum(&stage2) <= sum(&stage1) + 1e-12);
    }
}
