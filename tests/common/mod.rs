//! Shared synthetic inventory fixtures.
#![allow(dead_code)]

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use fia_estimator::MemorySource;

pub const EVALID: i64 = 100;

/// Route `log` output through the test harness when `RUST_LOG` is set.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
        .collect();
    let arrays = columns.into_iter().map(|(_, array)| array).collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap()
}

pub fn ints(values: Vec<i64>) -> ArrayRef {
    Arc::new(Int64Array::from(values))
}

pub fn floats(values: Vec<f64>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

pub fn floats_opt(values: Vec<Option<f64>>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

pub fn strs(values: Vec<&str>) -> ArrayRef {
    Arc::new(StringArray::from(values))
}

/// PLOT rows: one per CN, inventory year 2020, no macroplot.
pub fn plot_table(cns: &[i64]) -> RecordBatch {
    let n = cns.len();
    batch(vec![
        ("CN", ints(cns.to_vec())),
        ("INVYR", ints(vec![2020; n])),
        ("MACRO_BREAKPOINT_DIA", floats_opt(vec![None; n])),
    ])
}

/// COND rows from (plot CN, CONDID, CONDPROP_UNADJ, COND_STATUS_CD,
/// FORTYPCD) tuples, all on the subplot basis.
pub fn cond_table(rows: &[(i64, i64, f64, i64, i64)]) -> RecordBatch {
    batch(vec![
        ("PLT_CN", ints(rows.iter().map(|r| r.0).collect())),
        ("CONDID", ints(rows.iter().map(|r| r.1).collect())),
        ("CONDPROP_UNADJ", floats(rows.iter().map(|r| r.2).collect())),
        ("COND_STATUS_CD", ints(rows.iter().map(|r| r.3).collect())),
        ("FORTYPCD", ints(rows.iter().map(|r| r.4).collect())),
        ("PROP_BASIS", strs(vec!["SUBP"; rows.len()])),
    ])
}

/// TREE rows from (CN, plot CN, CONDID, STATUSCD, DIA, TPA_UNADJ, VOLCFNET,
/// DRYBIO_AG, SPCD) tuples.
#[allow(clippy::type_complexity)]
pub fn tree_table(rows: &[(i64, i64, i64, i64, f64, f64, f64, f64, i64)]) -> RecordBatch {
    batch(vec![
        ("CN", ints(rows.iter().map(|r| r.0).collect())),
        ("PLT_CN", ints(rows.iter().map(|r| r.1).collect())),
        ("CONDID", ints(rows.iter().map(|r| r.2).collect())),
        ("STATUSCD", ints(rows.iter().map(|r| r.3).collect())),
        ("DIA", floats(rows.iter().map(|r| r.4).collect())),
        ("TPA_UNADJ", floats(rows.iter().map(|r| r.5).collect())),
        ("VOLCFNET", floats(rows.iter().map(|r| r.6).collect())),
        ("DRYBIO_AG", floats(rows.iter().map(|r| r.7).collect())),
        ("SPCD", ints(rows.iter().map(|r| r.8).collect())),
    ])
}

/// POP_STRATUM rows from (CN, EXPNS, P2POINTCNT) tuples, all adjustment
/// factors 1.0, one estimation unit.
pub fn stratum_table(rows: &[(i64, f64, f64)]) -> RecordBatch {
    let n = rows.len();
    batch(vec![
        ("CN", ints(rows.iter().map(|r| r.0).collect())),
        ("ESTN_UNIT_CN", ints(vec![1; n])),
        ("EVALID", ints(vec![EVALID; n])),
        ("EXPNS", floats(rows.iter().map(|r| r.1).collect())),
        ("ADJ_FACTOR_MICR", floats(vec![1.0; n])),
        ("ADJ_FACTOR_SUBP", floats(vec![1.0; n])),
        ("ADJ_FACTOR_MACR", floats(vec![1.0; n])),
        ("P2POINTCNT", floats(rows.iter().map(|r| r.2).collect())),
        // Four total points per sampled point, for the FPC.
        ("P1POINTCNT", floats(rows.iter().map(|r| r.2 * 4.0).collect())),
    ])
}

/// POP_PLOT_STRATUM_ASSGN rows from (plot CN, stratum CN) pairs.
pub fn assignment_table(rows: &[(i64, i64)]) -> RecordBatch {
    let n = rows.len();
    batch(vec![
        ("PLT_CN", ints(rows.iter().map(|r| r.0).collect())),
        ("STRATUM_CN", ints(rows.iter().map(|r| r.1).collect())),
        ("EVALID", ints(vec![EVALID; n])),
    ])
}

/// TREE_GRM_COMPONENT rows from (tree CN, component, TPAMORT_UNADJ,
/// TPAGROW_UNADJ, ANN_NET_GROWTH) tuples.
pub fn grm_table(rows: &[(i64, &str, f64, f64, f64)]) -> RecordBatch {
    batch(vec![
        ("TRE_CN", ints(rows.iter().map(|r| r.0).collect())),
        ("COMPONENT", strs(rows.iter().map(|r| r.1).collect())),
        ("TPAMORT_UNADJ", floats(rows.iter().map(|r| r.2).collect())),
        ("TPAGROW_UNADJ", floats(rows.iter().map(|r| r.3).collect())),
        ("ANN_NET_GROWTH", floats(rows.iter().map(|r| r.4).collect())),
    ])
}

/// Two fully forested plots in one stratum (EXPNS 1000, n_h 2):
/// plot 1 holds one tree of species 316, plot 2 two trees of species 833.
/// Per-plot volume sums are 60 and 150.
pub fn single_stratum_source() -> MemorySource {
    init_logging();
    let mut source = MemorySource::new();
    source.register("PLOT", plot_table(&[1, 2]));
    source.register(
        "COND",
        cond_table(&[(1, 1, 1.0, 1, 161), (2, 1, 1.0, 1, 406)]),
    );
    source.register(
        "TREE",
        tree_table(&[
            (101, 1, 1, 1, 10.0, 6.0, 10.0, 2000.0, 316),
            (102, 2, 1, 1, 12.0, 6.0, 20.0, 1000.0, 833),
            (103, 2, 1, 1, 8.0, 6.0, 5.0, 500.0, 833),
        ]),
    );
    source.register("POP_STRATUM", stratum_table(&[(10, 1000.0, 2.0)]));
    source.register(
        "POP_PLOT_STRATUM_ASSGN",
        assignment_table(&[(1, 10), (2, 10)]),
    );
    source.register(
        "TREE_GRM_COMPONENT",
        grm_table(&[
            (101, "MORTALITY", 2.0, 0.0, 0.0),
            (102, "SURVIVOR", 0.0, 1.0, 4.0),
        ]),
    );
    source
}

/// Pull a named `Float64` column value from a single row.
pub fn f64_value(batch: &RecordBatch, column: &str, row: usize) -> f64 {
    batch
        .column_by_name(column)
        .unwrap_or_else(|| panic!("missing column {column}"))
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap()
        .value(row)
}

pub fn i64_value(batch: &RecordBatch, column: &str, row: usize) -> i64 {
    batch
        .column_by_name(column)
        .unwrap_or_else(|| panic!("missing column {column}"))
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap()
        .value(row)
}
