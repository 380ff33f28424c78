//! Grouped summation over record batches.
//!
//! This is the single aggregation kernel behind both stages of the plot
//! aggregator and the stratum-level moment accumulation. Groups appear in
//! first-seen row order, so identical input yields identical output.

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::table::key::{composite_keys, CompositeKey};
use crate::table::{column_as_f64, take_record_batch};

/// Group `batch` by `key_columns` and sum each of `sum_columns` (as f64,
/// nulls contribute zero). When `count_alias` is set, a row-count column is
/// appended under that name.
pub fn sum_by(
    batch: &RecordBatch,
    key_columns: &[String],
    sum_columns: &[String],
    count_alias: Option<&str>,
) -> Result<RecordBatch> {
    let keys = composite_keys(batch, key_columns)?;
    let values: Vec<Float64Array> = sum_columns
        .iter()
        .map(|c| column_as_f64(batch, c))
        .collect::<Result<_>>()?;

    let mut group_of: FxHashMap<CompositeKey, usize> = FxHashMap::default();
    let mut first_row: Vec<u32> = Vec::new();
    let mut sums: Vec<Vec<f64>> = vec![Vec::new(); sum_columns.len()];
    let mut counts: Vec<i64> = Vec::new();

    for (row, key) in keys.into_iter().enumerate() {
        let group = *group_of.entry(key).or_insert_with(|| {
            first_row.push(row as u32);
            for col in &mut sums {
                col.push(0.0);
            }
            counts.push(0);
            first_row.len() - 1
        });
        counts[group] += 1;
        for (c, col) in values.iter().enumerate() {
            if !col.is_null(row) {
                sums[c][group] += col.value(row);
            }
        }
    }

    // Key columns are re-materialized from a representative row per group,
    // preserving their original Arrow types.
    let representative = UInt32Array::from(first_row);
    let key_batch = take_record_batch(&crate::table::project_columns(batch, key_columns)?, &representative)?;

    let mut fields: Vec<Field> = key_batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    let mut columns: Vec<ArrayRef> = key_batch.columns().to_vec();

    for (c, name) in sum_columns.iter().enumerate() {
        fields.push(Field::new(name, DataType::Float64, false));
        columns.push(Arc::new(Float64Array::from(std::mem::take(&mut sums[c]))));
    }
    if let Some(alias) = count_alias {
        fields.push(Field::new(alias, DataType::Int64, false));
        columns.push(Arc::new(Int64Array::from(counts)));
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("PLT_CN", DataType::Int64, false),
            Field::new("CONDID", DataType::Int64, false),
            Field::new("V", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 1, 1, 2])),
                Arc::new(Int64Array::from(vec![1, 1, 2, 1])),
                Arc::new(Float64Array::from(vec![
                    Some(2.0),
                    Some(3.0),
                    None,
                    Some(7.0),
                ])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn sums_by_composite_key_with_null_as_zero() {
        let out = sum_by(
            &batch(),
            &["PLT_CN".into(), "CONDID".into()],
            &["V".into()],
            Some("N"),
        )
        .unwrap();
        assert_eq!(out.num_rows(), 3);
        let v = out
            .column_by_name("V")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap()
            .clone();
        let n = out
            .column_by_name("N")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .clone();
        assert_eq!(v.value(0), 5.0);
        assert_eq!(n.value(0), 2);
        assert_eq!(v.value(1), 0.0);
        assert_eq!(v.value(2), 7.0);
    }
}
