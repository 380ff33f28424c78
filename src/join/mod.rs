//! Join execution over record batches.
//!
//! Three physical strategies, chosen by the planner: hash (build on the
//! right side, probe in left row order), broadcast (a hash join whose build
//! side is the designated small table; single-process, so the distinction is
//! the planner's cost accounting, not a different algorithm here), and
//! sort-merge for inputs pre-sorted on the join keys.
//!
//! Output columns are the left columns followed by the right columns minus
//! the right join keys; residual name collisions get an `_R` suffix. Null
//! join keys never match, matching SQL semantics.

pub mod cache;

use arrow::array::{ArrayRef, UInt32Array};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{EstimatorError, Result};
use crate::plan::JoinStrategy;
use crate::table::key::{composite_keys, CompositeKey, KeyValue};
use crate::table::take_record_batch;

/// Logical join kinds the pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
}

/// Execute a join between two materialized batches.
pub fn execute_join(
    left: &RecordBatch,
    right: &RecordBatch,
    keys: &[(String, String)],
    kind: JoinKind,
    strategy: JoinStrategy,
) -> Result<RecordBatch> {
    if keys.is_empty() {
        return Err(EstimatorError::validation("join requires at least one key"));
    }
    let left_cols: Vec<String> = keys.iter().map(|(l, _)| l.clone()).collect();
    let right_cols: Vec<String> = keys.iter().map(|(_, r)| r.clone()).collect();
    let left_keys = composite_keys(left, &left_cols)?;
    let right_keys = composite_keys(right, &right_cols)?;

    let (left_idx, right_idx) = match strategy {
        JoinStrategy::Hash | JoinStrategy::Broadcast => {
            hash_join_indices(&left_keys, &right_keys, kind)
        }
        JoinStrategy::SortMerge => merge_join_indices(&left_keys, &right_keys, kind),
    };

    materialize(left, right, &right_cols, &left_idx, &right_idx)
}

fn key_has_null(key: &CompositeKey) -> bool {
    key.iter().any(|v| matches!(v, KeyValue::Null))
}

/// Probe in left row order against a build table over the right side.
fn hash_join_indices(
    left_keys: &[CompositeKey],
    right_keys: &[CompositeKey],
    kind: JoinKind,
) -> (Vec<u32>, Vec<Option<u32>>) {
    let mut build: FxHashMap<&CompositeKey, Vec<u32>> = FxHashMap::default();
    for (row, key) in right_keys.iter().enumerate() {
        if !key_has_null(key) {
            build.entry(key).or_default().push(row as u32);
        }
    }

    let mut left_idx = Vec::new();
    let mut right_idx = Vec::new();
    for (row, key) in left_keys.iter().enumerate() {
        let matches = if key_has_null(key) {
            None
        } else {
            build.get(key)
        };
        match matches {
            Some(rows) => {
                for r in rows {
                    left_idx.push(row as u32);
                    right_idx.push(Some(*r));
                }
            }
            None => {
                if kind == JoinKind::Left {
                    left_idx.push(row as u32);
                    right_idx.push(None);
                }
            }
        }
    }
    (left_idx, right_idx)
}

/// Merge join over inputs sorted on the join keys.
///
/// The planner only selects this strategy when both sides are pre-sorted;
/// the argsort below is a guard for key encodings (float bit mapping) rather
/// than a full external sort.
fn merge_join_indices(
    left_keys: &[CompositeKey],
    right_keys: &[CompositeKey],
    kind: JoinKind,
) -> (Vec<u32>, Vec<Option<u32>>) {
    let mut left_order: Vec<u32> = (0..left_keys.len() as u32).collect();
    left_order.sort_by(|a, b| left_keys[*a as usize].cmp(&left_keys[*b as usize]));
    let mut right_order: Vec<u32> = (0..right_keys.len() as u32).collect();
    right_order.sort_by(|a, b| right_keys[*a as usize].cmp(&right_keys[*b as usize]));

    let mut left_idx = Vec::new();
    let mut right_idx = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < left_order.len() {
        let l_row = left_order[i];
        let l_key = &left_keys[l_row as usize];
        if key_has_null(l_key) {
            if kind == JoinKind::Left {
                left_idx.push(l_row);
                right_idx.push(None);
            }
            i += 1;
            continue;
        }
        while j < right_order.len() && {
            let r_key = &right_keys[right_order[j] as usize];
            key_has_null(r_key) || r_key < l_key
        } {
            j += 1;
        }
        // Extent of the equal-key run on the right.
        let run_start = j;
        let mut run_end = j;
        while run_end < right_order.len()
            && &right_keys[right_order[run_end] as usize] == l_key
        {
            run_end += 1;
        }
        if run_start == run_end {
            if kind == JoinKind::Left {
                left_idx.push(l_row);
                right_idx.push(None);
            }
        } else {
            for r in &right_order[run_start..run_end] {
                left_idx.push(l_row);
                right_idx.push(Some(*r));
            }
        }
        i += 1;
    }
    (left_idx, right_idx)
}

fn materialize(
    left: &RecordBatch,
    right: &RecordBatch,
    right_key_cols: &[String],
    left_idx: &[u32],
    right_idx: &[Option<u32>],
) -> Result<RecordBatch> {
    let left_take = UInt32Array::from(left_idx.to_vec());
    let right_take = UInt32Array::from(right_idx.to_vec());

    let left_taken = take_record_batch(left, &left_take)?;

    // Right side minus its join key columns.
    let right_schema = right.schema();
    let kept: Vec<usize> = (0..right_schema.fields().len())
        .filter(|i| !right_key_cols.contains(right_schema.field(*i).name()))
        .collect();
    let right_kept = right.project(&kept)?;
    let right_taken = take_record_batch(&right_kept, &right_take)?;

    let left_names: Vec<String> = left_taken
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();

    let mut fields: Vec<Field> = left_taken
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    let mut columns: Vec<ArrayRef> = left_taken.columns().to_vec();

    for (field, column) in right_taken
        .schema()
        .fields()
        .iter()
        .zip(right_taken.columns())
    {
        let name = if left_names.contains(field.name()) {
            format!("{}_R", field.name())
        } else {
            field.name().clone()
        };
        fields.push(Field::new(&name, field.data_type().clone(), true));
        columns.push(column.clone());
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}
