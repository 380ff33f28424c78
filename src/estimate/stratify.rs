//! Stratification: assignment integrity checks and basis adjustment.
//!
//! Adjustment factors apply to the per-acre response before plot
//! aggregation; expansion by `EXPNS` happens after, at the stratum level.

use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::config::ColumnNames;
use crate::error::{EstimatorError, Result};
use crate::model::{Stratum, TreeBasis};
use crate::table::key::{key_column, KeyValue};
use crate::table::{column_as_f64, f64_at};

/// Decode the assignment table into a plot-to-stratum map, rejecting plots
/// with more than one stratum in the evaluation.
pub fn validate_assignments(
    assign: &RecordBatch,
    cols: &ColumnNames,
) -> Result<FxHashMap<KeyValue, KeyValue>> {
    let plots = key_column(assign, &cols.plot_cn)?;
    let strata = key_column(assign, &cols.stratum_cn)?;

    let mut map: FxHashMap<KeyValue, KeyValue> = FxHashMap::default();
    let mut duplicates: Vec<String> = Vec::new();
    for (plot, stratum) in plots.into_iter().zip(strata) {
        if matches!(stratum, KeyValue::Null) {
            return Err(EstimatorError::integrity(
                "assignment row with null stratum",
                vec![format!("{plot:?}")],
            ));
        }
        if map.insert(plot.clone(), stratum).is_some() {
            duplicates.push(format!("{plot:?}"));
        }
    }
    if !duplicates.is_empty() {
        duplicates.sort();
        duplicates.dedup();
        return Err(EstimatorError::integrity(
            "plots assigned to multiple strata in one evaluation",
            duplicates,
        ));
    }
    Ok(map)
}

/// Every plot reaching the estimators must carry exactly one assignment.
pub fn check_plot_coverage(
    plots: impl IntoIterator<Item = KeyValue>,
    assignments: &FxHashMap<KeyValue, KeyValue>,
) -> Result<()> {
    let missing: Vec<String> = plots
        .into_iter()
        .filter(|p| !assignments.contains_key(p))
        .map(|p| format!("{p:?}"))
        .unique()
        .sorted()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EstimatorError::integrity(
            "plots with no stratum assignment in the evaluation",
            missing,
        ))
    }
}

/// Condition proportions on one plot must sum to at most 1 within tolerance.
pub fn validate_condition_proportions(
    cond: &RecordBatch,
    cols: &ColumnNames,
    tolerance: f64,
) -> Result<()> {
    let plots = key_column(cond, &cols.plot_cn)?;
    let props = column_as_f64(cond, &cols.condprop_unadj)?;

    let mut sums: FxHashMap<KeyValue, f64> = FxHashMap::default();
    for (row, plot) in plots.into_iter().enumerate() {
        *sums.entry(plot).or_insert(0.0) += f64_at(&props, row).unwrap_or(0.0);
    }
    let offending: Vec<String> = sums
        .into_iter()
        .filter(|(_, sum)| *sum > 1.0 + tolerance)
        .map(|(plot, sum)| format!("{plot:?} (sum {sum:.6})"))
        .sorted()
        .collect();
    if offending.is_empty() {
        Ok(())
    } else {
        Err(EstimatorError::integrity(
            "condition proportions exceed 1 per plot",
            offending,
        ))
    }
}

fn stratum_for<'a>(
    strata: &'a FxHashMap<KeyValue, Stratum>,
    key: &KeyValue,
) -> Result<&'a Stratum> {
    strata.get(key).ok_or_else(|| {
        EstimatorError::integrity("row references an unknown stratum", vec![format!("{key:?}")])
    })
}

/// Replace existing `Float64` columns by name.
fn replace_f64_columns(
    batch: &RecordBatch,
    replacements: Vec<(String, Vec<f64>)>,
) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    for (name, values) in replacements {
        let idx = schema.index_of(&name).map_err(|_| {
            EstimatorError::computation(format!("expected response column '{name}' is missing"))
        })?;
        fields[idx] = Field::new(&name, DataType::Float64, false);
        columns[idx] = Arc::new(Float64Array::from(values));
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Scale tree responses by the basis-specific adjustment factor of the
/// tree's stratum. Basis comes from diameter vs. the plot's macroplot
/// breakpoint.
pub fn adjust_tree_responses(
    batch: &RecordBatch,
    cols: &ColumnNames,
    strata: &FxHashMap<KeyValue, Stratum>,
    response_cols: &[String],
) -> Result<RecordBatch> {
    let dia = column_as_f64(batch, &cols.dia)?;
    let breakpoint = column_as_f64(batch, &cols.macro_breakpoint_dia)?;
    let stratum_keys = key_column(batch, &cols.stratum_cn)?;
    let responses: Vec<Float64Array> = response_cols
        .iter()
        .map(|c| column_as_f64(batch, c))
        .collect::<Result<_>>()?;

    let mut adjusted: Vec<Vec<f64>> = vec![Vec::with_capacity(batch.num_rows()); responses.len()];
    for row in 0..batch.num_rows() {
        let stratum = stratum_for(strata, &stratum_keys[row])?;
        let basis = TreeBasis::from_diameter(f64_at(&dia, row), f64_at(&breakpoint, row));
        let factor = stratum.adjustment(basis);
        for (c, col) in responses.iter().enumerate() {
            adjusted[c].push(f64_at(col, row).unwrap_or(0.0) * factor);
        }
    }
    replace_f64_columns(
        batch,
        response_cols
            .iter()
            .cloned()
            .zip(adjusted)
            .collect(),
    )
}

/// Scale condition responses by the stratum adjustment factor of the
/// condition's proportion basis (`MACR` or subplot).
pub fn adjust_condition_responses(
    batch: &RecordBatch,
    cols: &ColumnNames,
    strata: &FxHashMap<KeyValue, Stratum>,
    response_cols: &[String],
) -> Result<RecordBatch> {
    let stratum_keys = key_column(batch, &cols.stratum_cn)?;
    let basis = batch
        .column_by_name(&cols.prop_basis)
        .and_then(|a| a.as_any().downcast_ref::<StringArray>().cloned());
    let responses: Vec<Float64Array> = response_cols
        .iter()
        .map(|c| column_as_f64(batch, c))
        .collect::<Result<_>>()?;

    let mut adjusted: Vec<Vec<f64>> = vec![Vec::with_capacity(batch.num_rows()); responses.len()];
    for row in 0..batch.num_rows() {
        let stratum = stratum_for(strata, &stratum_keys[row])?;
        let macroplot = basis
            .as_ref()
            .is_some_and(|b| !b.is_null(row) && b.value(row) == "MACR");
        let factor = if macroplot {
            stratum.adj_factor_macr
        } else {
            stratum.adj_factor_subp
        };
        for (c, col) in responses.iter().enumerate() {
            adjusted[c].push(f64_at(col, row).unwrap_or(0.0) * factor);
        }
    }
    replace_f64_columns(
        batch,
        response_cols
            .iter()
            .cloned()
            .zip(adjusted)
            .collect(),
    )
}
