//! Composite key values for joins and group-bys.

use arrow::array::{Array, Float32Array, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use smallvec::SmallVec;

use crate::error::{EstimatorError, Result};

/// One cell of a join or group key.
///
/// Floats are mapped to order-preserving bit patterns so that hashing and
/// ordering agree with numeric comparison on both sides of a join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Null,
    Int(i64),
    Float(u64),
    Str(String),
}

impl KeyValue {
    fn from_f64(v: f64) -> Self {
        // Standard total-order trick: flip all bits for negatives, set the
        // sign bit for non-negatives.
        let bits = v.to_bits();
        let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
        Self::Float(ordered)
    }

    /// Recover the float a `Float` key was built from.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Self::Float(ordered) => {
                let bits = if ordered >> 63 == 1 {
                    ordered & !(1 << 63)
                } else {
                    !ordered
                };
                Some(f64::from_bits(bits))
            }
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// A composite key; most joins here use one or two columns.
pub type CompositeKey = SmallVec<[KeyValue; 2]>;

/// Extract one column as key values, null-aware.
pub fn key_column(batch: &RecordBatch, column: &str) -> Result<Vec<KeyValue>> {
    let array = batch.column_by_name(column).ok_or_else(|| {
        EstimatorError::validation(format!("key column '{column}' not found"))
    })?;
    let n = array.len();
    let any = array.as_any();

    let mut out = Vec::with_capacity(n);
    if let Some(a) = any.downcast_ref::<Int64Array>() {
        for i in 0..n {
            out.push(if a.is_null(i) {
                KeyValue::Null
            } else {
                KeyValue::Int(a.value(i))
            });
        }
    } else if let Some(a) = any.downcast_ref::<Int32Array>() {
        for i in 0..n {
            out.push(if a.is_null(i) {
                KeyValue::Null
            } else {
                KeyValue::Int(i64::from(a.value(i)))
            });
        }
    } else if let Some(a) = any.downcast_ref::<Float64Array>() {
        for i in 0..n {
            out.push(if a.is_null(i) {
                KeyValue::Null
            } else {
                KeyValue::from_f64(a.value(i))
            });
        }
    } else if let Some(a) = any.downcast_ref::<Float32Array>() {
        for i in 0..n {
            out.push(if a.is_null(i) {
                KeyValue::Null
            } else {
                KeyValue::from_f64(f64::from(a.value(i)))
            });
        }
    } else if let Some(a) = any.downcast_ref::<StringArray>() {
        for i in 0..n {
            out.push(if a.is_null(i) {
                KeyValue::Null
            } else {
                KeyValue::Str(a.value(i).to_string())
            });
        }
    } else {
        return Err(EstimatorError::validation(format!(
            "unsupported key column type {:?} for '{column}'",
            array.data_type()
        )));
    }
    Ok(out)
}

/// Extract several columns as per-row composite keys.
pub fn composite_keys(batch: &RecordBatch, columns: &[String]) -> Result<Vec<CompositeKey>> {
    let per_column: Vec<Vec<KeyValue>> = columns
        .iter()
        .map(|c| key_column(batch, c))
        .collect::<Result<_>>()?;
    let n = batch.num_rows();
    let mut keys = Vec::with_capacity(n);
    for row in 0..n {
        let mut key = CompositeKey::new();
        for col in &per_column {
            key.push(col[row].clone());
        }
        keys.push(key);
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_keys_order_like_numbers() {
        let keys: Vec<KeyValue> = [-2.5f64, -0.0, 0.0, 1.5, 100.0]
            .iter()
            .map(|v| KeyValue::from_f64(*v))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        // -0.0 and 0.0 swap under bit ordering but compare adjacent; check
        // the strictly increasing values keep their positions.
        assert_eq!(sorted.first(), keys.first());
        assert_eq!(sorted.last(), keys.last());
    }
}
