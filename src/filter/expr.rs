//! Typed, composable filter expressions evaluated against `RecordBatch`es.

use arrow::array::{Array, BooleanArray, Float64Array, StringArray};
use arrow::compute::kernels::cmp::{eq, gt, gt_eq, lt, lt_eq, neq};
use arrow::compute::{and, cast, is_not_null, is_null};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{EstimatorError, Result};

/// A literal value appearing in a domain expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    /// Numeric view of the literal, if it has one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Str(_) => None,
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "'{s}'"),
        }
    }
}

/// Comparison operators supported by the domain language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        };
        write!(f, "{s}")
    }
}

/// A parsed domain expression. Composition is AND-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainExpr {
    /// `column <op> literal`
    Cmp {
        column: String,
        op: CmpOp,
        value: Literal,
    },
    /// `column IN (v, ...)`
    In { column: String, values: Vec<Literal> },
    /// `column BETWEEN low AND high` (inclusive both ends)
    Between {
        column: String,
        low: Literal,
        high: Literal,
    },
    /// `column IS NULL` / `column IS NOT NULL`
    IsNull { column: String, negated: bool },
    /// Conjunction of two expressions.
    And(Box<DomainExpr>, Box<DomainExpr>),
    /// Matches every row.
    AlwaysTrue,
}

impl DomainExpr {
    /// Conjoin two expressions, eliding `AlwaysTrue` operands.
    #[must_use]
    pub fn and(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Self::AlwaysTrue, r) => r,
            (l, Self::AlwaysTrue) => l,
            (l, r) => Self::And(Box::new(l), Box::new(r)),
        }
    }

    /// Conjoin an optional pair of expressions.
    #[must_use]
    pub fn and_opt(lhs: Option<Self>, rhs: Option<Self>) -> Option<Self> {
        match (lhs, rhs) {
            (Some(l), Some(r)) => Some(l.and(r)),
            (Some(l), None) => Some(l),
            (None, r) => r,
        }
    }

    /// Every column the expression references.
    #[must_use]
    pub fn required_columns(&self) -> HashSet<String> {
        let mut set = HashSet::new();
        self.collect_columns(&mut set);
        set
    }

    fn collect_columns(&self, set: &mut HashSet<String>) {
        match self {
            Self::Cmp { column, .. }
            | Self::In { column, .. }
            | Self::Between { column, .. }
            | Self::IsNull { column, .. } => {
                set.insert(column.clone());
            }
            Self::And(lhs, rhs) => {
                lhs.collect_columns(set);
                rhs.collect_columns(set);
            }
            Self::AlwaysTrue => {}
        }
    }

    /// True when every referenced column is a member of `columns`.
    ///
    /// Push-down moves a predicate below a join only under this condition.
    #[must_use]
    pub fn references_only(&self, columns: &HashSet<String>) -> bool {
        self.required_columns().iter().all(|c| columns.contains(c))
    }

    /// Evaluate the expression to a row mask against `batch`.
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        match self {
            Self::Cmp { column, op, value } => compare_mask(batch, column, *op, value),
            Self::In { column, values } => in_mask(batch, column, values),
            Self::Between { column, low, high } => {
                let lo = compare_mask(batch, column, CmpOp::Gte, low)?;
                let hi = compare_mask(batch, column, CmpOp::Lte, high)?;
                Ok(and(&lo, &hi)?)
            }
            Self::IsNull { column, negated } => {
                let array = column_array(batch, column)?;
                let mask = if *negated {
                    is_not_null(array.as_ref())?
                } else {
                    is_null(array.as_ref())?
                };
                Ok(mask)
            }
            Self::And(lhs, rhs) => Ok(and(&lhs.evaluate(batch)?, &rhs.evaluate(batch)?)?),
            Self::AlwaysTrue => Ok(BooleanArray::from(vec![true; batch.num_rows()])),
        }
    }
}

impl std::fmt::Display for DomainExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cmp { column, op, value } => write!(f, "{column} {op} {value}"),
            Self::In { column, values } => {
                let vals: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{column} IN ({})", vals.join(", "))
            }
            Self::Between { column, low, high } => {
                write!(f, "{column} BETWEEN {low} AND {high}")
            }
            Self::IsNull { column, negated } => {
                if *negated {
                    write!(f, "{column} IS NOT NULL")
                } else {
                    write!(f, "{column} IS NULL")
                }
            }
            Self::And(lhs, rhs) => write!(f, "{lhs} AND {rhs}"),
            Self::AlwaysTrue => write!(f, "TRUE"),
        }
    }
}

fn column_array<'a>(
    batch: &'a RecordBatch,
    column: &str,
) -> Result<&'a arrow::array::ArrayRef> {
    batch.column_by_name(column).ok_or_else(|| {
        EstimatorError::validation(format!("filter references missing column '{column}'"))
    })
}

/// Widen a numeric column to `Float64` for comparison.
fn numeric_column(batch: &RecordBatch, column: &str) -> Result<Float64Array> {
    let array = column_array(batch, column)?;
    let widened = cast(array.as_ref(), &DataType::Float64)?;
    widened
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| {
            EstimatorError::validation(format!("column '{column}' is not numeric"))
        })
}

fn string_column(batch: &RecordBatch, column: &str) -> Result<StringArray> {
    let array = column_array(batch, column)?;
    array
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| {
            EstimatorError::validation(format!(
                "column '{column}' is not a string column but the filter compares it to a string"
            ))
        })
}

fn compare_mask(
    batch: &RecordBatch,
    column: &str,
    op: CmpOp,
    value: &Literal,
) -> Result<BooleanArray> {
    if let Some(v) = value.as_f64() {
        let array = numeric_column(batch, column)?;
        let scalar = Float64Array::new_scalar(v);
        let mask = match op {
            CmpOp::Eq => eq(&array, &scalar)?,
            CmpOp::Neq => neq(&array, &scalar)?,
            CmpOp::Lt => lt(&array, &scalar)?,
            CmpOp::Lte => lt_eq(&array, &scalar)?,
            CmpOp::Gt => gt(&array, &scalar)?,
            CmpOp::Gte => gt_eq(&array, &scalar)?,
        };
        Ok(mask)
    } else {
        let Literal::Str(s) = value else {
            return Err(EstimatorError::validation(format!(
                "cannot compare column '{column}' against literal {value}"
            )));
        };
        let array = string_column(batch, column)?;
        let scalar = StringArray::new_scalar(s.clone());
        let mask = match op {
            CmpOp::Eq => eq(&array, &scalar)?,
            CmpOp::Neq => neq(&array, &scalar)?,
            CmpOp::Lt => lt(&array, &scalar)?,
            CmpOp::Lte => lt_eq(&array, &scalar)?,
            CmpOp::Gt => gt(&array, &scalar)?,
            CmpOp::Gte => gt_eq(&array, &scalar)?,
        };
        Ok(mask)
    }
}

fn in_mask(batch: &RecordBatch, column: &str, values: &[Literal]) -> Result<BooleanArray> {
    let any_string = values.iter().any(|v| matches!(v, Literal::Str(_)));
    if any_string {
        let set: HashSet<&str> = values
            .iter()
            .filter_map(|v| match v {
                Literal::Str(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        let array = string_column(batch, column)?;
        Ok(array
            .iter()
            .map(|opt| opt.map(|s| set.contains(s)))
            .collect())
    } else {
        // Numeric membership compares through f64 bit patterns; IN lists in
        // practice hold integer codes (species, status, owner group).
        let set: HashSet<u64> = values
            .iter()
            .filter_map(Literal::as_f64)
            .map(f64::to_bits)
            .collect();
        let array = numeric_column(batch, column)?;
        Ok(array
            .iter()
            .map(|opt| opt.map(|v| set.contains(&v.to_bits())))
            .collect())
    }
}

/// Keep only the rows of `batch` where `mask` is true (nulls drop the row).
pub fn filter_record_batch(batch: &RecordBatch, mask: &BooleanArray) -> Result<RecordBatch> {
    Ok(arrow::compute::filter_record_batch(batch, mask)?)
}
