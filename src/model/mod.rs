//! Reference entities of the stratified design and the standard land/tree
//! domain classifications.

use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::ColumnNames;
use crate::error::{EstimatorError, Result};
use crate::filter::{CmpOp, DomainExpr, Literal};
use crate::table::key::{key_column, KeyValue};
use crate::table::{column_as_f64, f64_at};

/// Land classification basis for an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LandType {
    /// Accessible forestland (`COND_STATUS_CD == 1`).
    #[default]
    Forest,
    /// Unreserved, productive forestland.
    Timber,
    /// No land-classification restriction.
    All,
}

impl LandType {
    /// Condition-level filter implementing the classification.
    #[must_use]
    pub fn condition_filter(&self, cols: &ColumnNames) -> Option<DomainExpr> {
        let forest = DomainExpr::Cmp {
            column: cols.cond_status_cd.clone(),
            op: CmpOp::Eq,
            value: Literal::Int(1),
        };
        match self {
            Self::Forest => Some(forest),
            Self::Timber => Some(
                forest
                    .and(DomainExpr::Between {
                        column: "SITECLCD".into(),
                        low: Literal::Int(1),
                        high: Literal::Int(6),
                    })
                    .and(DomainExpr::Cmp {
                        column: "RESERVCD".into(),
                        op: CmpOp::Eq,
                        value: Literal::Int(0),
                    }),
            ),
            Self::All => None,
        }
    }

    /// Extra condition columns the filter needs beyond the defaults.
    #[must_use]
    pub fn extra_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Timber => &["SITECLCD", "RESERVCD"],
            _ => &[],
        }
    }
}

/// Tree status restriction for an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TreeType {
    /// Live trees (`STATUSCD == 1`).
    #[default]
    Live,
    /// Standing dead trees at least 5 inches in diameter.
    Dead,
    /// Live growing-stock trees.
    GrowingStock,
    /// No tree-status restriction.
    All,
}

impl TreeType {
    /// Tree-level filter implementing the restriction.
    #[must_use]
    pub fn tree_filter(&self, cols: &ColumnNames) -> Option<DomainExpr> {
        let status = |v: i64| DomainExpr::Cmp {
            column: cols.statuscd.clone(),
            op: CmpOp::Eq,
            value: Literal::Int(v),
        };
        match self {
            Self::Live => Some(status(1)),
            Self::Dead => Some(status(2).and(DomainExpr::Cmp {
                column: cols.dia.clone(),
                op: CmpOp::Gte,
                value: Literal::Float(5.0),
            })),
            Self::GrowingStock => Some(status(1).and(DomainExpr::Cmp {
                column: "TREECLCD".into(),
                op: CmpOp::Eq,
                value: Literal::Int(2),
            })),
            Self::All => None,
        }
    }

    #[must_use]
    pub fn extra_columns(&self) -> &'static [&'static str] {
        match self {
            Self::GrowingStock => &["TREECLCD"],
            _ => &[],
        }
    }
}

/// Which plot sub-area a tree was measured on. Determines the stratum
/// adjustment factor applied to its per-acre response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeBasis {
    Micro,
    Subp,
    Macr,
}

impl TreeBasis {
    /// Basis from diameter vs. the plot's macroplot breakpoint. Trees with
    /// no recorded diameter are measured on the subplot.
    #[must_use]
    pub fn from_diameter(dia: Option<f64>, breakpoint: Option<f64>) -> Self {
        match dia {
            None => Self::Subp,
            Some(d) if d < 5.0 => Self::Micro,
            Some(d) => match breakpoint {
                Some(bp) if bp > 0.0 && d >= bp => Self::Macr,
                _ => Self::Subp,
            },
        }
    }
}

/// One stratum's design factors, decoded from the POP_STRATUM table.
#[derive(Debug, Clone)]
pub struct Stratum {
    pub estn_unit: KeyValue,
    /// Area represented per sampled point.
    pub expns: f64,
    pub adj_factor_micr: f64,
    pub adj_factor_subp: f64,
    pub adj_factor_macr: f64,
    /// Sampled-point count n_h.
    pub n_h: f64,
    /// Total-point count N_h, when present (needed for the FPC).
    pub big_n_h: Option<f64>,
}

impl Stratum {
    /// Adjustment factor for a tree basis.
    #[must_use]
    pub fn adjustment(&self, basis: TreeBasis) -> f64 {
        match basis {
            TreeBasis::Micro => self.adj_factor_micr,
            TreeBasis::Subp => self.adj_factor_subp,
            TreeBasis::Macr => self.adj_factor_macr,
        }
    }
}

/// Decode POP_STRATUM rows into a lookup keyed by stratum CN.
pub fn decode_strata(
    batch: &RecordBatch,
    cols: &ColumnNames,
) -> Result<FxHashMap<KeyValue, Stratum>> {
    let cns = key_column(batch, &cols.cn)?;
    let estn_units = key_column(batch, &cols.estn_unit_cn)?;
    let expns = column_as_f64(batch, &cols.expns)?;
    let micr = column_as_f64(batch, &cols.adj_factor_micr)?;
    let subp = column_as_f64(batch, &cols.adj_factor_subp)?;
    let macr = column_as_f64(batch, &cols.adj_factor_macr)?;
    let n_h = column_as_f64(batch, &cols.p2pointcnt)?;
    let big_n_h = column_as_f64(batch, &cols.p1pointcnt).ok();

    let mut out = FxHashMap::default();
    for row in 0..batch.num_rows() {
        let cn = cns[row].clone();
        if matches!(cn, KeyValue::Null) {
            return Err(EstimatorError::integrity(
                "stratum row with null CN",
                vec![format!("row {row}")],
            ));
        }
        out.insert(
            cn,
            Stratum {
                estn_unit: estn_units[row].clone(),
                expns: f64_at(&expns, row).unwrap_or(0.0),
                adj_factor_micr: f64_at(&micr, row).unwrap_or(1.0),
                adj_factor_subp: f64_at(&subp, row).unwrap_or(1.0),
                adj_factor_macr: f64_at(&macr, row).unwrap_or(1.0),
                n_h: f64_at(&n_h, row).unwrap_or(0.0),
                big_n_h: big_n_h.as_ref().and_then(|a| f64_at(a, row)),
            },
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_thresholds() {
        assert_eq!(TreeBasis::from_diameter(None, Some(24.0)), TreeBasis::Subp);
        assert_eq!(
            TreeBasis::from_diameter(Some(3.2), Some(24.0)),
            TreeBasis::Micro
        );
        assert_eq!(
            TreeBasis::from_diameter(Some(9.0), Some(24.0)),
            TreeBasis::Subp
        );
        assert_eq!(
            TreeBasis::from_diameter(Some(30.0), Some(24.0)),
            TreeBasis::Macr
        );
        // No breakpoint means no macroplot on this design.
        assert_eq!(TreeBasis::from_diameter(Some(30.0), None), TreeBasis::Subp);
    }
}
