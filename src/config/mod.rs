//! Configuration for the estimator.
//!
//! Table and key column names default to the public FIA database layout but
//! are caller-configurable; the core is not hardcoded to one storage engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for an [`crate::estimate::Estimator`].
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// Maximum number of entries in the join-result cache.
    pub cache_max_entries: usize,
    /// Maximum total bytes held by the join-result cache.
    pub cache_max_bytes: usize,
    /// Time-to-live for cached join results.
    pub cache_ttl: Duration,
    /// Row-count threshold below which the smaller join side is broadcast.
    pub broadcast_threshold: u64,
    /// Tolerance for the per-plot condition proportion sum invariant.
    pub condition_proportion_tolerance: f64,
    /// Table and column names used by the workflow.
    pub names: TableNames,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            cache_max_entries: 64,
            cache_max_bytes: 256 * 1024 * 1024,
            cache_ttl: Duration::from_secs(600),
            broadcast_threshold: 10_000,
            condition_proportion_tolerance: 1e-6,
            names: TableNames::default(),
        }
    }
}

/// Names of the source tables and their key columns.
///
/// Defaults follow the FIADB schema. Callers backed by a different store can
/// remap any of these without touching the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableNames {
    pub plot: String,
    pub cond: String,
    pub tree: String,
    pub assignment: String,
    pub stratum: String,
    pub cols: ColumnNames,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            plot: "PLOT".into(),
            cond: "COND".into(),
            tree: "TREE".into(),
            assignment: "POP_PLOT_STRATUM_ASSGN".into(),
            stratum: "POP_STRATUM".into(),
            cols: ColumnNames::default(),
        }
    }
}

/// Key and attribute column names shared across the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnNames {
    /// Primary key column on every FIA table.
    pub cn: String,
    /// Plot foreign key on COND/TREE/assignment rows.
    pub plot_cn: String,
    /// Condition number within a plot.
    pub condid: String,
    /// Evaluation identifier on the population tables.
    pub evalid: String,
    /// Stratum foreign key on assignment rows.
    pub stratum_cn: String,
    /// Estimation unit foreign key on stratum rows.
    pub estn_unit_cn: String,
    /// Area represented per sampled point within a stratum.
    pub expns: String,
    /// Adjustment factors by tree basis.
    pub adj_factor_micr: String,
    pub adj_factor_subp: String,
    pub adj_factor_macr: String,
    /// Sampled-point count per stratum (n_h).
    pub p2pointcnt: String,
    /// Total-point count per stratum (N_h), used for the FPC.
    pub p1pointcnt: String,
    /// Tree diameter and the plot's macroplot breakpoint diameter.
    pub dia: String,
    pub macro_breakpoint_dia: String,
    /// Condition area proportion and its measurement basis.
    pub condprop_unadj: String,
    pub prop_basis: String,
    /// Condition land classification.
    pub cond_status_cd: String,
    /// Tree status and per-acre expansion weight.
    pub statuscd: String,
    pub tpa_unadj: String,
    /// Plot inventory year.
    pub invyr: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            cn: "CN".into(),
            plot_cn: "PLT_CN".into(),
            condid: "CONDID".into(),
            evalid: "EVALID".into(),
            stratum_cn: "STRATUM_CN".into(),
            estn_unit_cn: "ESTN_UNIT_CN".into(),
            expns: "EXPNS".into(),
            adj_factor_micr: "ADJ_FACTOR_MICR".into(),
            adj_factor_subp: "ADJ_FACTOR_SUBP".into(),
            adj_factor_macr: "ADJ_FACTOR_MACR".into(),
            p2pointcnt: "P2POINTCNT".into(),
            p1pointcnt: "P1POINTCNT".into(),
            dia: "DIA".into(),
            macro_breakpoint_dia: "MACRO_BREAKPOINT_DIA".into(),
            condprop_unadj: "CONDPROP_UNADJ".into(),
            prop_basis: "PROP_BASIS".into(),
            cond_status_cd: "COND_STATUS_CD".into(),
            statuscd: "STATUSCD".into(),
            tpa_unadj: "TPA_UNADJ".into(),
            invyr: "INVYR".into(),
        }
    }
}
