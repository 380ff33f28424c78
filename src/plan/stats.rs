//! Per-table statistics backing join planning.
//!
//! Statistics are either observed (registered by a caller or recorded from a
//! completed scan) or drawn from built-in priors for the well-known FIA
//! table names. Priors are order-of-magnitude figures for a single-state
//! extract; they only need to rank table sizes correctly.

use rustc_hash::FxHashMap;
use std::sync::RwLock;

/// Statistics for one named table.
#[derive(Debug, Clone)]
pub struct TableStats {
    /// Estimated (or observed) row count.
    pub rows: u64,
    /// Estimated distinct values of the table's primary join key.
    pub distinct_keys: u64,
    /// Columns the table is known to be sorted on, outermost first.
    pub sorted_by: Vec<String>,
}

impl TableStats {
    #[must_use]
    pub fn new(rows: u64, distinct_keys: u64) -> Self {
        Self {
            rows,
            distinct_keys,
            sorted_by: Vec::new(),
        }
    }

    #[must_use]
    pub fn sorted_on(mut self, columns: &[&str]) -> Self {
        self.sorted_by = columns.iter().map(ToString::to_string).collect();
        self
    }

    /// True when the table is sorted on a prefix covering `keys`.
    #[must_use]
    pub fn is_sorted_on(&self, keys: &[String]) -> bool {
        keys.len() <= self.sorted_by.len() && self.sorted_by[..keys.len()] == keys[..]
    }
}

/// Registry of observed statistics with built-in priors.
///
/// Observations arrive from concurrent collections, so the map sits behind
/// a read-write lock.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    observed: RwLock<FxHashMap<String, TableStats>>,
}

impl StatsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record observed statistics for a table, overriding any prior.
    pub fn register(&self, table: impl Into<String>, stats: TableStats) {
        self.observed
            .write()
            .expect("stats registry poisoned")
            .insert(table.into(), stats);
    }

    /// Statistics for `table`: observed if registered, else a built-in
    /// prior, else a conservative default that keeps hash join selected.
    #[must_use]
    pub fn stats_for(&self, table: &str) -> TableStats {
        if let Some(stats) = self
            .observed
            .read()
            .expect("stats registry poisoned")
            .get(table)
        {
            return stats.clone();
        }
        builtin_prior(table).unwrap_or_else(|| TableStats::new(1_000_000, 100_000))
    }

    /// True when a prior or observation marks this a small reference table.
    #[must_use]
    pub fn is_reference_table(&self, table: &str) -> bool {
        REFERENCE_TABLES.contains(&table)
    }
}

/// Known small reference tables, always broadcast.
pub const REFERENCE_TABLES: &[&str] = &[
    "REF_SPECIES",
    "REF_FOREST_TYPE",
    "REF_HABTYP_DESCRIPTION",
    "POP_ESTN_UNIT",
    "POP_EVAL",
];

fn builtin_prior(table: &str) -> Option<TableStats> {
    let stats = match table {
        "PLOT" => TableStats::new(120_000, 120_000).sorted_on(&["CN"]),
        "COND" => TableStats::new(180_000, 120_000).sorted_on(&["PLT_CN", "CONDID"]),
        "TREE" => TableStats::new(5_000_000, 120_000).sorted_on(&["PLT_CN", "CONDID"]),
        "TREE_GRM_COMPONENT" => TableStats::new(2_000_000, 2_000_000),
        "POP_PLOT_STRATUM_ASSGN" => TableStats::new(150_000, 120_000),
        "POP_STRATUM" => TableStats::new(6_000, 6_000),
        "POP_ESTN_UNIT" => TableStats::new(500, 500),
        "POP_EVAL" => TableStats::new(300, 300),
        "REF_SPECIES" => TableStats::new(2_500, 2_500),
        "REF_FOREST_TYPE" => TableStats::new(1_000, 1_000),
        _ => return None,
    };
    Some(stats)
}
