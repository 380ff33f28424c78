//! Cost-based join planning with FIA-specific heuristics.
//!
//! The planner owns per-table statistics and picks a join strategy per
//! executed join. Known multi-table patterns (plot+condition+tree and
//! assignment+stratum) use a fixed, pre-validated order instead of being
//! re-derived each time; re-deriving them under skewed statistics produced
//! pathological plans in practice.

pub mod cost;
pub mod stats;

use serde::{Deserialize, Serialize};

use crate::config::TableNames;
use stats::{StatsRegistry, TableStats};

/// Physical join strategies the executor implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinStrategy {
    Hash,
    Broadcast,
    SortMerge,
}

/// One side of a join as the planner sees it.
#[derive(Debug, Clone)]
pub struct JoinSide {
    /// Source table name when the side is a direct scan; derived
    /// intermediates have none and fall back to observed row counts.
    pub table: Option<String>,
    /// Row count, observed at collection time when available.
    pub rows: u64,
    /// Whether this side is already sorted on the join keys.
    pub sorted_on_keys: bool,
}

impl JoinSide {
    /// A derived intermediate with an observed row count.
    #[must_use]
    pub fn derived(rows: u64) -> Self {
        Self {
            table: None,
            rows,
            sorted_on_keys: false,
        }
    }
}

/// A chosen strategy together with its estimated cost, for logging and
/// plan inspection.
#[derive(Debug, Clone, Copy)]
pub struct JoinDecision {
    pub strategy: JoinStrategy,
    pub estimated_cost: f64,
}

/// Cost-based planner with fixed orders for known FIA join patterns.
#[derive(Debug)]
pub struct QueryPlanner {
    stats: StatsRegistry,
    broadcast_threshold: u64,
    /// Pre-validated join orders, each a sequence of table names.
    fixed_patterns: Vec<Vec<String>>,
}

impl QueryPlanner {
    #[must_use]
    pub fn new(names: &TableNames, broadcast_threshold: u64) -> Self {
        let fixed_patterns = vec![
            vec![names.tree.clone(), names.cond.clone(), names.plot.clone()],
            vec![names.assignment.clone(), names.stratum.clone()],
        ];
        Self {
            stats: StatsRegistry::new(),
            broadcast_threshold,
            fixed_patterns,
        }
    }

    /// Record a table's observed row count, replacing the prior's estimate
    /// while keeping its sort knowledge. Called by the executor after an
    /// unpredicated scan, where the count is exact.
    pub fn observe(&self, table: &str, rows: u64) {
        let mut stats = self.stats.stats_for(table);
        stats.rows = rows;
        self.stats.register(table, stats);
    }

    #[must_use]
    pub fn stats_for(&self, table: &str) -> TableStats {
        self.stats.stats_for(table)
    }

    /// Fixed, pre-validated join order for a known table set, if any.
    ///
    /// Returns the canonical sequence when `tables` is exactly one of the
    /// known patterns (in any order).
    #[must_use]
    pub fn fixed_join_order(&self, tables: &[String]) -> Option<&[String]> {
        self.fixed_patterns
            .iter()
            .find(|pattern| {
                pattern.len() == tables.len()
                    && pattern.iter().all(|t| tables.contains(t))
            })
            .map(Vec::as_slice)
    }

    /// Pick a strategy for joining `left` and `right`.
    ///
    /// Broadcast when the smaller side is under the threshold or is a known
    /// reference table; sort-merge when both sides are pre-sorted on the
    /// join keys; hash otherwise.
    #[must_use]
    pub fn choose_strategy(&self, left: &JoinSide, right: &JoinSide) -> JoinDecision {
        let small_rows = left.rows.min(right.rows);
        let small_side = if left.rows <= right.rows { left } else { right };

        let small_is_reference = small_side
            .table
            .as_deref()
            .is_some_and(|t| self.stats.is_reference_table(t));

        if small_rows <= self.broadcast_threshold || small_is_reference {
            return JoinDecision {
                strategy: JoinStrategy::Broadcast,
                estimated_cost: cost::broadcast_cost(left.rows, right.rows),
            };
        }
        if left.sorted_on_keys && right.sorted_on_keys {
            return JoinDecision {
                strategy: JoinStrategy::SortMerge,
                estimated_cost: cost::sort_merge_cost(left.rows, right.rows, true, true),
            };
        }
        JoinDecision {
            strategy: JoinStrategy::Hash,
            estimated_cost: cost::hash_cost(left.rows, right.rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> QueryPlanner {
        QueryPlanner::new(&TableNames::default(), 10_000)
    }

    fn side(rows: u64, sorted: bool) -> JoinSide {
        JoinSide {
            table: None,
            rows,
            sorted_on_keys: sorted,
        }
    }

    #[test]
    fn broadcast_below_threshold() {
        let d = planner().choose_strategy(&side(5_000, false), &side(4_000_000, false));
        assert_eq!(d.strategy, JoinStrategy::Broadcast);
    }

    #[test]
    fn reference_tables_broadcast_regardless_of_rows() {
        let left = JoinSide {
            table: Some("POP_ESTN_UNIT".into()),
            rows: 50_000,
            sorted_on_keys: false,
        };
        let d = planner().choose_strategy(&left, &side(4_000_000, false));
        assert_eq!(d.strategy, JoinStrategy::Broadcast);
    }

    #[test]
    fn sort_merge_when_both_sides_presorted() {
        let d = planner().choose_strategy(&side(500_000, true), &side(600_000, true));
        assert_eq!(d.strategy, JoinStrategy::SortMerge);
    }

    #[test]
    fn hash_otherwise() {
        let d = planner().choose_strategy(&side(500_000, false), &side(600_000, true));
        assert_eq!(d.strategy, JoinStrategy::Hash);
    }

    #[test]
    fn observed_row_counts_override_priors_but_keep_sort_knowledge() {
        let p = planner();
        assert_eq!(p.stats_for("PLOT").rows, 120_000);
        p.observe("PLOT", 42);
        let stats = p.stats_for("PLOT");
        assert_eq!(stats.rows, 42);
        assert!(stats.is_sorted_on(&["CN".to_string()]));
    }

    #[test]
    fn fixed_order_for_tree_cond_plot_in_any_order() {
        let p = planner();
        let tables = vec!["PLOT".to_string(), "TREE".to_string(), "COND".to_string()];
        let order = p.fixed_join_order(&tables).unwrap();
        assert_eq!(order, ["TREE", "COND", "PLOT"]);
        assert!(p.fixed_join_order(&["TREE".to_string()]).is_none());
    }
}
