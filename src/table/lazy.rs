//! Deferred table operations.
//!
//! A request is expressed as a DAG of lazy nodes that materializes only at
//! designated collection points (post-filter, post-stratification join,
//! final output). The placement of those points is the design decision that
//! matters; the node representation itself is a plain enum.
//!
//! Before execution the DAG goes through a push-down pass: filters merge
//! into scans, and a predicate moves below a join only when every column it
//! references belongs exclusively to one side.

use arrow::record_batch::RecordBatch;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::filter::expr::filter_record_batch;
use crate::filter::DomainExpr;
use crate::join::cache::{cache_key, JoinCache};
use crate::join::{execute_join, JoinKind};
use crate::plan::{JoinSide, QueryPlanner};
use crate::table::source::TableSource;

/// Per-request performance counters. Request-scoped; atomics because
/// independent graphs may be collected concurrently.
#[derive(Debug, Default)]
pub struct RequestCounters {
    pub scans: AtomicUsize,
    pub cache_hits: AtomicUsize,
    pub cache_misses: AtomicUsize,
    pub joins: AtomicUsize,
    pub rows_collected: AtomicUsize,
}

impl RequestCounters {
    pub fn log_summary(&self) {
        log::debug!(
            "request counters: scans={} joins={} cache_hits={} cache_misses={} rows_collected={}",
            self.scans.load(Ordering::Relaxed),
            self.joins.load(Ordering::Relaxed),
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
            self.rows_collected.load(Ordering::Relaxed),
        );
    }
}

/// Everything a collection needs: the table source, the planner, the shared
/// join cache and the request's counters.
pub struct ExecContext<'a> {
    pub source: &'a dyn TableSource,
    pub planner: &'a QueryPlanner,
    pub cache: &'a JoinCache,
    pub counters: &'a RequestCounters,
}

/// A deferred table computation.
#[derive(Debug, Clone)]
pub enum LazyNode {
    Scan {
        table: String,
        projection: Option<Vec<String>>,
        predicate: Option<DomainExpr>,
    },
    /// An already-materialized batch (the output of an earlier collection
    /// point). `table` names the originating scan when the rows still carry
    /// its order, so the planner can reuse sortedness and reference-table
    /// knowledge.
    Literal {
        batch: RecordBatch,
        table: Option<String>,
    },
    Filter {
        input: Box<LazyNode>,
        expr: DomainExpr,
    },
    Join {
        left: Box<LazyNode>,
        right: Box<LazyNode>,
        keys: Vec<(String, String)>,
        kind: JoinKind,
    },
}

/// Handle over a lazy node with a builder API.
#[derive(Debug, Clone)]
pub struct LazyTable {
    node: LazyNode,
}

impl LazyTable {
    /// Lazy scan of a named table.
    #[must_use]
    pub fn scan(table: impl Into<String>) -> Self {
        Self {
            node: LazyNode::Scan {
                table: table.into(),
                projection: None,
                predicate: None,
            },
        }
    }

    /// Lazy scan with column projection pushed to the source.
    #[must_use]
    pub fn scan_with(table: impl Into<String>, projection: Vec<String>) -> Self {
        Self {
            node: LazyNode::Scan {
                table: table.into(),
                projection: Some(projection),
                predicate: None,
            },
        }
    }

    /// Wrap an already-materialized batch.
    #[must_use]
    pub fn from_batch(batch: RecordBatch) -> Self {
        Self {
            node: LazyNode::Literal { batch, table: None },
        }
    }

    /// Wrap a materialized batch that still carries the row order of the
    /// named source table.
    #[must_use]
    pub fn from_batch_named(batch: RecordBatch, table: impl Into<String>) -> Self {
        Self {
            node: LazyNode::Literal {
                batch,
                table: Some(table.into()),
            },
        }
    }

    #[must_use]
    pub fn filter(self, expr: DomainExpr) -> Self {
        Self {
            node: LazyNode::Filter {
                input: Box::new(self.node),
                expr,
            },
        }
    }

    #[must_use]
    pub fn filter_opt(self, expr: Option<DomainExpr>) -> Self {
        match expr {
            Some(e) => self.filter(e),
            None => self,
        }
    }

    #[must_use]
    pub fn join(self, other: Self, keys: Vec<(String, String)>, kind: JoinKind) -> Self {
        Self {
            node: LazyNode::Join {
                left: Box::new(self.node),
                right: Box::new(other.node),
                keys,
                kind,
            },
        }
    }

    /// Materialize the graph: push filters down, then execute.
    pub fn collect(&self, ctx: &ExecContext<'_>) -> Result<RecordBatch> {
        let optimized = pushdown(self.node.clone(), ctx)?;
        let batch = execute(&optimized, ctx)?;
        ctx.counters
            .rows_collected
            .fetch_add(batch.num_rows(), Ordering::Relaxed);
        Ok(batch)
    }

    /// The underlying node, for plan inspection in tests.
    #[must_use]
    pub fn node(&self) -> &LazyNode {
        &self.node
    }
}

/// Columns a node produces, mirroring executor naming (right join keys
/// dropped, collisions suffixed `_R`).
fn output_columns(node: &LazyNode, ctx: &ExecContext<'_>) -> Result<Vec<String>> {
    match node {
        LazyNode::Scan {
            table, projection, ..
        } => match projection {
            Some(cols) => Ok(cols.clone()),
            None => Ok(ctx
                .source
                .schema(table)?
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect()),
        },
        LazyNode::Literal { batch, .. } => Ok(batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()),
        LazyNode::Filter { input, .. } => output_columns(input, ctx),
        LazyNode::Join {
            left, right, keys, ..
        } => {
            let left_cols = output_columns(left, ctx)?;
            let right_keys: Vec<&String> = keys.iter().map(|(_, r)| r).collect();
            let mut out = left_cols.clone();
            for col in output_columns(right, ctx)? {
                if right_keys.iter().any(|k| **k == col) {
                    continue;
                }
                if left_cols.contains(&col) {
                    out.push(format!("{col}_R"));
                } else {
                    out.push(col);
                }
            }
            Ok(out)
        }
    }
}

fn pushdown(node: LazyNode, ctx: &ExecContext<'_>) -> Result<LazyNode> {
    match node {
        LazyNode::Filter { input, expr } => match *input {
            LazyNode::Scan {
                table,
                projection,
                predicate,
            } => Ok(LazyNode::Scan {
                table,
                projection,
                predicate: Some(match predicate {
                    Some(p) => p.and(expr),
                    None => expr,
                }),
            }),
            literal @ LazyNode::Literal { .. } => Ok(LazyNode::Filter {
                input: Box::new(literal),
                expr,
            }),
            LazyNode::Filter {
                input: inner,
                expr: inner_expr,
            } => pushdown(
                LazyNode::Filter {
                    input: inner,
                    expr: inner_expr.and(expr),
                },
                ctx,
            ),
            LazyNode::Join {
                left,
                right,
                keys,
                kind,
            } => {
                let left_cols: HashSet<String> =
                    output_columns(&left, ctx)?.into_iter().collect();
                let right_cols: HashSet<String> =
                    output_columns(&right, ctx)?.into_iter().collect();

                let exclusive_left = expr.references_only(&left_cols)
                    && expr.required_columns().is_disjoint(&right_cols);
                let exclusive_right = expr.references_only(&right_cols)
                    && expr.required_columns().is_disjoint(&left_cols);

                if exclusive_left {
                    let pushed = pushdown(LazyNode::Filter { input: left, expr }, ctx)?;
                    let right = pushdown(*right, ctx)?;
                    Ok(LazyNode::Join {
                        left: Box::new(pushed),
                        right: Box::new(right),
                        keys,
                        kind,
                    })
                } else if exclusive_right && kind == JoinKind::Inner {
                    // Pushing into the right side of a left join would turn
                    // padded nulls into dropped rows.
                    let left = pushdown(*left, ctx)?;
                    let pushed = pushdown(LazyNode::Filter { input: right, expr }, ctx)?;
                    Ok(LazyNode::Join {
                        left: Box::new(left),
                        right: Box::new(pushed),
                        keys,
                        kind,
                    })
                } else {
                    let joined = pushdown(
                        LazyNode::Join {
                            left,
                            right,
                            keys,
                            kind,
                        },
                        ctx,
                    )?;
                    Ok(LazyNode::Filter {
                        input: Box::new(joined),
                        expr,
                    })
                }
            }
        },
        LazyNode::Join {
            left,
            right,
            keys,
            kind,
        } => Ok(LazyNode::Join {
            left: Box::new(pushdown(*left, ctx)?),
            right: Box::new(pushdown(*right, ctx)?),
            keys,
            kind,
        }),
        leaf @ (LazyNode::Scan { .. } | LazyNode::Literal { .. }) => Ok(leaf),
    }
}

/// Source table name when the node is a scan, looking through order-
/// preserving unary ops. Used for sortedness and reference-table checks.
fn scan_table(node: &LazyNode) -> Option<&str> {
    match node {
        LazyNode::Scan { table, .. } => Some(table),
        LazyNode::Literal { table, .. } => table.as_deref(),
        LazyNode::Filter { input, .. } => scan_table(input),
        LazyNode::Join { .. } => None,
    }
}

fn execute(node: &LazyNode, ctx: &ExecContext<'_>) -> Result<RecordBatch> {
    match node {
        LazyNode::Scan {
            table,
            projection,
            predicate,
        } => {
            ctx.counters.scans.fetch_add(1, Ordering::Relaxed);
            let batch = ctx
                .source
                .scan(table, projection.as_deref(), predicate.as_ref())?;
            log::debug!("scanned {table}: {} rows", batch.num_rows());
            if predicate.is_none() {
                // Unpredicated scans see every row, so the count is the
                // table's true cardinality.
                ctx.planner.observe(table, batch.num_rows() as u64);
            }
            Ok(batch)
        }
        LazyNode::Literal { batch, .. } => Ok(batch.clone()),
        LazyNode::Filter { input, expr } => {
            let batch = execute(input, ctx)?;
            filter_record_batch(&batch, &expr.evaluate(&batch)?)
        }
        LazyNode::Join {
            left,
            right,
            keys,
            kind,
        } => {
            let left_batch = execute(left, ctx)?;
            let right_batch = execute(right, ctx)?;

            let left_keys: Vec<String> = keys.iter().map(|(l, _)| l.clone()).collect();
            let right_keys: Vec<String> = keys.iter().map(|(_, r)| r.clone()).collect();
            let left_side = side_info(left, &left_batch, &left_keys, ctx);
            let right_side = side_info(right, &right_batch, &right_keys, ctx);
            let decision = ctx.planner.choose_strategy(&left_side, &right_side);
            log::debug!(
                "join on {keys:?}: {} x {} rows, strategy {:?} (cost {:.0})",
                left_batch.num_rows(),
                right_batch.num_rows(),
                decision.strategy,
                decision.estimated_cost
            );

            let key = cache_key(&left_batch, &right_batch, keys, *kind, decision.strategy)?;
            if let Some(hit) = ctx.cache.get(&key) {
                ctx.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit);
            }
            ctx.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

            let joined = execute_join(&left_batch, &right_batch, keys, *kind, decision.strategy)?;
            ctx.counters.joins.fetch_add(1, Ordering::Relaxed);
            ctx.cache.insert(key, joined.clone());
            Ok(joined)
        }
    }
}

fn side_info(
    node: &LazyNode,
    batch: &RecordBatch,
    keys: &[String],
    ctx: &ExecContext<'_>,
) -> JoinSide {
    let table = scan_table(node).map(ToString::to_string);
    let sorted_on_keys = table
        .as_deref()
        .is_some_and(|t| ctx.planner.stats_for(t).is_sorted_on(keys));
    JoinSide {
        table,
        rows: batch.num_rows() as u64,
        sorted_on_keys,
    }
}
