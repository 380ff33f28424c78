//! The estimation workflow.
//!
//! One fixed step order per request: validate, build lazy scans, collect
//! the filtered inputs (collection point 1), run the fixed-order joins and
//! the module's value calculation, basis-adjust and aggregate in two stages,
//! join stratification (collection point 2), estimate the population, and
//! assemble the output batch (collection point 3).

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EstimatorConfig;
use crate::error::{EstimatorError, Result};
use crate::filter::expr::filter_record_batch;
use crate::filter::{CmpOp, DomainExpr, Literal};
use crate::join::cache::JoinCache;
use crate::join::JoinKind;
use crate::model::{decode_strata, Stratum};
use crate::plan::QueryPlanner;
use crate::table::group::sum_by;
use crate::table::key::{composite_keys, key_column, CompositeKey, KeyValue};
use crate::table::lazy::{ExecContext, LazyTable, RequestCounters};
use crate::table::source::TableSource;
use crate::table::{column_as_f64, f64_at};

use super::modules::{EstimationModule, ResponseLevel, ResponseSpec};
use super::population::{assemble_moments, estimate_response, GroupMoments, ResponseEstimate};
use super::request::{EstimationRequest, ValidatedRequest};
use super::{aggregate, stratify};

/// Which input table a grouping column lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupTable {
    Cond,
    Plot,
    Tree,
}

#[derive(Debug, Clone)]
struct GroupColumn {
    name: String,
    table: GroupTable,
    data_type: DataType,
}

/// Runs estimation requests against a table source.
///
/// Owns the query planner and the injected join cache; both are shared by
/// every request served through this instance.
pub struct Estimator<S> {
    source: S,
    config: EstimatorConfig,
    planner: QueryPlanner,
    cache: JoinCache,
}

impl<S: TableSource> Estimator<S> {
    #[must_use]
    pub fn new(source: S) -> Self {
        Self::with_config(source, EstimatorConfig::default())
    }

    #[must_use]
    pub fn with_config(source: S, config: EstimatorConfig) -> Self {
        let planner = QueryPlanner::new(&config.names, config.broadcast_threshold);
        let cache = JoinCache::new(
            config.cache_max_entries,
            config.cache_max_bytes,
            config.cache_ttl,
        );
        Self {
            source,
            config,
            planner,
            cache,
        }
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[must_use]
    pub fn cache(&self) -> &JoinCache {
        &self.cache
    }

    /// Run one estimation request, producing the flat result table.
    pub fn estimate(&self, request: &EstimationRequest) -> Result<RecordBatch> {
        let validated = request.validate()?;
        let module = request.estimation_type.module();
        let group_columns = self.classify_group_columns(request, module.as_ref())?;
        let responses = module.responses();

        let counters = RequestCounters::default();
        let ctx = ExecContext {
            source: &self.source,
            planner: &self.planner,
            cache: &self.cache,
            counters: &counters,
        };
        let result = self.run(&validated, module.as_ref(), &responses, &group_columns, &ctx);
        counters.log_summary();
        result
    }

    fn run(
        &self,
        validated: &ValidatedRequest,
        module: &dyn EstimationModule,
        responses: &[ResponseSpec],
        group_columns: &[GroupColumn],
        ctx: &ExecContext<'_>,
    ) -> Result<RecordBatch> {
        let request = &validated.request;
        let names = &self.config.names;
        let cols = &names.cols;
        let resp_cols: Vec<String> = responses.iter().map(ResponseSpec::column).collect();
        let group_by: Vec<String> = group_columns.iter().map(|g| g.name.clone()).collect();
        let cond_positions: Vec<usize> = group_columns
            .iter()
            .enumerate()
            .filter(|(_, g)| g.table != GroupTable::Tree)
            .map(|(i, _)| i)
            .collect();
        let cond_group_cols: Vec<String> = cond_positions
            .iter()
            .map(|&i| group_by[i].clone())
            .collect();

        // Assignment and stratum tables, pinned to one evaluation.
        let (assign_batch, evalid) = self.collect_assignments(request, ctx)?;
        let assignments = stratify::validate_assignments(&assign_batch, cols)?;
        let strata = self.collect_strata(evalid, ctx)?;

        // Filtered base tables (collection point 1).
        let plot_table = self.plot_scan(validated, group_columns)?;
        let cond_table = self.cond_scan(validated, module, group_columns)?;
        let tree_table = if module.level() == ResponseLevel::Tree {
            Some(self.tree_scan(validated, module, group_columns)?)
        } else {
            None
        };
        let (tree_res, (cond_res, plot_res)) = rayon::join(
            || tree_table.as_ref().map(|t| t.collect(ctx)).transpose(),
            || rayon::join(|| cond_table.collect(ctx), || plot_table.collect(ctx)),
        );
        let tree_batch = tree_res?;
        let cond_batch = cond_res?;
        let plot_batch = plot_res?;

        if plot_batch.num_rows() == 0 {
            return self.empty_result(request, responses, group_columns, "plot filters removed all rows");
        }
        if cond_batch.num_rows() == 0 {
            return self.empty_result(
                request,
                responses,
                group_columns,
                "condition filters removed all rows",
            );
        }
        if let Some(trees) = &tree_batch {
            if trees.num_rows() == 0 {
                return self.empty_result(
                    request,
                    responses,
                    group_columns,
                    "tree filters removed all rows",
                );
            }
        }

        stratify::validate_condition_proportions(
            &cond_batch,
            cols,
            self.config.condition_proportion_tolerance,
        )?;
        stratify::check_plot_coverage(key_column(&cond_batch, &cols.plot_cn)?, &assignments)?;

        let assign_lazy = LazyTable::from_batch_named(assign_batch, names.assignment.as_str());
        let plot_lazy = LazyTable::from_batch_named(plot_batch.clone(), names.plot.as_str());

        // Denominator: every condition of the land classification, joined to
        // its plot and stratum, with the area proportion basis-adjusted.
        let den_rows = LazyTable::from_batch_named(cond_batch.clone(), names.cond.as_str())
            .join(
                plot_lazy.clone(),
                vec![(cols.plot_cn.clone(), cols.cn.clone())],
                JoinKind::Inner,
            )
            .join(
                assign_lazy.clone(),
                vec![(cols.plot_cn.clone(), cols.plot_cn.clone())],
                JoinKind::Inner,
            )
            .collect(ctx)?;
        if den_rows.num_rows() == 0 {
            return self.empty_result(
                request,
                responses,
                group_columns,
                "no conditions matched the evaluation",
            );
        }
        let den_rows = stratify::adjust_condition_responses(
            &den_rows,
            cols,
            &strata,
            std::slice::from_ref(&cols.condprop_unadj),
        )?;
        let mut den_keys = vec![cols.plot_cn.clone()];
        den_keys.extend(cond_group_cols.iter().cloned());
        let den_plots = sum_by(
            &den_rows,
            &den_keys,
            std::slice::from_ref(&cols.condprop_unadj),
            None,
        )?;
        let den_map = Self::denominator_map(&den_plots, cols, &cond_group_cols)?;

        // Numerator: fixed-order joins, module hook, stratification join
        // (collection point 2).
        let numerator = match module.level() {
            ResponseLevel::Tree => {
                let trees = tree_batch.as_ref().ok_or_else(|| {
                    EstimatorError::computation("tree-level module with no tree rows")
                })?;
                self.joined_tree_rows(trees.clone(), &cond_batch, plot_lazy.clone(), module)?
            }
            ResponseLevel::Condition => {
                LazyTable::from_batch_named(cond_batch.clone(), names.cond.as_str())
                    .filter_opt(validated.area_domain.clone())
                    .join(
                        plot_lazy,
                        vec![(cols.plot_cn.clone(), cols.cn.clone())],
                        JoinKind::Inner,
                    )
            }
        };
        let num_rows = numerator
            .join(
                assign_lazy,
                vec![(cols.plot_cn.clone(), cols.plot_cn.clone())],
                JoinKind::Inner,
            )
            .collect(ctx)?;
        if num_rows.num_rows() == 0 {
            return self.empty_result(
                request,
                responses,
                group_columns,
                "domain filters removed all rows",
            );
        }

        let calculated = module.calculate_values(&num_rows, cols)?;
        for col in &resp_cols {
            if calculated.column_by_name(col).is_none() {
                return Err(EstimatorError::computation(format!(
                    "module '{}' did not produce response column '{col}'",
                    module.name()
                )));
            }
        }

        let adjusted = match module.level() {
            ResponseLevel::Tree => {
                stratify::adjust_tree_responses(&calculated, cols, &strata, &resp_cols)?
            }
            ResponseLevel::Condition => {
                stratify::adjust_condition_responses(&calculated, cols, &strata, &resp_cols)?
            }
        };

        let counts = Self::group_counts(&adjusted, &group_by)?;
        let plot_level = aggregate::two_stage(
            &adjusted,
            &cols.plot_cn,
            &cols.condid,
            &group_by,
            &resp_cols,
        )?;
        let num_map = Self::numerator_map(&plot_level, cols, &group_by, &resp_cols)?;

        let groups = assemble_moments(
            &den_map,
            &num_map,
            &cond_positions,
            responses.len(),
            &assignments,
            &strata,
        )?;
        let estimates: Vec<Vec<ResponseEstimate>> = groups
            .iter()
            .map(|g| {
                (0..responses.len())
                    .map(|r| estimate_response(&g.strata, r, request.fpc))
                    .collect::<Result<_>>()
            })
            .collect::<Result<_>>()?;

        let year = Self::max_year(&plot_batch, &cols.invyr)?;
        self.build_output(
            request,
            responses,
            group_columns,
            &groups,
            &estimates,
            &counts,
            year,
        )
    }

    /// Tree rows joined to conditions and plots in the planner's canonical
    /// order, then the module's auxiliary join and filter.
    fn joined_tree_rows(
        &self,
        tree_batch: RecordBatch,
        cond_batch: &RecordBatch,
        plot_lazy: LazyTable,
        module: &dyn EstimationModule,
    ) -> Result<LazyTable> {
        let names = &self.config.names;
        let cols = &names.cols;
        let tables = vec![names.tree.clone(), names.cond.clone(), names.plot.clone()];
        let order: Vec<String> = self
            .planner
            .fixed_join_order(&tables)
            .map_or(tables.clone(), <[String]>::to_vec);

        let mut sources: FxHashMap<String, LazyTable> = FxHashMap::default();
        sources.insert(
            names.tree.clone(),
            LazyTable::from_batch_named(tree_batch, names.tree.as_str()),
        );
        sources.insert(
            names.cond.clone(),
            LazyTable::from_batch_named(cond_batch.clone(), names.cond.as_str()),
        );
        sources.insert(names.plot.clone(), plot_lazy);

        let mut joined = sources.remove(&order[0]).ok_or_else(|| {
            EstimatorError::computation(format!("unknown table '{}' in join order", order[0]))
        })?;
        for name in &order[1..] {
            let next = sources.remove(name).ok_or_else(|| {
                EstimatorError::computation(format!("unknown table '{name}' in join order"))
            })?;
            let keys = if *name == names.plot {
                vec![(cols.plot_cn.clone(), cols.cn.clone())]
            } else {
                vec![
                    (cols.plot_cn.clone(), cols.plot_cn.clone()),
                    (cols.condid.clone(), cols.condid.clone()),
                ]
            };
            joined = joined.join(next, keys, JoinKind::Inner);
        }

        if let Some(aux) = module.aux_join(cols) {
            let mut projection: Vec<String> =
                aux.keys.iter().map(|(_, right)| right.clone()).collect();
            projection.extend(aux.columns.iter().cloned());
            joined = joined.join(
                LazyTable::scan_with(aux.table.as_str(), dedupe(projection)),
                aux.keys,
                JoinKind::Inner,
            );
        }
        Ok(joined.filter_opt(module.module_filter(cols)))
    }

    /// Resolve the evaluation and collect its assignment rows.
    fn collect_assignments(
        &self,
        request: &EstimationRequest,
        ctx: &ExecContext<'_>,
    ) -> Result<(RecordBatch, Option<i64>)> {
        let names = &self.config.names;
        let cols = &names.cols;
        let schema = self.source.schema(&names.assignment)?;
        let has_evalid = schema.index_of(&cols.evalid).is_ok();

        let mut projection = vec![cols.plot_cn.clone(), cols.stratum_cn.clone()];
        if has_evalid {
            projection.push(cols.evalid.clone());
        }
        let mut scan = LazyTable::scan_with(names.assignment.as_str(), projection);
        if let Some(evalid) = request.evalid {
            if !has_evalid {
                return Err(EstimatorError::validation(format!(
                    "assignment table '{}' has no '{}' column",
                    names.assignment, cols.evalid
                )));
            }
            scan = scan.filter(DomainExpr::Cmp {
                column: cols.evalid.clone(),
                op: CmpOp::Eq,
                value: Literal::Int(evalid),
            });
        }
        let mut batch = scan.collect(ctx)?;

        let mut chosen = request.evalid;
        if chosen.is_none() && request.most_recent && has_evalid && batch.num_rows() > 0 {
            // Most recent evaluation = the maximum EVALID present. Without
            // this flag or an explicit id the assignments pass through as
            // stored; mixed panels then fail the one-stratum-per-plot check.
            let evalids = column_as_f64(&batch, &cols.evalid)?;
            let max = (0..batch.num_rows())
                .filter_map(|row| f64_at(&evalids, row))
                .fold(f64::NEG_INFINITY, f64::max);
            if max.is_finite() {
                let expr = DomainExpr::Cmp {
                    column: cols.evalid.clone(),
                    op: CmpOp::Eq,
                    value: Literal::Float(max),
                };
                batch = filter_record_batch(&batch, &expr.evaluate(&batch)?)?;
                chosen = Some(max as i64);
            }
        }
        log::debug!(
            "evaluation {:?}: {} assignment rows",
            chosen,
            batch.num_rows()
        );
        Ok((batch, chosen))
    }

    fn collect_strata(
        &self,
        evalid: Option<i64>,
        ctx: &ExecContext<'_>,
    ) -> Result<FxHashMap<KeyValue, Stratum>> {
        let names = &self.config.names;
        let cols = &names.cols;
        let schema = self.source.schema(&names.stratum)?;
        let mut scan = LazyTable::scan(names.stratum.as_str());
        if let (Some(evalid), Ok(_)) = (evalid, schema.index_of(&cols.evalid)) {
            scan = scan.filter(DomainExpr::Cmp {
                column: cols.evalid.clone(),
                op: CmpOp::Eq,
                value: Literal::Int(evalid),
            });
        }
        let batch = scan.collect(ctx)?;
        decode_strata(&batch, cols)
    }

    fn plot_scan(
        &self,
        validated: &ValidatedRequest,
        group_columns: &[GroupColumn],
    ) -> Result<LazyTable> {
        let names = &self.config.names;
        let cols = &names.cols;
        let mut projection = vec![
            cols.cn.clone(),
            cols.macro_breakpoint_dia.clone(),
            cols.invyr.clone(),
        ];
        for g in group_columns {
            if g.table == GroupTable::Plot {
                projection.push(g.name.clone());
            }
        }
        if let Some(expr) = &validated.plot_domain {
            projection.extend(expr.required_columns());
        }
        Ok(LazyTable::scan_with(names.plot.as_str(), dedupe(projection))
            .filter_opt(validated.plot_domain.clone()))
    }

    /// Condition scan shared by numerator and denominator. Tree-level
    /// modules restrict both sides by the area domain; the area module keeps
    /// the denominator at the land classification only and filters the
    /// numerator later.
    fn cond_scan(
        &self,
        validated: &ValidatedRequest,
        module: &dyn EstimationModule,
        group_columns: &[GroupColumn],
    ) -> Result<LazyTable> {
        let names = &self.config.names;
        let cols = &names.cols;
        let request = &validated.request;
        let mut projection = vec![
            cols.plot_cn.clone(),
            cols.condid.clone(),
            cols.condprop_unadj.clone(),
            cols.prop_basis.clone(),
            cols.cond_status_cd.clone(),
        ];
        for extra in request.land_type.extra_columns() {
            projection.push((*extra).to_string());
        }
        for g in group_columns {
            if g.table == GroupTable::Cond {
                projection.push(g.name.clone());
            }
        }
        if let Some(expr) = &validated.area_domain {
            projection.extend(expr.required_columns());
        }

        let mut filter = request.land_type.condition_filter(cols);
        if module.level() == ResponseLevel::Tree {
            filter = DomainExpr::and_opt(filter, validated.area_domain.clone());
        }
        let mut table = LazyTable::scan_with(names.cond.as_str(), dedupe(projection));
        if let Some(expr) = filter {
            table = table.filter(expr);
        }
        Ok(table)
    }

    fn tree_scan(
        &self,
        validated: &ValidatedRequest,
        module: &dyn EstimationModule,
        group_columns: &[GroupColumn],
    ) -> Result<LazyTable> {
        let names = &self.config.names;
        let cols = &names.cols;
        let request = &validated.request;
        let mut projection = vec![
            cols.cn.clone(),
            cols.plot_cn.clone(),
            cols.condid.clone(),
            cols.statuscd.clone(),
            cols.tpa_unadj.clone(),
            cols.dia.clone(),
        ];
        for extra in request.tree_type.extra_columns() {
            projection.push((*extra).to_string());
        }
        projection.extend(module.tree_columns(cols));
        for g in group_columns {
            if g.table == GroupTable::Tree {
                projection.push(g.name.clone());
            }
        }
        if let Some(expr) = &validated.tree_domain {
            projection.extend(expr.required_columns());
        }

        let filter = DomainExpr::and_opt(
            request.tree_type.tree_filter(cols),
            validated.tree_domain.clone(),
        );
        let mut table = LazyTable::scan_with(names.tree.as_str(), dedupe(projection));
        if let Some(expr) = filter {
            table = table.filter(expr);
        }
        Ok(table)
    }

    /// Resolve each grouping column to the table it lives on. Raised before
    /// any scan; schema lookups do not read rows.
    fn classify_group_columns(
        &self,
        request: &EstimationRequest,
        module: &dyn EstimationModule,
    ) -> Result<Vec<GroupColumn>> {
        let names = &self.config.names;
        let field_type = |table: &str, col: &str| -> Result<Option<DataType>> {
            let schema = self.source.schema(table)?;
            Ok(schema
                .index_of(col)
                .ok()
                .map(|i| schema.field(i).data_type().clone()))
        };

        let mut out = Vec::with_capacity(request.group_by.len());
        for name in &request.group_by {
            let column = if let Some(dt) = field_type(&names.cond, name)? {
                GroupColumn {
                    name: name.clone(),
                    table: GroupTable::Cond,
                    data_type: dt,
                }
            } else if let Some(dt) = field_type(&names.plot, name)? {
                GroupColumn {
                    name: name.clone(),
                    table: GroupTable::Plot,
                    data_type: dt,
                }
            } else if module.level() == ResponseLevel::Tree {
                match field_type(&names.tree, name)? {
                    Some(dt) => GroupColumn {
                        name: name.clone(),
                        table: GroupTable::Tree,
                        data_type: dt,
                    },
                    None => {
                        return Err(EstimatorError::validation(format!(
                            "invalid grouping column '{name}': not found on {}, {} or {}",
                            names.tree, names.cond, names.plot
                        )))
                    }
                }
            } else {
                return Err(EstimatorError::validation(format!(
                    "invalid grouping column '{name}': not found on {} or {}",
                    names.cond, names.plot
                )));
            };
            out.push(column);
        }
        Ok(out)
    }

    fn denominator_map(
        den_plots: &RecordBatch,
        cols: &crate::config::ColumnNames,
        cond_group_cols: &[String],
    ) -> Result<FxHashMap<CompositeKey, FxHashMap<KeyValue, f64>>> {
        let plots = key_column(den_plots, &cols.plot_cn)?;
        let parts = composite_keys(den_plots, cond_group_cols)?;
        let areas = column_as_f64(den_plots, &cols.condprop_unadj)?;
        let mut map: FxHashMap<CompositeKey, FxHashMap<KeyValue, f64>> = FxHashMap::default();
        for row in 0..den_plots.num_rows() {
            map.entry(parts[row].clone())
                .or_default()
                .insert(plots[row].clone(), f64_at(&areas, row).unwrap_or(0.0));
        }
        Ok(map)
    }

    fn numerator_map(
        plot_level: &RecordBatch,
        cols: &crate::config::ColumnNames,
        group_by: &[String],
        resp_cols: &[String],
    ) -> Result<FxHashMap<CompositeKey, FxHashMap<KeyValue, Vec<f64>>>> {
        let plots = key_column(plot_level, &cols.plot_cn)?;
        let groups = composite_keys(plot_level, group_by)?;
        let values: Vec<Float64Array> = resp_cols
            .iter()
            .map(|c| column_as_f64(plot_level, c))
            .collect::<Result<_>>()?;
        let mut map: FxHashMap<CompositeKey, FxHashMap<KeyValue, Vec<f64>>> =
            FxHashMap::default();
        for row in 0..plot_level.num_rows() {
            let ys: Vec<f64> = values
                .iter()
                .map(|col| f64_at(col, row).unwrap_or(0.0))
                .collect();
            map.entry(groups[row].clone())
                .or_default()
                .insert(plots[row].clone(), ys);
        }
        Ok(map)
    }

    /// Contributing row counts per group (trees for tree-level modules,
    /// conditions for the area module).
    fn group_counts(
        batch: &RecordBatch,
        group_by: &[String],
    ) -> Result<FxHashMap<CompositeKey, i64>> {
        let keys = composite_keys(batch, group_by)?;
        let mut map: FxHashMap<CompositeKey, i64> = FxHashMap::default();
        for key in keys {
            *map.entry(key).or_insert(0) += 1;
        }
        Ok(map)
    }

    fn max_year(plot_batch: &RecordBatch, invyr: &str) -> Result<i64> {
        let years = column_as_f64(plot_batch, invyr)?;
        let max = (0..plot_batch.num_rows())
            .filter_map(|row| f64_at(&years, row))
            .fold(f64::NEG_INFINITY, f64::max);
        Ok(if max.is_finite() { max as i64 } else { 0 })
    }

    fn output_fields(
        request: &EstimationRequest,
        responses: &[ResponseSpec],
        group_columns: &[GroupColumn],
    ) -> Vec<Field> {
        let mut fields: Vec<Field> = group_columns
            .iter()
            .map(|g| Field::new(&g.name, canonical_type(&g.data_type), true))
            .collect();
        for spec in responses {
            let m = spec.metric;
            fields.push(Field::new(format!("{m}_ACRE"), DataType::Float64, false));
            if request.variance {
                fields.push(Field::new(format!("{m}_VAR"), DataType::Float64, false));
            } else {
                fields.push(Field::new(format!("{m}_SE"), DataType::Float64, false));
            }
            fields.push(Field::new(format!("{m}_CV"), DataType::Float64, false));
            if request.totals {
                fields.push(Field::new(format!("{m}_TOTAL"), DataType::Float64, false));
                if request.variance {
                    fields.push(Field::new(
                        format!("{m}_TOTAL_VAR"),
                        DataType::Float64,
                        false,
                    ));
                } else {
                    fields.push(Field::new(
                        format!("{m}_TOTAL_SE"),
                        DataType::Float64,
                        false,
                    ));
                }
            }
            if request.critical_value.is_some() {
                fields.push(Field::new(format!("{m}_ACRE_LO"), DataType::Float64, false));
                fields.push(Field::new(format!("{m}_ACRE_HI"), DataType::Float64, false));
            }
        }
        fields.push(Field::new("N_PLOTS", DataType::Int64, false));
        fields.push(Field::new("N_TREES", DataType::Int64, false));
        fields.push(Field::new("YEAR", DataType::Int64, false));
        fields
    }

    /// Zero-row result carrying the reason in the schema metadata.
    fn empty_result(
        &self,
        request: &EstimationRequest,
        responses: &[ResponseSpec],
        group_columns: &[GroupColumn],
        reason: &str,
    ) -> Result<RecordBatch> {
        log::warn!("empty result for {:?}: {reason}", request.estimation_type);
        let fields = Self::output_fields(request, responses, group_columns);
        let metadata: HashMap<String, String> =
            [("empty_reason".to_string(), reason.to_string())].into();
        let schema = Arc::new(Schema::new_with_metadata(fields, metadata));
        Ok(RecordBatch::new_empty(schema))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_output(
        &self,
        request: &EstimationRequest,
        responses: &[ResponseSpec],
        group_columns: &[GroupColumn],
        groups: &[GroupMoments],
        estimates: &[Vec<ResponseEstimate>],
        counts: &FxHashMap<CompositeKey, i64>,
        year: i64,
    ) -> Result<RecordBatch> {
        if groups.is_empty() {
            return self.empty_result(
                request,
                responses,
                group_columns,
                "no plots contributed to the estimate",
            );
        }

        let fields = Self::output_fields(request, responses, group_columns);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());

        for (i, g) in group_columns.iter().enumerate() {
            columns.push(group_key_array(groups, i, &canonical_type(&g.data_type)));
        }

        let f64_col = |f: &dyn Fn(&ResponseEstimate) -> f64, r: usize| -> ArrayRef {
            Arc::new(Float64Array::from(
                estimates.iter().map(|e| f(&e[r])).collect::<Vec<f64>>(),
            ))
        };
        for (r, _) in responses.iter().enumerate() {
            columns.push(f64_col(&|e| e.acre, r));
            if request.variance {
                columns.push(f64_col(&|e| e.acre_var, r));
            } else {
                columns.push(f64_col(&ResponseEstimate::acre_se, r));
            }
            columns.push(f64_col(&ResponseEstimate::cv, r));
            if request.totals {
                columns.push(f64_col(&|e| e.total, r));
                if request.variance {
                    columns.push(f64_col(&|e| e.total_var, r));
                } else {
                    columns.push(f64_col(&ResponseEstimate::total_se, r));
                }
            }
            if let Some(critical) = request.critical_value {
                columns.push(f64_col(&|e| e.acre - critical * e.acre_se(), r));
                columns.push(f64_col(&|e| e.acre + critical * e.acre_se(), r));
            }
        }

        columns.push(Arc::new(Int64Array::from(
            groups
                .iter()
                .map(|g| g.n_plots as i64)
                .collect::<Vec<i64>>(),
        )));
        columns.push(Arc::new(Int64Array::from(
            groups
                .iter()
                .map(|g| counts.get(&g.group).copied().unwrap_or(0))
                .collect::<Vec<i64>>(),
        )));
        columns.push(Arc::new(Int64Array::from(vec![year; groups.len()])));

        Ok(RecordBatch::try_new(
            Arc::new(Schema::new(fields)),
            columns,
        )?)
    }
}

fn dedupe(columns: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    columns.into_iter().filter(|c| seen.insert(c.clone())).collect()
}

/// Output representation for a grouping column's Arrow type.
fn canonical_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Utf8 | DataType::LargeUtf8 => DataType::Utf8,
        DataType::Float16 | DataType::Float32 | DataType::Float64 => DataType::Float64,
        _ => DataType::Int64,
    }
}

fn group_key_array(groups: &[GroupMoments], index: usize, data_type: &DataType) -> ArrayRef {
    match data_type {
        DataType::Utf8 => Arc::new(StringArray::from(
            groups
                .iter()
                .map(|g| match &g.group[index] {
                    KeyValue::Str(s) => Some(s.clone()),
                    _ => None,
                })
                .collect::<Vec<Option<String>>>(),
        )),
        DataType::Float64 => Arc::new(Float64Array::from(
            groups
                .iter()
                .map(|g| g.group[index].to_f64())
                .collect::<Vec<Option<f64>>>(),
        )),
        _ => Arc::new(Int64Array::from(
            groups
                .iter()
                .map(|g| match g.group[index] {
                    KeyValue::Int(v) => Some(v),
                    _ => None,
                })
                .collect::<Vec<Option<i64>>>(),
        )),
    }
}
