//! Filter push-down equivalence and scan accounting over the lazy DAG.

mod common;

use common::*;
use fia_estimator::join::cache::JoinCache;
use fia_estimator::join::JoinKind;
use fia_estimator::plan::QueryPlanner;
use fia_estimator::table::lazy::{ExecContext, LazyTable, RequestCounters};
use fia_estimator::{parse_domain, MemorySource, TableNames};
use std::time::Duration;

#[test]
fn filtering_before_or_after_a_join_is_equivalent() {
    let mut source = MemorySource::new();
    source.register(
        "TREE",
        batch(vec![
            ("PLT_CN", ints(vec![1, 1, 2, 3])),
            ("DIA", floats(vec![4.0, 11.0, 15.0, 9.0])),
        ]),
    );
    source.register(
        "POP_PLOT_STRATUM_ASSGN",
        batch(vec![
            ("PLT_CN", ints(vec![1, 2, 3])),
            ("STRATUM_CN", ints(vec![10, 10, 11])),
        ]),
    );

    let planner = QueryPlanner::new(&TableNames::default(), 10_000);
    let cache = JoinCache::new(16, usize::MAX, Duration::from_secs(60));
    let counters = RequestCounters::default();
    let ctx = ExecContext {
        source: &source,
        planner: &planner,
        cache: &cache,
        counters: &counters,
    };

    let predicate = parse_domain("DIA >= 10.0").unwrap();
    let keys = vec![("PLT_CN".to_string(), "PLT_CN".to_string())];

    let filtered_first = LazyTable::scan("TREE")
        .filter(predicate.clone())
        .join(
            LazyTable::scan("POP_PLOT_STRATUM_ASSGN"),
            keys.clone(),
            JoinKind::Inner,
        )
        .collect(&ctx)
        .unwrap();
    let filtered_after = LazyTable::scan("TREE")
        .join(
            LazyTable::scan("POP_PLOT_STRATUM_ASSGN"),
            keys,
            JoinKind::Inner,
        )
        .filter(predicate)
        .collect(&ctx)
        .unwrap();

    assert_eq!(filtered_first, filtered_after);
    assert_eq!(filtered_first.num_rows(), 2);
}

#[test]
fn pushed_down_predicates_reach_the_source_as_one_scan() {
    let mut source = MemorySource::new();
    source.register(
        "TREE",
        batch(vec![
            ("PLT_CN", ints(vec![1, 2])),
            ("DIA", floats(vec![4.0, 11.0])),
        ]),
    );

    let planner = QueryPlanner::new(&TableNames::default(), 10_000);
    let cache = JoinCache::new(16, usize::MAX, Duration::from_secs(60));
    let counters = RequestCounters::default();
    let ctx = ExecContext {
        source: &source,
        planner: &planner,
        cache: &cache,
        counters: &counters,
    };

    // Two stacked filters merge into the single scan's predicate.
    let out = LazyTable::scan("TREE")
        .filter(parse_domain("DIA >= 5.0").unwrap())
        .filter(parse_domain("PLT_CN == 2").unwrap())
        .collect(&ctx)
        .unwrap();
    assert_eq!(out.num_rows(), 1);
    assert_eq!(source.scan_count(), 1);
}

#[test]
fn full_scans_record_observed_row_counts() {
    let mut source = MemorySource::new();
    source.register(
        "TREE",
        batch(vec![
            ("PLT_CN", ints(vec![1, 2, 3])),
            ("DIA", floats(vec![4.0, 11.0, 15.0])),
        ]),
    );

    let planner = QueryPlanner::new(&TableNames::default(), 10_000);
    let cache = JoinCache::new(16, usize::MAX, Duration::from_secs(60));
    let counters = RequestCounters::default();
    let ctx = ExecContext {
        source: &source,
        planner: &planner,
        cache: &cache,
        counters: &counters,
    };

    LazyTable::scan("TREE").collect(&ctx).unwrap();
    let stats = planner.stats_for("TREE");
    assert_eq!(stats.rows, 3);
    // The prior's sort knowledge survives the observation.
    assert!(stats.is_sorted_on(&["PLT_CN".to_string()]));

    // A predicated scan sees a subset and must not overwrite the count.
    LazyTable::scan("TREE")
        .filter(parse_domain("DIA >= 10.0").unwrap())
        .collect(&ctx)
        .unwrap();
    assert_eq!(planner.stats_for("TREE").rows, 3);
}
