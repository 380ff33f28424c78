//! End-to-end estimation workflow tests over synthetic inventories.

mod common;

use common::*;
use fia_estimator::{EstimationRequest, EstimationType, Estimator, EstimatorError};

fn request(estimation_type: EstimationType) -> EstimationRequest {
    EstimationRequest::new(estimation_type)
}

#[test]
fn volume_per_acre_over_one_stratum() {
    // Plot volume sums 60 and 150 over two plots, EXPNS 1000:
    // total 210000, area 2000, acre 105, s2 = 4050,
    // V = 1000^2 * 4050 / 2, SE(acre) = sqrt(V) / 2000 = 22.5.
    let estimator = Estimator::new(single_stratum_source());
    let out = estimator.estimate(&request(EstimationType::Volume)).unwrap();

    assert_eq!(out.num_rows(), 1);
    assert!((f64_value(&out, "VOL_ACRE", 0) - 105.0).abs() < 1e-9);
    assert!((f64_value(&out, "VOL_SE", 0) - 22.5).abs() < 1e-9);
    assert!((f64_value(&out, "VOL_CV", 0) - 22.5 / 105.0).abs() < 1e-12);
    assert_eq!(i64_value(&out, "N_PLOTS", 0), 2);
    assert_eq!(i64_value(&out, "N_TREES", 0), 3);
    assert_eq!(i64_value(&out, "YEAR", 0), 2020);
}

#[test]
fn total_over_acre_recovers_sampled_area() {
    let estimator = Estimator::new(single_stratum_source());
    let mut req = request(EstimationType::Volume);
    req.totals = true;
    let out = estimator.estimate(&req).unwrap();

    let total = f64_value(&out, "VOL_TOTAL", 0);
    let acre = f64_value(&out, "VOL_ACRE", 0);
    assert!((total - 210_000.0).abs() < 1e-6);
    // Two fully forested plots at EXPNS 1000 each.
    assert!((total / acre - 2000.0).abs() < 1e-6);
}

#[test]
fn grouped_by_species_with_shared_denominator() {
    let estimator = Estimator::new(single_stratum_source());
    let mut req = request(EstimationType::Volume);
    req.group_by = vec!["SPCD".into()];
    let out = estimator.estimate(&req).unwrap();

    assert_eq!(out.num_rows(), 2);
    // Sorted by group key: 316 before 833. Both share the full 2000-acre
    // denominator.
    assert_eq!(i64_value(&out, "SPCD", 0), 316);
    assert!((f64_value(&out, "VOL_ACRE", 0) - 30.0).abs() < 1e-9);
    assert_eq!(i64_value(&out, "N_TREES", 0), 1);
    assert_eq!(i64_value(&out, "N_PLOTS", 0), 1);

    assert_eq!(i64_value(&out, "SPCD", 1), 833);
    assert!((f64_value(&out, "VOL_ACRE", 1) - 75.0).abs() < 1e-9);
    assert_eq!(i64_value(&out, "N_TREES", 1), 2);
}

#[test]
fn biomass_reports_tons_and_carbon() {
    let estimator = Estimator::new(single_stratum_source());
    let out = estimator.estimate(&request(EstimationType::Biomass)).unwrap();

    // Plot sums: 2000*6/2000 = 6 and 1000*6/2000 + 500*6/2000 = 4.5;
    // acre = 1000 * 10.5 / 2000.
    assert!((f64_value(&out, "BIO_ACRE", 0) - 5.25).abs() < 1e-9);
    assert!((f64_value(&out, "CARB_ACRE", 0) - 2.625).abs() < 1e-9);
}

#[test]
fn mortality_uses_the_grm_component_join() {
    let estimator = Estimator::new(single_stratum_source());
    let out = estimator
        .estimate(&request(EstimationType::Mortality))
        .unwrap();

    // Only tree 101 carries a MORTALITY component: 2.0 * 10.0 on plot 1.
    assert!((f64_value(&out, "MORT_ACRE", 0) - 10.0).abs() < 1e-9);
}

#[test]
fn growth_filters_to_survivor_components() {
    let estimator = Estimator::new(single_stratum_source());
    let out = estimator.estimate(&request(EstimationType::Growth)).unwrap();

    // Only tree 102 is a SURVIVOR: 1.0 * 4.0 on plot 2.
    assert!((f64_value(&out, "GROW_ACRE", 0) - 2.0).abs() < 1e-9);
}

#[test]
fn area_numerator_is_restricted_by_the_area_domain() {
    let estimator = Estimator::new(single_stratum_source());
    let mut req = request(EstimationType::Area);
    req.area_domain = Some("FORTYPCD == 161".into());
    req.totals = true;
    let out = estimator.estimate(&req).unwrap();

    // One of the two fully forested plots matches the forest type.
    assert!((f64_value(&out, "AREA_ACRE", 0) - 0.5).abs() < 1e-12);
    assert!((f64_value(&out, "AREA_TOTAL", 0) - 1000.0).abs() < 1e-9);
}

#[test]
fn confidence_bounds_use_the_caller_critical_value() {
    let estimator = Estimator::new(single_stratum_source());
    let mut req = request(EstimationType::Volume);
    req.critical_value = Some(1.96);
    let out = estimator.estimate(&req).unwrap();

    let lo = f64_value(&out, "VOL_ACRE_LO", 0);
    let hi = f64_value(&out, "VOL_ACRE_HI", 0);
    assert!((lo - (105.0 - 1.96 * 22.5)).abs() < 1e-9);
    assert!((hi - (105.0 + 1.96 * 22.5)).abs() < 1e-9);
}

#[test]
fn identical_requests_produce_identical_output() {
    let estimator = Estimator::new(single_stratum_source());
    let mut req = request(EstimationType::Volume);
    req.group_by = vec!["SPCD".into()];
    req.totals = true;
    let first = estimator.estimate(&req).unwrap();
    let second = estimator.estimate(&req).unwrap();
    assert_eq!(first, second);
}

#[test]
fn join_results_are_cached_across_requests() {
    let estimator = Estimator::new(single_stratum_source());
    estimator.estimate(&request(EstimationType::Volume)).unwrap();
    let after_first = estimator.cache().len();
    assert!(after_first > 0);
    estimator.estimate(&request(EstimationType::Volume)).unwrap();
    // The second run reuses cached joins instead of adding entries.
    assert_eq!(estimator.cache().len(), after_first);
}

#[test]
fn malformed_domain_fails_before_any_scan() {
    let estimator = Estimator::new(single_stratum_source());
    let mut req = request(EstimationType::Volume);
    req.tree_domain = Some("DIA >>= 5".into());
    let err = estimator.estimate(&req).unwrap_err();
    assert!(matches!(err, EstimatorError::Validation(_)));
    assert!(err.to_string().contains(">>="));
    assert_eq!(estimator.source().scan_count(), 0);
}

#[test]
fn unknown_grouping_column_fails_before_any_scan() {
    let estimator = Estimator::new(single_stratum_source());
    let mut req = request(EstimationType::Volume);
    req.group_by = vec!["NO_SUCH_COLUMN".into()];
    let err = estimator.estimate(&req).unwrap_err();
    assert!(matches!(err, EstimatorError::Validation(_)));
    assert_eq!(estimator.source().scan_count(), 0);
}

#[test]
fn filters_removing_all_rows_yield_empty_batch_with_reason() {
    let estimator = Estimator::new(single_stratum_source());
    let mut req = request(EstimationType::Volume);
    req.tree_domain = Some("DIA >= 100.0".into());
    let out = estimator.estimate(&req).unwrap();

    assert_eq!(out.num_rows(), 0);
    assert!(out.schema().metadata().contains_key("empty_reason"));
    assert!(out.schema().index_of("VOL_ACRE").is_ok());
}

#[test]
fn duplicate_stratum_assignment_is_a_data_integrity_error() {
    let mut source = single_stratum_source();
    source.register(
        "POP_PLOT_STRATUM_ASSGN",
        assignment_table(&[(1, 10), (1, 10), (2, 10)]),
    );
    let estimator = Estimator::new(source);
    let err = estimator
        .estimate(&request(EstimationType::Volume))
        .unwrap_err();
    match err {
        EstimatorError::DataIntegrity { ids, .. } => assert!(!ids.is_empty()),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn condition_proportions_above_one_are_rejected() {
    let mut source = single_stratum_source();
    source.register(
        "COND",
        cond_table(&[(1, 1, 0.8, 1, 161), (1, 2, 0.5, 1, 161), (2, 1, 1.0, 1, 406)]),
    );
    let estimator = Estimator::new(source);
    let err = estimator
        .estimate(&request(EstimationType::Volume))
        .unwrap_err();
    assert!(matches!(err, EstimatorError::DataIntegrity { .. }));
}

#[test]
fn unassigned_plots_are_a_data_integrity_error() {
    let estimator = Estimator::new(single_stratum_source());
    let mut req = request(EstimationType::Volume);
    // No assignments exist for this evaluation.
    req.evalid = Some(999);
    let err = estimator.estimate(&req).unwrap_err();
    assert!(matches!(err, EstimatorError::DataIntegrity { .. }));
}

#[test]
fn most_recent_selects_the_newest_evaluation() {
    // Both plots are assigned under two evaluations, each with its own
    // stratum row carrying the same expansion factors.
    let mut source = single_stratum_source();
    source.register(
        "POP_PLOT_STRATUM_ASSGN",
        batch(vec![
            ("PLT_CN", ints(vec![1, 2, 1, 2])),
            ("STRATUM_CN", ints(vec![10, 10, 20, 20])),
            ("EVALID", ints(vec![100, 100, 200, 200])),
        ]),
    );
    source.register(
        "POP_STRATUM",
        batch(vec![
            ("CN", ints(vec![10, 20])),
            ("ESTN_UNIT_CN", ints(vec![1, 1])),
            ("EVALID", ints(vec![100, 200])),
            ("EXPNS", floats(vec![1000.0, 1000.0])),
            ("ADJ_FACTOR_MICR", floats(vec![1.0, 1.0])),
            ("ADJ_FACTOR_SUBP", floats(vec![1.0, 1.0])),
            ("ADJ_FACTOR_MACR", floats(vec![1.0, 1.0])),
            ("P2POINTCNT", floats(vec![2.0, 2.0])),
            ("P1POINTCNT", floats(vec![8.0, 8.0])),
        ]),
    );
    let estimator = Estimator::new(source);
    let mut req = request(EstimationType::Volume);

    // Without a pinned or most-recent evaluation the duplicate assignments
    // fail the one-stratum-per-plot check.
    let err = estimator.estimate(&req).unwrap_err();
    assert!(matches!(err, EstimatorError::DataIntegrity { .. }));

    req.most_recent = true;
    let out = estimator.estimate(&req).unwrap();
    assert!((f64_value(&out, "VOL_ACRE", 0) - 105.0).abs() < 1e-9);
}

// Two conditions on one plot with fixed condition-level volume sums must
// yield the same estimate no matter how many trees realize those sums.
#[test]
fn tree_count_per_condition_never_changes_the_estimate() {
    let build = |trees: &[(i64, i64, i64, i64, f64, f64, f64, f64, i64)]| {
        let mut source = fia_estimator::MemorySource::new();
        source.register("PLOT", plot_table(&[1]));
        source.register(
            "COND",
            cond_table(&[(1, 1, 0.6, 1, 161), (1, 2, 0.4, 1, 161)]),
        );
        source.register("TREE", tree_table(trees));
        source.register("POP_STRATUM", stratum_table(&[(10, 1000.0, 1.0)]));
        source.register("POP_PLOT_STRATUM_ASSGN", assignment_table(&[(1, 10)]));
        Estimator::new(source)
    };

    // Condition sums 10.0 and 6.0, one tree each.
    let few = build(&[
        (101, 1, 1, 1, 9.0, 1.0, 10.0, 0.0, 316),
        (102, 1, 2, 1, 9.0, 1.0, 6.0, 0.0, 316),
    ]);
    // Same condition sums spread over seven trees.
    let many = build(&[
        (201, 1, 1, 1, 9.0, 1.0, 4.0, 0.0, 316),
        (202, 1, 1, 1, 9.0, 1.0, 3.0, 0.0, 316),
        (203, 1, 1, 1, 9.0, 1.0, 2.0, 0.0, 316),
        (204, 1, 1, 1, 9.0, 1.0, 1.0, 0.0, 316),
        (205, 1, 2, 1, 9.0, 1.0, 2.0, 0.0, 316),
        (206, 1, 2, 1, 9.0, 1.0, 2.0, 0.0, 316),
        (207, 1, 2, 1, 9.0, 1.0, 2.0, 0.0, 316),
    ]);

    let a = few.estimate(&request(EstimationType::Volume)).unwrap();
    let b = many.estimate(&request(EstimationType::Volume)).unwrap();
    let acre_a = f64_value(&a, "VOL_ACRE", 0);
    let acre_b = f64_value(&b, "VOL_ACRE", 0);
    assert!((acre_a - acre_b).abs() < 1e-9);
    assert!((acre_a - 16.0).abs() < 1e-9);
}
