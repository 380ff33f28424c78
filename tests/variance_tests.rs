//! Stratified-design variance against closed-form values.

mod common;

use common::*;
use fia_estimator::{EstimationRequest, EstimationType, Estimator, MemorySource};

/// Three strata with EXPNS {100, 200, 150}, n_h {10, 8, 12}, per-plot
/// volume means {5, 7, 6} and variances {1, 2, 1.5}, realized exactly by
/// placing one symmetric pair of deviant plots per stratum.
fn three_stratum_source() -> MemorySource {
    init_logging();
    let mut plots: Vec<i64> = Vec::new();
    let mut conds: Vec<(i64, i64, f64, i64, i64)> = Vec::new();
    let mut trees: Vec<(i64, i64, i64, i64, f64, f64, f64, f64, i64)> = Vec::new();
    let mut assignments: Vec<(i64, i64)> = Vec::new();

    let mut plot_cn = 0i64;
    let mut tree_cn = 1000i64;
    let strata: [(i64, usize, f64, f64); 3] = [
        (1, 10, 5.0, 1.0),
        (2, 8, 7.0, 2.0),
        (3, 12, 6.0, 1.5),
    ];
    for (stratum_cn, n, mean, var) in strata {
        // Sum of squared deviations (n-1)*var, split over one +/- pair.
        let a = ((n as f64 - 1.0) * var / 2.0).sqrt();
        for i in 0..n {
            plot_cn += 1;
            tree_cn += 1;
            let y = match i {
                0 => mean - a,
                1 => mean + a,
                _ => mean,
            };
            plots.push(plot_cn);
            conds.push((plot_cn, 1, 1.0, 1, 161));
            trees.push((tree_cn, plot_cn, 1, 1, 9.0, 1.0, y, 0.0, 316));
            assignments.push((plot_cn, stratum_cn));
        }
    }

    let mut source = MemorySource::new();
    source.register("PLOT", plot_table(&plots));
    source.register("COND", cond_table(&conds));
    source.register("TREE", tree_table(&trees));
    source.register(
        "POP_STRATUM",
        stratum_table(&[(1, 100.0, 10.0), (2, 200.0, 8.0), (3, 150.0, 12.0)]),
    );
    source.register("POP_PLOT_STRATUM_ASSGN", assignment_table(&assignments));
    source
}

#[test]
fn three_stratum_totals_and_variance_match_closed_form() {
    let estimator = Estimator::new(three_stratum_source());
    let mut req = EstimationRequest::new(EstimationType::Volume);
    req.totals = true;
    req.variance = true;
    let out = estimator.estimate(&req).unwrap();

    let expected_total = 100.0 * 10.0 * 5.0 + 200.0 * 8.0 * 7.0 + 150.0 * 12.0 * 6.0;
    let expected_var =
        100.0 * 100.0 * 1.0 / 10.0 + 200.0 * 200.0 * 2.0 / 8.0 + 150.0 * 150.0 * 1.5 / 12.0;
    let expected_area = 100.0 * 10.0 + 200.0 * 8.0 + 150.0 * 12.0;

    let total = f64_value(&out, "VOL_TOTAL", 0);
    let total_var = f64_value(&out, "VOL_TOTAL_VAR", 0);
    let acre = f64_value(&out, "VOL_ACRE", 0);
    assert!((total - expected_total).abs() / expected_total < 1e-6);
    assert!((total_var - expected_var).abs() / expected_var < 1e-6);
    assert!((acre - expected_total / expected_area).abs() / acre < 1e-6);
    assert_eq!(i64_value(&out, "N_PLOTS", 0), 30);
}

#[test]
fn fpc_shrinks_the_reported_variance() {
    let estimator = Estimator::new(three_stratum_source());
    let mut req = EstimationRequest::new(EstimationType::Volume);
    req.totals = true;
    req.variance = true;
    let without = estimator.estimate(&req).unwrap();
    req.fpc = true;
    let with = estimator.estimate(&req).unwrap();

    // Every stratum samples a quarter of its points, so each contribution
    // scales by (N_h - n_h) / N_h = 0.75.
    let a = f64_value(&without, "VOL_TOTAL_VAR", 0);
    let b = f64_value(&with, "VOL_TOTAL_VAR", 0);
    assert!((b / a - 0.75).abs() < 1e-9);
}
