//! Ratio-of-means population estimates with stratified-design variance.
//!
//! Per-acre and total variances derive from one set of stratum-level
//! moments (sums and cross-products of the per-plot numerator and area
//! values), never from independent passes. Variance of a domain total is
//! `V(Y) = sum_h w_h^2 * s2_yh / n_h` with `w_h = EXPNS_h`; the per-acre
//! ratio gets the delta-method propagation of numerator and denominator
//! covariance.

use rustc_hash::FxHashMap;

use crate::error::{EstimatorError, Result};
use crate::model::Stratum;
use crate::table::key::{CompositeKey, KeyValue};

/// Per-stratum sums of plot-level numerator (`y`, one per response) and
/// denominator area (`x`) values within one output group.
#[derive(Debug, Clone)]
pub struct StratumMoments {
    pub stratum: KeyValue,
    pub estn_unit: KeyValue,
    /// Expansion factor `EXPNS`.
    pub w_h: f64,
    /// Sampled-point count of the stratum. Plots absent from the data are
    /// implicit zeros, which this count folds into the variance.
    pub n_h: f64,
    pub big_n_h: Option<f64>,
    pub sum_x: f64,
    pub sum_x2: f64,
    pub sum_y: Vec<f64>,
    pub sum_y2: Vec<f64>,
    pub sum_xy: Vec<f64>,
}

impl StratumMoments {
    fn new(stratum: KeyValue, info: &Stratum, responses: usize) -> Self {
        Self {
            stratum,
            estn_unit: info.estn_unit.clone(),
            w_h: info.expns,
            n_h: info.n_h,
            big_n_h: info.big_n_h,
            sum_x: 0.0,
            sum_x2: 0.0,
            sum_y: vec![0.0; responses],
            sum_y2: vec![0.0; responses],
            sum_xy: vec![0.0; responses],
        }
    }

    fn accumulate(&mut self, x: f64, ys: &[f64]) {
        self.sum_x += x;
        self.sum_x2 += x * x;
        for (r, y) in ys.iter().enumerate() {
            self.sum_y[r] += y;
            self.sum_y2[r] += y * y;
            self.sum_xy[r] += x * y;
        }
    }

    /// Sample variance of a sum/sum-of-squares pair over `n_h` plots.
    /// Strata with `n_h <= 1` cannot estimate within-stratum variance and
    /// contribute zero.
    fn sample_var(&self, sum: f64, sum_sq: f64) -> f64 {
        if self.n_h <= 1.0 {
            return 0.0;
        }
        ((sum_sq - sum * sum / self.n_h) / (self.n_h - 1.0)).max(0.0)
    }

    fn sample_cov(&self, r: usize) -> f64 {
        if self.n_h <= 1.0 {
            return 0.0;
        }
        (self.sum_xy[r] - self.sum_x * self.sum_y[r] / self.n_h) / (self.n_h - 1.0)
    }

    fn correction(&self, fpc: bool) -> f64 {
        if !fpc {
            return 1.0;
        }
        match self.big_n_h {
            Some(big_n) if big_n > 0.0 => ((big_n - self.n_h) / big_n).max(0.0),
            _ => 1.0,
        }
    }
}

/// Moments for one output group: its strata plus plot/tree counts.
#[derive(Debug, Clone)]
pub struct GroupMoments {
    pub group: CompositeKey,
    pub strata: Vec<StratumMoments>,
    /// Plots contributing a nonzero numerator.
    pub n_plots: u64,
}

/// Assemble per-group, per-stratum moments from plot-level numerator and
/// denominator rows.
///
/// `den` maps (condition-level group key, plot) to the plot's adjusted area
/// sum; `num` maps each full group key to its plots' response sums. The
/// condition-level key is the projection of the full group key onto
/// `cond_key_positions`. Groups are emitted in sorted key order so identical
/// input yields identical output.
pub fn assemble_moments(
    den: &FxHashMap<CompositeKey, FxHashMap<KeyValue, f64>>,
    num: &FxHashMap<CompositeKey, FxHashMap<KeyValue, Vec<f64>>>,
    cond_key_positions: &[usize],
    responses: usize,
    assignments: &FxHashMap<KeyValue, KeyValue>,
    strata: &FxHashMap<KeyValue, Stratum>,
) -> Result<Vec<GroupMoments>> {
    let mut groups: Vec<&CompositeKey> = num.keys().collect();
    groups.sort();

    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let cond_part: CompositeKey = cond_key_positions
            .iter()
            .map(|&i| group[i].clone())
            .collect();
        let group_num = &num[group];
        let empty = FxHashMap::default();
        let group_den = den.get(&cond_part).unwrap_or(&empty);

        // Union of denominator and numerator plots; plots only in the
        // numerator carry zero area and surface later as a ratio error.
        let mut plots: Vec<&KeyValue> = group_den.keys().collect();
        for plot in group_num.keys() {
            if !group_den.contains_key(plot) {
                plots.push(plot);
            }
        }
        plots.sort();

        let zeros = vec![0.0; responses];
        let mut by_stratum: FxHashMap<KeyValue, StratumMoments> = FxHashMap::default();
        let mut n_plots = 0u64;
        for plot in plots {
            let stratum_key = assignments.get(plot).ok_or_else(|| {
                EstimatorError::integrity(
                    "plot with no stratum assignment in the evaluation",
                    vec![format!("{plot:?}")],
                )
            })?;
            let info = strata.get(stratum_key).ok_or_else(|| {
                EstimatorError::integrity(
                    "assignment references an unknown stratum",
                    vec![format!("{stratum_key:?}")],
                )
            })?;
            let x = group_den.get(plot).copied().unwrap_or(0.0);
            let ys = group_num.get(plot).unwrap_or(&zeros);
            if ys.iter().any(|y| *y != 0.0) {
                n_plots += 1;
            }
            by_stratum
                .entry(stratum_key.clone())
                .or_insert_with(|| StratumMoments::new(stratum_key.clone(), info, responses))
                .accumulate(x, ys);
        }

        let mut strata_moments: Vec<StratumMoments> = by_stratum.into_values().collect();
        strata_moments.sort_by(|a, b| a.stratum.cmp(&b.stratum));
        out.push(GroupMoments {
            group: group.clone(),
            strata: strata_moments,
            n_plots,
        });
    }
    Ok(out)
}

/// One response's final estimate for one group.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseEstimate {
    /// Ratio-of-means per-acre value.
    pub acre: f64,
    pub acre_var: f64,
    /// Expanded domain total.
    pub total: f64,
    pub total_var: f64,
    /// Expanded area total (the ratio's denominator).
    pub area_total: f64,
}

impl ResponseEstimate {
    #[must_use]
    pub fn acre_se(&self) -> f64 {
        self.acre_var.sqrt()
    }

    #[must_use]
    pub fn total_se(&self) -> f64 {
        self.total_var.sqrt()
    }

    /// Coefficient of variation of the per-acre value; zero when the
    /// estimate itself is zero.
    #[must_use]
    pub fn cv(&self) -> f64 {
        if self.acre == 0.0 {
            0.0
        } else {
            self.acre_se() / self.acre.abs()
        }
    }
}

/// Estimate one response from a group's stratum moments.
///
/// A zero expanded area with a nonzero total is a computation error; both
/// zero yields an all-zero estimate (an empty domain, not a failure).
pub fn estimate_response(
    strata: &[StratumMoments],
    response: usize,
    fpc: bool,
) -> Result<ResponseEstimate> {
    let mut total = 0.0;
    let mut area_total = 0.0;
    let mut var_y = 0.0;
    let mut var_x = 0.0;
    let mut cov_xy = 0.0;

    for h in strata {
        total += h.w_h * h.sum_y[response];
        area_total += h.w_h * h.sum_x;
        if h.n_h > 1.0 {
            let g = h.correction(fpc) * h.w_h * h.w_h / h.n_h;
            var_y += g * h.sample_var(h.sum_y[response], h.sum_y2[response]);
            var_x += g * h.sample_var(h.sum_x, h.sum_x2);
            cov_xy += g * h.sample_cov(response);
        }
    }

    if area_total == 0.0 {
        if total == 0.0 {
            return Ok(ResponseEstimate::default());
        }
        return Err(EstimatorError::computation(
            "nonzero response total over zero expanded area",
        ));
    }

    let ratio = total / area_total;
    let acre_var =
        ((var_y + ratio * ratio * var_x - 2.0 * ratio * cov_xy) / (area_total * area_total))
            .max(0.0);

    Ok(ResponseEstimate {
        acre: ratio,
        acre_var,
        total,
        total_var: var_y,
        area_total,
    })
}
