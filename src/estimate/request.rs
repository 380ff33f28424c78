//! Estimation requests.
//!
//! One explicit struct with documented defaults, validated once at entry.
//! Domain expressions are parsed here, before any table scan, so a malformed
//! filter fails without touching storage.

use serde::{Deserialize, Serialize};

use crate::error::{EstimatorError, Result};
use crate::filter::{parse_domain, DomainExpr};
use crate::model::{LandType, TreeType};

use super::EstimationType;

/// A single estimation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationRequest {
    pub estimation_type: EstimationType,
    /// Columns to group estimates by (e.g. `SPCD`, `OWNGRPCD`). Empty means
    /// one overall estimate.
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Tree-level domain filter, e.g. `"DIA >= 10.0 AND SPCD IN (131, 110)"`.
    #[serde(default)]
    pub tree_domain: Option<String>,
    /// Condition-level domain filter, e.g. `"FORTYPCD == 161"`.
    #[serde(default)]
    pub area_domain: Option<String>,
    /// Plot-level domain filter, e.g. `"INVYR >= 2015"`.
    #[serde(default)]
    pub plot_domain: Option<String>,
    #[serde(default)]
    pub land_type: LandType,
    #[serde(default)]
    pub tree_type: TreeType,
    /// Include `<metric>_TOTAL` columns in the output.
    #[serde(default)]
    pub totals: bool,
    /// Report variances instead of standard errors.
    #[serde(default)]
    pub variance: bool,
    /// Restrict the estimate to the most recent evaluation found in the
    /// assignment table (the maximum EVALID). When neither this nor
    /// `evalid` is set, assignments are taken as stored; a plot assigned
    /// under several evaluations then fails the one-stratum-per-plot check.
    #[serde(default)]
    pub most_recent: bool,
    /// Explicit evaluation id; overrides `most_recent`.
    #[serde(default)]
    pub evalid: Option<i64>,
    /// Apply the finite-population correction per stratum.
    #[serde(default)]
    pub fpc: bool,
    /// Critical value for confidence-interval bounds; no bounds when unset.
    #[serde(default)]
    pub critical_value: Option<f64>,
}

impl EstimationRequest {
    /// A request with defaults: no grouping, no domains, forest land, live
    /// trees, standard errors, no totals.
    #[must_use]
    pub fn new(estimation_type: EstimationType) -> Self {
        Self {
            estimation_type,
            group_by: Vec::new(),
            tree_domain: None,
            area_domain: None,
            plot_domain: None,
            land_type: LandType::default(),
            tree_type: TreeType::default(),
            totals: false,
            variance: false,
            most_recent: false,
            evalid: None,
            fpc: false,
            critical_value: None,
        }
    }

    /// Parse and check the request. Runs before any table scan.
    pub fn validate(&self) -> Result<ValidatedRequest> {
        for column in &self.group_by {
            if column.is_empty()
                || !column
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(EstimatorError::validation(format!(
                    "invalid grouping column '{column}'"
                )));
            }
        }
        if let Some(cv) = self.critical_value {
            if !cv.is_finite() || cv <= 0.0 {
                return Err(EstimatorError::validation(format!(
                    "critical value must be positive and finite, got {cv}"
                )));
            }
        }
        let parse_opt = |domain: &Option<String>| -> Result<Option<DomainExpr>> {
            domain.as_deref().map(parse_domain).transpose()
        };
        Ok(ValidatedRequest {
            tree_domain: parse_opt(&self.tree_domain)?,
            area_domain: parse_opt(&self.area_domain)?,
            plot_domain: parse_opt(&self.plot_domain)?,
            request: self.clone(),
        })
    }
}

/// A request whose domain filters have been parsed.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub request: EstimationRequest,
    pub tree_domain: Option<DomainExpr>,
    pub area_domain: Option<DomainExpr>,
    pub plot_domain: Option<DomainExpr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_tree_domain_fails_validation() {
        let mut request = EstimationRequest::new(EstimationType::Volume);
        request.tree_domain = Some("DIA >>= 5".into());
        let err = request.validate().unwrap_err();
        assert!(matches!(err, EstimatorError::Validation(_)));
        assert!(err.to_string().contains(">>="));
    }

    #[test]
    fn grouping_column_names_are_checked() {
        let mut request = EstimationRequest::new(EstimationType::Tpa);
        request.group_by = vec!["SPCD; DROP".into()];
        assert!(request.validate().is_err());
    }

    #[test]
    fn valid_request_parses_all_domains() {
        let mut request = EstimationRequest::new(EstimationType::Volume);
        request.tree_domain = Some("DIA >= 10.0".into());
        request.area_domain = Some("FORTYPCD IN (161, 162)".into());
        request.plot_domain = Some("INVYR BETWEEN 2015 AND 2020".into());
        let validated = request.validate().unwrap();
        assert!(validated.tree_domain.is_some());
        assert!(validated.area_domain.is_some());
        assert!(validated.plot_domain.is_some());
    }
}
