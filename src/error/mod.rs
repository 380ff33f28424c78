//! Error handling for the estimator.
//!
//! The taxonomy mirrors where things can go wrong in a request:
//! - `Validation`: the request itself is malformed (bad domain expression,
//!   unknown grouping column). Raised before any table scan.
//! - `DataIntegrity`: the input tables violate a design invariant (a plot
//!   with zero or multiple stratum assignments, condition proportions above
//!   tolerance). Carries the offending identifiers.
//! - `Computation`: a module failed to produce the response columns it
//!   declared. The whole request aborts; a silently wrong statistic is worse
//!   than a failed call.
//!
//! An empty post-filter dataset is *not* an error and never appears here;
//! the workflow returns a zero-row result with explanatory metadata instead.

use thiserror::Error;

/// Specialized error type for estimation requests.
#[derive(Debug, Error)]
pub enum EstimatorError {
    /// The request is malformed; raised at setup before any scan.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Input tables violate a sampling-design invariant.
    #[error("Data integrity error: {message} (offending ids: {ids:?})")]
    DataIntegrity {
        /// What invariant was violated.
        message: String,
        /// Identifiers (plot CNs, stratum CNs) of the offending rows.
        ids: Vec<String>,
    },

    /// A module produced inconsistent output; the request aborts.
    #[error("Computation error: {0}")]
    Computation(String),

    /// Error from an Arrow kernel or schema lookup.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error reading Parquet data at the source boundary.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Error opening or reading a file at the source boundary.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EstimatorError {
    /// Shorthand for a validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Shorthand for a data-integrity failure carrying offending ids.
    pub fn integrity(msg: impl Into<String>, ids: Vec<String>) -> Self {
        Self::DataIntegrity {
            message: msg.into(),
            ids,
        }
    }

    /// Shorthand for a computation failure.
    pub fn computation(msg: impl Into<String>) -> Self {
        Self::Computation(msg.into())
    }
}

impl From<anyhow::Error> for EstimatorError {
    fn from(error: anyhow::Error) -> Self {
        Self::Io(std::io::Error::other(error.to_string()))
    }
}

/// Result type for estimator operations.
pub type Result<T> = std::result::Result<T, EstimatorError>;
