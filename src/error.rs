//! # Errors
//!
//! Validation failures surfaced to callers. Numerical failures (singular
//! covariance, non-convergence) are never raised; they come back as
//! `success = false` result payloads so callers can degrade gracefully.

use thiserror::Error;

/// Validation error taxonomy for the optimization engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortfolioError {
  /// Unknown optimization method string.
  #[error("unknown optimization method `{0}`, expected `max_sharpe` or `min_variance`")]
  UnknownMethod(String),

  /// Fewer assets than the engine supports.
  #[error("at least {min} assets are required, got {got}")]
  TooFewAssets { got: usize, min: usize },

  /// A return series is too short.
  #[error("asset `{asset}` has {got} observations, at least {min} are required")]
  TooFewObservations {
    asset: String,
    got: usize,
    min: usize,
  },

  /// Two return series disagree on length.
  #[error("asset `{asset}` has {got} observations but `{reference}` has {expected}")]
  MismatchedSeriesLengths {
    asset: String,
    got: usize,
    reference: String,
    expected: usize,
  },

  /// Duplicate asset identifier in the dataset.
  #[error("duplicate asset identifier `{0}`")]
  DuplicateAsset(String),

  /// CVaR confidence level outside the open unit interval.
  #[error("confidence level must lie strictly inside (0, 1), got {0}")]
  InvalidConfidenceLevel(f64),

  /// Black-Litterman tau outside the open unit interval.
  #[error("tau must lie strictly inside (0, 1), got {0}")]
  InvalidTau(f64),

  /// A vector or matrix does not match the asset count.
  #[error("{what} has dimension {got}, expected {expected}")]
  DimensionMismatch {
    what: String,
    got: usize,
    expected: usize,
  },

  /// Market capitalizations must be positive to define a prior.
  #[error("market capitalizations must be strictly positive, got {0}")]
  NonPositiveMarketCap(f64),

  /// Frontier sweeps need at least two points.
  #[error("n_portfolios must be at least 2, got {0}")]
  InvalidPortfolioCount(usize),

  /// Simulation counts must be positive.
  #[error("n_simulations must be at least 1, got {0}")]
  InvalidSimulationCount(usize),
}
