//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Shared enums and result containers for the optimization engine. All types
//! are plain data so an outer API layer can map them straight to wire JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use serde::Deserialize;
use serde::Serialize;

use crate::error::PortfolioError;

/// Mean-variance objective selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeMethod {
  /// Maximize `(w . mu - r_f) / sqrt(w' Sigma w)` on the long-only simplex.
  MaxSharpe,
  /// Minimize `w' Sigma w` on the long-only simplex.
  MinVariance,
}

impl FromStr for OptimizeMethod {
  type Err = PortfolioError;

  /// Strict parse: unknown names are a validation failure, never a default.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "max_sharpe" => Ok(Self::MaxSharpe),
      "min_variance" => Ok(Self::MinVariance),
      other => Err(PortfolioError::UnknownMethod(other.to_string())),
    }
  }
}

impl fmt::Display for OptimizeMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::MaxSharpe => write!(f, "max_sharpe"),
      Self::MinVariance => write!(f, "min_variance"),
    }
  }
}

/// Output of a single optimization run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimizationResult {
  /// Whether the solver reached a usable optimum. Numerical failures set this
  /// to `false` and explain themselves in `message`.
  pub success: bool,
  /// Final portfolio weight per asset.
  pub weights: BTreeMap<String, f64>,
  /// Annualized expected portfolio return.
  pub expected_return: f64,
  /// Annualized risk measure: volatility, or the CVaR loss magnitude for the
  /// CVaR optimizer.
  pub expected_risk: f64,
  /// `(expected_return - risk_free) / volatility`.
  pub sharpe_ratio: f64,
  /// Name of the method that produced this result.
  pub method: String,
  /// Human-readable summary of the allocation.
  pub interpretation: String,
  /// Wall-clock compute time in milliseconds.
  pub compute_time_ms: f64,
  /// Failure or qualification detail, when any.
  pub message: Option<String>,
  /// One-way turnover versus pre-existing weights, when the caller supplied
  /// them.
  pub turnover: Option<f64>,
}

/// [`OptimizationResult`] plus Black-Litterman diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlackLittermanResult {
  /// Weights and portfolio metrics from the posterior mean-variance solve.
  pub optimization: OptimizationResult,
  /// Effective prior-uncertainty scalar, strictly inside (0, 1).
  pub tau: f64,
  /// How far the posterior mean moved from the market-implied prior.
  pub shrinkage_factor: f64,
}

/// [`OptimizationResult`] plus per-asset risk contribution diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskParityResult {
  /// Weights and portfolio metrics of the final iterate.
  pub optimization: OptimizationResult,
  /// `w_i (Sigma w)_i` per asset; sums to the portfolio variance.
  pub risk_contributions: BTreeMap<String, f64>,
  /// Target contribution per asset: portfolio variance / N.
  pub risk_budget: f64,
  /// Convergence report, including partial-convergence qualification.
  pub message: String,
}

/// Pair asset identifiers with a weight vector.
pub(crate) fn weight_map(assets: &[String], weights: &Array1<f64>) -> BTreeMap<String, f64> {
  assets
    .iter()
    .cloned()
    .zip(weights.iter().copied())
    .collect()
}

/// One-way turnover `sum(|w_new - w_old|) / 2` against pre-existing weights.
/// Assets absent from `current` count as zero-weight.
pub(crate) fn turnover(
  weights: &BTreeMap<String, f64>,
  current: &BTreeMap<String, f64>,
) -> f64 {
  let mut acc = 0.0;
  for (asset, w) in weights {
    acc += (w - current.get(asset).copied().unwrap_or(0.0)).abs();
  }
  for (asset, w) in current {
    if !weights.contains_key(asset) {
      acc += w.abs();
    }
  }
  acc / 2.0
}

#[cfg(test)]
mod tests {
  use ndarray::array;

  use super::*;

  #[test]
  fn method_parses_known_names_only() {
    assert_eq!("max_sharpe".parse::<OptimizeMethod>().unwrap(), OptimizeMethod::MaxSharpe);
    assert_eq!(
      "min_variance".parse::<OptimizeMethod>().unwrap(),
      OptimizeMethod::MinVariance
    );

    let err = "invalid_method".parse::<OptimizeMethod>().unwrap_err();
    assert_eq!(err, PortfolioError::UnknownMethod("invalid_method".to_string()));
  }

  #[test]
  fn turnover_counts_entering_and_exiting_positions() {
    let new: BTreeMap<String, f64> =
      [("A".to_string(), 0.6), ("B".to_string(), 0.4)].into_iter().collect();
    let old: BTreeMap<String, f64> =
      [("A".to_string(), 0.4), ("C".to_string(), 0.6)].into_iter().collect();

    // |0.6-0.4| + |0.4-0| + |0-0.6| = 1.2, one-way = 0.6
    assert!((turnover(&new, &old) - 0.6).abs() < 1e-12);
  }

  #[test]
  fn weight_map_preserves_asset_pairing() {
    let assets = vec!["B".to_string(), "A".to_string()];
    let map = weight_map(&assets, &array![0.7, 0.3]);

    assert_eq!(map["B"], 0.7);
    assert_eq!(map["A"], 0.3);
  }
}
