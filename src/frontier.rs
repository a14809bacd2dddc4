//! # Efficient Frontier
//!
//! $$
//! \{(\sigma_k, \mu_k)\}_{k=1}^{K},\quad \mu_k \in [\mu_{\min var}, \mu_{\max}]
//! $$
//!
//! Target-return sweep over the mean-variance solver. Points are computed in
//! parallel, failed points are retried once with relaxed solver settings, and
//! anything still failing is omitted rather than returned as garbage data.

use ndarray::Array1;
use rayon::prelude::*;
use tracing::debug;
use tracing::warn;

use crate::error::PortfolioError;
use crate::mean_variance::optimize_with_settings;
use crate::mean_variance::SolverSettings;
use crate::stats::CovarianceModel;
use crate::types::OptimizationResult;
use crate::types::OptimizeMethod;

/// Sweep target returns and collect one optimal portfolio per step, sorted
/// ascending by `expected_risk`.
pub fn efficient_frontier(
  model: &CovarianceModel,
  n_portfolios: usize,
  method: OptimizeMethod,
  risk_free_rate: f64,
  assets: &[String],
) -> Result<Vec<OptimizationResult>, PortfolioError> {
  if n_portfolios < 2 {
    return Err(PortfolioError::InvalidPortfolioCount(n_portfolios));
  }

  // Lower end of the sweep: the return of the least-risky portfolio. Targets
  // below it only re-trace the upper frontier's mirror image.
  let min_var = optimize_with_settings(
    model,
    OptimizeMethod::MinVariance,
    risk_free_rate,
    None,
    assets,
    SolverSettings::standard(),
  );
  let lo = if min_var.success {
    min_var.expected_return
  } else {
    model.mean.iter().cloned().fold(f64::INFINITY, f64::min)
  };
  let hi = model.mean.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
  debug!(n_portfolios, lo, hi, "frontier sweep");

  let targets: Vec<f64> = Array1::linspace(lo, hi.max(lo), n_portfolios).to_vec();

  let mut points: Vec<OptimizationResult> = targets
    .par_iter()
    .filter_map(|&target| {
      let point = optimize_with_settings(
        model,
        method,
        risk_free_rate,
        Some(target),
        assets,
        SolverSettings::standard(),
      );
      if point.success {
        return Some(point);
      }

      let retry = optimize_with_settings(
        model,
        method,
        risk_free_rate,
        Some(target),
        assets,
        SolverSettings::relaxed(),
      );
      if retry.success {
        Some(retry)
      } else {
        warn!(target, "frontier point failed twice, omitting");
        None
      }
    })
    .collect();

  points.sort_by(|a, b| {
    a.expected_risk
      .partial_cmp(&b.expected_risk)
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  Ok(points)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn model() -> CovarianceModel {
    CovarianceModel {
      mean: array![0.08, 0.12, 0.05],
      covariance: array![
        [0.0400, 0.0060, 0.0020],
        [0.0060, 0.0900, 0.0030],
        [0.0020, 0.0030, 0.0225]
      ],
    }
  }

  fn assets() -> Vec<String> {
    vec!["AAA".to_string(), "BBB".to_string(), "CCC".to_string()]
  }

  #[test]
  fn rejects_degenerate_sweeps() {
    for n in [0, 1] {
      let err = efficient_frontier(&model(), n, OptimizeMethod::MaxSharpe, 0.03, &assets())
        .unwrap_err();
      assert_eq!(err, PortfolioError::InvalidPortfolioCount(n));
    }
  }

  #[test]
  fn frontier_is_sorted_by_risk_with_all_points_successful() {
    let frontier =
      efficient_frontier(&model(), 8, OptimizeMethod::MaxSharpe, 0.03, &assets()).unwrap();

    assert_eq!(frontier.len(), 8);
    for point in &frontier {
      assert!(point.success);
      let sum: f64 = point.weights.values().sum();
      assert_abs_diff_eq!(sum, 1.0, epsilon = 0.01);
    }
    for pair in frontier.windows(2) {
      assert!(pair[0].expected_risk <= pair[1].expected_risk + 1e-12);
    }
  }

  #[test]
  fn frontier_spans_min_variance_to_max_return() {
    let frontier =
      efficient_frontier(&model(), 10, OptimizeMethod::MinVariance, 0.03, &assets()).unwrap();

    let first = frontier.first().unwrap();
    let last = frontier.last().unwrap();
    assert!(first.expected_return < last.expected_return);
    // Top of the sweep approaches the single best asset's return.
    assert!(last.expected_return > 0.10);
  }
}
