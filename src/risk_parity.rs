//! # Risk Parity Solver
//!
//! $$
//! rc_i = w_i(\Sigma \mathbf{w})_i,\qquad rc_i \to \frac{\mathbf{w}^\top\Sigma\mathbf{w}}{N}
//! $$
//!
//! Iterative risk budgeting: multiplicative weight updates shrink each asset's
//! risk contribution toward the equal budget. Exhausting the iteration budget
//! is not a failure; the best iterate is returned with a qualifying message,
//! since approximate risk parity is still a usable allocation.

use std::time::Instant;

use ndarray::Array1;
use tracing::debug;

use crate::mean_variance::elapsed_ms;
use crate::mean_variance::sharpe;
use crate::stats::CovarianceModel;
use crate::types::weight_map;
use crate::types::OptimizationResult;
use crate::types::RiskParityResult;

/// Default iteration cap.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;
/// Default convergence tolerance on the contribution spread.
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Per-iteration clamp on the multiplicative update factor.
const UPDATE_FACTOR_BOUNDS: (f64, f64) = (0.5, 2.0);

/// Equal-risk-budget allocation via iterative contribution matching.
pub fn risk_parity(
  model: &CovarianceModel,
  max_iterations: usize,
  tolerance: f64,
  risk_free_rate: f64,
  assets: &[String],
) -> RiskParityResult {
  let start = Instant::now();
  let n = assets.len();
  debug!(n_assets = n, max_iterations, tolerance, "risk parity solve");

  let mut weights = Array1::from_elem(n, 1.0 / n as f64);
  let mut best_weights = weights.clone();
  let mut best_spread = f64::INFINITY;
  let mut converged_at: Option<usize> = None;

  for iteration in 1..=max_iterations.max(1) {
    let sigma_w = model.covariance.dot(&weights);
    let variance = weights.dot(&sigma_w);
    if variance <= 1e-30 {
      // Degenerate covariance: every allocation is risk-free, equal weights
      // are as good as any.
      break;
    }

    let budget = variance / n as f64;
    let spread = (0..n)
      .map(|i| (weights[i] * sigma_w[i] / budget - 1.0).abs())
      .fold(0.0, f64::max);

    if spread < best_spread {
      best_spread = spread;
      best_weights = weights.clone();
    }
    if spread < tolerance {
      converged_at = Some(iteration);
      break;
    }

    // Multiplicative update with a square-root step; the factor clamp keeps
    // negative or near-zero contributions from destabilizing the iterate.
    for i in 0..n {
      let rc = (weights[i] * sigma_w[i]).max(1e-12);
      let factor = (budget / rc)
        .sqrt()
        .clamp(UPDATE_FACTOR_BOUNDS.0, UPDATE_FACTOR_BOUNDS.1);
      weights[i] *= factor;
    }
    let total = weights.sum();
    weights /= total;
  }

  let weights = best_weights;
  let sigma_w = model.covariance.dot(&weights);
  let variance = weights.dot(&sigma_w);
  let budget = variance / n as f64;
  let contributions = Array1::from_shape_fn(n, |i| weights[i] * sigma_w[i]);

  let expected_return = model.portfolio_return(&weights);
  let expected_risk = variance.max(0.0).sqrt();
  let sharpe_ratio = sharpe(expected_return, expected_risk, risk_free_rate);

  let message = match converged_at {
    Some(k) => format!("risk parity converged in {k} iterations"),
    None => format!(
      "risk parity reached {} iterations without full convergence \
       (best contribution spread {:.2e}); returning best iterate",
      max_iterations, best_spread
    ),
  };

  let optimization = OptimizationResult {
    success: true,
    weights: weight_map(assets, &weights),
    expected_return,
    expected_risk,
    sharpe_ratio,
    method: "risk_parity".to_string(),
    interpretation: format!(
      "Risk parity portfolio: {} assets contribute near-equally to risk, volatility {:.1}%",
      n,
      expected_risk * 100.0
    ),
    compute_time_ms: elapsed_ms(start),
    message: converged_at.is_none().then(|| message.clone()),
    turnover: None,
  };

  RiskParityResult {
    optimization,
    risk_contributions: weight_map(assets, &contributions),
    risk_budget: budget,
    message,
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use ndarray::Array1;

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
  fn contributions_match_budget_and_sum_to_variance() {
    let m = model();
    let result = risk_parity(&m, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE, 0.03, &assets());

    assert!(result.optimization.success);
    let sum_w: f64 = result.optimization.weights.values().sum();
    assert_abs_diff_eq!(sum_w, 1.0, epsilon = 0.01);

    let w = Array1::from_vec(assets().iter().map(|a| result.optimization.weights[a]).collect());
    let variance = m.portfolio_variance(&w);
    let sum_rc: f64 = result.risk_contributions.values().sum();
    assert!((sum_rc - variance).abs() <= 0.01 * variance.max(1e-12));

    for rc in result.risk_contributions.values() {
      assert!(*rc >= 0.5 * result.risk_budget);
      assert!(*rc <= 1.5 * result.risk_budget);
    }
  }

  #[test]
  fn convergent_case_reports_iteration_count() {
    let result = risk_parity(&model(), DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE, 0.03, &assets());
    assert!(result.message.contains("converged"));
    assert!(result.optimization.message.is_none());
  }

  #[test]
  fn diagonal_covariance_gives_inverse_volatility_weights() {
    let m = CovarianceModel {
      mean: array![0.08, 0.12, 0.05],
      covariance: array![[0.04, 0.0, 0.0], [0.0, 0.09, 0.0], [0.0, 0.0, 0.0225]],
    };
    let result = risk_parity(&m, 500, 1e-9, 0.03, &assets());

    // Inverse-vol solution: w_i proportional to 1/sigma_i.
    let inv_vols = [1.0 / 0.2, 1.0 / 0.3, 1.0 / 0.15];
    let total: f64 = inv_vols.iter().sum();
    for (i, asset) in assets().iter().enumerate() {
      assert_abs_diff_eq!(
        result.optimization.weights[asset],
        inv_vols[i] / total,
        epsilon = 0.01
      );
    }
  }

  #[test]
  fn exhausted_budget_still_succeeds_with_partial_message() {
    let result = risk_parity(&model(), 2, 1e-12, 0.03, &assets());

    assert!(result.optimization.success);
    assert!(result.message.contains("without full convergence"));
    assert!(result.optimization.message.is_some());
  }

  #[test]
  fn identical_inputs_give_identical_weights() {
    let a = risk_parity(&model(), DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE, 0.03, &assets());
    let b = risk_parity(&model(), DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE, 0.03, &assets());
    assert_eq!(a.optimization.weights, b.optimization.weights);
  }
}
