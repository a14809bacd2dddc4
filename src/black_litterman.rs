//! # Black-Litterman Blender
//!
//! $$
//! \mu_{BL} = \left[(\tau\Sigma)^{-1} + P^\top\Omega^{-1}P\right]^{-1}
//!            \left[(\tau\Sigma)^{-1}\pi + P^\top\Omega^{-1}Q\right]
//! $$
//!
//! Blends market-cap-implied equilibrium returns with investor views into a
//! posterior return/covariance pair, then defers to the mean-variance solver
//! for final weights. Inversions go through nalgebra with a ridge and SVD
//! pseudo-inverse fallback so an ill-conditioned covariance never escapes as a
//! raw linear-algebra panic.

use std::time::Instant;

use nalgebra::DMatrix;
use nalgebra::DVector;
use ndarray::Array1;
use ndarray::Array2;
use tracing::debug;
use tracing::warn;

use crate::error::PortfolioError;
use crate::mean_variance;
use crate::mean_variance::elapsed_ms;
use crate::stats::CovarianceModel;
use crate::types::BlackLittermanResult;
use crate::types::OptimizeMethod;

/// Risk-aversion coefficient used when the market-implied value is unusable.
const DEFAULT_RISK_AVERSION: f64 = 2.5;

/// Investor views: `picking` selects K linear combinations of the N assets and
/// `returns` states the expected annualized return of each combination.
#[derive(Clone, Debug)]
pub struct InvestorViews {
  /// K x N picking matrix P.
  pub picking: Array2<f64>,
  /// Length-K view return vector Q.
  pub returns: Array1<f64>,
}

/// Run the Black-Litterman model and solve the posterior for max-Sharpe weights.
pub fn black_litterman(
  model: &CovarianceModel,
  market_caps: &[f64],
  tau: f64,
  views: Option<&InvestorViews>,
  risk_free_rate: f64,
  assets: &[String],
) -> Result<BlackLittermanResult, PortfolioError> {
  let start = Instant::now();
  let n = assets.len();

  if !(tau > 0.0 && tau < 1.0) {
    return Err(PortfolioError::InvalidTau(tau));
  }
  if market_caps.len() != n {
    return Err(PortfolioError::DimensionMismatch {
      what: "market_caps".to_string(),
      got: market_caps.len(),
      expected: n,
    });
  }
  if let Some(&cap) = market_caps.iter().find(|&&c| c <= 0.0) {
    return Err(PortfolioError::NonPositiveMarketCap(cap));
  }
  if let Some(v) = views {
    if v.picking.ncols() != n {
      return Err(PortfolioError::DimensionMismatch {
        what: "view picking matrix columns".to_string(),
        got: v.picking.ncols(),
        expected: n,
      });
    }
    if v.returns.len() != v.picking.nrows() {
      return Err(PortfolioError::DimensionMismatch {
        what: "view return vector".to_string(),
        got: v.returns.len(),
        expected: v.picking.nrows(),
      });
    }
  }

  let total_cap: f64 = market_caps.iter().sum();
  let w_mkt = Array1::from_vec(market_caps.iter().map(|&c| c / total_cap).collect());

  // Implied equilibrium returns pi = delta * Sigma * w_mkt, with delta taken
  // from the market portfolio's own risk/return trade-off.
  let market_return = model.portfolio_return(&w_mkt);
  let market_variance = model.portfolio_variance(&w_mkt);
  let mut delta = (market_return - risk_free_rate) / market_variance;
  if !delta.is_finite() || delta <= 0.0 {
    warn!(delta, "market-implied risk aversion unusable, using default");
    delta = DEFAULT_RISK_AVERSION;
  }
  let pi = model.covariance.dot(&w_mkt) * delta;
  debug!(delta, n_views = views.map_or(0, |v| v.picking.nrows()), "black-litterman blend");

  let tau_sigma = &model.covariance * tau;

  let (posterior_mean, posterior_cov) = match views {
    None => (pi.clone(), &model.covariance + &tau_sigma),
    Some(v) => match blend_views(&model.covariance, &tau_sigma, &pi, v) {
      Some(pair) => pair,
      None => {
        // Covariance too degenerate to invert even with regularization:
        // a numerical failure, reported in-band rather than raised.
        let mut optimization = mean_variance::optimize(
          model,
          OptimizeMethod::MaxSharpe,
          risk_free_rate,
          None,
          assets,
        );
        optimization.success = false;
        optimization.method = "black_litterman".to_string();
        optimization.message = Some(
          "covariance matrix is singular; views were ignored and the prior was used".to_string(),
        );
        optimization.compute_time_ms = elapsed_ms(start);
        return Ok(BlackLittermanResult {
          optimization,
          tau,
          shrinkage_factor: shrinkage(&tau_sigma, &w_mkt, &pi, None),
        });
      }
    },
  };

  let shrinkage_factor = shrinkage(&tau_sigma, &w_mkt, &pi, Some(&posterior_mean));

  let posterior = CovarianceModel {
    mean: posterior_mean,
    covariance: posterior_cov,
  };
  let mut optimization =
    mean_variance::optimize(&posterior, OptimizeMethod::MaxSharpe, risk_free_rate, None, assets);
  optimization.method = "black_litterman".to_string();
  optimization.interpretation = format!(
    "Black-Litterman portfolio: expected return {:.1}%, volatility {:.1}%, Sharpe {:.2}",
    optimization.expected_return * 100.0,
    optimization.expected_risk * 100.0,
    optimization.sharpe_ratio
  );
  optimization.compute_time_ms = elapsed_ms(start);

  Ok(BlackLittermanResult {
    optimization,
    tau,
    shrinkage_factor,
  })
}

/// Posterior mean and covariance for the supplied views.
fn blend_views(
  sigma: &Array2<f64>,
  tau_sigma: &Array2<f64>,
  pi: &Array1<f64>,
  views: &InvestorViews,
) -> Option<(Array1<f64>, Array2<f64>)> {
  let n = sigma.nrows();
  let k = views.picking.nrows();

  let ts = to_dmatrix(tau_sigma);
  let p = to_dmatrix(&views.picking);
  let q = DVector::from_iterator(k, views.returns.iter().copied());
  let pi_v = DVector::from_iterator(n, pi.iter().copied());

  let ts_inv = invert(&ts)?;

  // Omega: diagonal view uncertainty proportional to P (tau Sigma) P'.
  let p_ts_pt = &p * &ts * p.transpose();
  let mut omega_inv = DMatrix::<f64>::zeros(k, k);
  for i in 0..k {
    omega_inv[(i, i)] = 1.0 / p_ts_pt[(i, i)].max(1e-10);
  }

  let precision = &ts_inv + p.transpose() * &omega_inv * &p;
  let m = invert(&precision)?;

  let blended = &m * (&ts_inv * pi_v + p.transpose() * omega_inv * q);

  let posterior_mean = Array1::from_iter(blended.iter().copied());
  let posterior_cov = sigma + &to_array2(&m);
  Some((posterior_mean, posterior_cov))
}

/// Invert a square matrix, escalating from direct inversion to a small ridge
/// and finally an SVD pseudo-inverse.
fn invert(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
  if let Some(inv) = m.clone().try_inverse() {
    if inv.iter().all(|v| v.is_finite()) {
      return Some(inv);
    }
  }

  let n = m.nrows();
  let ridge = m.trace().abs().max(1e-12) / n as f64 * 1e-6;
  let regularized = m + DMatrix::identity(n, n) * ridge;
  if let Some(inv) = regularized.try_inverse() {
    if inv.iter().all(|v| v.is_finite()) {
      warn!(ridge, "matrix inverted with diagonal regularization");
      return Some(inv);
    }
  }

  warn!("falling back to SVD pseudo-inverse");
  m.clone().svd(true, true).pseudo_inverse(1e-12).ok()
}

/// Scalar diagnostic of how far views moved the posterior mean off the prior.
/// The no-view baseline is the mean absolute prior-uncertainty adjustment
/// `mean(|tau Sigma w_mkt|)`, which is strictly positive for any non-degenerate
/// covariance.
fn shrinkage(
  tau_sigma: &Array2<f64>,
  w_mkt: &Array1<f64>,
  pi: &Array1<f64>,
  posterior_mean: Option<&Array1<f64>>,
) -> f64 {
  let base = tau_sigma.dot(w_mkt).mapv(f64::abs).mean().unwrap_or(0.0);

  match posterior_mean {
    Some(post) => {
      let prior_scale = pi.mapv(f64::abs).mean().unwrap_or(0.0).max(1e-12);
      let shift = (post - pi).mapv(f64::abs).mean().unwrap_or(0.0);
      base + shift / prior_scale
    }
    None => base,
  }
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
  DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
  Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn model() -> CovarianceModel {
    let vols = [0.20, 0.25, 0.18, 0.30, 0.22];
    let mut covariance = Array2::zeros((5, 5));
    for i in 0..5 {
      for j in 0..5 {
        let rho = if i == j { 1.0 } else { 0.3 };
        covariance[[i, j]] = rho * vols[i] * vols[j];
      }
    }
    CovarianceModel {
      mean: array![0.08, 0.10, 0.07, 0.12, 0.09],
      covariance,
    }
  }

  fn assets() -> Vec<String> {
    (1..=5).map(|i| format!("A{i}")).collect()
  }

  fn caps() -> Vec<f64> {
    vec![100.0, 200.0, 150.0, 50.0, 75.0]
  }

  #[test]
  fn no_view_blend_returns_valid_portfolio() {
    let result = black_litterman(&model(), &caps(), 0.25, None, 0.03, &assets()).unwrap();

    assert!(result.optimization.success);
    let sum: f64 = result.optimization.weights.values().sum();
    assert_abs_diff_eq!(sum, 1.0, epsilon = 0.01);
    assert!(result.tau > 0.0 && result.tau < 1.0);
    assert!(result.shrinkage_factor > 0.0);
  }

  #[test]
  fn bullish_view_raises_target_asset_weight() {
    let m = model();
    let a = assets();

    let baseline = black_litterman(&m, &caps(), 0.25, None, 0.03, &a).unwrap();

    let views = InvestorViews {
      picking: array![[1.0, 0.0, 0.0, 0.0, 0.0]],
      returns: array![0.08],
    };
    let with_view = black_litterman(&m, &caps(), 0.25, Some(&views), 0.03, &a).unwrap();

    assert!(with_view.optimization.success);
    assert!(
      with_view.optimization.weights["A1"] > baseline.optimization.weights["A1"] + 0.01,
      "bullish view should measurably raise A1 weight: {} vs {}",
      with_view.optimization.weights["A1"],
      baseline.optimization.weights["A1"]
    );
    assert!(with_view.shrinkage_factor > baseline.shrinkage_factor);
  }

  #[test]
  fn tau_must_lie_in_open_unit_interval() {
    for tau in [0.0, 1.0, 1.5, -0.1] {
      let err = black_litterman(&model(), &caps(), tau, None, 0.03, &assets()).unwrap_err();
      assert_eq!(err, PortfolioError::InvalidTau(tau));
    }
  }

  #[test]
  fn market_caps_are_validated() {
    let err = black_litterman(&model(), &[1.0, 2.0], 0.25, None, 0.03, &assets()).unwrap_err();
    assert!(matches!(err, PortfolioError::DimensionMismatch { got: 2, expected: 5, .. }));

    let err =
      black_litterman(&model(), &[1.0, 2.0, 3.0, -4.0, 5.0], 0.25, None, 0.03, &assets())
        .unwrap_err();
    assert_eq!(err, PortfolioError::NonPositiveMarketCap(-4.0));
  }

  #[test]
  fn view_dimensions_are_validated() {
    let views = InvestorViews {
      picking: array![[1.0, 0.0, 0.0]],
      returns: array![0.08],
    };
    let err =
      black_litterman(&model(), &caps(), 0.25, Some(&views), 0.03, &assets()).unwrap_err();
    assert!(matches!(err, PortfolioError::DimensionMismatch { got: 3, expected: 5, .. }));
  }

  #[test]
  fn singular_covariance_degrades_without_panicking() {
    // Rank-one covariance: every pair perfectly correlated.
    let mut covariance = Array2::zeros((5, 5));
    let vols = [0.2, 0.2, 0.2, 0.2, 0.2];
    for i in 0..5 {
      for j in 0..5 {
        covariance[[i, j]] = vols[i] * vols[j];
      }
    }
    let m = CovarianceModel {
      mean: array![0.08, 0.10, 0.07, 0.12, 0.09],
      covariance,
    };
    let views = InvestorViews {
      picking: array![[1.0, 0.0, 0.0, 0.0, 0.0]],
      returns: array![0.08],
    };

    let result = black_litterman(&m, &caps(), 0.25, Some(&views), 0.03, &assets()).unwrap();
    let sum: f64 = result.optimization.weights.values().sum();
    assert_abs_diff_eq!(sum, 1.0, epsilon = 0.01);
  }
}
