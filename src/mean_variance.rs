//! # Mean-Variance Optimizer
//!
//! $$
//! \max_{\mathbf{w}\in\Delta^{N-1}} \frac{\mathbf{w}^\top\mu - r_f}{\sqrt{\mathbf{w}^\top\Sigma\mathbf{w}}}
//! $$
//!
//! Markowitz max-Sharpe and min-variance solves. The long-only simplex
//! constraint is enforced by optimizing unconstrained scores and mapping them
//! through a softmax; an optional target-return equality is handled as a
//! quadratic penalty. Nelder-Mead keeps the solve derivative-free, which
//! matters because the max-Sharpe objective is non-smooth near zero variance.

use std::time::Instant;

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::solver::neldermead::NelderMead;
use ndarray::Array1;
use tracing::debug;
use tracing::warn;

use crate::stats::CovarianceModel;
use crate::types::weight_map;
use crate::types::OptimizationResult;
use crate::types::OptimizeMethod;

/// Accepted absolute gap between achieved and requested expected return,
/// in annualized decimal terms (five percentage points).
pub const TARGET_RETURN_TOLERANCE: f64 = 0.05;

/// Nelder-Mead budget and penalty weights for one solve.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SolverSettings {
  pub sd_tolerance: f64,
  pub max_iters: u64,
  pub target_penalty: f64,
}

impl SolverSettings {
  pub(crate) fn standard() -> Self {
    Self {
      sd_tolerance: 1e-8,
      max_iters: 5000,
      target_penalty: 200.0,
    }
  }

  /// Looser budget used by the frontier generator when retrying a failed point.
  pub(crate) fn relaxed() -> Self {
    Self {
      sd_tolerance: 1e-6,
      max_iters: 8000,
      target_penalty: 50.0,
    }
  }
}

/// Map unconstrained scores onto the long-only simplex.
pub(crate) fn softmax(x: &[f64]) -> Array1<f64> {
  let max_x = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
  let exps: Vec<f64> = x.iter().map(|&v| (v - max_x).exp()).collect();
  let sum: f64 = exps.iter().sum();

  if sum < 1e-15 {
    Array1::from_elem(x.len(), 1.0 / x.len() as f64)
  } else {
    Array1::from_vec(exps.iter().map(|&e| e / sum).collect())
  }
}

/// Unit-coordinate simplex around the equal-weight portfolio.
pub(crate) fn initial_simplex(n: usize) -> Vec<Vec<f64>> {
  let x0 = vec![0.0; n];
  let mut simplex = Vec::with_capacity(n + 1);
  simplex.push(x0.clone());
  for i in 0..n {
    let mut point = x0.clone();
    point[i] = 1.0;
    simplex.push(point);
  }
  simplex
}

struct MeanVarianceCost {
  model: CovarianceModel,
  method: OptimizeMethod,
  risk_free_rate: f64,
  target_return: Option<f64>,
  penalty: f64,
}

impl CostFunction for MeanVarianceCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let w = softmax(x);
    let variance = self.model.portfolio_variance(&w);
    let ret = self.model.portfolio_return(&w);

    let base = match self.method {
      OptimizeMethod::MinVariance => variance,
      OptimizeMethod::MaxSharpe => -(ret - self.risk_free_rate) / (variance + 1e-10).sqrt(),
    };

    let penalty = match self.target_return {
      Some(target) => self.penalty * (ret - target).powi(2),
      None => 0.0,
    };

    Ok(base + penalty)
  }
}

/// Solve the Markowitz problem for annualized moments.
///
/// Numerical failures come back as `success = false` with equal weights and an
/// explanatory message; only shape errors upstream are hard failures.
pub fn optimize(
  model: &CovarianceModel,
  method: OptimizeMethod,
  risk_free_rate: f64,
  target_return: Option<f64>,
  assets: &[String],
) -> OptimizationResult {
  optimize_with_settings(
    model,
    method,
    risk_free_rate,
    target_return,
    assets,
    SolverSettings::standard(),
  )
}

pub(crate) fn optimize_with_settings(
  model: &CovarianceModel,
  method: OptimizeMethod,
  risk_free_rate: f64,
  target_return: Option<f64>,
  assets: &[String],
  settings: SolverSettings,
) -> OptimizationResult {
  let start = Instant::now();
  let n = assets.len();
  debug!(%method, n_assets = n, ?target_return, "mean-variance solve");

  // Long-only portfolios can only reach returns between the worst and best
  // single asset; anything outside is infeasible by construction.
  if let Some(target) = target_return {
    let lo = model.mean.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = model.mean.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if target < lo - 1e-12 || target > hi + 1e-12 {
      return failed_result(
        model,
        method,
        risk_free_rate,
        assets,
        start,
        format!(
          "target return {:.4} is outside the achievable long-only range [{:.4}, {:.4}]",
          target, lo, hi
        ),
      );
    }
  }

  let cost = MeanVarianceCost {
    model: model.clone(),
    method,
    risk_free_rate,
    target_return,
    penalty: settings.target_penalty,
  };

  let best_x = match NelderMead::new(initial_simplex(n)).with_sd_tolerance(settings.sd_tolerance) {
    Ok(solver) => match Executor::new(cost, solver)
      .configure(|state| state.max_iters(settings.max_iters))
      .run()
    {
      Ok(res) => res.state.best_param,
      Err(e) => {
        warn!(error = %e, "Nelder-Mead executor failed");
        None
      }
    },
    Err(e) => {
      warn!(error = %e, "invalid Nelder-Mead configuration");
      None
    }
  };

  let Some(best_x) = best_x else {
    return failed_result(
      model,
      method,
      risk_free_rate,
      assets,
      start,
      "optimizer did not produce an iterate; covariance matrix may be ill-conditioned".to_string(),
    );
  };

  let weights = softmax(&best_x);
  let expected_return = model.portfolio_return(&weights);
  let expected_risk = model.portfolio_volatility(&weights);
  let sharpe_ratio = sharpe(expected_return, expected_risk, risk_free_rate);

  // A feasible target the solver still missed is reported as a soft failure
  // so the caller can relax or re-target.
  if let Some(target) = target_return {
    if (expected_return - target).abs() > TARGET_RETURN_TOLERANCE {
      let message = format!(
        "optimizer reached expected return {:.4}, more than {:.2} away from target {:.4}",
        expected_return, TARGET_RETURN_TOLERANCE, target
      );
      return OptimizationResult {
        success: false,
        weights: weight_map(assets, &weights),
        expected_return,
        expected_risk,
        sharpe_ratio,
        method: method.to_string(),
        interpretation: interpretation(method, expected_return, expected_risk, sharpe_ratio),
        compute_time_ms: elapsed_ms(start),
        message: Some(message),
        turnover: None,
      };
    }
  }

  OptimizationResult {
    success: true,
    weights: weight_map(assets, &weights),
    expected_return,
    expected_risk,
    sharpe_ratio,
    method: method.to_string(),
    interpretation: interpretation(method, expected_return, expected_risk, sharpe_ratio),
    compute_time_ms: elapsed_ms(start),
    message: None,
    turnover: None,
  }
}

fn failed_result(
  model: &CovarianceModel,
  method: OptimizeMethod,
  risk_free_rate: f64,
  assets: &[String],
  start: Instant,
  message: String,
) -> OptimizationResult {
  let n = assets.len();
  let weights = Array1::from_elem(n, 1.0 / n as f64);
  let expected_return = model.portfolio_return(&weights);
  let expected_risk = model.portfolio_volatility(&weights);
  let sharpe_ratio = sharpe(expected_return, expected_risk, risk_free_rate);

  OptimizationResult {
    success: false,
    weights: weight_map(assets, &weights),
    expected_return,
    expected_risk,
    sharpe_ratio,
    method: method.to_string(),
    interpretation: interpretation(method, expected_return, expected_risk, sharpe_ratio),
    compute_time_ms: elapsed_ms(start),
    message: Some(message),
    turnover: None,
  }
}

pub(crate) fn sharpe(expected_return: f64, volatility: f64, risk_free_rate: f64) -> f64 {
  if volatility > 1e-15 {
    (expected_return - risk_free_rate) / volatility
  } else {
    0.0
  }
}

pub(crate) fn elapsed_ms(start: Instant) -> f64 {
  start.elapsed().as_secs_f64() * 1000.0
}

fn interpretation(method: OptimizeMethod, ret: f64, vol: f64, sharpe: f64) -> String {
  let label = match method {
    OptimizeMethod::MaxSharpe => "Max Sharpe portfolio",
    OptimizeMethod::MinVariance => "Min variance portfolio",
  };
  format!(
    "{}: expected return {:.1}%, volatility {:.1}%, Sharpe {:.2}",
    label,
    ret * 100.0,
    vol * 100.0,
    sharpe
  )
}
