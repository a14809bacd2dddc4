//! # CVaR Optimizer
//!
//! $$
//! \min_{\mathbf{w},\,\nu}\ \nu + \frac{1}{(1-c)S}\sum_{s=1}^{S}\max(0, \ell_s(\mathbf{w}) - \nu)
//! $$
//!
//! Rockafellar-Uryasev scenario formulation. Scenarios are whole historical
//! observations resampled with replacement, so cross-asset correlation (and
//! tail co-movement in particular) survives into the simulation. The VaR
//! auxiliary variable is optimized jointly with the softmax weight scores.
//!
//! `expected_risk` is the annualized CVaR loss magnitude itself, which is
//! non-decreasing in the confidence level.

use std::time::Instant;

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::solver::neldermead::NelderMead;
use ndarray::Array1;
use ndarray::Array2;
use rand::Rng;
use tracing::debug;
use tracing::warn;

use crate::dataset::ReturnsDataset;
use crate::error::PortfolioError;
use crate::mean_variance::elapsed_ms;
use crate::mean_variance::sharpe;
use crate::mean_variance::softmax;
use crate::stats::CovarianceModel;
use crate::types::weight_map;
use crate::types::OptimizationResult;

const MAX_ITERS: u64 = 2000;
const SD_TOLERANCE: f64 = 1e-7;
const TARGET_PENALTY: f64 = 200.0;

/// Accepted absolute gap between achieved and requested expected return.
const TARGET_RETURN_TOLERANCE: f64 = 0.05;

struct CvarCost {
  /// S x N scenario return matrix.
  scenarios: Array2<f64>,
  mean: Array1<f64>,
  confidence_level: f64,
  target_return: Option<f64>,
}

impl CostFunction for CvarCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let n = self.scenarios.ncols();
    let w = softmax(&x[..n]);
    let var = x[n];

    let losses = -self.scenarios.dot(&w);
    let s = losses.len() as f64;
    let excess: f64 = losses.iter().map(|&l| (l - var).max(0.0)).sum();
    let cvar = var + excess / ((1.0 - self.confidence_level) * s);

    let penalty = match self.target_return {
      Some(target) => TARGET_PENALTY * (w.dot(&self.mean) - target).powi(2),
      None => 0.0,
    };

    Ok(cvar + penalty)
  }
}

/// Minimize portfolio CVaR at `confidence_level` over resampled scenarios.
///
/// `periods_per_year` annualizes moments (linearly) and the per-period
/// VaR/CVaR tail statistics (by its square root).
pub fn cvar_optimize(
  dataset: &ReturnsDataset,
  confidence_level: f64,
  n_simulations: usize,
  target_return: Option<f64>,
  risk_free_rate: f64,
  periods_per_year: f64,
) -> Result<OptimizationResult, PortfolioError> {
  let start = Instant::now();

  if !(confidence_level > 0.0 && confidence_level < 1.0) {
    return Err(PortfolioError::InvalidConfidenceLevel(confidence_level));
  }
  if n_simulations == 0 {
    return Err(PortfolioError::InvalidSimulationCount(n_simulations));
  }

  let n = dataset.n_assets();
  let assets = dataset.assets();
  let model = CovarianceModel::estimate_with_periods(dataset, periods_per_year);
  debug!(n_assets = n, confidence_level, n_simulations, "cvar solve");

  if let Some(target) = target_return {
    let lo = model.mean.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = model.mean.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if target < lo - 1e-12 || target > hi + 1e-12 {
      let weights = Array1::from_elem(n, 1.0 / n as f64);
      return Ok(best_effort_result(
        &model,
        &weights,
        assets,
        confidence_level,
        risk_free_rate,
        periods_per_year,
        start,
        false,
        Some(format!(
          "target return {:.4} is outside the achievable long-only range [{:.4}, {:.4}]",
          target, lo, hi
        )),
        None,
      ));
    }
  }

  let scenarios = resample_scenarios(dataset, n_simulations);

  // Initial VaR guess from the equal-weight loss distribution.
  let equal = Array1::from_elem(n, 1.0 / n as f64);
  let var0 = empirical_var(&(-scenarios.dot(&equal)), confidence_level);

  let mut x0 = vec![0.0; n + 1];
  x0[n] = var0;
  let mut simplex = Vec::with_capacity(n + 2);
  simplex.push(x0.clone());
  for i in 0..n {
    let mut point = x0.clone();
    point[i] = 1.0;
    simplex.push(point);
  }
  let mut point = x0.clone();
  point[n] += var0.abs().max(0.01) * 0.5;
  simplex.push(point);

  let cost = CvarCost {
    scenarios: scenarios.clone(),
    mean: model.mean.clone(),
    confidence_level,
    target_return,
  };

  let best_x = match NelderMead::new(simplex).with_sd_tolerance(SD_TOLERANCE) {
    Ok(solver) => match Executor::new(cost, solver)
      .configure(|state| state.max_iters(MAX_ITERS))
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

  let result = match best_x {
    Some(x) => {
      let weights = softmax(&x[..n]);
      let mut out = best_effort_result(
        &model,
        &weights,
        assets,
        confidence_level,
        risk_free_rate,
        periods_per_year,
        start,
        true,
        None,
        Some(&scenarios),
      );
      if let Some(target) = target_return {
        if (out.expected_return - target).abs() > TARGET_RETURN_TOLERANCE {
          out.success = false;
          out.message = Some(format!(
            "optimizer reached expected return {:.4}, more than {:.2} away from target {:.4}",
            out.expected_return, TARGET_RETURN_TOLERANCE, target
          ));
        }
      }
      out
    }
    None => {
      let weights = Array1::from_elem(n, 1.0 / n as f64);
      best_effort_result(
        &model,
        &weights,
        assets,
        confidence_level,
        risk_free_rate,
        periods_per_year,
        start,
        false,
        Some("CVaR optimizer did not produce an iterate".to_string()),
        Some(&scenarios),
      )
    }
  };

  Ok(result)
}

/// Draw whole historical observations with replacement, one row per scenario.
fn resample_scenarios(dataset: &ReturnsDataset, n_simulations: usize) -> Array2<f64> {
  let mut rng = rand::thread_rng();
  let t = dataset.n_periods();
  let n = dataset.n_assets();

  let mut scenarios = Array2::<f64>::zeros((n_simulations, n));
  for s in 0..n_simulations {
    let pick = rng.gen_range(0..t);
    scenarios.row_mut(s).assign(&dataset.observation(pick));
  }
  scenarios
}

/// Empirical `confidence`-quantile of a loss sample.
fn empirical_var(losses: &Array1<f64>, confidence: f64) -> f64 {
  let mut sorted: Vec<f64> = losses.to_vec();
  sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
  let idx = ((confidence * sorted.len() as f64).ceil() as usize)
    .clamp(1, sorted.len())
    - 1;
  sorted[idx]
}

/// Tail mean of losses at and beyond the VaR threshold.
fn empirical_cvar(losses: &Array1<f64>, confidence: f64) -> (f64, f64) {
  let mut sorted: Vec<f64> = losses.to_vec();
  sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
  let idx = ((confidence * sorted.len() as f64).ceil() as usize)
    .clamp(1, sorted.len())
    - 1;
  let var = sorted[idx];
  let tail = &sorted[idx..];
  let cvar = tail.iter().sum::<f64>() / tail.len() as f64;
  (var, cvar)
}

#[allow(clippy::too_many_arguments)]
fn best_effort_result(
  model: &CovarianceModel,
  weights: &Array1<f64>,
  assets: &[String],
  confidence_level: f64,
  risk_free_rate: f64,
  periods_per_year: f64,
  start: Instant,
  success: bool,
  message: Option<String>,
  scenarios: Option<&Array2<f64>>,
) -> OptimizationResult {
  let expected_return = model.portfolio_return(weights);
  let volatility = model.portfolio_volatility(weights);
  let sharpe_ratio = sharpe(expected_return, volatility, risk_free_rate);

  // Per-period tail statistics, annualized by the square root of the
  // period count.
  let (var_ann, cvar_ann) = match scenarios {
    Some(sc) => {
      let losses = -sc.dot(weights);
      let (var, cvar) = empirical_cvar(&losses, confidence_level);
      (var * periods_per_year.sqrt(), cvar * periods_per_year.sqrt())
    }
    None => (0.0, volatility),
  };

  OptimizationResult {
    success,
    weights: weight_map(assets, weights),
    expected_return,
    expected_risk: cvar_ann,
    sharpe_ratio,
    method: "cvar".to_string(),
    interpretation: format!(
      "CVaR portfolio at {:.0}% confidence: expected return {:.1}%, CVaR {:.1}%, VaR {:.1}% (annualized)",
      confidence_level * 100.0,
      expected_return * 100.0,
      cvar_ann * 100.0,
      var_ann * 100.0
    ),
    compute_time_ms: elapsed_ms(start),
    message,
    turnover: None,
  }
}
