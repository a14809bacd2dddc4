//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{Optimize}(\mu, \Sigma,\ \text{method})
//! $$
//!
//! High-level facade over the optimizers. Each call estimates statistics
//! fresh from its dataset and holds no mutable state, so a single engine
//! value can be shared across threads and invoked concurrently; callers that
//! need deadlines wrap invocations in their own worker pool and simply drop
//! the result on timeout.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::black_litterman;
use crate::black_litterman::InvestorViews;
use crate::cvar;
use crate::dataset::ReturnsDataset;
use crate::error::PortfolioError;
use crate::frontier;
use crate::mean_variance;
use crate::risk_parity;
use crate::risk_parity::DEFAULT_MAX_ITERATIONS;
use crate::risk_parity::DEFAULT_TOLERANCE;
use crate::stats::CovarianceModel;
use crate::stats::PERIODS_PER_YEAR;
use crate::types::turnover;
use crate::types::BlackLittermanResult;
use crate::types::OptimizationResult;
use crate::types::OptimizeMethod;
use crate::types::RiskParityResult;

/// Default annualized risk-free rate.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.03;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortfolioEngineConfig {
  /// Annualized risk-free rate used in Sharpe computations.
  pub risk_free_rate: f64,
  /// Annualization factor for the supplied return periodicity.
  pub periods_per_year: f64,
  /// Pre-existing portfolio weights; when present, every result carries a
  /// turnover diagnostic against them.
  pub current_weights: Option<BTreeMap<String, f64>>,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      risk_free_rate: DEFAULT_RISK_FREE_RATE,
      periods_per_year: PERIODS_PER_YEAR,
      current_weights: None,
    }
  }
}

/// Stateless entry point for all optimization methods.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: PortfolioEngineConfig,
}

impl PortfolioEngine {
  /// Construct an engine with explicit configuration.
  pub fn new(config: PortfolioEngineConfig) -> Self {
    Self { config }
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  /// Markowitz optimization. `method` is `"max_sharpe"` or `"min_variance"`;
  /// anything else is a validation failure.
  pub fn mean_variance(
    &self,
    dataset: &ReturnsDataset,
    method: &str,
    target_return: Option<f64>,
  ) -> Result<OptimizationResult, PortfolioError> {
    let method: OptimizeMethod = method.parse()?;
    let model = self.moments(dataset);
    let mut result = mean_variance::optimize(
      &model,
      method,
      self.config.risk_free_rate,
      target_return,
      dataset.assets(),
    );
    self.attach_turnover(&mut result);
    Ok(result)
  }

  /// Black-Litterman blend of equilibrium returns and investor views.
  pub fn black_litterman(
    &self,
    dataset: &ReturnsDataset,
    market_caps: &[f64],
    tau: f64,
    views: Option<&InvestorViews>,
  ) -> Result<BlackLittermanResult, PortfolioError> {
    let model = self.moments(dataset);
    let mut result = black_litterman::black_litterman(
      &model,
      market_caps,
      tau,
      views,
      self.config.risk_free_rate,
      dataset.assets(),
    )?;
    self.attach_turnover(&mut result.optimization);
    Ok(result)
  }

  /// Equal-risk-budget allocation. Defaults: 100 iterations, 1e-6 tolerance.
  pub fn risk_parity(
    &self,
    dataset: &ReturnsDataset,
    max_iterations: Option<usize>,
    tolerance: Option<f64>,
  ) -> RiskParityResult {
    let model = self.moments(dataset);
    let mut result = risk_parity::risk_parity(
      &model,
      max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
      tolerance.unwrap_or(DEFAULT_TOLERANCE),
      self.config.risk_free_rate,
      dataset.assets(),
    );
    self.attach_turnover(&mut result.optimization);
    result
  }

  /// Scenario-based CVaR minimization at `confidence_level`.
  pub fn cvar(
    &self,
    dataset: &ReturnsDataset,
    confidence_level: f64,
    n_simulations: usize,
    target_return: Option<f64>,
  ) -> Result<OptimizationResult, PortfolioError> {
    let mut result = cvar::cvar_optimize(
      dataset,
      confidence_level,
      n_simulations,
      target_return,
      self.config.risk_free_rate,
      self.config.periods_per_year,
    )?;
    self.attach_turnover(&mut result);
    Ok(result)
  }

  /// Efficient frontier sweep, sorted ascending by risk.
  pub fn efficient_frontier(
    &self,
    dataset: &ReturnsDataset,
    n_portfolios: usize,
    method: &str,
  ) -> Result<Vec<OptimizationResult>, PortfolioError> {
    let method: OptimizeMethod = method.parse()?;
    let model = self.moments(dataset);
    let mut points = frontier::efficient_frontier(
      &model,
      n_portfolios,
      method,
      self.config.risk_free_rate,
      dataset.assets(),
    )?;
    for point in &mut points {
      self.attach_turnover(point);
    }
    Ok(points)
  }

  fn moments(&self, dataset: &ReturnsDataset) -> CovarianceModel {
    debug!(
      n_assets = dataset.n_assets(),
      n_periods = dataset.n_periods(),
      "estimating moments"
    );
    CovarianceModel::estimate_with_periods(dataset, self.config.periods_per_year)
  }

  fn attach_turnover(&self, result: &mut OptimizationResult) {
    if let Some(current) = &self.config.current_weights {
      result.turnover = Some(turnover(&result.weights, current));
    }
  }
}
