//! # Return Statistics
//!
//! $$
//! \mu = 252\,\bar r,\qquad \Sigma_{ij} = \frac{252}{T-1}\sum_t (r_{it}-\bar r_i)(r_{jt}-\bar r_j)
//! $$
//!
//! Mean vector and sample covariance estimation with annualization. Every
//! optimizer call derives a fresh [`CovarianceModel`] from its dataset; the
//! model is never cached or shared.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;

use crate::dataset::ReturnsDataset;

/// Annualization factor for daily return series.
pub const PERIODS_PER_YEAR: f64 = 252.0;

/// Annualized first and second moments of a returns dataset.
#[derive(Clone, Debug)]
pub struct CovarianceModel {
  /// Annualized mean return per asset, length N.
  pub mean: Array1<f64>,
  /// Annualized N x N sample covariance matrix.
  pub covariance: Array2<f64>,
}

impl CovarianceModel {
  /// Estimate annualized moments from a validated dataset.
  pub fn estimate(dataset: &ReturnsDataset) -> Self {
    Self::estimate_with_periods(dataset, PERIODS_PER_YEAR)
  }

  /// Estimate with an explicit periods-per-year factor (e.g. 12 for monthly).
  pub fn estimate_with_periods(dataset: &ReturnsDataset, periods_per_year: f64) -> Self {
    let returns = dataset.returns();
    let n = dataset.n_assets();
    let t = dataset.n_periods();

    let mean_periodic = returns
      .mean_axis(Axis(1))
      .expect("dataset guarantees at least one observation");

    // Unbiased sample covariance (ddof = 1), T >= 10 by dataset invariant.
    let mut covariance = Array2::<f64>::zeros((n, n));
    let denom = (t - 1) as f64;
    for i in 0..n {
      for j in i..n {
        let mut acc = 0.0;
        for k in 0..t {
          acc += (returns[[i, k]] - mean_periodic[i]) * (returns[[j, k]] - mean_periodic[j]);
        }
        let c = acc / denom * periods_per_year;
        covariance[[i, j]] = c;
        covariance[[j, i]] = c;
      }
    }

    Self {
      mean: mean_periodic * periods_per_year,
      covariance,
    }
  }

  /// Annualized portfolio variance `w' Sigma w`.
  pub fn portfolio_variance(&self, weights: &Array1<f64>) -> f64 {
    weights.dot(&self.covariance.dot(weights))
  }

  /// Annualized portfolio volatility.
  pub fn portfolio_volatility(&self, weights: &Array1<f64>) -> f64 {
    self.portfolio_variance(weights).max(0.0).sqrt()
  }

  /// Annualized expected portfolio return `w . mu`.
  pub fn portfolio_return(&self, weights: &Array1<f64>) -> f64 {
    weights.dot(&self.mean)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn two_asset_dataset() -> ReturnsDataset {
    // Perfectly anti-correlated pair with known per-period moments.
    let a: Vec<f64> = (0..12).map(|t| if t % 2 == 0 { 0.01 } else { -0.01 }).collect();
    let b: Vec<f64> = a.iter().map(|r| -r).collect();
    ReturnsDataset::from_series(vec![("A".to_string(), a), ("B".to_string(), b)]).unwrap()
  }

  #[test]
  fn mean_is_annualized() {
    let ds = ReturnsDataset::from_series(vec![
      ("A".to_string(), vec![0.001; 12]),
      ("B".to_string(), vec![0.002; 12]),
    ])
    .unwrap();

    let model = CovarianceModel::estimate(&ds);
    assert_abs_diff_eq!(model.mean[0], 0.252, epsilon = 1e-12);
    assert_abs_diff_eq!(model.mean[1], 0.504, epsilon = 1e-12);
  }

  #[test]
  fn covariance_is_symmetric_with_anticorrelated_off_diagonal() {
    let model = CovarianceModel::estimate(&two_asset_dataset());

    assert_abs_diff_eq!(model.covariance[[0, 1]], model.covariance[[1, 0]], epsilon = 1e-15);
    assert!(model.covariance[[0, 0]] > 0.0);
    assert_abs_diff_eq!(
      model.covariance[[0, 1]],
      -model.covariance[[0, 0]],
      epsilon = 1e-12
    );
  }

  #[test]
  fn equal_split_of_anticorrelated_pair_has_zero_variance() {
    let model = CovarianceModel::estimate(&two_asset_dataset());
    let w = array![0.5, 0.5];

    assert_abs_diff_eq!(model.portfolio_variance(&w), 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(model.portfolio_volatility(&w), 0.0, epsilon = 1e-6);
  }

  #[test]
  fn monthly_periodicity_scales_moments() {
    let ds = two_asset_dataset();
    let daily = CovarianceModel::estimate_with_periods(&ds, 252.0);
    let monthly = CovarianceModel::estimate_with_periods(&ds, 12.0);

    assert_abs_diff_eq!(
      daily.covariance[[0, 0]] / monthly.covariance[[0, 0]],
      21.0,
      epsilon = 1e-9
    );
  }
}
