//! # Returns Dataset
//!
//! $$
//! R \in \mathbb{R}^{N \times T},\quad N \ge 2,\ T \ge 10
//! $$
//!
//! Validated container for aligned historical return series. Construction is
//! the single validation boundary for data-shape preconditions; everything
//! downstream can assume a well-formed matrix.

use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;

use crate::error::PortfolioError;

/// Minimum number of assets accepted by the engine.
pub const MIN_ASSETS: usize = 2;
/// Minimum number of observations per return series.
pub const MIN_OBSERVATIONS: usize = 10;

/// Immutable set of aligned periodic return series, one row per asset.
#[derive(Clone, Debug)]
pub struct ReturnsDataset {
  assets: Vec<String>,
  returns: Array2<f64>,
}

impl ReturnsDataset {
  /// Build a dataset from `(asset id, return series)` pairs.
  ///
  /// Rejects fewer than [`MIN_ASSETS`] assets, series shorter than
  /// [`MIN_OBSERVATIONS`], mismatched series lengths and duplicate ids.
  pub fn from_series<I, S>(series: I) -> Result<Self, PortfolioError>
  where
    I: IntoIterator<Item = (S, Vec<f64>)>,
    S: Into<String>,
  {
    let series: Vec<(String, Vec<f64>)> = series.into_iter().map(|(a, r)| (a.into(), r)).collect();

    if series.len() < MIN_ASSETS {
      return Err(PortfolioError::TooFewAssets {
        got: series.len(),
        min: MIN_ASSETS,
      });
    }

    let (first_asset, first_returns) = &series[0];
    let n_periods = first_returns.len();

    for (asset, returns) in &series {
      if returns.len() < MIN_OBSERVATIONS {
        return Err(PortfolioError::TooFewObservations {
          asset: asset.clone(),
          got: returns.len(),
          min: MIN_OBSERVATIONS,
        });
      }
      if returns.len() != n_periods {
        return Err(PortfolioError::MismatchedSeriesLengths {
          asset: asset.clone(),
          got: returns.len(),
          reference: first_asset.clone(),
          expected: n_periods,
        });
      }
    }

    let mut assets = Vec::with_capacity(series.len());
    let mut flat = Vec::with_capacity(series.len() * n_periods);
    for (asset, returns) in series {
      if assets.contains(&asset) {
        return Err(PortfolioError::DuplicateAsset(asset));
      }
      assets.push(asset);
      flat.extend(returns);
    }

    let n_assets = assets.len();
    let returns = Array2::from_shape_vec((n_assets, n_periods), flat)
      .expect("row-major layout matches (n_assets, n_periods)");

    Ok(Self { assets, returns })
  }

  /// Build a dataset from `(asset id, close price series)` pairs, converting
  /// each series to log returns first. Non-positive prices are skipped, so a
  /// series with a bad tick in a different position than its peers can still
  /// fail the length check.
  pub fn from_closes<I, S>(series: I) -> Result<Self, PortfolioError>
  where
    I: IntoIterator<Item = (S, Vec<f64>)>,
    S: Into<String>,
  {
    Self::from_series(
      series
        .into_iter()
        .map(|(asset, closes)| (asset, log_returns_series(&closes))),
    )
  }

  /// Asset identifiers in insertion order.
  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  /// Number of assets.
  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  /// Number of observations per asset.
  pub fn n_periods(&self) -> usize {
    self.returns.ncols()
  }

  /// Full `assets x periods` return matrix.
  pub fn returns(&self) -> ArrayView2<'_, f64> {
    self.returns.view()
  }

  /// One cross-asset observation: the returns of every asset at period `t`.
  pub fn observation(&self, t: usize) -> ArrayView1<'_, f64> {
    self.returns.column(t)
  }
}

/// Convert a close-price series into log returns, skipping pairs that touch a
/// non-positive price.
pub fn log_returns_series(closes: &[f64]) -> Vec<f64> {
  closes
    .windows(2)
    .filter(|pair| pair[0] > 0.0 && pair[1] > 0.0)
    .map(|pair| (pair[1] / pair[0]).ln())
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn series(len: usize, base: f64) -> Vec<f64> {
    (0..len).map(|t| base + 0.001 * (t as f64).sin()).collect()
  }

  #[test]
  fn accepts_well_formed_series() {
    let ds = ReturnsDataset::from_series(vec![
      ("AAA".to_string(), series(20, 0.001)),
      ("BBB".to_string(), series(20, -0.0005)),
    ])
    .unwrap();

    assert_eq!(ds.n_assets(), 2);
    assert_eq!(ds.n_periods(), 20);
    assert_eq!(ds.assets(), &["AAA".to_string(), "BBB".to_string()]);
    assert_eq!(ds.observation(0).len(), 2);
  }

  #[test]
  fn rejects_single_asset() {
    let err = ReturnsDataset::from_series(vec![("AAA".to_string(), series(20, 0.0))]).unwrap_err();
    assert_eq!(err, PortfolioError::TooFewAssets { got: 1, min: 2 });
  }

  #[test]
  fn rejects_short_series() {
    let err = ReturnsDataset::from_series(vec![
      ("AAA".to_string(), series(9, 0.0)),
      ("BBB".to_string(), series(9, 0.0)),
    ])
    .unwrap_err();

    assert!(matches!(err, PortfolioError::TooFewObservations { got: 9, .. }));
  }

  #[test]
  fn rejects_mismatched_lengths() {
    let err = ReturnsDataset::from_series(vec![
      ("AAA".to_string(), series(20, 0.0)),
      ("BBB".to_string(), series(21, 0.0)),
    ])
    .unwrap_err();

    assert!(matches!(
      err,
      PortfolioError::MismatchedSeriesLengths { got: 21, expected: 20, .. }
    ));
  }

  #[test]
  fn rejects_duplicate_ids() {
    let err = ReturnsDataset::from_series(vec![
      ("AAA".to_string(), series(20, 0.0)),
      ("AAA".to_string(), series(20, 0.1)),
    ])
    .unwrap_err();

    assert_eq!(err, PortfolioError::DuplicateAsset("AAA".to_string()));
  }

  #[test]
  fn log_returns_skip_non_positive_prices() {
    let closes = vec![100.0, 110.0, 0.0, 121.0, 133.1];
    let rets = log_returns_series(&closes);

    assert_eq!(rets.len(), 2);
    assert!((rets[0] - (1.1_f64).ln()).abs() < 1e-12);
    assert!((rets[1] - (1.1_f64).ln()).abs() < 1e-12);
  }

  #[test]
  fn from_closes_converts_prices_to_returns() {
    let closes = |start: f64| -> Vec<f64> {
      (0..21).map(|t| start * (1.0 + 0.01 * (t as f64).sin())).collect()
    };
    let ds = ReturnsDataset::from_closes(vec![
      ("AAA".to_string(), closes(100.0)),
      ("BBB".to_string(), closes(50.0)),
    ])
    .unwrap();

    assert_eq!(ds.n_periods(), 20);
    // Same relative price path, same log returns.
    assert!((ds.observation(0)[0] - ds.observation(0)[1]).abs() < 1e-12);
  }

  #[test]
  fn from_closes_still_validates_resulting_lengths() {
    // A bad tick in one series desynchronizes it from its peers.
    let mut short = vec![100.0; 21];
    short[5] = -1.0;
    let err = ReturnsDataset::from_closes(vec![
      ("AAA".to_string(), vec![100.0; 21]),
      ("BBB".to_string(), short),
    ])
    .unwrap_err();

    assert!(matches!(err, PortfolioError::MismatchedSeriesLengths { got: 18, expected: 20, .. }));
  }
}
