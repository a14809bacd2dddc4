//! # portfolio-rs
//!
//! $$
//! \mathbf{w}^\* = \arg\min_{\mathbf{w}\in\Delta^{N-1}} \mathcal{R}(\mathbf{w})
//! $$
//!
//! Portfolio optimization over historical return series: Markowitz
//! mean-variance, Black-Litterman view blending, risk parity, scenario-based
//! CVaR minimization and efficient frontier generation. Every operation is a
//! pure, synchronous computation over a [`dataset::ReturnsDataset`] and a
//! configuration value; nothing is cached or shared between calls.

pub mod black_litterman;
pub mod cvar;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod frontier;
pub mod mean_variance;
pub mod risk_parity;
pub mod stats;
pub mod types;

pub use black_litterman::black_litterman;
pub use black_litterman::InvestorViews;
pub use cvar::cvar_optimize;
pub use dataset::log_returns_series;
pub use dataset::ReturnsDataset;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use error::PortfolioError;
pub use frontier::efficient_frontier;
pub use mean_variance::optimize as mean_variance_optimize;
pub use risk_parity::risk_parity;
pub use stats::CovarianceModel;
pub use types::BlackLittermanResult;
pub use types::OptimizationResult;
pub use types::OptimizeMethod;
pub use types::RiskParityResult;
