//! Drawdown metrics module.
//!
//! Provides the per-ticker statistics shown by the monitor:
//! - Running peak and daily drawdown curve
//! - Current and maximum drawdown
//! - Recovery ratio (share of days worse than today)

pub mod drawdown;

pub use drawdown::{AnalysisError, AnalysisResult, DrawdownAnalyzer, DrawdownPoint};
