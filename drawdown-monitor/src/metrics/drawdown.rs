//! Drawdown and recovery-ratio analysis.
//!
//! For a close series `p[0..n]` the running peak is `max(p[0..=i])` and the
//! drawdown of day `i` is `(p[i] - peak[i]) / peak[i]`, a non-positive
//! fraction. The recovery ratio is the share of days whose drawdown was
//! strictly worse than today's.

use chrono::NaiveDate;
use rayon::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::PriceSeries;

/// Invalid input handed to the analyzer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("Invalid input: price series is empty")]
    EmptySeries,

    #[error("Invalid input: non-positive price {price} at index {index}")]
    NonPositivePrice { index: usize, price: Decimal },

    #[error("Invalid input: date {date} at index {index} is not after the previous day")]
    OutOfOrder { index: usize, date: NaiveDate },

    #[error("Drawdown {0} has no f64 representation")]
    Unrepresentable(Decimal),
}

/// Drawdown state for a single trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawdownPoint {
    pub date: NaiveDate,
    pub close: Decimal,
    /// Highest close from series start through this day
    pub running_peak: Decimal,
    /// `(close - running_peak) / running_peak`, always <= 0
    pub drawdown: Decimal,
}

/// Result of analyzing one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Drawdown of the most recent day (fraction, <= 0)
    pub current_drawdown: f64,
    /// Most negative drawdown over the whole history (fraction, <= 0)
    pub max_drawdown: f64,
    /// Share of days with a drawdown strictly below `current_drawdown`
    pub recovery_ratio: f64,

    pub current_price: Decimal,
    pub historical_max: Decimal,
    pub peak_date: NaiveDate,
    pub max_drawdown_date: NaiveDate,
    pub observations: usize,
    pub worse_days: usize,
}

impl AnalysisResult {
    /// One-line summary with percentages.
    pub fn summary(&self) -> String {
        format!(
            "Current: {:+.2}% | Max: {:+.2}% ({}) | Recovery ratio: {:.2}% ({}/{} days) | Peak: {} ({})",
            self.current_drawdown * 100.0,
            self.max_drawdown * 100.0,
            self.max_drawdown_date,
            self.recovery_ratio * 100.0,
            self.worse_days,
            self.observations,
            self.historical_max,
            self.peak_date,
        )
    }
}

/// Drawdown analyzer.
pub struct DrawdownAnalyzer;

impl DrawdownAnalyzer {
    /// Reject series the analysis is undefined for.
    pub fn validate(series: &PriceSeries) -> Result<(), AnalysisError> {
        if series.is_empty() {
            return Err(AnalysisError::EmptySeries);
        }

        let mut prev_date: Option<NaiveDate> = None;
        for (index, point) in series.points.iter().enumerate() {
            if point.close <= Decimal::ZERO {
                return Err(AnalysisError::NonPositivePrice {
                    index,
                    price: point.close,
                });
            }
            if let Some(prev) = prev_date {
                if point.date <= prev {
                    return Err(AnalysisError::OutOfOrder {
                        index,
                        date: point.date,
                    });
                }
            }
            prev_date = Some(point.date);
        }

        Ok(())
    }

    /// Per-day running peak and drawdown, in series order.
    pub fn drawdown_curve(series: &PriceSeries) -> Result<Vec<DrawdownPoint>, AnalysisError> {
        Self::validate(series)?;

        let mut running_peak = series.points[0].close;
        let curve = series
            .points
            .iter()
            .map(|point| {
                if point.close > running_peak {
                    running_peak = point.close;
                }
                DrawdownPoint {
                    date: point.date,
                    close: point.close,
                    running_peak,
                    drawdown: (point.close - running_peak) / running_peak,
                }
            })
            .collect();

        Ok(curve)
    }

    /// Analyze a single series.
    pub fn analyze(series: &PriceSeries) -> Result<AnalysisResult, AnalysisError> {
        let curve = Self::drawdown_curve(series)?;
        let last = *curve.last().ok_or(AnalysisError::EmptySeries)?;
        let deepest = *curve
            .iter()
            .min_by_key(|p| p.drawdown)
            .ok_or(AnalysisError::EmptySeries)?;

        let current = last.drawdown;
        let worse_days = curve.iter().filter(|p| p.drawdown < current).count();
        let observations = curve.len();

        // First day the final peak was reached.
        let peak_date = curve
            .iter()
            .find(|p| p.close == last.running_peak)
            .map(|p| p.date)
            .unwrap_or(last.date);

        Ok(AnalysisResult {
            current_drawdown: to_f64(current)?,
            max_drawdown: to_f64(deepest.drawdown)?,
            recovery_ratio: worse_days as f64 / observations as f64,
            current_price: last.close,
            historical_max: last.running_peak,
            peak_date,
            max_drawdown_date: deepest.date,
            observations,
            worse_days,
        })
    }

    /// Analyze many series independently; one failure does not affect the
    /// others. Output order matches input order.
    pub fn analyze_many(
        series: &[PriceSeries],
    ) -> Vec<(String, Result<AnalysisResult, AnalysisError>)> {
        series
            .par_iter()
            .map(|s| (s.ticker.clone(), Self::analyze(s)))
            .collect()
    }
}

fn to_f64(value: Decimal) -> Result<f64, AnalysisError> {
    value.to_f64().ok_or(AnalysisError::Unrepresentable(value))
}
