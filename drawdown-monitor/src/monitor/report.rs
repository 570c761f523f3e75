//! Per-ticker report rows and the terminal table.

use std::cmp::Ordering;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::metrics::AnalysisResult;

/// Table column used for ordering rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SortColumn {
    Ticker,
    CurrentPrice,
    HistoricalMax,
    CurrentDrawdown,
    MaxDrawdown,
    RecoveryRatio,
}

impl SortColumn {
    pub fn header(&self) -> &'static str {
        match self {
            Self::Ticker => "Ticker",
            Self::CurrentPrice => "Current Price",
            Self::HistoricalMax => "Historical Max",
            Self::CurrentDrawdown => "Current Drawdown (%)",
            Self::MaxDrawdown => "Max Drawdown (%)",
            Self::RecoveryRatio => "Recovery Ratio (%)",
        }
    }

    const ALL: [SortColumn; 6] = [
        Self::Ticker,
        Self::CurrentPrice,
        Self::HistoricalMax,
        Self::CurrentDrawdown,
        Self::MaxDrawdown,
        Self::RecoveryRatio,
    ];
}

/// One row: a ticker and either its analysis or the reason it has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerReport {
    pub ticker: String,
    pub outcome: Result<AnalysisResult, String>,
}

impl TickerReport {
    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(|s| s.as_str())
    }
}

/// Everything a single refresh produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub tickers_file: PathBuf,
    pub reports: Vec<TickerReport>,
    pub updated_at: DateTime<Utc>,
    pub sort_by: SortColumn,
    pub sort_descending: bool,
}

impl RefreshOutcome {
    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_err()).count()
    }

    /// Status line shown under the table.
    pub fn status(&self) -> String {
        if self.reports.is_empty() {
            format!("No tickers in {}", self.tickers_file.display())
        } else {
            format!(
                "Last update: {} ({} tickers, {} failed)",
                self.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
                self.reports.len(),
                self.failed()
            )
        }
    }

    /// Re-order rows in place.
    pub fn sort(&mut self, column: SortColumn, descending: bool) {
        sort_reports(&mut self.reports, column, descending);
        self.sort_by = column;
        self.sort_descending = descending;
    }
}

fn compare_metric(column: SortColumn, a: &AnalysisResult, b: &AnalysisResult) -> Ordering {
    match column {
        SortColumn::Ticker => Ordering::Equal,
        SortColumn::CurrentPrice => a.current_price.cmp(&b.current_price),
        SortColumn::HistoricalMax => a.historical_max.cmp(&b.historical_max),
        SortColumn::CurrentDrawdown => a.current_drawdown.total_cmp(&b.current_drawdown),
        SortColumn::MaxDrawdown => a.max_drawdown.total_cmp(&b.max_drawdown),
        SortColumn::RecoveryRatio => a.recovery_ratio.total_cmp(&b.recovery_ratio),
    }
}

/// Sort rows by `column`. Rows without metrics stay at the bottom in
/// either direction, except when sorting by ticker.
pub fn sort_reports(reports: &mut [TickerReport], column: SortColumn, descending: bool) {
    let directed = |ord: Ordering| if descending { ord.reverse() } else { ord };

    reports.sort_by(|a, b| {
        if column == SortColumn::Ticker {
            return directed(a.ticker.cmp(&b.ticker));
        }
        match (&a.outcome, &b.outcome) {
            (Ok(x), Ok(y)) => directed(compare_metric(column, x, y)),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => a.ticker.cmp(&b.ticker),
        }
    });
}

/// Insert `,` between thousands in the integer part of a formatted number.
fn group_thousands(formatted: &str) -> String {
    let (sign, rest) = match formatted.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", formatted),
    };
    let (int_part, frac_part) = match rest.find('.') {
        Some(pos) => rest.split_at(pos),
        None => (rest, ""),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    format!("{}{}{}", sign, grouped, frac_part)
}

/// Price with thousands separators, e.g. `1,234.50`.
pub fn fmt_price(value: Decimal, digits: usize) -> String {
    let rounded = value.round_dp(digits as u32);
    group_thousands(&format!("{:.*}", digits, rounded))
}

/// Signed percentage of a fraction, e.g. `-15.00%`.
pub fn fmt_signed_pct(fraction: f64, digits: usize) -> String {
    let pct = fraction * 100.0;
    // Avoid printing "-0.00%".
    let pct = if pct == 0.0 { 0.0 } else { pct };
    format!("{:+.*}%", digits, pct)
}

/// Unsigned percentage of a fraction, e.g. `33.33%`.
pub fn fmt_pct(fraction: f64, digits: usize) -> String {
    format!("{:.*}%", digits, fraction * 100.0)
}

fn row_cells(report: &TickerReport, digits: usize) -> Vec<String> {
    match &report.outcome {
        Ok(r) => vec![
            report.ticker.clone(),
            fmt_price(r.current_price, digits),
            fmt_price(r.historical_max, digits),
            fmt_signed_pct(r.current_drawdown, digits),
            fmt_signed_pct(r.max_drawdown, digits),
            fmt_pct(r.recovery_ratio, digits),
            String::new(),
        ],
        Err(e) => {
            let mut cells = vec![report.ticker.clone()];
            cells.extend(std::iter::repeat(String::new()).take(5));
            cells.push(e.clone());
            cells
        }
    }
}

/// Render the outcome as an aligned text table followed by the status line.
pub fn render_table(outcome: &RefreshOutcome, digits: usize) -> String {
    let mut headers: Vec<String> = SortColumn::ALL
        .iter()
        .map(|c| {
            if *c == outcome.sort_by {
                let arrow = if outcome.sort_descending { "▼" } else { "▲" };
                format!("{} {}", c.header(), arrow)
            } else {
                c.header().to_string()
            }
        })
        .collect();
    headers.push("Error".to_string());

    let rows: Vec<Vec<String>> = outcome.reports.iter().map(|r| row_cells(r, digits)).collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    // Ticker and error are left aligned, numbers right aligned.
    let last = headers.len() - 1;
    let format_line = |cells: &[String]| -> String {
        let line = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                if i == 0 || i == last {
                    format!("{:<width$}", cell, width = widths[i])
                } else {
                    format!("{:>width$}", cell, width = widths[i])
                }
            })
            .collect::<Vec<_>>()
            .join("  ");
        line.trim_end().to_string()
    };

    let mut out = String::new();
    out.push_str(&format_line(&headers));
    out.push('\n');
    let rule_len: usize = widths.iter().sum::<usize>() + 2 * (widths.len() - 1);
    out.push_str(&"-".repeat(rule_len));
    out.push('\n');
    for row in &rows {
        out.push_str(&format_line(row));
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&outcome.status());
    out.push('\n');
    out
}
