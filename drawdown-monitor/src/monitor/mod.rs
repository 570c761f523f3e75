//! Refresh loop and display surface.
//!
//! Each refresh re-reads the ticker list, fetches histories concurrently
//! and produces one report row per ticker. A failing ticker only affects
//! its own row.

pub mod refresh;
pub mod report;

pub use refresh::{Command, CommandError, Monitor, MonitorError, SettingsUpdate};
pub use report::{render_table, sort_reports, RefreshOutcome, SortColumn, TickerReport};
