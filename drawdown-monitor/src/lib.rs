pub mod config;
pub mod data;
pub mod metrics;
pub mod monitor;

// Re-export commonly used types
pub use config::{ConfigError, MonitorConfig, RefreshInterval};
pub use data::{CachedSource, FetchError, PricePoint, PriceSeries, PriceSource, YahooClient};
pub use metrics::{AnalysisError, AnalysisResult, DrawdownAnalyzer, DrawdownPoint};
pub use monitor::{Command, Monitor, MonitorError, RefreshOutcome, SortColumn, TickerReport};
