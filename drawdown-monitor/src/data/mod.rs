pub mod source;
pub mod tickers;
pub mod types;
pub mod yahoo;

pub use source::{CachedSource, FetchError, PriceSource};
pub use tickers::{parse_tickers, read_tickers_from_file};
pub use types::{PricePoint, PriceSeries};
pub use yahoo::{parse_chart, ChartResponse, YahooClient};
