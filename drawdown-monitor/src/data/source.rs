//! Price history sources.
//!
//! `PriceSource` is the seam between the monitor and whatever provides
//! daily closes. `CachedSource` keeps fetched histories in memory for a
//! fixed time-to-live so frequent refreshes do not refetch years of data.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use super::types::PriceSeries;

/// Price fetch errors.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("No data available for {ticker}")]
    NoData { ticker: String },
}

impl FetchError {
    /// Whether another attempt might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::HttpError(_) | Self::RateLimitExceeded)
    }
}

/// Provider of daily close histories.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Full daily history for `ticker`, earliest day first.
    async fn fetch_history(&self, ticker: &str) -> Result<PriceSeries, FetchError>;
}

struct CacheEntry {
    fetched_at: Instant,
    series: PriceSeries,
}

/// In-memory TTL cache in front of another source.
pub struct CachedSource<S> {
    inner: S,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl<S: PriceSource> CachedSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, ticker: &str) -> Option<PriceSeries> {
        let entries = self.entries.lock();
        entries
            .get(ticker)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.series.clone())
    }
}

#[async_trait]
impl<S: PriceSource> PriceSource for CachedSource<S> {
    async fn fetch_history(&self, ticker: &str) -> Result<PriceSeries, FetchError> {
        if let Some(series) = self.cached(ticker) {
            debug!("{}: history served from cache", ticker);
            return Ok(series);
        }

        let series = self.inner.fetch_history(ticker).await?;
        let mut entries = self.entries.lock();
        // Expired entries would only be refetched; tickers dropped from the
        // watch list must not linger.
        entries.retain(|_, e| e.fetched_at.elapsed() < self.ttl);
        entries.insert(
            ticker.to_string(),
            CacheEntry {
                fetched_at: Instant::now(),
                series: series.clone(),
            },
        );
        debug!("{}: cached, {} histories held", ticker, entries.len());
        Ok(series)
    }
}
