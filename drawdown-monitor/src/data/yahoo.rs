//! Yahoo Finance chart API client for daily close histories.
//!
//! API notes:
//! - One request returns the full daily history (`range=max`)
//! - Unknown symbols answer 404 with `{"chart": {"error": {...}}}`
//! - Bursts get throttled with 429, so requests are spaced out
//! - Closes can be `null` on halted days

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, StatusCode, Url};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::source::{FetchError, PriceSource};
use super::types::{PricePoint, PriceSeries};

/// Chart API base URL.
const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Requests without a browser-like agent are rejected.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) drawdown-monitor";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default spacing between requests.
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of attempts per ticker.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Top-level chart response: `{"chart": {"result": [...], "error": ...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct ChartResponse {
    pub chart: ChartBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartBody {
    #[serde(default)]
    pub result: Option<Vec<ChartResult>>,
    #[serde(default)]
    pub error: Option<ChartError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartError {
    pub code: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartResult {
    pub meta: ChartMeta,
    #[serde(default)]
    pub timestamp: Vec<i64>,
    pub indicators: Indicators,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMeta {
    pub symbol: String,
    /// Exchange offset from UTC in seconds
    #[serde(default)]
    pub gmtoffset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Indicators {
    #[serde(default)]
    pub quote: Vec<QuoteIndicator>,
    #[serde(default)]
    pub adjclose: Vec<AdjCloseIndicator>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteIndicator {
    #[serde(default)]
    pub close: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdjCloseIndicator {
    #[serde(default)]
    pub adjclose: Vec<Option<f64>>,
}

/// Convert a chart response into a close series.
///
/// Null closes are skipped. When Yahoo repeats the current session as a
/// second bar on the same day, the later bar wins.
pub fn parse_chart(
    ticker: &str,
    response: ChartResponse,
    adjusted: bool,
) -> Result<PriceSeries, FetchError> {
    if let Some(err) = response.chart.error {
        if err.code.eq_ignore_ascii_case("Not Found") {
            return Err(FetchError::NoData {
                ticker: ticker.to_string(),
            });
        }
        return Err(FetchError::ApiError(format!("{}: {}", err.code, err.description)));
    }

    let result = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| FetchError::NoData {
            ticker: ticker.to_string(),
        })?;

    let closes = if adjusted {
        result.indicators.adjclose.into_iter().next().map(|a| a.adjclose)
    } else {
        result.indicators.quote.into_iter().next().map(|q| q.close)
    };
    let closes = match closes {
        Some(c) => c,
        None if result.timestamp.is_empty() => {
            return Err(FetchError::NoData {
                ticker: ticker.to_string(),
            })
        }
        None => {
            return Err(FetchError::InvalidResponse(format!(
                "{}: missing {} column",
                ticker,
                if adjusted { "adjclose" } else { "close" }
            )))
        }
    };

    if closes.len() != result.timestamp.len() {
        return Err(FetchError::InvalidResponse(format!(
            "{}: {} timestamps but {} closes",
            ticker,
            result.timestamp.len(),
            closes.len()
        )));
    }

    let offset = result.meta.gmtoffset;
    let mut points: Vec<PricePoint> = Vec::with_capacity(closes.len());

    for (ts, close) in result.timestamp.iter().zip(closes) {
        let Some(close) = close.filter(|c| c.is_finite()) else {
            continue;
        };

        let date = DateTime::from_timestamp(ts + offset, 0)
            .ok_or_else(|| FetchError::InvalidResponse(format!("{}: bad timestamp {}", ticker, ts)))?
            .date_naive();
        let close = Decimal::try_from(close)
            .map_err(|e| FetchError::InvalidResponse(format!("{}: bad close {}: {}", ticker, close, e)))?;

        match points.last_mut() {
            Some(last) if last.date == date => last.close = close,
            _ => points.push(PricePoint::new(date, close)),
        }
    }

    if points.is_empty() {
        return Err(FetchError::NoData {
            ticker: ticker.to_string(),
        });
    }

    Ok(PriceSeries::new(ticker, points))
}

/// Chart endpoint for a symbol, with the symbol as an escaped path segment.
pub fn chart_url(ticker: &str) -> Result<Url, FetchError> {
    let mut url = Url::parse(BASE_URL)
        .map_err(|e| FetchError::ApiError(format!("Invalid base URL: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| FetchError::ApiError("Invalid base URL".to_string()))?
        .push(ticker);
    Ok(url)
}

/// Error for a non-success HTTP status.
pub fn map_status(status: StatusCode, ticker: &str, body: &str) -> FetchError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimitExceeded,
        StatusCode::NOT_FOUND => FetchError::NoData {
            ticker: ticker.to_string(),
        },
        _ => FetchError::ApiError(format!("{}: {}", status, body)),
    }
}

/// Delay before retry number `attempt + 1`: 1s, 2s, 4s, ...
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

/// Run `op` up to `max_attempts` times, sleeping with exponential backoff
/// between attempts. Only transient errors are retried.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    max_attempts: u32,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                let backoff = backoff_delay(attempt);
                warn!(
                    "{}: attempt {} failed ({}), retrying in {:?}",
                    label,
                    attempt + 1,
                    e,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Yahoo Finance chart API client.
pub struct YahooClient {
    client: Client,
    adjusted: bool,
    max_attempts: u32,
    min_interval: Duration,
    last_request: Mutex<Instant>,
    request_count: AtomicU64,
}

impl YahooClient {
    /// Create a new client. `adjusted` selects split/dividend adjusted closes.
    pub fn new(adjusted: bool) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            adjusted,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_interval: DEFAULT_REQUEST_INTERVAL,
            last_request: Mutex::new(Instant::now() - DEFAULT_REQUEST_INTERVAL),
            request_count: 0.into(),
        })
    }

    /// Total attempts per ticker, including the first one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Minimum spacing between consecutive requests.
    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Get request count for monitoring.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Wait until the rate limit allows the next request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            tokio::time::sleep(self.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }

    /// Single attempt at fetching the chart for `ticker`.
    async fn request(&self, ticker: &str) -> Result<PriceSeries, FetchError> {
        self.throttle().await;

        let url = chart_url(ticker)?;
        let params = [
            ("range", "max"),
            ("interval", "1d"),
            ("includeAdjustedClose", "true"),
        ];

        let response = self.client.get(url).query(&params).send().await?;
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, ticker, &text));
        }

        let body: ChartResponse = response.json().await.map_err(|e| {
            FetchError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        parse_chart(ticker, body, self.adjusted)
    }
}

#[async_trait]
impl PriceSource for YahooClient {
    async fn fetch_history(&self, ticker: &str) -> Result<PriceSeries, FetchError> {
        let series = retry_with_backoff(ticker, self.max_attempts, || self.request(ticker)).await?;
        if let Some((first, last)) = series.date_range() {
            debug!(
                "{}: fetched {} daily closes from {} to {} ({} requests so far)",
                ticker,
                series.len(),
                first,
                last,
                self.request_count()
            );
        }
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    // 2024-01-02, 2024-01-03, 2024-01-04, 2024-01-05 at 14:30 UTC
    const SAMPLE: &str = r#"{
        "chart": {
            "result": [{
                "meta": {
                    "symbol": "SPY",
                    "currency": "USD",
                    "gmtoffset": -18000
                },
                "timestamp": [1704205800, 1704292200, 1704378600, 1704465000],
                "indicators": {
                    "quote": [{
                        "close": [472.65, null, 467.28, 467.92]
                    }],
                    "adjclose": [{
                        "adjclose": [465.5, 462.1, 460.25, 460.9]
                    }]
                }
            }],
            "error": null
        }
    }"#;

    fn sample() -> ChartResponse {
        serde_json::from_str(SAMPLE).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_parse_chart_skips_null_closes() {
        let series = parse_chart("SPY", sample(), false).unwrap();

        assert_eq!(series.ticker, "SPY");
        assert_eq!(series.len(), 3);
        let dates: Vec<_> = series.points.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![day(2), day(4), day(5)]);
        assert_eq!(series.points[0].close, Decimal::try_from(472.65).unwrap());
    }

    #[test]
    fn test_parse_chart_adjusted() {
        let series = parse_chart("SPY", sample(), true).unwrap();
        assert_eq!(series.len(), 4);
        assert_eq!(series.points[3].close, Decimal::try_from(460.9).unwrap());
    }

    #[test]
    fn test_parse_chart_not_found() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let response: ChartResponse = serde_json::from_str(body).unwrap();

        match parse_chart("ZZZZ", response, false) {
            Err(FetchError::NoData { ticker }) => assert_eq!(ticker, "ZZZZ"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_chart_api_error() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Bad Request","description":"Invalid input"}}}"#;
        let response: ChartResponse = serde_json::from_str(body).unwrap();

        assert!(matches!(
            parse_chart("SPY", response, false),
            Err(FetchError::ApiError(msg)) if msg.contains("Bad Request")
        ));
    }

    #[test]
    fn test_parse_chart_length_mismatch() {
        let body = r#"{"chart":{"result":[{"meta":{"symbol":"SPY"},"timestamp":[1704205800,1704292200],"indicators":{"quote":[{"close":[1.0]}]}}],"error":null}}"#;
        let response: ChartResponse = serde_json::from_str(body).unwrap();

        assert!(matches!(
            parse_chart("SPY", response, false),
            Err(FetchError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_chart_no_rows() {
        let body = r#"{"chart":{"result":[{"meta":{"symbol":"NEW"},"indicators":{"quote":[{}]}}],"error":null}}"#;
        let response: ChartResponse = serde_json::from_str(body).unwrap();

        assert!(matches!(
            parse_chart("NEW", response, false),
            Err(FetchError::NoData { .. })
        ));
    }

    #[test]
    fn test_parse_chart_same_day_bar_replaced() {
        // Second timestamp is a live bar later on the same session day.
        let body = r#"{"chart":{"result":[{"meta":{"symbol":"SPY","gmtoffset":-18000},"timestamp":[1704205800,1704292200,1704310000],"indicators":{"quote":[{"close":[10.0,11.0,12.5]}]}}],"error":null}}"#;
        let response: ChartResponse = serde_json::from_str(body).unwrap();

        let series = parse_chart("SPY", response, false).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.points[1].date, day(3));
        assert_eq!(series.points[1].close, Decimal::try_from(12.5).unwrap());
    }

    #[test]
    fn test_chart_url_escapes_symbol() {
        let url = chart_url("BRK.B").unwrap();
        assert_eq!(
            url.as_str(),
            "https://query1.finance.yahoo.com/v8/finance/chart/BRK.B"
        );

        let url = chart_url("A/B").unwrap();
        assert!(url.as_str().ends_with("/chart/A%2FB"));
    }

    #[test]
    fn test_map_status() {
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, "SPY", ""),
            FetchError::RateLimitExceeded
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, "ZZZZ", ""),
            FetchError::NoData { ticker } if ticker == "ZZZZ"
        ));
        match map_status(StatusCode::INTERNAL_SERVER_ERROR, "SPY", "upstream down") {
            FetchError::ApiError(msg) => {
                assert!(msg.contains("500"));
                assert!(msg.contains("upstream down"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(map_status(StatusCode::TOO_MANY_REQUESTS, "SPY", "").is_transient());
        assert!(!map_status(StatusCode::BAD_GATEWAY, "SPY", "").is_transient());
    }

    /// Records the paused-clock time of every call and fails the first
    /// `failures` calls with `error`.
    struct Flaky {
        calls: std::sync::Mutex<Vec<tokio::time::Instant>>,
        failures: usize,
        error: fn() -> FetchError,
    }

    impl Flaky {
        fn new(failures: usize, error: fn() -> FetchError) -> Self {
            Self {
                calls: std::sync::Mutex::new(Vec::new()),
                failures,
                error,
            }
        }

        async fn call(&self) -> Result<u32, FetchError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(tokio::time::Instant::now());
            if calls.len() <= self.failures {
                Err((self.error)())
            } else {
                Ok(calls.len() as u32)
            }
        }

        fn gaps(&self) -> Vec<Duration> {
            let calls = self.calls.lock().unwrap();
            calls.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_doubles() {
        let flaky = Flaky::new(3, || FetchError::RateLimitExceeded);

        let result = retry_with_backoff("SPY", 4, || flaky.call()).await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(
            flaky.gaps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let flaky = Flaky::new(usize::MAX, || FetchError::RateLimitExceeded);

        let result = retry_with_backoff("SPY", 3, || flaky.call()).await;

        assert!(matches!(result, Err(FetchError::RateLimitExceeded)));
        assert_eq!(flaky.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_permanent_error() {
        let flaky = Flaky::new(usize::MAX, || FetchError::NoData {
            ticker: "ZZZZ".into(),
        });

        let result = retry_with_backoff("ZZZZ", 3, || flaky.call()).await;

        assert!(matches!(result, Err(FetchError::NoData { .. })));
        assert_eq!(flaky.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_backoff_delay_saturates() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(64), Duration::from_secs(u64::MAX));
    }
}
