//! Refresh cycle: read tickers, fetch histories, analyze, report.
//!
//! A refresh fetches every ticker concurrently (bounded by `max_workers`),
//! then analyzes the fetched series in parallel. Each ticker succeeds or
//! fails on its own; a failure becomes the error cell of that ticker's row.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::report::{sort_reports, RefreshOutcome, SortColumn, TickerReport};
use crate::config::{ConfigError, MonitorConfig, RefreshInterval};
use crate::data::{read_tickers_from_file, FetchError, PriceSeries, PriceSource};
use crate::metrics::{AnalysisError, DrawdownAnalyzer};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to read ticker file: {0}")]
    TickerFile(#[from] std::io::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Unusable interactive input.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("missing argument for {0}")]
    MissingArgument(&'static str),

    #[error("invalid argument for {command}: {reason}")]
    InvalidArgument {
        command: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Interval(#[from] ConfigError),
}

/// Settings that can be changed while the monitor runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsUpdate {
    pub tickers_file: Option<PathBuf>,
    pub interval: Option<RefreshInterval>,
}

/// Requests to a running refresh loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    RefreshNow,
    Apply(SettingsUpdate),
    /// Re-order the last table. Without a direction, the current column
    /// flips direction and a new column starts ascending.
    Sort {
        column: SortColumn,
        descending: Option<bool>,
    },
    Quit,
}

impl Command {
    /// Parse an interactive input line.
    ///
    /// - empty line or `r`: refresh now
    /// - `:interval <secs|manual>`: change the refresh interval
    /// - `:file <path>`: switch ticker file
    /// - `:sort <column> [asc|desc]`: re-order rows
    /// - `q` / `quit`: stop
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        match line {
            "" | "r" | "refresh" => return Ok(Self::RefreshNow),
            "q" | "quit" | "exit" => return Ok(Self::Quit),
            _ => {}
        }

        let (cmd, arg) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let arg = arg.trim();
        match cmd {
            ":interval" => Ok(Self::Apply(SettingsUpdate {
                interval: Some(arg.parse()?),
                ..Default::default()
            })),
            ":file" if !arg.is_empty() => Ok(Self::Apply(SettingsUpdate {
                tickers_file: Some(PathBuf::from(arg)),
                ..Default::default()
            })),
            ":file" => Err(CommandError::MissingArgument(":file")),
            ":sort" => Self::parse_sort(arg),
            _ => Err(CommandError::Unknown(line.to_string())),
        }
    }

    fn parse_sort(arg: &str) -> Result<Self, CommandError> {
        let mut parts = arg.split_whitespace();
        let column = parts.next().ok_or(CommandError::MissingArgument(":sort"))?;
        let column = SortColumn::from_str(column, true).map_err(|reason| {
            CommandError::InvalidArgument {
                command: ":sort",
                reason,
            }
        })?;
        let descending = match parts.next() {
            None => None,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => Some(false),
            Some(dir) if dir.eq_ignore_ascii_case("desc") => Some(true),
            Some(dir) => {
                return Err(CommandError::InvalidArgument {
                    command: ":sort",
                    reason: format!("expected asc or desc, got '{}'", dir),
                })
            }
        };
        Ok(Self::Sort { column, descending })
    }
}

/// Resets the loading flag when a refresh ends, however it ends.
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drawdown monitor over a price source.
pub struct Monitor<S> {
    source: Arc<S>,
    config: Mutex<MonitorConfig>,
    loading: AtomicBool,
    show_progress: bool,
}

impl<S: PriceSource + 'static> Monitor<S> {
    pub fn new(source: S, config: MonitorConfig) -> Self {
        Self {
            source: Arc::new(source),
            config: Mutex::new(config),
            loading: AtomicBool::new(false),
            show_progress: false,
        }
    }

    /// Show an indicatif progress bar while fetching.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> MonitorConfig {
        self.config.lock().clone()
    }

    /// Apply runtime settings. Invalid settings leave the config unchanged.
    pub fn apply(&self, update: SettingsUpdate) -> Result<(), ConfigError> {
        let mut config = self.config.lock();
        let mut next = config.clone();
        if let Some(path) = update.tickers_file {
            next.tickers_file = path;
        }
        if let Some(interval) = update.interval {
            next.set_refresh_interval(interval);
        }
        next.validate()?;
        info!(
            "Settings applied: tickers file {}, refresh {}",
            next.tickers_file.display(),
            next.refresh_interval()?
        );
        *config = next;
        Ok(())
    }

    /// Store a new sort order and return it. `None` flips the direction
    /// of the current column, or sorts a new column ascending.
    pub fn set_sort(&self, column: SortColumn, descending: Option<bool>) -> (SortColumn, bool) {
        let mut config = self.config.lock();
        let descending = descending.unwrap_or(config.sort_by == column && !config.sort_descending);
        config.sort_by = column;
        config.sort_descending = descending;
        info!(
            "Sorting by {} {}",
            column.header(),
            if descending { "descending" } else { "ascending" }
        );
        (column, descending)
    }

    /// When the timer should next fire, or `None` in manual mode.
    fn next_deadline(&self) -> Result<Option<Instant>, ConfigError> {
        let interval = self.config.lock().refresh_interval()?;
        Ok(interval.period().map(|period| Instant::now() + period))
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} Loading... {pos}/{len} {bar:30.cyan/blue} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb
    }

    /// Fetch every ticker, at most `max_workers` at a time.
    async fn fetch_all(
        &self,
        tickers: &[String],
        max_workers: usize,
    ) -> Vec<(String, Result<PriceSeries, FetchError>)> {
        let semaphore = Arc::new(Semaphore::new(max_workers));
        let mut tasks = JoinSet::new();

        for ticker in tickers {
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            let ticker = ticker.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = source.fetch_history(&ticker).await;
                (ticker, result)
            });
        }

        let pb = self.progress_bar(tickers.len());
        let mut fetched = Vec::with_capacity(tickers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((ticker, result)) => {
                    pb.set_message(ticker.clone());
                    fetched.push((ticker, result));
                }
                Err(e) => warn!("Fetch task failed: {}", e),
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        fetched
    }

    /// Run one refresh. Returns `None` when another refresh is in flight.
    pub async fn refresh_once(&self) -> Result<Option<RefreshOutcome>, MonitorError> {
        if self.loading.swap(true, Ordering::SeqCst) {
            debug!("Refresh already in progress, skipping");
            return Ok(None);
        }
        let _guard = LoadingGuard(&self.loading);

        let config = self.config();
        let tickers = read_tickers_from_file(&config.tickers_file)?;

        let mut reports: Vec<TickerReport> = Vec::with_capacity(tickers.len());
        if tickers.is_empty() {
            warn!("No tickers in {}", config.tickers_file.display());
        } else {
            let fetched = self.fetch_all(&tickers, config.max_workers).await;

            let mut series = Vec::new();
            for (ticker, result) in fetched {
                match result {
                    Ok(s) => series.push(s),
                    Err(e) => {
                        warn!("{}: {}", ticker, e);
                        reports.push(TickerReport {
                            ticker,
                            outcome: Err(MonitorError::from(e).to_string()),
                        });
                    }
                }
            }

            for (ticker, result) in DrawdownAnalyzer::analyze_many(&series) {
                if let Err(e) = &result {
                    warn!("{}: {}", ticker, e);
                }
                reports.push(TickerReport {
                    ticker,
                    outcome: result.map_err(|e| MonitorError::from(e).to_string()),
                });
            }

            let seen: HashSet<&str> = reports.iter().map(|r| r.ticker.as_str()).collect();
            let missing: Vec<String> = tickers
                .iter()
                .filter(|t| !seen.contains(t.as_str()))
                .cloned()
                .collect();
            for ticker in missing {
                reports.push(TickerReport {
                    ticker,
                    outcome: Err("fetch task aborted".to_string()),
                });
            }
        }

        sort_reports(&mut reports, config.sort_by, config.sort_descending);

        let outcome = RefreshOutcome {
            tickers_file: config.tickers_file.clone(),
            reports,
            updated_at: Utc::now(),
            sort_by: config.sort_by,
            sort_descending: config.sort_descending,
        };
        info!(
            "Refreshed {} tickers ({} failed)",
            outcome.reports.len(),
            outcome.failed()
        );

        Ok(Some(outcome))
    }

    async fn refresh_and_report<F>(&self, last: &mut Option<RefreshOutcome>, on_refresh: &mut F)
    where
        F: FnMut(&RefreshOutcome),
    {
        match self.refresh_once().await {
            Ok(Some(outcome)) => {
                on_refresh(&outcome);
                *last = Some(outcome);
            }
            Ok(None) => {}
            Err(e) => warn!("Refresh failed: {}", e),
        }
    }

    /// Refresh immediately, then on every interval tick and on command,
    /// until `Quit` arrives or the command channel closes. Any refresh
    /// restarts the interval timer; re-sorting reuses the last outcome and
    /// leaves the timer alone.
    pub async fn run<F>(
        &self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut on_refresh: F,
    ) -> Result<(), MonitorError>
    where
        F: FnMut(&RefreshOutcome),
    {
        let mut last: Option<RefreshOutcome> = None;
        self.refresh_and_report(&mut last, &mut on_refresh).await;
        let mut deadline = self.next_deadline()?;

        loop {
            let tick = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = tick => {
                    self.refresh_and_report(&mut last, &mut on_refresh).await;
                }
                command = commands.recv() => match command {
                    Some(Command::RefreshNow) => {
                        self.refresh_and_report(&mut last, &mut on_refresh).await;
                    }
                    Some(Command::Apply(update)) => match self.apply(update) {
                        Ok(()) => self.refresh_and_report(&mut last, &mut on_refresh).await,
                        Err(e) => {
                            warn!("Settings rejected: {}", e);
                            continue;
                        }
                    },
                    Some(Command::Sort { column, descending }) => {
                        let (column, descending) = self.set_sort(column, descending);
                        if let Some(outcome) = last.as_mut() {
                            outcome.sort(column, descending);
                            on_refresh(outcome);
                        }
                        continue;
                    }
                    Some(Command::Quit) | None => break,
                },
            }

            deadline = self.next_deadline()?;
        }

        info!("Monitor stopped");
        Ok(())
    }
}
