//! Drawdown Monitor
//!
//! Tracks current drawdown, maximum drawdown and recovery ratio for every
//! ticker in a watch list.
//!
//! # Usage
//!
//! ```bash
//! # Refresh every 60 seconds (Enter refreshes now, q quits)
//! drawdown-monitor watch --tickers tickers.txt --interval 60
//!
//! # Single refresh, sorted by max drawdown
//! drawdown-monitor once --sort max-drawdown --ascending
//!
//! # Offline analysis of a close series
//! drawdown-monitor analyze --prices 100,90,80,95,70,85
//! ```

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::info;

use drawdown_monitor::monitor::render_table;
use drawdown_monitor::{
    CachedSource, Command, DrawdownAnalyzer, Monitor, MonitorConfig, PriceSeries,
    RefreshInterval, SortColumn, YahooClient,
};

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "drawdown-monitor")]
#[command(about = "Drawdown and recovery-ratio monitor for a list of tickers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct MonitorArgs {
    /// Ticker list file (one symbol per line)
    #[arg(short, long)]
    tickers: Option<PathBuf>,

    /// Maximum concurrent fetches
    #[arg(short, long)]
    workers: Option<usize>,

    /// Column to sort by
    #[arg(long, value_enum)]
    sort: Option<SortColumn>,

    /// Sort ascending instead of descending
    #[arg(long)]
    ascending: bool,

    /// Use split/dividend adjusted closes
    #[arg(long)]
    adjusted: bool,
}

impl MonitorArgs {
    fn apply_to(&self, config: &mut MonitorConfig) {
        if let Some(tickers) = &self.tickers {
            config.tickers_file = tickers.clone();
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if let Some(sort) = self.sort {
            config.sort_by = sort;
        }
        if self.ascending {
            config.sort_descending = false;
        }
        if self.adjusted {
            config.adjusted = true;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh periodically until quit
    Watch {
        #[command(flatten)]
        args: MonitorArgs,

        /// Refresh interval in seconds, or "manual"
        #[arg(short, long)]
        interval: Option<RefreshInterval>,
    },

    /// Refresh once and print the table
    Once {
        #[command(flatten)]
        args: MonitorArgs,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Analyze a literal close series without fetching
    Analyze {
        /// Comma-separated closes, oldest first
        #[arg(short, long, value_delimiter = ',', required = true)]
        prices: Vec<Decimal>,

        /// Label for the series
        #[arg(long, default_value = "INPUT")]
        ticker: String,

        /// Print the per-day drawdown curve
        #[arg(long)]
        curve: bool,
    },
}

fn build_monitor(config: &MonitorConfig) -> Result<Monitor<CachedSource<YahooClient>>> {
    let client = YahooClient::new(config.adjusted)
        .context("Failed to build HTTP client")?
        .with_max_attempts(config.max_retries)
        .with_request_interval(config.request_interval());
    let source = CachedSource::new(client, config.history_ttl());
    Ok(Monitor::new(source, config.clone()).with_progress(true))
}

async fn cmd_watch(config: MonitorConfig) -> Result<()> {
    let digits = config.round_digits;
    let monitor = build_monitor(&config)?;
    let (tx, rx) = mpsc::unbounded_channel();

    // Blocking stdin reader; detached so it never holds up shutdown.
    let stdin_tx = tx.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match Command::parse(&line) {
                Ok(command) => {
                    let quit = command == Command::Quit;
                    if stdin_tx.send(command).is_err() || quit {
                        break;
                    }
                }
                Err(e) => eprintln!("{}", e),
            }
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(Command::Quit);
        }
    });

    info!(
        "Watching {} (refresh {})",
        config.tickers_file.display(),
        config.refresh_interval()?
    );

    monitor
        .run(rx, |outcome| {
            println!("{}", SEPARATOR);
            print!("{}", render_table(outcome, digits));
            println!("[Enter] refresh  [:interval <secs|manual>]  [:file <path>]  [:sort <column> [asc|desc]]  [q] quit");
        })
        .await?;

    Ok(())
}

async fn cmd_once(config: MonitorConfig, json: bool) -> Result<()> {
    let monitor = build_monitor(&config)?;
    let outcome = monitor
        .refresh_once()
        .await?
        .context("Refresh already in progress")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", render_table(&outcome, config.round_digits));
    }
    Ok(())
}

fn cmd_analyze(ticker: String, prices: Vec<Decimal>, curve: bool) -> Result<()> {
    // Last close is today; earlier closes step back one day each.
    let start = Utc::now().date_naive() - Duration::days(prices.len().saturating_sub(1) as i64);
    let series = PriceSeries::from_closes(ticker, start, &prices);

    let result = DrawdownAnalyzer::analyze(&series)
        .with_context(|| format!("Cannot analyze {}", series.ticker))?;

    println!("{}", SEPARATOR);
    println!("{} ({} closes)", series.ticker, result.observations);
    println!("{}", SEPARATOR);
    println!("  Current drawdown: {:+.2}%", result.current_drawdown * 100.0);
    println!("  Max drawdown:     {:+.2}%", result.max_drawdown * 100.0);
    println!(
        "  Recovery ratio:   {:.2}% ({}/{} days worse than today)",
        result.recovery_ratio * 100.0,
        result.worse_days,
        result.observations
    );
    println!("  Historical max:   {}", result.historical_max);

    if curve {
        println!("\n  {:>4}  {:>12}  {:>12}  {:>10}", "day", "close", "peak", "drawdown");
        for (i, point) in DrawdownAnalyzer::drawdown_curve(&series)?.iter().enumerate() {
            let dd = point
                .drawdown
                .to_f64()
                .with_context(|| format!("Drawdown {} out of range", point.drawdown))?;
            println!(
                "  {:>4}  {:>12}  {:>12}  {:>9.2}%",
                i,
                point.close,
                point.running_peak,
                dd * 100.0
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("drawdown_monitor=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = MonitorConfig::load(cli.config.as_deref()).context("Invalid configuration")?;

    match cli.command {
        Commands::Watch { args, interval } => {
            args.apply_to(&mut config);
            if let Some(interval) = interval {
                config.set_refresh_interval(interval);
            }
            config.validate()?;
            cmd_watch(config).await?;
        }
        Commands::Once { args, json } => {
            args.apply_to(&mut config);
            config.validate()?;
            cmd_once(config, json).await?;
        }
        Commands::Analyze {
            prices,
            ticker,
            curve,
        } => {
            cmd_analyze(ticker, prices, curve)?;
        }
    }

    Ok(())
}
