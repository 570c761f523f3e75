//! Monitor configuration.
//!
//! Loaded from an optional TOML file; every field has a default so an
//! empty file (or no file) is a valid configuration. CLI flags override
//! individual fields after loading.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitor::SortColumn;

/// Shortest allowed automatic refresh period.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on fetch attempts per ticker.
pub const MAX_RETRIES: u32 = 10;

pub const DEFAULT_TICKERS_FILE: &str = "tickers.txt";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How often the monitor refreshes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshInterval {
    /// Refresh every period, plus on demand.
    Every(Duration),
    /// Only refresh on demand.
    Manual,
}

impl RefreshInterval {
    /// Automatic interval of `secs` seconds, at least `MIN_REFRESH_INTERVAL`.
    pub fn every_secs(secs: u64) -> Result<Self, ConfigError> {
        let period = Duration::from_secs(secs);
        if period < MIN_REFRESH_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "refresh interval must be at least {} seconds, got {}",
                MIN_REFRESH_INTERVAL.as_secs(),
                secs
            )));
        }
        Ok(Self::Every(period))
    }

    pub fn period(&self) -> Option<Duration> {
        match self {
            Self::Every(period) => Some(*period),
            Self::Manual => None,
        }
    }
}

impl FromStr for RefreshInterval {
    type Err = ConfigError;

    /// Accepts `manual` or a number of seconds (fractions are truncated).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("manual") {
            return Ok(Self::Manual);
        }

        let secs: f64 = s
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid refresh interval '{}'", s)))?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::Invalid(format!("invalid refresh interval '{}'", s)));
        }
        Self::every_secs(secs as u64)
    }
}

impl fmt::Display for RefreshInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(period) => write!(f, "{}s", period.as_secs()),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Ticker list file, one symbol per line.
    pub tickers_file: PathBuf,
    /// Automatic refresh period in seconds.
    pub refresh_interval_sec: u64,
    /// Disable the refresh timer.
    pub manual_refresh: bool,
    /// Maximum concurrent history fetches.
    pub max_workers: usize,
    /// How long a fetched history is reused.
    pub history_ttl_sec: u64,
    /// Decimal places shown in the table.
    pub round_digits: usize,
    /// Use split/dividend adjusted closes.
    pub adjusted: bool,
    /// Fetch attempts per ticker.
    pub max_retries: u32,
    /// Minimum spacing between API requests in milliseconds.
    pub request_interval_ms: u64,
    /// Initial sort column.
    pub sort_by: SortColumn,
    pub sort_descending: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tickers_file: PathBuf::from(DEFAULT_TICKERS_FILE),
            refresh_interval_sec: 60,
            manual_refresh: false,
            max_workers: 8,
            history_ttl_sec: 300,
            round_digits: 2,
            adjusted: false,
            max_retries: 3,
            request_interval_ms: 100,
            sort_by: SortColumn::RecoveryRatio,
            sort_descending: true,
        }
    }
}

impl MonitorConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".to_string()));
        }
        if self.max_retries == 0 || self.max_retries > MAX_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "max_retries must be between 1 and {}, got {}",
                MAX_RETRIES, self.max_retries
            )));
        }
        self.refresh_interval()?;
        Ok(())
    }

    pub fn refresh_interval(&self) -> Result<RefreshInterval, ConfigError> {
        if self.manual_refresh {
            Ok(RefreshInterval::Manual)
        } else {
            RefreshInterval::every_secs(self.refresh_interval_sec)
        }
    }

    pub fn set_refresh_interval(&mut self, interval: RefreshInterval) {
        match interval {
            RefreshInterval::Every(period) => {
                self.manual_refresh = false;
                self.refresh_interval_sec = period.as_secs();
            }
            RefreshInterval::Manual => self.manual_refresh = true,
        }
    }

    pub fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.history_ttl_sec)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.refresh_interval().unwrap(),
            RefreshInterval::Every(Duration::from_secs(60))
        );
        assert_eq!(config.history_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = MonitorConfig::from_toml_str(
            r#"
            tickers_file = "watchlist.txt"
            refresh_interval_sec = 30
            sort_by = "max-drawdown"
            "#,
        )
        .unwrap();

        assert_eq!(config.tickers_file, PathBuf::from("watchlist.txt"));
        assert_eq!(config.refresh_interval_sec, 30);
        assert_eq!(config.sort_by, SortColumn::MaxDrawdown);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.round_digits, 2);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            MonitorConfig::from_toml_str("refresh = 10"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = MonitorConfig {
            refresh_interval_sec: 3,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.manual_refresh = true;
        assert!(config.validate().is_ok());

        config.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_retries_bounds() {
        let mut config = MonitorConfig {
            max_retries: MAX_RETRIES,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.max_retries = 64;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "manual_refresh = true").unwrap();
        writeln!(file, "max_workers = 2").unwrap();

        let config = MonitorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.refresh_interval().unwrap(), RefreshInterval::Manual);
        assert_eq!(config.max_workers, 2);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = MonitorConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_refresh_interval_parsing() {
        assert_eq!("manual".parse::<RefreshInterval>().unwrap(), RefreshInterval::Manual);
        assert_eq!(
            "30".parse::<RefreshInterval>().unwrap(),
            RefreshInterval::Every(Duration::from_secs(30))
        );
        assert_eq!(
            "12.9".parse::<RefreshInterval>().unwrap(),
            RefreshInterval::Every(Duration::from_secs(12))
        );
        assert!("4".parse::<RefreshInterval>().is_err());
        assert!("soon".parse::<RefreshInterval>().is_err());
        assert!("-10".parse::<RefreshInterval>().is_err());
    }

    #[test]
    fn test_set_refresh_interval() {
        let mut config = MonitorConfig::default();
        config.set_refresh_interval(RefreshInterval::Manual);
        assert!(config.manual_refresh);

        config.set_refresh_interval(RefreshInterval::Every(Duration::from_secs(15)));
        assert!(!config.manual_refresh);
        assert_eq!(config.refresh_interval_sec, 15);
        assert_eq!(RefreshInterval::Every(Duration::from_secs(15)).to_string(), "15s");
    }
}
