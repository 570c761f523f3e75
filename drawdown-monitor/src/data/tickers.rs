//! Ticker list file.
//!
//! One symbol per line. Blank lines and `#` comments are ignored, symbols
//! are upper-cased and de-duplicated keeping the first occurrence.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

/// Parse ticker list contents.
pub fn parse_tickers(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    content
        .lines()
        .map(|line| line.trim().to_uppercase())
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Read the ticker list at `path`.
///
/// A missing file is treated as an empty list.
pub fn read_tickers_from_file(path: &Path) -> io::Result<Vec<String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Ticker file {} not found", path.display());
            return Ok(vec![]);
        }
        Err(e) => return Err(e),
    };

    Ok(parse_tickers(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_tickers_rules() {
        let content = "spy\n  qqq  \n\n# index funds\nSPY\niwm\r\n#QQQ\nQqQ\n";
        assert_eq!(parse_tickers(content), vec!["SPY", "QQQ", "IWM"]);
    }

    #[test]
    fn test_parse_tickers_empty() {
        assert!(parse_tickers("").is_empty());
        assert!(parse_tickers("\n  \n# nothing\n").is_empty());
    }

    #[test]
    fn test_read_tickers_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "aapl").unwrap();
        writeln!(file, "msft").unwrap();
        writeln!(file, "AAPL").unwrap();

        let tickers = read_tickers_from_file(file.path()).unwrap();
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tickers = read_tickers_from_file(&dir.path().join("missing.txt")).unwrap();
        assert!(tickers.is_empty());
    }
}
