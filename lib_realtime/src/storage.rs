//! # Storage Collaborator
//!
//! The persistence layer is consumed only through [`TimeSeriesStore`]: persist a
//! symbol's daily series, and load the watchlist that seeds the poller's and
//! the backfill pool's symbol universe.
//!
//! [`MemoryStore`] is the in-process implementation the server runs with. It
//! keeps the latest persisted series per symbol and reads its watchlist from a
//! CSV file whose first column is the symbol.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use csv::ReaderBuilder;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::Candle;

/// Header cells that mark the first row of a watchlist file as a header.
const HEADER_CELLS: [&str; 4] = ["code", "symbol", "ticker", "股票代码"];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("watchlist I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("watchlist CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("cannot persist series for {symbol}: {reason}")]
    Persist { symbol: String, reason: String },
}

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Replaces the stored series for `symbol`.
    async fn persist_time_series(&self, symbol: &str, series: &[Candle]) -> Result<(), StorageError>;

    /// Symbols to poll and backfill, in watchlist order.
    async fn load_watchlist(&self) -> Result<Vec<String>, StorageError>;
}

/// # Memory Store
///
/// Series live for the process lifetime. The watchlist is either fixed at
/// construction or re-read from its CSV file on every load.
#[derive(Debug, Default)]
pub struct MemoryStore {
    series: RwLock<HashMap<String, Vec<Candle>>>,
    watchlist: RwLock<Vec<String>>,
    watchlist_file: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new(watchlist: Vec<String>) -> Self {
        Self {
            watchlist: RwLock::new(watchlist),
            ..Self::default()
        }
    }

    /// A store whose watchlist is read from `path` on each `load_watchlist`.
    pub fn from_watchlist_file(path: impl Into<PathBuf>) -> Self {
        Self {
            watchlist_file: Some(path.into()),
            ..Self::default()
        }
    }

    /// The last series persisted for `symbol`.
    pub async fn series(&self, symbol: &str) -> Option<Vec<Candle>> {
        self.series.read().await.get(symbol).cloned()
    }

    pub async fn persisted_symbols(&self) -> usize {
        self.series.read().await.len()
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    async fn persist_time_series(&self, symbol: &str, series: &[Candle]) -> Result<(), StorageError> {
        if symbol.trim().is_empty() {
            return Err(StorageError::Persist {
                symbol: symbol.to_string(),
                reason: "empty symbol".to_string(),
            });
        }
        self.series
            .write()
            .await
            .insert(symbol.to_string(), series.to_vec());
        Ok(())
    }

    async fn load_watchlist(&self) -> Result<Vec<String>, StorageError> {
        if let Some(path) = &self.watchlist_file {
            let symbols = read_watchlist_csv(path).await?;
            *self.watchlist.write().await = symbols.clone();
            return Ok(symbols);
        }
        Ok(self.watchlist.read().await.clone())
    }
}

/// Reads a CSV watchlist file without blocking the runtime.
pub async fn read_watchlist_csv(path: &Path) -> Result<Vec<String>, StorageError> {
    let content = tokio::fs::read(path)
        .await
        .map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse_watchlist_csv(&content)
}

/// Takes the first column of a CSV watchlist. Blank cells, a header row and
/// repeated symbols are skipped; file order is kept.
pub fn parse_watchlist_csv(content: &[u8]) -> Result<Vec<String>, StorageError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content);

    let mut seen = HashSet::new();
    let mut symbols = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let Some(cell) = record.get(0).map(|c| c.trim_start_matches('\u{feff}').trim()) else {
            continue;
        };
        if cell.is_empty() || cell.starts_with('#') {
            continue;
        }
        if row == 0 && HEADER_CELLS.iter().any(|h| h.eq_ignore_ascii_case(cell)) {
            continue;
        }
        if seen.insert(cell.to_string()) {
            symbols.push(cell.to_string());
        }
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn watchlist_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn reads_first_column_skipping_blanks_and_duplicates() {
        let file = watchlist_file("sh600000,PFYH\n\nsz000001\nsh600000\n  sh601318 , PA\n");
        let symbols = read_watchlist_csv(file.path()).await.unwrap();
        assert_eq!(symbols, vec!["sh600000", "sz000001", "sh601318"]);
    }

    #[test]
    fn header_row_is_skipped() {
        let symbols = parse_watchlist_csv("code,name\nsh600000,PFYH\n".as_bytes()).unwrap();
        assert_eq!(symbols, vec!["sh600000"]);

        let symbols = parse_watchlist_csv("\u{feff}股票代码\nsz000002\n".as_bytes()).unwrap();
        assert_eq!(symbols, vec!["sz000002"]);
    }

    #[test]
    fn comment_lines_are_skipped() {
        let symbols = parse_watchlist_csv(b"# banks\nsh600000\n#sz000001\n").unwrap();
        assert_eq!(symbols, vec!["sh600000"]);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_watchlist_csv(&dir.path().join("absent.csv")).await.unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
    }

    #[tokio::test]
    async fn persist_replaces_previous_series() {
        let store = MemoryStore::new(vec!["AAA".into()]);
        let bar = |close| Candle {
            day: "2024-06-14".into(),
            close,
            ..Candle::default()
        };

        store.persist_time_series("AAA", &[bar(1.0), bar(2.0)]).await.unwrap();
        store.persist_time_series("AAA", &[bar(3.0)]).await.unwrap();

        let series = store.series("AAA").await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].close, 3.0);
        assert_eq!(store.persisted_symbols().await, 1);
        assert_eq!(store.load_watchlist().await.unwrap(), vec!["AAA"]);
    }

    #[tokio::test]
    async fn file_backed_watchlist_is_reread() {
        let file = watchlist_file("sh600000\n");
        let store = MemoryStore::from_watchlist_file(file.path());
        assert_eq!(store.load_watchlist().await.unwrap(), vec!["sh600000"]);

        std::fs::write(file.path(), "sh600000\nsz000001\n").unwrap();
        assert_eq!(store.load_watchlist().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_symbol_cannot_be_persisted() {
        let store = MemoryStore::default();
        let err = store.persist_time_series(" ", &[]).await.unwrap_err();
        assert!(matches!(err, StorageError::Persist { .. }));
    }
}
