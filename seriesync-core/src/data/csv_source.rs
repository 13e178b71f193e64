//! Offline source adapter over a directory of CSV exports.
//!
//! Layout: `{dir}/{symbol}.csv` with a header row. Only `date` and `close`
//! are read into observations; `open`, `high`, `low`, `volume` and
//! `adj_close` are carried along when present. Yahoo-style headers (`Date`, `Close`, `Adj Close`) are accepted.
//! Dates are `YYYY-MM-DD` or RFC 3339 timestamps with an offset.

use super::provider::{FetchError, RawObservation, SeriesSource, SourceKind};
use crate::plan::FetchRange;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Date")]
    date: String,
    #[serde(default, alias = "Open")]
    open: Option<f64>,
    #[serde(default, alias = "High")]
    high: Option<f64>,
    #[serde(default, alias = "Low")]
    low: Option<f64>,
    #[serde(alias = "Close")]
    close: Option<f64>,
    #[serde(default, alias = "Volume")]
    volume: Option<u64>,
    #[serde(default, alias = "Adj Close")]
    adj_close: Option<f64>,
}

pub struct CsvSource {
    dir: PathBuf,
}

impl CsvSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn symbol_path(&self, symbol: &str) -> Option<PathBuf> {
        if symbol.is_empty() || symbol.contains(['/', '\\']) || symbol.contains("..") {
            return None;
        }
        Some(self.dir.join(format!("{symbol}.csv")))
    }
}

impl SeriesSource for CsvSource {
    fn name(&self) -> &str {
        "csv_import"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::CsvImport
    }

    fn fetch(&self, symbol: &str, range: &FetchRange) -> Result<Vec<RawObservation>, FetchError> {
        let not_found = || FetchError::SymbolNotFound {
            symbol: symbol.to_string(),
        };
        let path = self.symbol_path(symbol).ok_or_else(not_found)?;
        if !path.exists() {
            return Err(not_found());
        }

        debug!(symbol, path = %path.display(), %range, "reading CSV export");
        let mut reader = csv::Reader::from_reader(File::open(&path)?);

        let mut rows = Vec::new();
        for (line, record) in reader.deserialize::<CsvRow>().enumerate() {
            let row = record.map_err(|e| {
                FetchError::InvalidRecord(format!("{}: row {}: {e}", path.display(), line + 1))
            })?;
            let timestamp = parse_timestamp(&row.date).ok_or_else(|| {
                FetchError::InvalidRecord(format!(
                    "{}: row {}: unrecognized date '{}'",
                    path.display(),
                    line + 1,
                    row.date
                ))
            })?;
            rows.push(RawObservation {
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
                adj_close: row.adj_close,
            });
        }

        Ok(rows)
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts);
    }
    // yfinance exports "2024-01-02 00:00:00-05:00"
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(ts);
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(date.and_time(NaiveTime::MIN).and_utc().fixed_offset())
}
