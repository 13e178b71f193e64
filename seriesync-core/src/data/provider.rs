//! Source adapter trait and structured fetch errors.
//!
//! The SeriesSource trait abstracts over where observations come from (Yahoo
//! Finance, a directory of CSV exports) so the sync loop can be driven by a
//! scripted source in tests. Sources know nothing about the store.

use crate::plan::FetchRange;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw daily row from a provider, before normalization.
///
/// The timestamp keeps the provider's own offset: the calendar date of a bar
/// is the exchange-local date, which can differ from the UTC date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub timestamp: DateTime<FixedOffset>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<u64>,
    pub adj_close: Option<f64>,
}

impl RawObservation {
    /// A row carrying only a close, for sources that export nothing else.
    pub fn close_only(timestamp: DateTime<FixedOffset>, close: f64) -> Self {
        Self {
            timestamp,
            open: None,
            high: None,
            low: None,
            close: Some(close),
            volume: None,
            adj_close: None,
        }
    }
}

/// Structured error types for fetch operations.
///
/// Every variant is scoped to the one symbol being fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fetch error: {0}")]
    Other(String),
}

/// Where observations came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    YahooFinance,
    CsvImport,
    Scripted,
}

/// Trait for source adapters.
///
/// Implementations must be `Send + Sync`: the sync loop fans fetches out
/// across a thread pool.
pub trait SeriesSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Fetch raw daily rows for a symbol. An empty vector is a valid answer
    /// (weekend or holiday range), not an error.
    fn fetch(&self, symbol: &str, range: &FetchRange) -> Result<Vec<RawObservation>, FetchError>;

    /// Whether the source currently accepts requests (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}
