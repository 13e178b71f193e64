//! Yahoo Finance source adapter.
//!
//! Fetches daily rows from Yahoo's v8 chart API. Full-history requests use
//! `range=max`; incremental requests use `period1`/`period2`. Each request
//! has a bounded timeout, transient failures are retried with exponential
//! backoff, and a shared circuit breaker stops all requests after a ban.
//!
//! Yahoo Finance has no official API and changes format without notice. The
//! CSV source is the fallback when it is unavailable.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{FetchError, RawObservation, SeriesSource, SourceKind};
use crate::plan::FetchRange;
use chrono::{DateTime, Days, FixedOffset, NaiveDate};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Upper bound on retries per fetch; larger configured values are clamped.
pub const MAX_RETRIES: u32 = 10;

/// Longest single wait between attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    /// Exchange offset from UTC in seconds.
    #[serde(default)]
    gmtoffset: i32,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Request and retry settings for the Yahoo adapter.
#[derive(Debug, Clone)]
pub struct YahooConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

pub struct YahooSource {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    config: YahooConfig,
}

impl YahooSource {
    pub fn new(mut config: YahooConfig, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, FetchError> {
        if config.max_retries > MAX_RETRIES {
            warn!(requested = config.max_retries, max = MAX_RETRIES, "clamping Yahoo retries");
            config.max_retries = MAX_RETRIES;
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| FetchError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            config,
        })
    }

    fn chart_url(&self, symbol: &str, range: &FetchRange) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match range.start {
            None => format!(
                "{base}/{symbol}?range=max&interval=1d&includeAdjustedClose=true"
            ),
            Some(start) => {
                // Pad by a day on both ends: bar timestamps are exchange-local and
                // the normalizer trims anything outside the requested range.
                let period1 = day_start_utc(start.checked_sub_days(Days::new(1)).unwrap_or(start));
                let period2 = day_start_utc(range.end.checked_add_days(Days::new(1)).unwrap_or(range.end));
                format!(
                    "{base}/{symbol}?period1={period1}&period2={period2}&interval=1d\
                     &includeAdjustedClose=true"
                )
            }
        }
    }

    fn fetch_with_retry(&self, symbol: &str, range: &FetchRange) -> Result<Vec<RawObservation>, FetchError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(FetchError::CircuitBreakerTripped);
        }

        let url = self.chart_url(symbol, range);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.config.base_delay, attempt);
                debug!(symbol, attempt, delay_ms = delay.as_millis() as u64, "retrying fetch");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(FetchError::CircuitBreakerTripped);
            }

            debug!(symbol, %url, "requesting chart");
            let resp = match self.client.get(&url).send() {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() => {
                    last_error = Some(FetchError::Timeout {
                        secs: self.config.timeout.as_secs(),
                    });
                    continue;
                }
                Err(e) if e.is_connect() => {
                    last_error = Some(FetchError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(FetchError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();

            if status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(FetchError::CircuitBreakerTripped);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!(symbol, retry_after, "rate limited by Yahoo Finance");
                last_error = Some(FetchError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(FetchError::AuthenticationRequired(
                    "Yahoo Finance requires authentication".into(),
                ));
            }

            // 404 carries a JSON body with "Not Found"; let the parser classify it.
            if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
                self.circuit_breaker.record_failure();
                last_error = Some(FetchError::Other(format!("HTTP {status} for {symbol}")));
                continue;
            }

            let body = resp.text().map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout {
                        secs: self.config.timeout.as_secs(),
                    }
                } else {
                    FetchError::NetworkUnreachable(e.to_string())
                }
            })?;

            let rows = parse_chart(symbol, &body)?;
            self.circuit_breaker.record_success();
            return Ok(rows);
        }

        Err(last_error.unwrap_or_else(|| FetchError::Other("max retries exceeded".into())))
    }
}

impl SeriesSource for YahooSource {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::YahooFinance
    }

    fn fetch(&self, symbol: &str, range: &FetchRange) -> Result<Vec<RawObservation>, FetchError> {
        self.fetch_with_retry(symbol, range)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

/// `base * 2^(attempt - 1)`, saturating, capped at `MAX_BACKOFF`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

fn day_start_utc(date: NaiveDate) -> i64 {
    date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp()
}

/// Parse a chart API body into raw rows stamped with the exchange offset.
///
/// A result with no timestamps is an empty range, not an error.
fn parse_chart(symbol: &str, body: &str) -> Result<Vec<RawObservation>, FetchError> {
    let resp: ChartResponse = serde_json::from_str(body).map_err(|e| {
        FetchError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
    })?;

    let result = match (resp.chart.result, resp.chart.error) {
        (Some(result), _) => result,
        (None, Some(err)) if err.code == "Not Found" => {
            return Err(FetchError::SymbolNotFound {
                symbol: symbol.to_string(),
            })
        }
        (None, Some(err)) => {
            return Err(FetchError::ResponseFormatChanged(format!(
                "{}: {}",
                err.code, err.description
            )))
        }
        (None, None) => {
            return Err(FetchError::ResponseFormatChanged(
                "empty result with no error".into(),
            ))
        }
    };

    let data = result
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::ResponseFormatChanged("result array is empty".into()))?;

    let Some(timestamps) = data.timestamp else {
        return Ok(Vec::new());
    };

    let offset_secs = data.meta.map_or(0, |m| m.gmtoffset);
    let offset = FixedOffset::east_opt(offset_secs).ok_or_else(|| {
        FetchError::ResponseFormatChanged(format!("invalid gmtoffset: {offset_secs}"))
    })?;

    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);

    let mut rows = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let timestamp = DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.with_timezone(&offset))
            .ok_or_else(|| FetchError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))?;

        rows.push(RawObservation {
            timestamp,
            open: quote.open.get(i).copied().flatten(),
            high: quote.high.get(i).copied().flatten(),
            low: quote.low.get(i).copied().flatten(),
            close: quote.close.get(i).copied().flatten(),
            volume: quote.volume.get(i).copied().flatten(),
            adj_close: adj_closes.as_ref().and_then(|v| v.get(i).copied().flatten()),
        });
    }

    Ok(rows)
}
