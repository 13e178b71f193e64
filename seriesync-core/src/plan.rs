//! Fetch planning: how much history a series needs this cycle.
//!
//! The store is the source of truth for what already exists. A series with
//! no rows gets its full history; a series with a watermark only asks for the
//! days after it; a series that is already current is skipped without a
//! network call.

use crate::domain::SeriesId;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a sync cycle does for one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// No stored rows: fetch the maximal history the provider has.
    Full,
    /// Fetch from this date (inclusive) through today.
    IncrementalFrom(NaiveDate),
    /// Already current.
    Skip,
}

/// Date range handed to a source adapter. `start == None` means "everything".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRange {
    pub start: Option<NaiveDate>,
    pub end: NaiveDate,
}

impl FetchRange {
    pub fn full(end: NaiveDate) -> Self {
        Self { start: None, end }
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end,
        }
    }

    pub fn is_full(&self) -> bool {
        self.start.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date <= self.end && self.start.map_or(true, |start| date >= start)
    }
}

impl fmt::Display for FetchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start {
            None => write!(f, "[max history, {}]", self.end),
            Some(start) => write!(f, "[{start}, {}]", self.end),
        }
    }
}

/// Per-series plan for one sync cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub series: SeriesId,
    pub mode: SyncMode,
}

impl SyncPlan {
    /// The request to send to the source, or `None` when skipping.
    pub fn fetch_range(&self, today: NaiveDate) -> Option<FetchRange> {
        match self.mode {
            SyncMode::Full => Some(FetchRange::full(today)),
            SyncMode::IncrementalFrom(start) => Some(FetchRange::between(start, today)),
            SyncMode::Skip => None,
        }
    }
}

/// Decide the sync mode from a series' watermark.
pub fn plan(series: SeriesId, watermark: Option<NaiveDate>, today: NaiveDate) -> SyncPlan {
    let mode = match watermark {
        None => SyncMode::Full,
        Some(latest) => match latest.checked_add_days(Days::new(1)) {
            Some(next) if next <= today => SyncMode::IncrementalFrom(next),
            // Also covers a watermark at NaiveDate::MAX.
            _ => SyncMode::Skip,
        },
    };
    SyncPlan { series, mode }
}
