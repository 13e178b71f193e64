//! Observation: one daily closing value for one series.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Text format of the store's date key. Lexicographic order equals calendar order.
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Daily close for a single series on a single calendar date.
///
/// The date is the natural key: a series holds at most one observation per date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: f64,
}

impl Observation {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }

    /// The `YYYY-MM-DD` key this observation is stored under.
    pub fn date_key(&self) -> String {
        format_date_key(self.date)
    }
}

pub fn format_date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn parse_date_key(key: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(key, DATE_KEY_FORMAT)
}
