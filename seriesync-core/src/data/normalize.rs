//! Normalization: raw provider rows to canonical daily closes.
//!
//! Only the close survives. The calendar date is taken in the row's own
//! offset, so a bar stamped 09:00 at UTC+1 lands on the exchange's date and
//! not on the previous UTC day. Output is strictly ascending by date.

use super::provider::RawObservation;
use crate::domain::Observation;
use crate::plan::FetchRange;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("non-finite close {value} on {date}")]
    NonFiniteClose { date: NaiveDate, value: f64 },
}

/// Convert raw rows into sorted, de-duplicated observations within `range`.
///
/// - rows without a close (holiday placeholders) are dropped;
/// - rows dated outside `range` are dropped;
/// - repeated dates collapse to the last row seen;
/// - a close that is present but NaN or infinite fails the whole series.
pub fn normalize(raw: &[RawObservation], range: &FetchRange) -> Result<Vec<Observation>, NormalizeError> {
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    let mut void = 0usize;
    let mut out_of_range = 0usize;

    for row in raw {
        let date = row.timestamp.date_naive();
        let Some(close) = row.close else {
            void += 1;
            continue;
        };
        if !range.contains(date) {
            out_of_range += 1;
            continue;
        }
        if !close.is_finite() {
            return Err(NormalizeError::NonFiniteClose { date, value: close });
        }
        by_date.insert(date, close);
    }

    let kept = by_date.len();
    let duplicates = raw.len() - void - out_of_range - kept;
    if void + out_of_range + duplicates > 0 {
        debug!(kept, void, out_of_range, duplicates, "normalized raw rows");
    }

    Ok(by_date
        .into_iter()
        .map(|(date, value)| Observation::new(date, value))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset, TimeZone};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn at(offset_hours: i32, y: i32, m: u32, day: u32, h: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(offset_hours * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, day, h, 0, 0)
            .unwrap()
    }

    fn row(ts: DateTime<FixedOffset>, close: Option<f64>) -> RawObservation {
        RawObservation {
            timestamp: ts,
            open: Some(1.0),
            high: Some(2.0),
            low: Some(0.5),
            close,
            volume: Some(10),
            adj_close: close,
        }
    }

    fn full() -> FetchRange {
        FetchRange::full(d(2024, 12, 31))
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(normalize(&[], &full()).unwrap().is_empty());
    }

    #[test]
    fn keeps_only_close_sorted_ascending() {
        let raw = vec![
            row(at(0, 2024, 1, 3, 0), Some(11.0)),
            row(at(0, 2024, 1, 2, 0), Some(10.0)),
        ];
        let obs = normalize(&raw, &full()).unwrap();
        assert_eq!(
            obs,
            vec![Observation::new(d(2024, 1, 2), 10.0), Observation::new(d(2024, 1, 3), 11.0)]
        );
    }

    #[test]
    fn uses_exchange_local_date() {
        // Midnight at UTC+1 is 23:00 UTC the previous day.
        let obs = normalize(&[row(at(1, 2024, 1, 2, 0), Some(10.0))], &full()).unwrap();
        assert_eq!(obs[0].date, d(2024, 1, 2));
        assert_eq!(obs[0].date_key(), "2024-01-02");

        // 16:00 at UTC-5 is 21:00 UTC the same day.
        let obs = normalize(&[row(at(-5, 2024, 1, 2, 16), Some(10.0))], &full()).unwrap();
        assert_eq!(obs[0].date, d(2024, 1, 2));
    }

    #[test]
    fn drops_void_rows() {
        let raw = vec![
            row(at(0, 2024, 1, 1, 0), None),
            row(at(0, 2024, 1, 2, 0), Some(10.0)),
        ];
        assert_eq!(normalize(&raw, &full()).unwrap().len(), 1);
    }

    #[test]
    fn last_duplicate_wins() {
        let raw = vec![
            row(at(0, 2024, 1, 2, 9), Some(10.0)),
            row(at(0, 2024, 1, 2, 17), Some(10.5)),
        ];
        assert_eq!(
            normalize(&raw, &full()).unwrap(),
            vec![Observation::new(d(2024, 1, 2), 10.5)]
        );
    }

    #[test]
    fn trims_to_requested_range() {
        let range = FetchRange::between(d(2024, 1, 3), d(2024, 1, 5));
        let raw = vec![
            row(at(0, 2024, 1, 2, 0), Some(100.0)),
            row(at(0, 2024, 1, 3, 0), Some(101.0)),
            row(at(0, 2024, 1, 6, 0), Some(102.0)),
        ];
        assert_eq!(
            normalize(&raw, &range).unwrap(),
            vec![Observation::new(d(2024, 1, 3), 101.0)]
        );
    }

    #[test]
    fn non_finite_close_fails() {
        let raw = vec![row(at(0, 2024, 1, 2, 0), Some(f64::INFINITY))];
        assert!(matches!(
            normalize(&raw, &full()),
            Err(NormalizeError::NonFiniteClose { .. })
        ));
    }
}
