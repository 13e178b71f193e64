//! Table layout and the statements shared by the store and a sync batch.
//!
//! Each series lives in its own table, named by its validated `SeriesId`:
//! `date TEXT PRIMARY KEY, close REAL NOT NULL`. Dates are `YYYY-MM-DD`, so
//! text order and calendar order agree and `MAX(date)` is the watermark.

use super::{StoreError, UpsertOutcome};
use crate::domain::{parse_date_key, Observation, SeriesId, REGISTRY_TABLE};
use crate::registry::SeriesRegistry;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

pub(crate) fn create_registry_table(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {REGISTRY_TABLE} (
            series_id TEXT PRIMARY KEY NOT NULL,
            symbol    TEXT NOT NULL UNIQUE,
            group_tag TEXT,
            position  INTEGER NOT NULL
        )"
    ))?;
    Ok(())
}

/// Append registry entries whose id is not stored yet, keeping their order.
pub(crate) fn insert_registry(conn: &Connection, registry: &SeriesRegistry) -> Result<usize, StoreError> {
    let mut insert = conn.prepare_cached(&format!(
        "INSERT INTO {REGISTRY_TABLE} (series_id, symbol, group_tag, position)
         VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(position), -1) + 1 FROM {REGISTRY_TABLE}))
         ON CONFLICT(series_id) DO NOTHING"
    ))?;
    let mut added = 0;
    for d in registry.list() {
        added += insert.execute(params![d.id.as_str(), d.symbol, d.group])?;
    }
    Ok(added)
}

pub(crate) fn table_exists(conn: &Connection, id: &SeriesId) -> Result<bool, StoreError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE)",
        params![id.as_str()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn ensure_series_table(conn: &Connection, id: &SeriesId) -> Result<(), StoreError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            date  TEXT PRIMARY KEY NOT NULL,
            close REAL NOT NULL
        )",
        id.quoted()
    ))?;
    Ok(())
}

fn parse_stored_date(id: &SeriesId, key: &str) -> Result<NaiveDate, StoreError> {
    parse_date_key(key).map_err(|e| StoreError::CorruptRow {
        series: id.to_string(),
        detail: format!("date '{key}': {e}"),
    })
}

/// Most recent stored date, `None` when the table is missing or empty.
pub(crate) fn latest_date(conn: &Connection, id: &SeriesId) -> Result<Option<NaiveDate>, StoreError> {
    if !table_exists(conn, id)? {
        return Ok(None);
    }
    let max: Option<String> = conn.query_row(
        &format!("SELECT MAX(date) FROM {}", id.quoted()),
        [],
        |row| row.get(0),
    )?;
    max.map(|key| parse_stored_date(id, &key)).transpose()
}

/// Insert-or-replace each observation by date. Values equal to the stored
/// one are left untouched and counted as unchanged.
pub(crate) fn upsert(
    conn: &Connection,
    id: &SeriesId,
    observations: &[Observation],
) -> Result<UpsertOutcome, StoreError> {
    ensure_series_table(conn, id)?;

    let table = id.quoted();
    let mut select = conn.prepare_cached(&format!("SELECT close FROM {table} WHERE date = ?1"))?;
    let mut write = conn.prepare_cached(&format!(
        "INSERT INTO {table} (date, close) VALUES (?1, ?2)
         ON CONFLICT(date) DO UPDATE SET close = excluded.close"
    ))?;

    let mut outcome = UpsertOutcome::default();
    for obs in observations {
        let key = obs.date_key();
        let existing: Option<f64> = select
            .query_row(params![key], |row| row.get(0))
            .optional()?;
        match existing {
            Some(stored) if stored == obs.value => outcome.unchanged += 1,
            Some(_) => {
                write.execute(params![key, obs.value])?;
                outcome.updated += 1;
            }
            None => {
                write.execute(params![key, obs.value])?;
                outcome.inserted += 1;
            }
        }
    }
    Ok(outcome)
}

pub(crate) fn read_range(
    conn: &Connection,
    id: &SeriesId,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<Observation>, StoreError> {
    if !table_exists(conn, id)? {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT date, close FROM {}
         WHERE (?1 IS NULL OR date >= ?1) AND (?2 IS NULL OR date <= ?2)
         ORDER BY date",
        id.quoted()
    ))?;
    let start_key = start.map(crate::domain::format_date_key);
    let end_key = end.map(crate::domain::format_date_key);

    let rows = stmt.query_map(params![start_key, end_key], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;

    let mut observations = Vec::new();
    for row in rows {
        let (key, value) = row?;
        observations.push(Observation::new(parse_stored_date(id, &key)?, value));
    }
    Ok(observations)
}

pub(crate) fn stats(
    conn: &Connection,
    id: &SeriesId,
) -> Result<Option<(NaiveDate, NaiveDate, usize)>, StoreError> {
    if !table_exists(conn, id)? {
        return Ok(None);
    }
    let (first, last, rows): (Option<String>, Option<String>, i64) = conn.query_row(
        &format!("SELECT MIN(date), MAX(date), COUNT(*) FROM {}", id.quoted()),
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    match (first, last) {
        (Some(first), Some(last)) => Ok(Some((
            parse_stored_date(id, &first)?,
            parse_stored_date(id, &last)?,
            rows as usize,
        ))),
        _ => Ok(None),
    }
}
