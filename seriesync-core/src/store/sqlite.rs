//! SQLite-backed store and the single-writer sync batch.
//!
//! A sync run opens one `SyncBatch` (an IMMEDIATE transaction, so the write
//! lock is taken up front) and applies every series inside it. Each series
//! is written under its own savepoint: a series that fails mid-write rolls
//! back alone, table creation included, and the rest of the batch carries on
//! to the single commit.

use super::schema;
use super::{SeriesStats, StoreError, UpsertOutcome};
use crate::domain::{Observation, SeriesDescriptor, SeriesId, REGISTRY_TABLE};
use crate::registry::SeriesRegistry;
use chrono::NaiveDate;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database file. Any failure is `StoreError::Unavailable`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let unavailable = |reason: String| StoreError::Unavailable {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| unavailable(format!("create dir: {e}")))?;
        }

        let conn = Connection::open(path).map_err(|e| unavailable(e.to_string()))?;
        let store = Self::init(conn, Some(path.to_path_buf()))?;
        info!(path = %path.display(), "opened store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable {
            path: PathBuf::from(":memory:"),
            reason: e.to_string(),
        })?;
        Self::init(conn, None)
    }

    /// Connection setup shared by both constructors. Every failure here is
    /// `StoreError::Unavailable`.
    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        let label = path.clone().unwrap_or_else(|| PathBuf::from(":memory:"));
        let unavailable = |reason: String| StoreError::Unavailable {
            path: label.clone(),
            reason,
        };

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| unavailable(e.to_string()))?;
        if path.is_some() {
            // WAL lets the dashboard read while a sync holds the write lock.
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
                .map_err(|e| unavailable(format!("journal_mode: {e}")))?;
        }
        schema::create_registry_table(&conn).map_err(|e| unavailable(e.to_string()))?;

        Ok(Self { conn, path })
    }

    /// Database file, `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Watermark: most recent stored date, `None` if the series has no rows yet.
    pub fn latest_date(&self, id: &SeriesId) -> Result<Option<NaiveDate>, StoreError> {
        schema::latest_date(&self.conn, id)
    }

    pub fn has_table(&self, id: &SeriesId) -> Result<bool, StoreError> {
        schema::table_exists(&self.conn, id)
    }

    /// Observations in `[start, end]`, either bound optional, ascending by date.
    pub fn read_range(
        &self,
        id: &SeriesId,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Observation>, StoreError> {
        schema::read_range(&self.conn, id, start, end)
    }

    pub fn series_stats(&self, id: &SeriesId) -> Result<Option<SeriesStats>, StoreError> {
        Ok(schema::stats(&self.conn, id)?.map(|(first, last, rows)| SeriesStats { first, last, rows }))
    }

    /// Load the persisted registry in its stored order.
    pub fn load_registry(&self) -> Result<SeriesRegistry, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT series_id, symbol, group_tag FROM {REGISTRY_TABLE} ORDER BY position"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut descriptors = Vec::new();
        for row in rows {
            let (id, symbol, group) = row?;
            let id = SeriesId::new(id).map_err(|e| StoreError::CorruptRow {
                series: REGISTRY_TABLE.to_string(),
                detail: e.to_string(),
            })?;
            descriptors.push(SeriesDescriptor { symbol, id, group });
        }
        Ok(SeriesRegistry::from_descriptors(descriptors)?)
    }

    /// Append registry entries not yet stored. Returns how many were added.
    ///
    /// Existing rows are never rewritten, so a stored mapping cannot be
    /// renamed from here.
    pub fn persist_registry(&mut self, registry: &SeriesRegistry) -> Result<usize, StoreError> {
        let tx = self.conn.transaction().map_err(StoreError::Transaction)?;
        let added = schema::insert_registry(&tx, registry)?;
        tx.commit().map_err(StoreError::Transaction)?;
        if added > 0 {
            info!(added, "persisted new registry entries");
        }
        Ok(added)
    }

    /// Start the run's write transaction.
    pub fn begin(&mut self) -> Result<SyncBatch<'_>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::Transaction)?;
        Ok(SyncBatch { tx })
    }
}

/// The single writer for one sync run.
///
/// Dropping a batch without `commit` rolls every series back.
pub struct SyncBatch<'a> {
    tx: Transaction<'a>,
}

impl SyncBatch<'_> {
    pub fn latest_date(&self, id: &SeriesId) -> Result<Option<NaiveDate>, StoreError> {
        schema::latest_date(&self.tx, id)
    }

    /// Record registry entries not yet stored, as part of this batch.
    pub fn persist_registry(&mut self, registry: &SeriesRegistry) -> Result<usize, StoreError> {
        let added = schema::insert_registry(&self.tx, registry)?;
        if added > 0 {
            debug!(added, "staged registry entries");
        }
        Ok(added)
    }

    /// Upsert one series' observations under a savepoint.
    pub fn upsert(&mut self, id: &SeriesId, observations: &[Observation]) -> Result<UpsertOutcome, StoreError> {
        let sp = self.tx.savepoint()?;
        let outcome = schema::upsert(&sp, id, observations)?;
        sp.commit()?;
        debug!(
            series = %id,
            inserted = outcome.inserted,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            "staged upsert"
        );
        Ok(outcome)
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().map_err(StoreError::Transaction)
    }

    pub fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().map_err(StoreError::Transaction)
    }
}
