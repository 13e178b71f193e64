//! Persistent store: one SQLite table per series plus the registry table.

mod schema;
pub mod sqlite;

pub use sqlite::{SqliteStore, SyncBatch};

use crate::registry::RegistryError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be opened. Fatal: nothing is attempted.
    #[error("store unavailable at {}: {reason}", path.display())]
    Unavailable { path: PathBuf, reason: String },

    /// Beginning or committing the run's transaction failed; nothing was kept.
    #[error("transaction failed: {0}")]
    Transaction(#[source] rusqlite::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row in '{series}': {detail}")]
    CorruptRow { series: String, detail: String },

    #[error("stored registry is inconsistent: {0}")]
    Registry(#[from] RegistryError),
}

/// What an upsert did to one series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertOutcome {
    /// Rows whose stored state changed.
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Coverage summary for one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub first: NaiveDate,
    pub last: NaiveDate,
    pub rows: usize,
}
