//! seriesync core: incremental sync of daily market series into SQLite.
//!
//! A run walks the series registry and, for each series:
//! - reads the stored watermark (most recent date) and plans a full or
//!   incremental fetch, or skips a series that is already current
//! - fetches raw daily bars from a source adapter (Yahoo, CSV exports)
//! - normalizes them to one closing value per exchange-local calendar date
//! - upserts the observations into the series' table
//!
//! Fetches run concurrently; writes go through one connection and the whole
//! run commits as a single transaction. A failing series is reported and the
//! rest of the run continues.

pub mod config;
pub mod data;
pub mod domain;
pub mod plan;
pub mod registry;
pub mod store;
pub mod sync;

pub use config::{ConfigError, SourceConfig, SyncConfig};
pub use domain::{Observation, SeriesDescriptor, SeriesId};
pub use plan::{plan, FetchRange, SyncMode, SyncPlan};
pub use registry::{Registration, RegistryError, SeriesRegistry};
pub use store::{SeriesStats, SqliteStore, StoreError, UpsertOutcome};
pub use sync::{
    run_sync, sync_database, NoProgress, SeriesError, SeriesOutcome, SeriesReport, StdoutProgress,
    SyncError, SyncOptions, SyncProgress, SyncReport, SyncStage,
};
