//! Sync orchestrator: one pass over the registry, one commit.
//!
//! Per series: read the watermark, plan, fetch, normalize, write. Fetch and
//! normalize fan out across a private rayon pool; results fan back in to the
//! calling thread, which is the only writer and applies them in registration
//! order inside a single transaction.
//!
//! A failure in any per-series stage is recorded in the report and the loop
//! moves on. Only an unavailable store, a registry conflict with the store,
//! or a failed begin/commit aborts the run, and then nothing from the run is
//! kept. The registry itself is written in the run's transaction.

use crate::data::normalize::{normalize, NormalizeError};
use crate::data::provider::{FetchError, SeriesSource};
use crate::domain::{Observation, SeriesDescriptor};
use crate::plan::{plan, FetchRange, SyncMode, SyncPlan};
use crate::registry::SeriesRegistry;
use crate::store::{SqliteStore, StoreError, UpsertOutcome};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Fatal errors: the run produced no committed data.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("sync transaction failed, run rolled back: {0}")]
    Transaction(#[source] StoreError),

    /// The run's registry maps a symbol or id differently from the stored one.
    #[error("series registry conflicts with the stored registry: {0}")]
    Registry(#[source] StoreError),

    #[error("failed to build fetch worker pool: {0}")]
    WorkerPool(String),
}

/// Recoverable error for a single series.
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// Where a series was when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Planning,
    Fetching,
    Normalizing,
    Writing,
}

#[derive(Debug)]
pub enum SeriesOutcome {
    /// Observations were staged and committed with the run.
    Synced { fetched: usize, upsert: UpsertOutcome },
    /// The fetch returned nothing to merge (weekend, holiday). Not an error.
    Empty,
    /// The watermark is already today.
    Skipped,
    Failed { stage: SyncStage, error: SeriesError },
}

impl SeriesOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SeriesOutcome::Failed { .. })
    }
}

#[derive(Debug)]
pub struct SeriesReport {
    pub descriptor: SeriesDescriptor,
    /// `None` when planning itself failed.
    pub plan: Option<SyncPlan>,
    pub outcome: SeriesOutcome,
}

#[derive(Debug)]
pub struct SyncReport {
    pub today: NaiveDate,
    pub source: String,
    pub series: Vec<SeriesReport>,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.series.len()
    }

    pub fn failed(&self) -> usize {
        self.series.iter().filter(|s| s.outcome.is_failure()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.total() - self.failed()
    }

    pub fn skipped(&self) -> usize {
        self.series
            .iter()
            .filter(|s| matches!(s.outcome, SeriesOutcome::Skipped))
            .count()
    }

    /// Rows inserted or changed across all series.
    pub fn rows_written(&self) -> usize {
        self.series
            .iter()
            .map(|s| match &s.outcome {
                SeriesOutcome::Synced { upsert, .. } => upsert.written(),
                _ => 0,
            })
            .sum()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&SeriesDescriptor, SyncStage, &SeriesError)> {
        self.series.iter().filter_map(|s| match &s.outcome {
            SeriesOutcome::Failed { stage, error } => Some((&s.descriptor, *stage, error)),
            _ => None,
        })
    }
}

/// Per-run knobs.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// The calendar date the run treats as "today".
    pub today: NaiveDate,
    /// Concurrent fetches. `1` fetches strictly one series at a time.
    pub parallelism: usize,
}

impl SyncOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            parallelism: 4,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }
}

/// Progress callbacks, invoked on the writer thread in registration order.
pub trait SyncProgress {
    fn on_series_complete(&self, report: &SeriesReport, index: usize, total: usize);

    fn on_run_complete(&self, report: &SyncReport);
}

/// Progress sink that ignores everything.
pub struct NoProgress;

impl SyncProgress for NoProgress {
    fn on_series_complete(&self, _report: &SeriesReport, _index: usize, _total: usize) {}

    fn on_run_complete(&self, _report: &SyncReport) {}
}

/// Prints one line per series and a closing summary.
pub struct StdoutProgress;

impl SyncProgress for StdoutProgress {
    fn on_series_complete(&self, report: &SeriesReport, index: usize, total: usize) {
        let d = &report.descriptor;
        let prefix = format!("[{}/{}] {} ({})", index + 1, total, d.id, d.symbol);
        match &report.outcome {
            SeriesOutcome::Synced { fetched, upsert } => println!(
                "{prefix}: {fetched} fetched, {} new, {} updated",
                upsert.inserted, upsert.updated
            ),
            SeriesOutcome::Empty => println!("{prefix}: no new observations"),
            SeriesOutcome::Skipped => println!("{prefix}: up to date"),
            SeriesOutcome::Failed { stage, error } => {
                println!("{prefix}: FAIL during {stage:?}: {error}")
            }
        }
    }

    fn on_run_complete(&self, report: &SyncReport) {
        println!(
            "\nSync complete: {}/{} succeeded, {} failed, {} rows written",
            report.succeeded(),
            report.total(),
            report.failed(),
            report.rows_written()
        );
    }
}

/// Open the store at `path` and run one sync cycle against it.
///
/// An unopenable store aborts before any series is attempted.
pub fn sync_database(
    path: &Path,
    registry: &SeriesRegistry,
    source: &dyn SeriesSource,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<SyncReport, SyncError> {
    let mut store = SqliteStore::open(path).map_err(|e| {
        error!(error = %e, "sync aborted");
        SyncError::StoreUnavailable(e)
    })?;
    run_sync(&mut store, registry, source, options, progress)
}

/// Outcome of the fetch+normalize stage for one planned series.
type Fetched = Result<Vec<Observation>, (SyncStage, SeriesError)>;

/// Run one sync cycle over every registered series.
pub fn run_sync(
    store: &mut SqliteStore,
    registry: &SeriesRegistry,
    source: &dyn SeriesSource,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<SyncReport, SyncError> {
    let started = Instant::now();
    let today = options.today;
    let total = registry.len();
    info!(series = total, %today, source = source.name(), "sync started");

    // Refuse before fetching anything if the registry disagrees with the store.
    let mut stored = store.load_registry().map_err(SyncError::Registry)?;
    stored
        .extend(registry.list().iter().cloned())
        .map_err(|e| SyncError::Registry(e.into()))?;

    // Plan sequentially; the store connection stays on this thread.
    let plans: Vec<Result<SyncPlan, StoreError>> = registry
        .list()
        .iter()
        .map(|d| {
            let watermark = store.latest_date(&d.id)?;
            let p = plan(d.id.clone(), watermark, today);
            debug!(series = %d.id, symbol = %d.symbol, ?watermark, mode = ?p.mode, "planned");
            Ok(p)
        })
        .collect();

    let jobs: Vec<(usize, &str, FetchRange)> = registry
        .list()
        .iter()
        .zip(&plans)
        .enumerate()
        .filter_map(|(i, (d, p))| {
            let range = p.as_ref().ok()?.fetch_range(today)?;
            Some((i, d.symbol.as_str(), range))
        })
        .collect();

    let fetched = fetch_all(source, &jobs, options.parallelism)?;
    let mut fetched: Vec<Option<Fetched>> = {
        let mut slots: Vec<Option<Fetched>> = (0..total).map(|_| None).collect();
        for ((i, _, _), result) in jobs.iter().zip(fetched) {
            slots[*i] = Some(result);
        }
        slots
    };

    let mut batch = store.begin().map_err(|e| {
        error!(error = %e, "could not begin sync transaction");
        SyncError::Transaction(e)
    })?;
    // Every synced table has a registry row once the batch commits.
    batch.persist_registry(registry).map_err(SyncError::Transaction)?;

    let mut reports = Vec::with_capacity(total);
    for (i, (descriptor, planned)) in registry.list().iter().zip(plans).enumerate() {
        let (plan, outcome) = match planned {
            Err(e) => (
                None,
                SeriesOutcome::Failed {
                    stage: SyncStage::Planning,
                    error: e.into(),
                },
            ),
            Ok(p) if p.mode == SyncMode::Skip => (Some(p), SeriesOutcome::Skipped),
            Ok(p) => {
                let outcome = match fetched[i].take() {
                    Some(Ok(observations)) if observations.is_empty() => SeriesOutcome::Empty,
                    Some(Ok(observations)) => match batch.upsert(&descriptor.id, &observations) {
                        Ok(upsert) => SeriesOutcome::Synced {
                            fetched: observations.len(),
                            upsert,
                        },
                        Err(e) => SeriesOutcome::Failed {
                            stage: SyncStage::Writing,
                            error: e.into(),
                        },
                    },
                    Some(Err((stage, error))) => SeriesOutcome::Failed { stage, error },
                    // Every non-skipped plan has a fetch slot.
                    None => SeriesOutcome::Empty,
                };
                (Some(p), outcome)
            }
        };

        log_outcome(descriptor, &outcome);
        let report = SeriesReport {
            descriptor: descriptor.clone(),
            plan,
            outcome,
        };
        progress.on_series_complete(&report, i, total);
        reports.push(report);
    }

    batch.commit().map_err(|e| {
        error!(error = %e, "sync commit failed, run rolled back");
        SyncError::Transaction(e)
    })?;

    let report = SyncReport {
        today,
        source: source.name().to_string(),
        series: reports,
    };
    info!(
        total = report.total(),
        succeeded = report.succeeded(),
        failed = report.failed(),
        skipped = report.skipped(),
        rows_written = report.rows_written(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "sync committed"
    );
    progress.on_run_complete(&report);
    Ok(report)
}

fn fetch_all(
    source: &dyn SeriesSource,
    jobs: &[(usize, &str, FetchRange)],
    parallelism: usize,
) -> Result<Vec<Fetched>, SyncError> {
    if parallelism <= 1 || jobs.len() <= 1 {
        return Ok(jobs
            .iter()
            .map(|(_, symbol, range)| fetch_one(source, symbol, range))
            .collect());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.min(jobs.len()))
        .build()
        .map_err(|e| SyncError::WorkerPool(e.to_string()))?;

    Ok(pool.install(|| {
        jobs.par_iter()
            .map(|(_, symbol, range)| fetch_one(source, symbol, range))
            .collect()
    }))
}

fn fetch_one(source: &dyn SeriesSource, symbol: &str, range: &FetchRange) -> Fetched {
    if !source.is_available() {
        return Err((SyncStage::Fetching, FetchError::CircuitBreakerTripped.into()));
    }
    debug!(symbol, %range, "fetching");
    let raw = source
        .fetch(symbol, range)
        .map_err(|e| (SyncStage::Fetching, e.into()))?;
    normalize(&raw, range).map_err(|e| (SyncStage::Normalizing, e.into()))
}

fn log_outcome(descriptor: &SeriesDescriptor, outcome: &SeriesOutcome) {
    let series = descriptor.id.as_str();
    let symbol = descriptor.symbol.as_str();
    match outcome {
        SeriesOutcome::Synced { fetched, upsert } => info!(
            series,
            symbol,
            fetched,
            inserted = upsert.inserted,
            updated = upsert.updated,
            "series synced"
        ),
        SeriesOutcome::Empty => debug!(series, symbol, "nothing new to merge"),
        SeriesOutcome::Skipped => debug!(series, symbol, "already current"),
        SeriesOutcome::Failed { stage, error } => {
            warn!(series, symbol, ?stage, %error, "series failed, continuing")
        }
    }
}
