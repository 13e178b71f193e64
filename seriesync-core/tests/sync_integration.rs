//! End-to-end sync runs against an in-memory store and a scripted source.
//!
//! The scripted source serves fixed daily closes per symbol, answers only
//! with rows inside the requested range, and records every request so the
//! tests can check exactly what the planner asked for.

use chrono::{FixedOffset, NaiveDate, TimeZone};
use seriesync_core::data::{FetchError, RawObservation, SeriesSource, SourceKind};
use seriesync_core::{
    run_sync, sync_database, FetchRange, NoProgress, Observation, SeriesDescriptor, SeriesError,
    SeriesId, SeriesOutcome, SeriesRegistry, SeriesReport, SqliteStore, SyncError, SyncMode,
    SyncOptions, SyncProgress, SyncReport, SyncStage,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn id(s: &str) -> SeriesId {
    SeriesId::new(s).unwrap()
}

fn obs(date: NaiveDate, value: f64) -> Observation {
    Observation::new(date, value)
}

#[derive(Default)]
struct ScriptedSource {
    data: HashMap<String, Vec<(NaiveDate, Option<f64>)>>,
    failing: HashSet<String>,
    requests: Mutex<Vec<(String, FetchRange)>>,
}

impl ScriptedSource {
    fn new() -> Self {
        Self::default()
    }

    fn with(mut self, symbol: &str, rows: &[(NaiveDate, f64)]) -> Self {
        self.data.insert(
            symbol.to_string(),
            rows.iter().map(|&(date, v)| (date, Some(v))).collect(),
        );
        self
    }

    fn with_raw(mut self, symbol: &str, rows: &[(NaiveDate, Option<f64>)]) -> Self {
        self.data.insert(symbol.to_string(), rows.to_vec());
        self
    }

    fn failing(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    fn requests(&self) -> Vec<(String, FetchRange)> {
        let mut requests = self.requests.lock().unwrap().clone();
        requests.sort_by(|a, b| a.0.cmp(&b.0));
        requests
    }

    fn request_for(&self, symbol: &str) -> Option<FetchRange> {
        self.requests()
            .into_iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, range)| range)
    }
}

impl SeriesSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Scripted
    }

    fn fetch(&self, symbol: &str, range: &FetchRange) -> Result<Vec<RawObservation>, FetchError> {
        self.requests
            .lock()
            .unwrap()
            .push((symbol.to_string(), *range));

        if self.failing.contains(symbol) {
            return Err(FetchError::NetworkUnreachable(format!("{symbol}: connection reset")));
        }
        let rows = self.data.get(symbol).ok_or_else(|| FetchError::SymbolNotFound {
            symbol: symbol.to_string(),
        })?;

        let utc = FixedOffset::east_opt(0).unwrap();
        Ok(rows
            .iter()
            .filter(|(date, _)| range.contains(*date))
            .map(|&(date, close)| {
                let timestamp = utc
                    .from_local_datetime(&date.and_hms_opt(14, 30, 0).unwrap())
                    .unwrap();
                RawObservation {
                    close,
                    ..RawObservation::close_only(timestamp, 0.0)
                }
            })
            .collect())
    }
}

fn registry(pairs: &[(&str, &str)]) -> SeriesRegistry {
    SeriesRegistry::from_descriptors(
        pairs
            .iter()
            .map(|(symbol, series)| SeriesDescriptor::new(*symbol, id(series))),
    )
    .unwrap()
}

fn seed(store: &mut SqliteStore, series: &str, rows: &[Observation]) {
    let mut batch = store.begin().unwrap();
    batch.upsert(&id(series), rows).unwrap();
    batch.commit().unwrap();
}

fn all_rows(store: &SqliteStore, series: &str) -> Vec<Observation> {
    store.read_range(&id(series), None, None).unwrap()
}

fn sync(
    store: &mut SqliteStore,
    registry: &SeriesRegistry,
    source: &ScriptedSource,
    today: NaiveDate,
) -> SyncReport {
    run_sync(store, registry, source, &SyncOptions::new(today), &NoProgress).unwrap()
}

#[test]
fn full_and_incremental_series_in_one_run() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    seed(&mut store, "B", &[obs(d(2024, 1, 2), 100.0)]);

    let source = ScriptedSource::new()
        .with("A.SYM", &[(d(2024, 1, 1), 10.0), (d(2024, 1, 2), 11.0)])
        .with("B.SYM", &[(d(2024, 1, 2), 999.0), (d(2024, 1, 3), 101.0)]);
    let registry = registry(&[("A.SYM", "A"), ("B.SYM", "B")]);

    let report = sync(&mut store, &registry, &source, d(2024, 1, 5));

    assert!(report.all_succeeded());
    assert_eq!(source.request_for("A.SYM"), Some(FetchRange::full(d(2024, 1, 5))));
    assert_eq!(
        source.request_for("B.SYM"),
        Some(FetchRange::between(d(2024, 1, 3), d(2024, 1, 5)))
    );

    assert_eq!(
        all_rows(&store, "A"),
        vec![obs(d(2024, 1, 1), 10.0), obs(d(2024, 1, 2), 11.0)]
    );
    assert_eq!(
        all_rows(&store, "B"),
        vec![obs(d(2024, 1, 2), 100.0), obs(d(2024, 1, 3), 101.0)]
    );
    assert_eq!(report.rows_written(), 3);
}

#[test]
fn second_run_with_no_new_data_changes_nothing() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let source = ScriptedSource::new()
        .with("^GSPC", &[(d(2024, 1, 2), 4742.83), (d(2024, 1, 3), 4704.81)])
        .with("^IBEX", &[(d(2024, 1, 2), 10139.9)]);
    let registry = SeriesRegistry::default_indices();
    let today = d(2024, 1, 3);

    sync(&mut store, &registry, &source, today);
    let before: Vec<_> = ["SyP_500", "IBEX_35"]
        .iter()
        .map(|s| all_rows(&store, s))
        .collect();

    let report = sync(&mut store, &registry, &source, today);
    let after: Vec<_> = ["SyP_500", "IBEX_35"]
        .iter()
        .map(|s| all_rows(&store, s))
        .collect();

    assert_eq!(before, after);
    assert_eq!(report.rows_written(), 0);
    assert!(report.all_succeeded());
}

#[test]
fn current_series_is_skipped_without_fetching() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    seed(&mut store, "A", &[obs(d(2024, 1, 5), 1.0)]);
    let source = ScriptedSource::new().with("A.SYM", &[(d(2024, 1, 5), 2.0)]);

    let report = sync(&mut store, &registry(&[("A.SYM", "A")]), &source, d(2024, 1, 5));

    assert!(source.requests().is_empty());
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.series[0].plan.as_ref().unwrap().mode, SyncMode::Skip);
    assert_eq!(all_rows(&store, "A"), vec![obs(d(2024, 1, 5), 1.0)]);
}

#[test]
fn incremental_request_starts_after_watermark() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    seed(
        &mut store,
        "A",
        &[obs(d(2024, 2, 27), 1.0), obs(d(2024, 2, 28), 2.0)],
    );
    let source = ScriptedSource::new().with("A.SYM", &[]);

    sync(&mut store, &registry(&[("A.SYM", "A")]), &source, d(2024, 3, 4));

    let requests = source.requests();
    assert_eq!(requests.len(), 1);
    let (_, range) = requests[0];
    // Leap day: the day after the watermark is Feb 29.
    assert_eq!(range.start, Some(d(2024, 2, 29)));
    assert_eq!(range.end, d(2024, 3, 4));
    assert!(!range.contains(d(2024, 2, 28)));
}

#[test]
fn dates_missing_from_a_fetch_keep_their_stored_values() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let history = [
        obs(d(2024, 1, 2), 1.0),
        obs(d(2024, 1, 3), 2.0),
        obs(d(2024, 1, 4), 3.0),
    ];
    seed(&mut store, "A", &history);

    let source = ScriptedSource::new().with("A.SYM", &[(d(2024, 1, 8), 4.0)]);
    sync(&mut store, &registry(&[("A.SYM", "A")]), &source, d(2024, 1, 8));

    let rows = all_rows(&store, "A");
    assert_eq!(&rows[..3], &history[..]);
    assert_eq!(rows[3], obs(d(2024, 1, 8), 4.0));
}

#[test]
fn batch_upsert_overrides_a_synced_date() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let source = ScriptedSource::new().with("A.SYM", &[(d(2024, 1, 2), 10.0)]);
    let registry = registry(&[("A.SYM", "A")]);
    sync(&mut store, &registry, &source, d(2024, 1, 2));

    // A run never re-requests its watermark date, so the override goes through the writer.
    let mut batch = store.begin().unwrap();
    let outcome = batch.upsert(&id("A"), &[obs(d(2024, 1, 2), 10.5)]).unwrap();
    batch.commit().unwrap();

    assert_eq!(outcome.updated, 1);
    assert_eq!(all_rows(&store, "A"), vec![obs(d(2024, 1, 2), 10.5)]);
}

#[test]
fn write_failure_rolls_back_only_that_series() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("macro.db");
    {
        // A legacy table without a key on `date`: the upsert cannot target it.
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE \"B\" (date TEXT, close REAL);
             INSERT INTO \"B\" (date, close) VALUES ('2024-01-01', 5.0);",
        )
        .unwrap();
    }

    let mut store = SqliteStore::open(&path).unwrap();
    let source = ScriptedSource::new()
        .with("A.SYM", &[(d(2024, 1, 2), 1.0)])
        .with("B.SYM", &[(d(2024, 1, 2), 2.0)])
        .with("C.SYM", &[(d(2024, 1, 2), 3.0)]);
    let registry = registry(&[("A.SYM", "A"), ("B.SYM", "B"), ("C.SYM", "C")]);

    let report = run_sync(&mut store, &registry, &source, &SyncOptions::new(d(2024, 1, 2)), &NoProgress)
        .unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.succeeded(), 2);
    assert!(matches!(
        report.series[1].outcome,
        SeriesOutcome::Failed {
            stage: SyncStage::Writing,
            error: SeriesError::Store(_)
        }
    ));
    assert_eq!(
        source.request_for("B.SYM"),
        Some(FetchRange::between(d(2024, 1, 2), d(2024, 1, 2)))
    );

    assert_eq!(all_rows(&store, "A"), vec![obs(d(2024, 1, 2), 1.0)]);
    assert_eq!(all_rows(&store, "B"), vec![obs(d(2024, 1, 1), 5.0)]);
    assert_eq!(all_rows(&store, "C"), vec![obs(d(2024, 1, 2), 3.0)]);
    assert_eq!(store.load_registry().unwrap(), registry);
}

#[test]
fn registry_conflicting_with_the_store_aborts_before_fetching() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    store.persist_registry(&registry(&[("A.SYM", "A")])).unwrap();

    let source = ScriptedSource::new().with("OTHER", &[(d(2024, 1, 2), 1.0)]);
    let err = run_sync(
        &mut store,
        &registry(&[("OTHER", "A")]),
        &source,
        &SyncOptions::new(d(2024, 1, 2)),
        &NoProgress,
    )
    .unwrap_err();

    assert!(matches!(err, SyncError::Registry(_)));
    assert!(source.requests().is_empty());
    assert!(!store.has_table(&id("A")).unwrap());
}

#[test]
fn failing_series_does_not_block_the_others() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let source = ScriptedSource::new()
        .with("A.SYM", &[(d(2024, 1, 2), 1.0)])
        .failing("B.SYM")
        .with("C.SYM", &[(d(2024, 1, 2), 3.0)]);
    let registry = registry(&[("A.SYM", "A"), ("B.SYM", "B"), ("C.SYM", "C")]);

    let report = sync(&mut store, &registry, &source, d(2024, 1, 2));

    assert_eq!(report.failed(), 1);
    assert_eq!(report.succeeded(), 2);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures[0].0.id.as_str(), "B");
    assert_eq!(failures[0].1, SyncStage::Fetching);
    assert!(matches!(
        failures[0].2,
        SeriesError::Fetch(FetchError::NetworkUnreachable(_))
    ));

    assert_eq!(all_rows(&store, "A"), vec![obs(d(2024, 1, 2), 1.0)]);
    assert_eq!(all_rows(&store, "C"), vec![obs(d(2024, 1, 2), 3.0)]);
    assert!(!store.has_table(&id("B")).unwrap());
}

#[test]
fn unknown_symbol_is_a_series_failure() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let source = ScriptedSource::new().with("A.SYM", &[(d(2024, 1, 2), 1.0)]);
    let registry = registry(&[("A.SYM", "A"), ("NOPE", "Nope")]);

    let report = sync(&mut store, &registry, &source, d(2024, 1, 2));

    assert_eq!(report.failed(), 1);
    assert!(matches!(
        report.series[1].outcome,
        SeriesOutcome::Failed {
            stage: SyncStage::Fetching,
            error: SeriesError::Fetch(FetchError::SymbolNotFound { .. })
        }
    ));
}

#[test]
fn non_finite_close_fails_only_that_series() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let source = ScriptedSource::new()
        .with_raw("A.SYM", &[(d(2024, 1, 2), Some(f64::NAN))])
        .with("B.SYM", &[(d(2024, 1, 2), 2.0)]);
    let registry = registry(&[("A.SYM", "A"), ("B.SYM", "B")]);

    let report = sync(&mut store, &registry, &source, d(2024, 1, 2));

    assert!(matches!(
        report.series[0].outcome,
        SeriesOutcome::Failed {
            stage: SyncStage::Normalizing,
            ..
        }
    ));
    assert_eq!(all_rows(&store, "B"), vec![obs(d(2024, 1, 2), 2.0)]);
}

#[test]
fn empty_fetch_is_not_an_error() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    seed(&mut store, "A", &[obs(d(2024, 1, 5), 1.0)]);
    // Saturday and Sunday: nothing traded, holiday placeholder only.
    let source = ScriptedSource::new().with_raw("A.SYM", &[(d(2024, 1, 6), None)]);

    let report = sync(&mut store, &registry(&[("A.SYM", "A")]), &source, d(2024, 1, 7));

    assert!(report.all_succeeded());
    assert!(matches!(report.series[0].outcome, SeriesOutcome::Empty));
    assert_eq!(store.latest_date(&id("A")).unwrap(), Some(d(2024, 1, 5)));
}

#[test]
fn parallel_fetches_write_every_series() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let names: Vec<(String, String)> = (0..12)
        .map(|i| (format!("SYM{i}"), format!("Series_{i}")))
        .collect();
    let mut source = ScriptedSource::new();
    for (i, (symbol, _)) in names.iter().enumerate() {
        source = source.with(symbol, &[(d(2024, 1, 2), i as f64), (d(2024, 1, 3), i as f64 + 0.5)]);
    }
    let registry = SeriesRegistry::from_descriptors(
        names
            .iter()
            .map(|(symbol, series)| SeriesDescriptor::new(symbol.clone(), id(series))),
    )
    .unwrap();

    let options = SyncOptions::new(d(2024, 1, 3)).with_parallelism(4);
    let report = run_sync(&mut store, &registry, &source, &options, &NoProgress).unwrap();

    assert!(report.all_succeeded());
    assert_eq!(source.requests().len(), 12);
    // Reports come back in registration order regardless of fetch order.
    for (i, series) in report.series.iter().enumerate() {
        assert_eq!(series.descriptor.id.as_str(), format!("Series_{i}"));
        assert_eq!(
            all_rows(&store, &format!("Series_{i}")),
            vec![obs(d(2024, 1, 2), i as f64), obs(d(2024, 1, 3), i as f64 + 0.5)]
        );
    }
}

#[test]
fn progress_sees_every_series_in_order() {
    struct Recorder(Mutex<Vec<(usize, usize, String)>>, Mutex<usize>);

    impl SyncProgress for Recorder {
        fn on_series_complete(&self, report: &SeriesReport, index: usize, total: usize) {
            self.0
                .lock()
                .unwrap()
                .push((index, total, report.descriptor.id.to_string()));
        }

        fn on_run_complete(&self, _report: &SyncReport) {
            *self.1.lock().unwrap() += 1;
        }
    }

    let mut store = SqliteStore::open_in_memory().unwrap();
    let source = ScriptedSource::new()
        .with("A.SYM", &[(d(2024, 1, 2), 1.0)])
        .failing("B.SYM");
    let registry = registry(&[("A.SYM", "A"), ("B.SYM", "B")]);
    let recorder = Recorder(Mutex::new(Vec::new()), Mutex::new(0));

    run_sync(
        &mut store,
        &registry,
        &source,
        &SyncOptions::new(d(2024, 1, 2)),
        &recorder,
    )
    .unwrap();

    assert_eq!(
        *recorder.0.lock().unwrap(),
        vec![(0, 2, "A".to_string()), (1, 2, "B".to_string())]
    );
    assert_eq!(*recorder.1.lock().unwrap(), 1);
}

#[test]
fn unopenable_store_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"").unwrap();
    let path = blocker.join("macro.db");

    let source = ScriptedSource::new().with("^GSPC", &[(d(2024, 1, 2), 1.0)]);
    let result = sync_database(
        &path,
        &SeriesRegistry::default_indices(),
        &source,
        &SyncOptions::new(d(2024, 1, 2)),
        &NoProgress,
    );

    assert!(matches!(result, Err(SyncError::StoreUnavailable(_))));
    assert!(source.requests().is_empty());
}

#[test]
fn file_store_persists_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("macro.db");
    let registry = registry(&[("A.SYM", "A")]);

    let first = ScriptedSource::new().with("A.SYM", &[(d(2024, 1, 2), 1.0)]);
    sync_database(&path, &registry, &first, &SyncOptions::new(d(2024, 1, 2)), &NoProgress).unwrap();

    let second = ScriptedSource::new().with("A.SYM", &[(d(2024, 1, 2), 1.0), (d(2024, 1, 3), 2.0)]);
    sync_database(&path, &registry, &second, &SyncOptions::new(d(2024, 1, 3)), &NoProgress).unwrap();

    assert_eq!(
        second.request_for("A.SYM"),
        Some(FetchRange::between(d(2024, 1, 3), d(2024, 1, 3)))
    );
    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(
        all_rows(&store, "A"),
        vec![obs(d(2024, 1, 2), 1.0), obs(d(2024, 1, 3), 2.0)]
    );
    let stored = store.load_registry().unwrap();
    assert_eq!(stored, registry);
    assert_eq!(stored.get(&id("A")).map(|d| d.symbol.as_str()), Some("A.SYM"));
}
