//! seriesync CLI: sync, registry and query commands.
//!
//! Commands:
//! - `sync`: run one incremental sync cycle over every registered series
//! - `register`: add a symbol → series id mapping to the stored registry
//! - `list`: registered series with their stored coverage
//! - `show`: print stored observations for one series
//! - `export`: write stored observations for one series as `date,close` CSV

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use seriesync_core::{
    run_sync, Registration, SeriesDescriptor, SeriesId, SeriesRegistry, SourceConfig, SqliteStore,
    StdoutProgress, SyncConfig, SyncOptions,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "seriesync",
    about = "Incremental sync of daily market close series into SQLite"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file. Overrides `database` from the config.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new observations for every registered series and commit them.
    Sync {
        /// Read `{dir}/{symbol}.csv` exports instead of calling Yahoo Finance.
        #[arg(long)]
        csv_dir: Option<PathBuf>,

        /// Treat this date (YYYY-MM-DD) as today. Defaults to the local date.
        #[arg(long)]
        today: Option<NaiveDate>,

        /// Concurrent fetches. Overrides `parallelism` from the config.
        #[arg(long)]
        parallelism: Option<usize>,
    },
    /// Register a symbol under a series id.
    Register {
        /// Provider symbol, e.g. ^GSPC or SAN.MC.
        symbol: String,

        /// Series id: letters, digits and underscores, starting with a letter.
        id: String,

        /// Optional group tag, e.g. a country code.
        #[arg(long)]
        group: Option<String>,
    },
    /// List registered series with their stored date coverage.
    List,
    /// Print stored observations for a series.
    Show {
        id: String,

        /// First date (inclusive).
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last date (inclusive).
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Export stored observations for a series as CSV.
    Export {
        id: String,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,

        /// Output file. Writes to stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SyncConfig::default(),
    };
    if let Some(db) = cli.db {
        config.database = db;
    }
    init_tracing(config.log_level.as_deref());

    match cli.command {
        Commands::Sync {
            csv_dir,
            today,
            parallelism,
        } => {
            if let Some(dir) = csv_dir {
                config.source = SourceConfig::Csv { dir };
            }
            if let Some(n) = parallelism {
                config.parallelism = n;
            }
            config.validate()?;
            let today = today.unwrap_or_else(|| chrono::Local::now().date_naive());
            run_sync_cmd(&config, today)
        }
        Commands::Register { symbol, id, group } => run_register(&config, symbol, &id, group),
        Commands::List => run_list(&config),
        Commands::Show { id, start, end } => run_show(&config, &id, start, end),
        Commands::Export {
            id,
            start,
            end,
            output,
        } => run_export(&config, &id, start, end, output.as_deref()),
    }
}

/// `RUST_LOG` wins, then the config's `log_level`, then `info`. Logs go to
/// stderr so `export` output on stdout stays clean.
fn init_tracing(log_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.unwrap_or("info")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &SyncConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.database)
        .with_context(|| format!("opening database {}", config.database.display()))
}

/// Stored registry first, then any configured series not yet stored.
fn load_registry(store: &mut SqliteStore, config: &SyncConfig) -> Result<SeriesRegistry> {
    let mut registry = store.load_registry().context("loading stored registry")?;
    let configured = config.registry()?;
    let added = registry
        .extend(configured.list().iter().cloned())
        .context("configured series conflict with the stored registry")?;
    if !added.is_empty() {
        store.persist_registry(&registry)?;
        info!(added = added.len(), "registered configured series");
    }
    Ok(registry)
}

fn run_sync_cmd(config: &SyncConfig, today: NaiveDate) -> Result<()> {
    let mut store = open_store(config)?;
    let registry = load_registry(&mut store, config)?;
    let source = config.build_source().context("building source adapter")?;

    let options = SyncOptions::new(today).with_parallelism(config.parallelism);
    let report = run_sync(&mut store, &registry, source.as_ref(), &options, &StdoutProgress)?;

    if !report.all_succeeded() {
        for (descriptor, stage, error) in report.failures() {
            eprintln!("Error for {} ({}) during {stage:?}: {error}", descriptor.id, descriptor.symbol);
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_register(config: &SyncConfig, symbol: String, id: &str, group: Option<String>) -> Result<()> {
    let mut store = open_store(config)?;
    let mut registry = load_registry(&mut store, config)?;

    let id = SeriesId::new(id)?;
    let mut descriptor = SeriesDescriptor::new(symbol, id);
    if let Some(group) = group {
        descriptor = descriptor.with_group(group);
    }

    match registry.register(descriptor.clone())? {
        Registration::Added => {
            store.persist_registry(&registry)?;
            println!("Registered {} as {}", descriptor.symbol, descriptor.id);
        }
        Registration::AlreadyPresent => {
            println!("{} is already registered as {}", descriptor.symbol, descriptor.id);
        }
    }
    Ok(())
}

fn run_list(config: &SyncConfig) -> Result<()> {
    let mut store = open_store(config)?;
    let registry = load_registry(&mut store, config)?;

    println!(
        "{:<20} {:<12} {:<6} {:>8}  {:<10}  {:<10}",
        "SERIES", "SYMBOL", "GROUP", "ROWS", "FIRST", "LAST"
    );
    for d in registry.list() {
        let group = d.group.as_deref().unwrap_or("-");
        match store.series_stats(&d.id)? {
            Some(stats) => println!(
                "{:<20} {:<12} {:<6} {:>8}  {:<10}  {:<10}",
                d.id.as_str(),
                d.symbol,
                group,
                stats.rows,
                stats.first,
                stats.last
            ),
            None => println!(
                "{:<20} {:<12} {:<6} {:>8}  {:<10}  {:<10}",
                d.id.as_str(),
                d.symbol,
                group,
                0,
                "-",
                "-"
            ),
        }
    }
    Ok(())
}

fn resolve_series(store: &mut SqliteStore, config: &SyncConfig, id: &str) -> Result<SeriesId> {
    let registry = load_registry(store, config)?;
    let id = SeriesId::new(id)?;
    if registry.get(&id).is_none() {
        bail!("series '{id}' is not registered");
    }
    Ok(id)
}

fn check_bounds(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            bail!("--start {start} is after --end {end}");
        }
    }
    Ok(())
}

fn run_show(
    config: &SyncConfig,
    id: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<()> {
    check_bounds(start, end)?;
    let mut store = open_store(config)?;
    let id = resolve_series(&mut store, config, id)?;

    let observations = store.read_range(&id, start, end)?;
    if observations.is_empty() {
        warn!(series = %id, "no stored observations in range");
        println!("{id}: no observations");
        return Ok(());
    }

    println!("{id}: {} observations", observations.len());
    for o in &observations {
        println!("  {}  {:>14.4}", o.date, o.value);
    }
    Ok(())
}

fn run_export(
    config: &SyncConfig,
    id: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    output: Option<&Path>,
) -> Result<()> {
    check_bounds(start, end)?;
    let mut store = open_store(config)?;
    let id = resolve_series(&mut store, config, id)?;
    let observations = store.read_range(&id, start, end)?;

    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(["date", "close"])?;
    for o in &observations {
        writer.write_record([o.date_key(), o.value.to_string()])?;
    }
    writer.flush()?;

    if let Some(path) = output {
        info!(series = %id, rows = observations.len(), path = %path.display(), "exported");
    }
    Ok(())
}
