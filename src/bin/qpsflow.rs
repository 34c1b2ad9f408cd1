//! qpsflow - traffic reconciliation CLI
//!
//! Imports bidder traffic exports into the aggregate store and reports on
//! size coverage, routing constraints and anomaly signals.
//!
//! Usage:
//!   qpsflow import exports/2025-11-*.csv
//!   qpsflow coverage --days 7
//!   qpsflow simulate --config 72245759413 --sizes 300x250,320x50
//!   qpsflow geo --days 7
//!   qpsflow signals
//!   qpsflow review 12 reviewed
//!
//! Environment variables:
//!   QPSFLOW_DB_PATH - SQLite database path (default: qpsflow.db)
//!   QPSFLOW_THRESHOLDS - thresholds TOML (default: built-in values)
//!   QPSFLOW_ROUTING - routing configs TOML
//!   QPSFLOW_INVENTORY - creative inventory CSV (size,creative_count)
//!   QPSFLOW_SHARD_ROWS, QPSFLOW_WINDOW_DAYS, QPSFLOW_SIGNAL_WINDOW_DAYS

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use env_logger::Env;
use log::{info, warn};
use qpsflow::analysis::routing::RoutingSet;
use qpsflow::analysis::signals::SignalStatus;
use qpsflow::catalog::{CreativeCatalog, CsvCatalog, Inventory, StaticCatalog};
use qpsflow::report::{
    render_capacity, render_config_performance, render_coverage, render_geo, render_history, render_ingest,
    render_signal_report, render_signals, render_simulation,
};
use qpsflow::store::SqliteStore;
use qpsflow::{EngineConfig, TrafficEngine};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "qpsflow", version, about = "Traffic reconciliation and signal engine")]
struct Cli {
    /// SQLite database path (overrides QPSFLOW_DB_PATH)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Routing configs TOML
    #[arg(long, global = true, env = "QPSFLOW_ROUTING")]
    routing: Option<PathBuf>,

    /// Creative inventory CSV
    #[arg(long, global = true, env = "QPSFLOW_INVENTORY")]
    inventory: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import one or more traffic exports
    Import {
        files: Vec<PathBuf>,
        /// Date for rows without a usable date (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Size coverage against the creative inventory
    Coverage {
        #[arg(long)]
        days: Option<u32>,
    },
    /// What-if replay of a size INCLUDE list
    Simulate {
        /// Routing config to replay through (default: all traffic)
        #[arg(long)]
        config: Option<String>,
        /// Proposed sizes; empty means accept every size
        #[arg(long, value_delimiter = ',')]
        sizes: Vec<String>,
        #[arg(long)]
        days: Option<u32>,
    },
    /// Endpoint qps allocation vs. ceilings
    Capacity {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Per routing config performance
    Configs {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Per country CTR and CPM tiers
    Geo {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Run anomaly detection, or list stored signals with --list
    Signals {
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        list: bool,
        /// Status filter for --list
        #[arg(long)]
        status: Option<String>,
    },
    /// Move a signal to reviewed, cleared or blocked
    Review { id: i64, status: String },
    /// Recent import batches
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Drop aggregates dated before a cutoff
    Prune {
        #[arg(long)]
        before: NaiveDate,
    },
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T) -> String) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text(value));
    }
    Ok(())
}

fn parse_status(raw: &str) -> Result<SignalStatus, Box<dyn std::error::Error>> {
    Ok(raw.trim().to_lowercase().parse::<SignalStatus>()?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = EngineConfig::from_env();
    if let Some(db) = cli.db.clone() {
        config.db_path = db;
    }
    let thresholds = config.load_thresholds()?;

    let routing = match &cli.routing {
        Some(path) => RoutingSet::load(path)?,
        None => RoutingSet::default(),
    };

    let catalog: Arc<dyn CreativeCatalog> = match &cli.inventory {
        Some(path) => Arc::new(CsvCatalog::new(path)),
        None => Arc::new(StaticCatalog::new(Inventory::new())),
    };

    let store = SqliteStore::open(&config.db_path)?;
    let engine = TrafficEngine::new(store, thresholds, routing, catalog).with_shard_rows(config.shard_rows);

    match cli.command {
        Command::Import { files, date } => {
            if files.is_empty() {
                warn!("⚠️  No files given");
            }
            for path in files {
                let bytes = tokio::fs::read(&path).await?;
                let name = path.display().to_string();
                let report = engine.ingest_csv(&name, &bytes, date).await?;
                emit(cli.json, &report, render_ingest)?;
            }
        }
        Command::Coverage { days } => {
            if cli.inventory.is_none() {
                warn!("⚠️  No inventory configured (--inventory / QPSFLOW_INVENTORY); every size is unservable");
            }
            let report = engine.coverage_report(days.unwrap_or(config.window_days)).await?;
            emit(cli.json, &report, render_coverage)?;
        }
        Command::Simulate { config: config_id, sizes, days } => {
            let days = days.unwrap_or(config.window_days);
            let simulation = match config_id {
                Some(id) => engine.simulate_config_filter(&id, &sizes, days).await?,
                None => engine.simulate_filter(&sizes, days).await?,
            };
            emit(cli.json, &simulation, render_simulation)?;
        }
        Command::Capacity { days } => {
            let report = engine.capacity_report(days.unwrap_or(config.window_days)).await?;
            emit(cli.json, &report, render_capacity)?;
        }
        Command::Configs { days } => {
            let report = engine.config_performance(days.unwrap_or(config.window_days)).await?;
            emit(cli.json, &report, render_config_performance)?;
        }
        Command::Geo { days } => {
            let report = engine.geo_report(days.unwrap_or(config.window_days)).await?;
            emit(cli.json, &report, render_geo)?;
        }
        Command::Signals { days, list, status } => {
            if list {
                let status = status.as_deref().map(parse_status).transpose()?;
                let signals = engine.list_signals(status).await?;
                emit(cli.json, &signals, |s| render_signals(s))?;
            } else {
                let report = engine.signal_report(days.unwrap_or(config.signal_window_days)).await?;
                emit(cli.json, &report, render_signal_report)?;
            }
        }
        Command::Review { id, status } => {
            let signal = engine.set_signal_status(id, parse_status(&status)?).await?;
            emit(cli.json, &signal, |s| render_signals(std::slice::from_ref(s)))?;
        }
        Command::History { limit } => {
            let batches = engine.import_history(limit).await?;
            emit(cli.json, &batches, |b| render_history(b))?;
        }
        Command::Prune { before } => {
            let deleted = engine.prune_before(before).await?;
            info!("🧹 Removed {} aggregates dated before {}", deleted, before);
        }
    }

    Ok(())
}
