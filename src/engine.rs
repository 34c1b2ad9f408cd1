//! Traffic Engine - orchestration layer over ingest, store and analysis
//!
//! ```text
//! export bytes / rows
//!     ↓
//! TrafficEngine::ingest_*  → shards normalized on blocking workers
//!     ↓                       → DeltaSet merge → one store transaction
//! SqliteStore (merge-add aggregates, batches, signals)
//!     ↓
//! coverage_report / geo_report / simulate_* / capacity_report / config_performance / signal_report
//! ```
//!
//! Every store call runs on the blocking pool. Imports serialize on the store
//! lock; analysis calls only read and may run alongside each other.

use crate::analysis::config_perf::{config_performance, ConfigPerformanceReport};
use crate::analysis::constraints::{slices_from_groups, CapacityReport, ConstraintEvaluator, FilterSimulation, SLICE_DIMENSIONS};
use crate::analysis::coverage::{CoverageMatcher, CoverageReport};
use crate::analysis::detector::SignalDetector;
use crate::analysis::geo::{GeoAnalyzer, GeoReport};
use crate::analysis::routing::{RoutingSet, SizeFilter};
use crate::analysis::signals::{AnomalySignal, SignalStatus};
use crate::analysis::window::{resolve_anchor, AnalysisWindow};
use crate::catalog::CreativeCatalog;
use crate::config::Thresholds;
use crate::error::{EngineError, Result};
use crate::ingest_core::batch::{content_hash, table_hash, CommittedBatch, ImportBatch, IngestReport, IngestWarning, NewBatch};
use crate::ingest_core::columns::ColumnAliases;
use crate::ingest_core::normalizer::{DeltaSet, Normalizer};
use crate::ingest_core::source::{read_delimited, RawRow, RawTable};
use crate::store::types::{Dimension, GroupedMeasures};
use crate::store::SqliteStore;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;

const DEFAULT_SHARD_ROWS: usize = 5_000;

/// Persisted outcome of one detection run.
#[derive(Debug, Clone, Serialize)]
pub struct SignalReport {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    /// Signals written or refreshed by this run
    pub signals: Vec<AnomalySignal>,
    pub new_signals: usize,
    pub refreshed_signals: usize,
    pub keys_evaluated: usize,
    pub skipped_unknown_keys: usize,
    pub baseline_ctr: Option<f64>,
    pub insufficient_data: bool,
}

pub struct TrafficEngine {
    store: SqliteStore,
    thresholds: Thresholds,
    routing: RoutingSet,
    catalog: Arc<dyn CreativeCatalog>,
    aliases: ColumnAliases,
    shard_rows: usize,

    /// Timestamp function (for testing with mock time)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl TrafficEngine {
    /// Create an engine using system time.
    pub fn new(
        store: SqliteStore,
        thresholds: Thresholds,
        routing: RoutingSet,
        catalog: Arc<dyn CreativeCatalog>,
    ) -> Self {
        Self::new_with_timestamp_fn(
            store,
            thresholds,
            routing,
            catalog,
            Box::new(|| Utc::now().timestamp()),
        )
    }

    /// Create an engine with a custom timestamp function.
    ///
    /// "Today" for window anchoring and every stored timestamp come from `now_fn`.
    pub fn new_with_timestamp_fn(
        store: SqliteStore,
        thresholds: Thresholds,
        routing: RoutingSet,
        catalog: Arc<dyn CreativeCatalog>,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        let aliases = ColumnAliases::with_overrides(&thresholds.ingest.aliases);
        log::info!(
            "🚀 Traffic engine ready ({} routing configs, {} catalog)",
            routing.configs().count(),
            catalog.catalog_type()
        );
        Self {
            store,
            thresholds,
            routing,
            catalog,
            aliases,
            shard_rows: DEFAULT_SHARD_ROWS,
            now_fn,
        }
    }

    /// Rows per normalization shard (minimum 1).
    pub fn with_shard_rows(mut self, shard_rows: usize) -> Self {
        self.shard_rows = shard_rows.max(1);
        self
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn routing(&self) -> &RoutingSet {
        &self.routing
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    fn now(&self) -> i64 {
        (self.now_fn)()
    }

    fn today(&self) -> NaiveDate {
        DateTime::<Utc>::from_timestamp(self.now(), 0)
            .map(|t| t.date_naive())
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Trailing window ending at the latest stored date, capped at today.
    pub fn window(&self, days: u32) -> Result<AnalysisWindow> {
        let latest = self.store.date_bounds()?.map(|(_, max)| max);
        Ok(AnalysisWindow::trailing(resolve_anchor(self.today(), latest), days))
    }

    /// Run a store call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(SqliteStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store)).await?
    }

    /// [`window`](Self::window) resolved off the runtime thread.
    async fn resolve_window(&self, days: u32) -> Result<AnalysisWindow> {
        let today = self.today();
        let latest = self.blocking(|store| store.date_bounds()).await?.map(|(_, max)| max);
        Ok(AnalysisWindow::trailing(resolve_anchor(today, latest), days))
    }

    /// Window plus a group-by over it, both on the blocking pool.
    async fn grouped(&self, days: u32, dimensions: Vec<Dimension>) -> Result<(AnalysisWindow, Vec<GroupedMeasures>)> {
        let window = self.resolve_window(days).await?;
        let range = window.range;
        let groups = self.blocking(move |store| store.group_by(range, &dimensions)).await?;
        Ok((window, groups))
    }

    // ----- ingest -----

    /// Import a delimited export. Rows without a usable date fall back to
    /// `fallback_date`, or today when none is given.
    pub async fn ingest_csv(
        &self,
        source_name: &str,
        bytes: &[u8],
        fallback_date: Option<NaiveDate>,
    ) -> Result<IngestReport> {
        let table = read_delimited(bytes)?;
        let hash = content_hash(bytes);
        self.ingest(source_name, table, hash, fallback_date).await
    }

    /// Import rows that were already tokenized by the caller.
    pub async fn ingest_rows(
        &self,
        source_name: &str,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        fallback_date: Option<NaiveDate>,
    ) -> Result<IngestReport> {
        let table = RawTable::from_rows(headers, rows);
        let hash = table_hash(&table);
        self.ingest(source_name, table, hash, fallback_date).await
    }

    async fn ingest(
        &self,
        source_name: &str,
        table: RawTable,
        hash: String,
        fallback_date: Option<NaiveDate>,
    ) -> Result<IngestReport> {
        let columns = self.aliases.resolve(&table.headers);
        if !columns.unresolved().is_empty() {
            log::debug!("🔤 Ignoring unrecognized columns: {:?}", columns.unresolved());
        }

        let fallback = fallback_date.unwrap_or_else(|| self.today());
        let normalizer = Arc::new(Normalizer::new(
            columns,
            self.thresholds.ingest.date_formats.clone(),
            fallback,
        ));

        let row_count = table.rows.len();
        let deltas = self.normalize_sharded(&normalizer, table.rows).await?.sorted();

        let mut warnings: Vec<IngestWarning> = normalizer
            .header_warnings()
            .into_iter()
            .chain(deltas.warnings.iter().cloned())
            .map(IngestWarning::RowCoercion)
            .collect();

        let batch = NewBatch {
            content_hash: hash.clone(),
            source_name: source_name.to_string(),
            row_count: row_count as i64,
            aggregate_count: deltas.deltas.len() as i64,
            warning_count: warnings.len() as i64,
            anomaly_count: deltas.candidates.len() as i64,
            imported_at: self.now(),
        };

        let aggregate_count = deltas.deltas.len();
        let anomaly_candidates = deltas.candidates.clone();

        let CommittedBatch { batch_id, previous } =
            self.blocking(move |store| store.commit_batch(&batch, &deltas)).await?;

        if let Some(prev) = &previous {
            log::warn!(
                "⚠️  {} matches batch {} by content hash; measures are now counted twice",
                source_name,
                prev.id
            );
            warnings.insert(
                0,
                IngestWarning::DuplicateBatch {
                    content_hash: hash.clone(),
                    previous_batch_id: prev.id,
                    previous_imported_at: prev.imported_at,
                },
            );
        }

        log::info!(
            "📥 Imported {} rows from {} into {} aggregates (batch {}, {} warnings, {} anomaly candidates)",
            row_count,
            source_name,
            aggregate_count,
            batch_id,
            warnings.len(),
            anomaly_candidates.len()
        );

        Ok(IngestReport {
            batch_id,
            source_name: source_name.to_string(),
            content_hash: hash,
            imported_count: row_count,
            aggregate_count,
            warnings,
            anomaly_candidates,
            duplicate_of: previous.map(|p| p.id),
        })
    }

    /// Split rows into shards, normalize each on a blocking worker and merge.
    async fn normalize_sharded(&self, normalizer: &Arc<Normalizer>, mut rows: Vec<RawRow>) -> Result<DeltaSet> {
        let mut handles = Vec::new();
        while !rows.is_empty() {
            let rest = rows.split_off(self.shard_rows.min(rows.len()));
            let shard = std::mem::replace(&mut rows, rest);
            let normalizer = Arc::clone(normalizer);
            handles.push(tokio::task::spawn_blocking(move || normalizer.normalize(&shard)));
        }

        log::debug!("🧩 Normalizing in {} shards", handles.len());

        let mut merged = DeltaSet::default();
        for handle in handles {
            merged = merged.merge(handle.await?);
        }
        Ok(merged)
    }

    // ----- analysis -----

    /// Match window traffic per size against the current creative inventory.
    pub async fn coverage_report(&self, window_days: u32) -> Result<CoverageReport> {
        let inventory = self.catalog.snapshot().await?;
        let window = self.resolve_window(window_days).await?;
        let range = window.range;
        let (by_size, observed_days) = self
            .blocking(move |store| {
                let by_size = store.group_by(range, &[Dimension::CreativeSize])?;
                Ok((by_size, store.distinct_dates(range)?.len()))
            })
            .await?;

        let report = CoverageMatcher::new(self.thresholds.coverage.clone()).analyze(
            &window,
            observed_days,
            &by_size,
            &inventory,
        );
        log::info!(
            "🎯 Coverage {}..{}: match rate {:.1}%, waste {}",
            report.window_start,
            report.window_end,
            report.match_rate * 100.0,
            report.total_waste
        );
        Ok(report)
    }

    /// Per-country performance tiers over the window.
    pub async fn geo_report(&self, window_days: u32) -> Result<GeoReport> {
        let (window, by_country) = self.grouped(window_days, vec![Dimension::Country]).await?;
        let report = GeoAnalyzer::new(self.thresholds.geo.clone()).analyze(&window, &by_country);
        log::info!(
            "🌍 Geo {}..{}: {} countries, {} to exclude, {:.1}% of spend at risk",
            report.window_start,
            report.window_end,
            report.geos.len(),
            report.exclude.len(),
            report.waste_pct * 100.0
        );
        Ok(report)
    }

    /// What-if for an account-wide INCLUDE list. Empty `sizes` means every size.
    pub async fn simulate_filter(&self, sizes: &[String], window_days: u32) -> Result<FilterSimulation> {
        let proposed = parse_proposal("<proposal>", sizes)?;
        let (window, groups) = self.grouped(window_days, SLICE_DIMENSIONS.to_vec()).await?;
        let slices = slices_from_groups(&groups);
        Ok(ConstraintEvaluator::new(&self.routing).simulate_global(&window, &slices, &proposed))
    }

    /// What-if for one routing config's size filter.
    pub async fn simulate_config_filter(
        &self,
        config_id: &str,
        sizes: &[String],
        window_days: u32,
    ) -> Result<FilterSimulation> {
        let config = self
            .routing
            .config(config_id)
            .ok_or_else(|| EngineError::UnknownRoutingConfig(config_id.to_string()))?;
        let proposed = parse_proposal(config_id, sizes)?;
        let (window, groups) = self.grouped(window_days, SLICE_DIMENSIONS.to_vec()).await?;
        let slices = slices_from_groups(&groups);
        Ok(ConstraintEvaluator::new(&self.routing).simulate_config(config, &window, &slices, &proposed))
    }

    /// Allocated vs. ceiling qps per endpoint, with observed qps over the window.
    pub async fn capacity_report(&self, window_days: u32) -> Result<CapacityReport> {
        let (window, groups) = self.grouped(window_days, SLICE_DIMENSIONS.to_vec()).await?;
        let report = ConstraintEvaluator::new(&self.routing).capacity(&window, &slices_from_groups(&groups));
        for endpoint in report.endpoints.iter().filter(|e| e.oversubscribed) {
            log::warn!(
                "⚠️  Endpoint {} oversubscribed: {} qps allocated over {} max",
                endpoint.endpoint_id,
                endpoint.allocated_qps,
                endpoint.max_qps
            );
        }
        Ok(report)
    }

    pub async fn config_performance(&self, window_days: u32) -> Result<ConfigPerformanceReport> {
        let (window, by_config) = self.grouped(window_days, vec![Dimension::RoutingConfig]).await?;
        Ok(config_performance(
            &window,
            &by_config,
            &self.routing,
            &self.thresholds.configs,
        ))
    }

    /// Detect anomalies over the window and persist them as reviewable signals.
    pub async fn signal_report(&self, window_days: u32) -> Result<SignalReport> {
        let detector = SignalDetector::new(self.thresholds.signals.clone());
        let grouping = detector.grouping();
        let window = self.resolve_window(window_days).await?;
        let range = window.range;
        let (daily, app_names, observed_days) = self
            .blocking(move |store| {
                let daily = store.group_by(range, &grouping)?;
                Ok((daily, store.app_names()?, store.distinct_dates(range)?.len()))
            })
            .await?;

        let detection = detector.detect(&window, &daily, &app_names);

        let now = self.now();
        let findings = detection.findings.clone();
        let (signals, refreshed_signals) = self
            .blocking(move |store| {
                let mut signals = Vec::with_capacity(findings.len());
                let mut refreshed_signals = 0;
                for finding in &findings {
                    let (signal, refreshed) = store.upsert_signal(finding, now)?;
                    if refreshed {
                        refreshed_signals += 1;
                    }
                    signals.push(signal);
                }
                Ok((signals, refreshed_signals))
            })
            .await?;

        log::info!(
            "🚨 {} signals ({} new, {} refreshed) over {}..{}",
            signals.len(),
            signals.len() - refreshed_signals,
            refreshed_signals,
            window.start(),
            window.end()
        );

        Ok(SignalReport {
            window_start: window.start(),
            window_end: window.end(),
            new_signals: signals.len() - refreshed_signals,
            refreshed_signals,
            signals,
            keys_evaluated: detection.keys_evaluated,
            skipped_unknown_keys: detection.skipped_unknown,
            baseline_ctr: detection.baseline_ctr,
            insufficient_data: observed_days == 0,
        })
    }

    // ----- review & administration -----

    pub async fn set_signal_status(&self, id: i64, status: SignalStatus) -> Result<AnomalySignal> {
        let now = self.now();
        self.blocking(move |store| store.update_signal_status(id, status, now)).await
    }

    pub async fn list_signals(&self, status: Option<SignalStatus>) -> Result<Vec<AnomalySignal>> {
        self.blocking(move |store| store.list_signals(status)).await
    }

    pub async fn import_history(&self, limit: usize) -> Result<Vec<ImportBatch>> {
        self.blocking(move |store| store.import_history(limit)).await
    }

    /// Retention: drop aggregates dated before `cutoff`. Batches and signals stay.
    pub async fn prune_before(&self, cutoff: NaiveDate) -> Result<usize> {
        self.blocking(move |store| store.prune_before(cutoff)).await
    }
}

fn parse_proposal(config_id: &str, sizes: &[String]) -> Result<SizeFilter> {
    SizeFilter::from_list(sizes).map_err(|reason| EngineError::invalid_config(config_id, reason))
}
