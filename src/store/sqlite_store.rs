//! SQLite aggregate store with merge-add upserts
//!
//! Tables:
//! - `traffic_aggregates` - UPSERT on the full key, measures summed on conflict
//! - `import_batches` - INSERT (append-only provenance)
//! - `app_names` - UPSERT on app id (latest display name)
//! - `anomaly_signals` - INSERT, refreshed in place while open
//!
//! Every batch is written in a single transaction, so readers on other
//! connections observe either all of a batch or none of it.

use super::types::{DateRange, Dimension, GroupedMeasures, Measures, TrafficAggregate, TrafficKey};
use crate::analysis::signals::{AnomalySignal, Confidence, SignalFinding, SignalStatus, SignalType};
use crate::error::{EngineError, Result};
use crate::ingest_core::batch::{CommittedBatch, ImportBatch, NewBatch};
use crate::ingest_core::normalizer::DeltaSet;
use crate::sqlite_pragma::apply_optimized_pragmas;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Statement, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS traffic_aggregates (
    metric_date         TEXT NOT NULL,
    routing_config_id   TEXT NOT NULL,
    creative_size       TEXT NOT NULL,
    country             TEXT NOT NULL,
    platform            TEXT NOT NULL,
    environment         TEXT NOT NULL,
    app_id              TEXT NOT NULL,
    reached_queries     INTEGER NOT NULL DEFAULT 0,
    impressions         INTEGER NOT NULL DEFAULT 0,
    clicks              INTEGER NOT NULL DEFAULT 0,
    spend_micros        INTEGER NOT NULL DEFAULT 0,
    video_starts        INTEGER NOT NULL DEFAULT 0,
    video_completions   INTEGER NOT NULL DEFAULT 0,
    error_count         INTEGER NOT NULL DEFAULT 0,
    first_batch_id      INTEGER NOT NULL,
    last_batch_id       INTEGER NOT NULL,
    PRIMARY KEY (metric_date, routing_config_id, creative_size, country,
                 platform, environment, app_id)
);
CREATE INDEX IF NOT EXISTS idx_agg_size_date ON traffic_aggregates(creative_size, metric_date);
CREATE INDEX IF NOT EXISTS idx_agg_app_date ON traffic_aggregates(app_id, metric_date);

CREATE TABLE IF NOT EXISTS import_batches (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    content_hash        TEXT NOT NULL,
    source_name         TEXT NOT NULL,
    row_count           INTEGER NOT NULL,
    aggregate_count     INTEGER NOT NULL,
    warning_count       INTEGER NOT NULL,
    anomaly_count       INTEGER NOT NULL,
    imported_at         INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_batches_hash ON import_batches(content_hash);

CREATE TABLE IF NOT EXISTS app_names (
    app_id              TEXT PRIMARY KEY,
    app_name            TEXT NOT NULL,
    updated_at          INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS anomaly_signals (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_key          TEXT NOT NULL,
    signal_type         TEXT NOT NULL,
    confidence          TEXT NOT NULL,
    evidence            TEXT NOT NULL,
    days_observed       INTEGER NOT NULL,
    window_start        TEXT NOT NULL,
    window_end          TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'pending',
    created_at          INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_signals_open
    ON anomaly_signals(signal_key, signal_type)
    WHERE status IN ('pending', 'reviewed');
CREATE INDEX IF NOT EXISTS idx_signals_status ON anomaly_signals(status, updated_at DESC);
"#;

const MEASURE_SUMS: &str = "COALESCE(SUM(reached_queries), 0), COALESCE(SUM(impressions), 0), \
     COALESCE(SUM(clicks), 0), COALESCE(SUM(spend_micros), 0), COALESCE(SUM(video_starts), 0), \
     COALESCE(SUM(video_completions), 0), COALESCE(SUM(error_count), 0)";

const SIGNAL_COLUMNS: &str = "id, signal_key, signal_type, confidence, evidence, days_observed, \
     window_start, window_end, status, created_at, updated_at";

const BATCH_COLUMNS: &str = "id, content_hash, source_name, row_count, aggregate_count, \
     warning_count, anomaly_count, imported_at";

/// Durable keyed counters shared across the engine.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database and its schema.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path.as_ref())?;
        apply_optimized_pragmas(&conn)?;
        conn.execute_batch(SCHEMA)?;

        log::info!(
            "✅ Aggregate store ready at {} (WAL mode)",
            db_path.as_ref().display()
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| EngineError::StorePoisoned)
    }

    /// Merge-add a single delta outside of a batch.
    pub fn upsert(&self, key: &TrafficKey, delta: &Measures, batch_id: i64) -> Result<()> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(UPSERT_SQL)?;
        execute_upsert(&mut stmt, key, delta, batch_id)?;
        Ok(())
    }

    /// Write the provenance row, every delta and the app names in one transaction.
    ///
    /// The duplicate-content lookup runs inside the same write transaction, so
    /// of two identical imports the later one always sees the earlier.
    pub fn commit_batch(&self, batch: &NewBatch, deltas: &DeltaSet) -> Result<CommittedBatch> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous = latest_batch_with_hash(&tx, &batch.content_hash)?;
        let warning_count = batch.warning_count + i64::from(previous.is_some());

        tx.execute(
            "INSERT INTO import_batches (content_hash, source_name, row_count, aggregate_count,
                                         warning_count, anomaly_count, imported_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                batch.content_hash,
                batch.source_name,
                batch.row_count,
                batch.aggregate_count,
                warning_count,
                batch.anomaly_count,
                batch.imported_at,
            ],
        )?;
        let batch_id = tx.last_insert_rowid();

        write_deltas(&tx, deltas, batch_id)?;
        write_app_names(&tx, deltas, batch.imported_at)?;

        tx.commit()?;

        log::debug!(
            "💾 Committed batch {} ({} aggregates)",
            batch_id,
            deltas.deltas.len()
        );
        Ok(CommittedBatch { batch_id, previous })
    }

    /// Most recent batch with identical content, if any.
    pub fn find_batch_by_hash(&self, content_hash: &str) -> Result<Option<ImportBatch>> {
        let conn = self.lock()?;
        latest_batch_with_hash(&conn, content_hash)
    }

    /// Newest first.
    pub fn import_history(&self, limit: usize) -> Result<Vec<ImportBatch>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_batches ORDER BY id DESC LIMIT ?1",
            BATCH_COLUMNS
        ))?;
        let batches = stmt
            .query_map(params![limit as i64], batch_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(batches)
    }

    /// Every aggregate row in the range, in key order.
    pub fn scan(&self, range: DateRange) -> Result<Vec<TrafficAggregate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT metric_date, routing_config_id, creative_size, country, platform, environment,
                    app_id, reached_queries, impressions, clicks, spend_micros, video_starts,
                    video_completions, error_count
             FROM traffic_aggregates
             WHERE metric_date BETWEEN ?1 AND ?2
             ORDER BY metric_date, routing_config_id, creative_size, country, platform,
                      environment, app_id",
        )?;
        let rows = stmt
            .query_map(params![range.start, range.end], |row| {
                Ok(TrafficAggregate {
                    key: TrafficKey {
                        date: row.get(0)?,
                        routing_config_id: row.get(1)?,
                        creative_size: row.get(2)?,
                        country: row.get(3)?,
                        platform: row.get(4)?,
                        environment: row.get(5)?,
                        app_id: row.get(6)?,
                    },
                    measures: measures_from_row(row, 7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Measure sums grouped by `dimensions` (in that order); no dimensions
    /// yields a single totals row. Groups are sorted by their values.
    pub fn group_by(&self, range: DateRange, dimensions: &[Dimension]) -> Result<Vec<GroupedMeasures>> {
        let columns: Vec<&str> = dimensions.iter().map(|d| d.column()).collect();
        let select_dims = columns
            .iter()
            .map(|c| format!("CAST({} AS TEXT), ", c))
            .collect::<String>();
        let group_clause = if columns.is_empty() {
            String::new()
        } else {
            format!(" GROUP BY {0} ORDER BY {0}", columns.join(", "))
        };
        let sql = format!(
            "SELECT {}{} FROM traffic_aggregates WHERE metric_date BETWEEN ?1 AND ?2{}",
            select_dims, MEASURE_SUMS, group_clause
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let width = dimensions.len();
        let groups = stmt
            .query_map(params![range.start, range.end], |row| {
                let values = (0..width)
                    .map(|i| row.get::<_, String>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(GroupedMeasures {
                    values,
                    measures: measures_from_row(row, width)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    pub fn totals(&self, range: DateRange) -> Result<Measures> {
        Ok(self
            .group_by(range, &[])?
            .into_iter()
            .next()
            .map(|g| g.measures)
            .unwrap_or_default())
    }

    pub fn distinct_dates(&self, range: DateRange) -> Result<Vec<NaiveDate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT metric_date FROM traffic_aggregates
             WHERE metric_date BETWEEN ?1 AND ?2 ORDER BY metric_date",
        )?;
        let dates = stmt
            .query_map(params![range.start, range.end], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(dates)
    }

    /// Earliest and latest stored dates, `None` when empty.
    pub fn date_bounds(&self) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let conn = self.lock()?;
        let bounds: (Option<NaiveDate>, Option<NaiveDate>) = conn.query_row(
            "SELECT MIN(metric_date), MAX(metric_date) FROM traffic_aggregates",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(match bounds {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        })
    }

    pub fn aggregate_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM traffic_aggregates", [], |row| row.get(0))?)
    }

    pub fn app_names(&self) -> Result<HashMap<String, String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT app_id, app_name FROM app_names")?;
        let names = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(names)
    }

    /// Administrative retention: drop aggregates dated before `cutoff`.
    pub fn prune_before(&self, cutoff: NaiveDate) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM traffic_aggregates WHERE metric_date < ?1",
            params![cutoff],
        )?;
        log::info!("🧹 Pruned {} aggregates dated before {}", deleted, cutoff);
        Ok(deleted)
    }

    /// Insert a finding as a pending signal, or refresh the open signal with
    /// the same key and type. Returns the stored signal and whether it was refreshed.
    pub fn upsert_signal(&self, finding: &SignalFinding, now: i64) -> Result<(AnomalySignal, bool)> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let key = finding.key.render();
        let evidence = serde_json::to_string(&finding.evidence)?;

        let open_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM anomaly_signals
                 WHERE signal_key = ?1 AND signal_type = ?2 AND status IN ('pending', 'reviewed')",
                params![key, finding.signal_type.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let (id, refreshed) = match open_id {
            Some(id) => {
                tx.execute(
                    "UPDATE anomaly_signals
                     SET confidence = ?2, evidence = ?3, days_observed = ?4,
                         window_start = ?5, window_end = ?6, updated_at = ?7
                     WHERE id = ?1",
                    params![
                        id,
                        finding.confidence.as_str(),
                        evidence,
                        finding.days_observed,
                        finding.window_start,
                        finding.window_end,
                        now,
                    ],
                )?;
                (id, true)
            }
            None => {
                tx.execute(
                    "INSERT INTO anomaly_signals (signal_key, signal_type, confidence, evidence,
                         days_observed, window_start, window_end, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?8)",
                    params![
                        key,
                        finding.signal_type.as_str(),
                        finding.confidence.as_str(),
                        evidence,
                        finding.days_observed,
                        finding.window_start,
                        finding.window_end,
                        now,
                    ],
                )?;
                (tx.last_insert_rowid(), false)
            }
        };

        let signal = fetch_signal(&tx, id)?.ok_or(EngineError::SignalNotFound(id))?;
        tx.commit()?;
        Ok((signal, refreshed))
    }

    pub fn get_signal(&self, id: i64) -> Result<Option<AnomalySignal>> {
        let conn = self.lock()?;
        fetch_signal(&conn, id)
    }

    /// Signals newest first, optionally filtered by status.
    pub fn list_signals(&self, status: Option<SignalStatus>) -> Result<Vec<AnomalySignal>> {
        let conn = self.lock()?;
        let signals = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM anomaly_signals WHERE status = ?1 ORDER BY updated_at DESC, id DESC",
                    SIGNAL_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![status.as_str()], signal_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM anomaly_signals ORDER BY updated_at DESC, id DESC",
                    SIGNAL_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], signal_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(signals)
    }

    /// Apply a reviewer's status change, enforcing the state machine.
    pub fn update_signal_status(&self, id: i64, next: SignalStatus, now: i64) -> Result<AnomalySignal> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current = fetch_signal(&tx, id)?.ok_or(EngineError::SignalNotFound(id))?;
        current.status.check_transition(id, next)?;

        tx.execute(
            "UPDATE anomaly_signals SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, next.as_str(), now],
        )?;
        let updated = fetch_signal(&tx, id)?.ok_or(EngineError::SignalNotFound(id))?;
        tx.commit()?;

        log::info!(
            "📝 Signal {} {} → {}",
            id,
            current.status.as_str(),
            next.as_str()
        );
        Ok(updated)
    }
}

// Integer overflow in SQLite promotes to REAL; MIN pins it back to i64::MAX.
const UPSERT_SQL: &str = r#"
INSERT INTO traffic_aggregates (
    metric_date, routing_config_id, creative_size, country, platform, environment, app_id,
    reached_queries, impressions, clicks, spend_micros, video_starts, video_completions,
    error_count, first_batch_id, last_batch_id
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
ON CONFLICT(metric_date, routing_config_id, creative_size, country, platform, environment, app_id)
DO UPDATE SET
    reached_queries = MIN(reached_queries + excluded.reached_queries, 9223372036854775807),
    impressions = MIN(impressions + excluded.impressions, 9223372036854775807),
    clicks = MIN(clicks + excluded.clicks, 9223372036854775807),
    spend_micros = MIN(spend_micros + excluded.spend_micros, 9223372036854775807),
    video_starts = MIN(video_starts + excluded.video_starts, 9223372036854775807),
    video_completions = MIN(video_completions + excluded.video_completions, 9223372036854775807),
    error_count = MIN(error_count + excluded.error_count, 9223372036854775807),
    last_batch_id = excluded.last_batch_id
"#;

fn execute_upsert(
    stmt: &mut Statement<'_>,
    key: &TrafficKey,
    m: &Measures,
    batch_id: i64,
) -> rusqlite::Result<usize> {
    stmt.execute(params![
        key.date,
        key.routing_config_id,
        key.creative_size,
        key.country,
        key.platform,
        key.environment,
        key.app_id,
        m.reached_queries,
        m.impressions,
        m.clicks,
        m.spend_micros,
        m.video_starts,
        m.video_completions,
        m.error_count,
        batch_id,
    ])
}

fn write_deltas(tx: &Transaction<'_>, deltas: &DeltaSet, batch_id: i64) -> Result<()> {
    let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
    for (key, measures) in deltas.sorted_deltas() {
        execute_upsert(&mut stmt, key, measures, batch_id)?;
    }
    Ok(())
}

fn write_app_names(tx: &Transaction<'_>, deltas: &DeltaSet, now: i64) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO app_names (app_id, app_name, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(app_id) DO UPDATE SET app_name = excluded.app_name, updated_at = excluded.updated_at",
    )?;
    for (app_id, (_, name)) in &deltas.app_names {
        stmt.execute(params![app_id, name, now])?;
    }
    Ok(())
}

fn latest_batch_with_hash(conn: &Connection, content_hash: &str) -> Result<Option<ImportBatch>> {
    let batch = conn
        .query_row(
            &format!(
                "SELECT {} FROM import_batches WHERE content_hash = ?1 ORDER BY id DESC LIMIT 1",
                BATCH_COLUMNS
            ),
            params![content_hash],
            batch_from_row,
        )
        .optional()?;
    Ok(batch)
}

fn fetch_signal(conn: &Connection, id: i64) -> Result<Option<AnomalySignal>> {
    let signal = conn
        .query_row(
            &format!("SELECT {} FROM anomaly_signals WHERE id = ?1", SIGNAL_COLUMNS),
            params![id],
            signal_from_row,
        )
        .optional()?;
    Ok(signal)
}

fn measures_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Measures> {
    Ok(Measures {
        reached_queries: row.get(offset)?,
        impressions: row.get(offset + 1)?,
        clicks: row.get(offset + 2)?,
        spend_micros: row.get(offset + 3)?,
        video_starts: row.get(offset + 4)?,
        video_completions: row.get(offset + 5)?,
        error_count: row.get(offset + 6)?,
    })
}

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<ImportBatch> {
    Ok(ImportBatch {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        source_name: row.get(2)?,
        row_count: row.get(3)?,
        aggregate_count: row.get(4)?,
        warning_count: row.get(5)?,
        anomaly_count: row.get(6)?,
        imported_at: row.get(7)?,
    })
}

fn decode<T: FromStr<Err = String>>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    raw.parse()
        .map_err(|reason: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, reason.into()))
}

fn signal_from_row(row: &Row<'_>) -> rusqlite::Result<AnomalySignal> {
    let signal_type: String = row.get(2)?;
    let confidence: String = row.get(3)?;
    let evidence: String = row.get(4)?;
    let status: String = row.get(8)?;

    Ok(AnomalySignal {
        id: row.get(0)?,
        key: row.get(1)?,
        signal_type: decode::<SignalType>(2, &signal_type)?,
        confidence: decode::<Confidence>(3, &confidence)?,
        evidence: serde_json::from_str(&evidence)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        days_observed: row.get(5)?,
        window_start: row.get(6)?,
        window_end: row.get(7)?,
        status: decode::<SignalStatus>(8, &status)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::signals::SignalKey;
    use serde_json::json;
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, d).unwrap()
    }

    fn key(d: u32, size: &str, app: &str) -> TrafficKey {
        TrafficKey::new(day(d), Some("cfg-1"), Some(size), Some("US"), None, None, Some(app))
    }

    fn batch(hash: &str) -> NewBatch {
        NewBatch {
            content_hash: hash.to_string(),
            source_name: "test.csv".to_string(),
            row_count: 2,
            aggregate_count: 2,
            warning_count: 0,
            anomaly_count: 0,
            imported_at: 1_700_000_000,
        }
    }

    fn deltas() -> DeltaSet {
        let mut set = DeltaSet::default();
        set.add(
            key(1, "300x250", "a"),
            Measures { reached_queries: 100, impressions: 80, clicks: 2, ..Default::default() },
        );
        set.add(
            key(2, "320x50", "b"),
            Measures { reached_queries: 50, impressions: 0, spend_micros: 1_500_000, ..Default::default() },
        );
        set.app_names.insert("a".to_string(), (2, "App A".to_string()));
        set
    }

    fn signal_finding(confidence: Confidence) -> SignalFinding {
        SignalFinding {
            key: SignalKey::new(vec![(Dimension::App, "a".to_string())]),
            signal_type: SignalType::ClicksExceedImpressions,
            confidence,
            evidence: json!({ "violation_days": 1 }),
            days_observed: 7,
            window_start: day(1),
            window_end: day(7),
        }
    }

    #[test]
    fn test_commit_batch_merge_adds() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("agg.db")).unwrap();

        let first = store.commit_batch(&batch("h1"), &deltas()).unwrap();
        let second = store.commit_batch(&batch("h1"), &deltas()).unwrap();
        assert!(first.previous.is_none());
        assert_eq!(second.previous.as_ref().map(|b| b.id), Some(first.batch_id));

        let rows = store.scan(DateRange::new(day(1), day(7))).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].measures.reached_queries, 200);
        assert_eq!(rows[0].measures.clicks, 4);
        assert_eq!(rows[1].measures.spend_micros, 3_000_000);

        assert_eq!(store.app_names().unwrap()["a"], "App A");
        assert_eq!(store.find_batch_by_hash("h1").unwrap().unwrap().id, 2);
        assert!(store.find_batch_by_hash("nope").unwrap().is_none());
        let history = store.import_history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].warning_count, 1);
        assert_eq!(history[1].warning_count, 0);
    }

    #[test]
    fn test_failed_batch_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("agg.db")).unwrap();
        store
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_size BEFORE INSERT ON traffic_aggregates
                 WHEN NEW.creative_size = '999x999'
                 BEGIN SELECT RAISE(ABORT, 'rejected size'); END;",
            )
            .unwrap();

        // key order writes day 1 first, then fails on day 2
        let mut set = deltas();
        set.add(key(2, "999x999", "z"), Measures { reached_queries: 7, ..Default::default() });
        assert!(store.commit_batch(&batch("h1"), &set).is_err());

        assert_eq!(store.aggregate_count().unwrap(), 0);
        assert!(store.import_history(10).unwrap().is_empty());
        assert!(store.find_batch_by_hash("h1").unwrap().is_none());
        assert!(store.app_names().unwrap().is_empty());

        // the connection is still usable for the next batch
        let committed = store.commit_batch(&batch("h2"), &deltas()).unwrap();
        assert!(committed.previous.is_none());
        assert_eq!(store.aggregate_count().unwrap(), 2);
    }

    #[test]
    fn test_upsert_pins_at_i64_max() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("agg.db")).unwrap();
        let k = key(1, "300x250", "a");
        let near_max = Measures { reached_queries: i64::MAX - 10, impressions: 1, ..Default::default() };
        store.upsert(&k, &near_max, 1).unwrap();
        store.upsert(&k, &near_max, 2).unwrap();

        let rows = store.scan(DateRange::new(day(1), day(1))).unwrap();
        assert_eq!(rows[0].measures.reached_queries, i64::MAX);
        assert_eq!(rows[0].measures.impressions, 2);
    }

    #[test]
    fn test_group_by_and_bounds() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("agg.db")).unwrap();
        store.commit_batch(&batch("h1"), &deltas()).unwrap();
        store
            .upsert(&key(1, "300x250", "c"), &Measures { reached_queries: 5, ..Default::default() }, 0)
            .unwrap();

        let range = DateRange::new(day(1), day(7));
        let by_size = store.group_by(range, &[Dimension::CreativeSize]).unwrap();
        assert_eq!(by_size.len(), 2);
        assert_eq!(by_size[0].values, vec!["300x250"]);
        assert_eq!(by_size[0].measures.reached_queries, 105);

        let by_day_app = store.group_by(range, &[Dimension::Date, Dimension::App]).unwrap();
        assert_eq!(by_day_app[0].values, vec!["2025-11-01", "a"]);

        assert_eq!(store.totals(range).unwrap().reached_queries, 155);
        assert_eq!(store.totals(DateRange::new(day(20), day(21))).unwrap(), Measures::default());
        assert_eq!(store.date_bounds().unwrap(), Some((day(1), day(2))));
        assert_eq!(store.distinct_dates(range).unwrap(), vec![day(1), day(2)]);
    }

    #[test]
    fn test_prune_before() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("agg.db")).unwrap();
        store.commit_batch(&batch("h1"), &deltas()).unwrap();

        assert_eq!(store.prune_before(day(2)).unwrap(), 1);
        assert_eq!(store.aggregate_count().unwrap(), 1);
        assert_eq!(store.date_bounds().unwrap(), Some((day(2), day(2))));
    }

    #[test]
    fn test_open_signal_is_refreshed_not_duplicated() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("agg.db")).unwrap();

        let (first, refreshed) = store.upsert_signal(&signal_finding(Confidence::Low), 100).unwrap();
        assert!(!refreshed);
        assert_eq!(first.status, SignalStatus::Pending);

        let (second, refreshed) = store.upsert_signal(&signal_finding(Confidence::High), 200).unwrap();
        assert!(refreshed);
        assert_eq!(second.id, first.id);
        assert_eq!(second.confidence, Confidence::High);
        assert_eq!(second.updated_at, 200);
        assert_eq!(store.list_signals(None).unwrap().len(), 1);
    }

    #[test]
    fn test_closed_signal_allows_new_one() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("agg.db")).unwrap();

        let (s, _) = store.upsert_signal(&signal_finding(Confidence::Low), 100).unwrap();
        store.update_signal_status(s.id, SignalStatus::Reviewed, 110).unwrap();
        store.update_signal_status(s.id, SignalStatus::Cleared, 120).unwrap();

        let (next, refreshed) = store.upsert_signal(&signal_finding(Confidence::Low), 130).unwrap();
        assert!(!refreshed);
        assert_ne!(next.id, s.id);
        assert_eq!(store.list_signals(Some(SignalStatus::Cleared)).unwrap().len(), 1);
        assert_eq!(store.list_signals(Some(SignalStatus::Pending)).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("agg.db")).unwrap();
        let (s, _) = store.upsert_signal(&signal_finding(Confidence::Low), 100).unwrap();

        let err = store.update_signal_status(s.id, SignalStatus::Blocked, 110).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(store.get_signal(s.id).unwrap().unwrap().status, SignalStatus::Pending);

        assert!(matches!(
            store.update_signal_status(999, SignalStatus::Reviewed, 110),
            Err(EngineError::SignalNotFound(999))
        ));
    }
}
