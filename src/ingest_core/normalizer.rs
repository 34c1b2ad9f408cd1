//! Raw rows → keyed measure deltas
//!
//! Normalization is a pure map over rows; the resulting [`DeltaSet`]s merge
//! associatively and commutatively, so shards can run on separate workers and
//! be combined in any order.

use super::coerce::{parse_count, parse_currency_micros, parse_date};
use super::columns::{ColumnMap, LogicalField};
use super::source::RawRow;
use crate::analysis::geo::canonical_country;
use crate::analysis::sizes::canonical_label;
use crate::store::types::{Measures, TrafficKey, DATE_FORMAT};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// A single field that could not be coerced. The row is still imported.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RowCoercionWarning {
    pub row: u64,
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for RowCoercionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {}: field '{}' value '{}': {}",
            self.row, self.field, self.value, self.reason
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    ClicksExceedImpressions,
    SpendWithoutDelivery,
}

impl CandidateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateKind::ClicksExceedImpressions => "clicks_exceed_impressions",
            CandidateKind::SpendWithoutDelivery => "spend_without_delivery",
        }
    }
}

/// Row-level pattern worth a look, reported alongside the import.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AnomalyCandidate {
    pub row: u64,
    pub kind: CandidateKind,
    pub date: NaiveDate,
    pub app_id: String,
    pub impressions: i64,
    pub clicks: i64,
    pub spend_micros: i64,
}

impl fmt::Display for AnomalyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {}: {} (app {}, {}, impressions={}, clicks={}, spend_micros={})",
            self.row,
            self.kind.as_str(),
            self.app_id,
            self.date.format(DATE_FORMAT),
            self.impressions,
            self.clicks,
            self.spend_micros
        )
    }
}

/// Summed deltas for one shard (or a merge of shards).
#[derive(Debug, Clone, Default)]
pub struct DeltaSet {
    pub deltas: HashMap<TrafficKey, Measures>,
    /// app id → (source line, display name); the latest line wins
    pub app_names: HashMap<String, (u64, String)>,
    pub row_count: usize,
    pub warnings: Vec<RowCoercionWarning>,
    pub candidates: Vec<AnomalyCandidate>,
}

impl DeltaSet {
    pub fn add(&mut self, key: TrafficKey, measures: Measures) {
        *self.deltas.entry(key).or_default() += measures;
    }

    fn note_app_name(&mut self, app_id: &str, line: u64, name: &str) {
        let entry = self
            .app_names
            .entry(app_id.to_string())
            .or_insert_with(|| (line, name.to_string()));
        if line > entry.0 {
            *entry = (line, name.to_string());
        }
    }

    /// Combine two shards. Order of arguments does not affect the result once
    /// [`DeltaSet::sorted`] is applied.
    pub fn merge(mut self, other: DeltaSet) -> DeltaSet {
        for (key, measures) in other.deltas {
            self.add(key, measures);
        }
        for (app_id, (line, name)) in other.app_names {
            self.note_app_name(&app_id, line, &name);
        }
        self.row_count += other.row_count;
        self.warnings.extend(other.warnings);
        self.candidates.extend(other.candidates);
        self
    }

    /// Warnings and candidates in source-row order.
    pub fn sorted(mut self) -> DeltaSet {
        self.warnings.sort();
        self.candidates.sort();
        self
    }

    pub fn total(&self) -> Measures {
        self.deltas.values().copied().sum()
    }

    /// Deltas in key order for a deterministic write sequence.
    pub fn sorted_deltas(&self) -> Vec<(&TrafficKey, &Measures)> {
        let mut entries: Vec<_> = self.deltas.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

/// Maps rows to deltas using a resolved [`ColumnMap`].
#[derive(Debug, Clone)]
pub struct Normalizer {
    columns: ColumnMap,
    date_formats: Vec<String>,
    fallback_date: NaiveDate,
}

impl Normalizer {
    pub fn new(columns: ColumnMap, date_formats: Vec<String>, fallback_date: NaiveDate) -> Self {
        Self {
            columns,
            date_formats,
            fallback_date,
        }
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    /// Header-level warnings, reported once per import rather than per row.
    pub fn header_warnings(&self) -> Vec<RowCoercionWarning> {
        let mut warnings = Vec::new();
        if !self.columns.has(LogicalField::Date) {
            warnings.push(RowCoercionWarning {
                row: 1,
                field: LogicalField::Date.as_str().to_string(),
                value: String::new(),
                reason: format!(
                    "no date column; every row dated {}",
                    self.fallback_date.format(DATE_FORMAT)
                ),
            });
        }
        warnings
    }

    /// Normalize one shard of rows.
    pub fn normalize(&self, rows: &[RawRow]) -> DeltaSet {
        let mut set = DeltaSet::default();
        for row in rows {
            self.normalize_row(row, &mut set);
        }
        set
    }

    fn normalize_row(&self, row: &RawRow, set: &mut DeltaSet) {
        let fields = &row.fields;
        let get = |field: LogicalField| self.columns.get(fields, field);

        let date = self.row_date(row, set);

        let size = get(LogicalField::CreativeSize).map(canonical_label);
        let country = get(LogicalField::Country).map(canonical_country);
        let key = TrafficKey::new(
            date,
            get(LogicalField::RoutingConfigId),
            size.as_deref(),
            country.as_deref(),
            get(LogicalField::Platform),
            get(LogicalField::Environment),
            get(LogicalField::AppId),
        );

        let mut count = |field: LogicalField| -> i64 {
            match get(field) {
                None => 0,
                Some(value) => parse_count(value).unwrap_or_else(|reason| {
                    set.warnings.push(warning(row.line, field, value, reason));
                    0
                }),
            }
        };

        let mut measures = Measures {
            reached_queries: count(LogicalField::ReachedQueries),
            impressions: count(LogicalField::Impressions),
            clicks: count(LogicalField::Clicks),
            video_starts: count(LogicalField::VideoStarts),
            video_completions: count(LogicalField::VideoCompletions),
            error_count: count(LogicalField::ErrorCount),
            spend_micros: 0,
        };
        if let Some(value) = get(LogicalField::Spend) {
            measures.spend_micros = parse_currency_micros(value).unwrap_or_else(|reason| {
                set.warnings
                    .push(warning(row.line, LogicalField::Spend, value, reason));
                0
            });
        }

        if let (Some(app_id), Some(name)) = (get(LogicalField::AppId), get(LogicalField::AppName)) {
            if key.app_id == app_id {
                set.note_app_name(app_id, row.line, name);
            }
        }

        let candidate = |kind| AnomalyCandidate {
            row: row.line,
            kind,
            date,
            app_id: key.app_id.clone(),
            impressions: measures.impressions,
            clicks: measures.clicks,
            spend_micros: measures.spend_micros,
        };
        if measures.clicks > measures.impressions {
            set.candidates
                .push(candidate(CandidateKind::ClicksExceedImpressions));
        }
        if measures.spend_micros > 0 && measures.impressions == 0 {
            set.candidates.push(candidate(CandidateKind::SpendWithoutDelivery));
        }

        set.row_count += 1;
        set.add(key, measures);
    }

    fn row_date(&self, row: &RawRow, set: &mut DeltaSet) -> NaiveDate {
        if !self.columns.has(LogicalField::Date) {
            return self.fallback_date;
        }
        let fallback_note = format!("using {}", self.fallback_date.format(DATE_FORMAT));
        match self.columns.get(&row.fields, LogicalField::Date) {
            Some(value) => parse_date(value, &self.date_formats).unwrap_or_else(|reason| {
                set.warnings.push(warning(
                    row.line,
                    LogicalField::Date,
                    value,
                    format!("{}; {}", reason, fallback_note),
                ));
                self.fallback_date
            }),
            None => {
                set.warnings.push(warning(
                    row.line,
                    LogicalField::Date,
                    "",
                    format!("missing date; {}", fallback_note),
                ));
                self.fallback_date
            }
        }
    }
}

fn warning(row: u64, field: LogicalField, value: &str, reason: impl Into<String>) -> RowCoercionWarning {
    RowCoercionWarning {
        row,
        field: field.as_str().to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}
