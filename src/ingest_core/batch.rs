//! Import batch provenance and content hashing

use super::normalizer::{AnomalyCandidate, RowCoercionWarning};
use super::source::RawTable;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Provenance row written with every committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportBatch {
    pub id: i64,
    pub content_hash: String,
    pub source_name: String,
    pub row_count: i64,
    pub aggregate_count: i64,
    pub warning_count: i64,
    pub anomaly_count: i64,
    pub imported_at: i64,
}

/// Batch fields known before the store assigns an id.
///
/// `warning_count` excludes the duplicate-content warning; the store adds it
/// when the hash matches an earlier batch at commit time.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub content_hash: String,
    pub source_name: String,
    pub row_count: i64,
    pub aggregate_count: i64,
    pub warning_count: i64,
    pub anomaly_count: i64,
    pub imported_at: i64,
}

/// Outcome of a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBatch {
    pub batch_id: i64,
    /// Most recent earlier batch with the same content hash
    pub previous: Option<ImportBatch>,
}

/// Hex SHA-256 of raw export bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash of already tokenized rows. Unit/record separators keep field
/// boundaries unambiguous.
pub fn table_hash(table: &RawTable) -> String {
    let mut hasher = Sha256::new();
    for header in &table.headers {
        hasher.update(header.as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update([0x1e]);
    for row in &table.rows {
        for field in &row.fields {
            hasher.update(field.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}

/// Non-fatal conditions surfaced to the operator verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestWarning {
    RowCoercion(RowCoercionWarning),
    /// Identical content was imported before; measures are now counted twice.
    DuplicateBatch {
        content_hash: String,
        previous_batch_id: i64,
        previous_imported_at: i64,
    },
}

impl fmt::Display for IngestWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestWarning::RowCoercion(w) => write!(f, "{}", w),
            IngestWarning::DuplicateBatch {
                content_hash,
                previous_batch_id,
                ..
            } => write!(
                f,
                "duplicate batch: content {} was already imported as batch {}; measures now double-counted",
                &content_hash[..content_hash.len().min(12)],
                previous_batch_id
            ),
        }
    }
}

/// Result of one ingest call.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub batch_id: i64,
    pub source_name: String,
    pub content_hash: String,
    pub imported_count: usize,
    pub aggregate_count: usize,
    pub warnings: Vec<IngestWarning>,
    pub anomaly_candidates: Vec<AnomalyCandidate>,
    pub duplicate_of: Option<i64>,
}

impl IngestReport {
    pub fn coercion_warnings(&self) -> impl Iterator<Item = &RowCoercionWarning> {
        self.warnings.iter().filter_map(|w| match w {
            IngestWarning::RowCoercion(r) => Some(r),
            IngestWarning::DuplicateBatch { .. } => None,
        })
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable_hex() {
        let a = content_hash(b"Day,Impressions\n2025-11-01,5\n");
        let b = content_hash(b"Day,Impressions\n2025-11-01,5\n");
        let c = content_hash(b"Day,Impressions\n2025-11-01,6\n");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_table_hash_respects_field_boundaries() {
        let t1 = RawTable::from_rows(vec!["a".into(), "b".into()], vec![vec!["12".into(), "3".into()]]);
        let t2 = RawTable::from_rows(vec!["a".into(), "b".into()], vec![vec!["1".into(), "23".into()]]);
        assert_ne!(table_hash(&t1), table_hash(&t2));
    }

    #[test]
    fn test_duplicate_warning_renders() {
        let w = IngestWarning::DuplicateBatch {
            content_hash: "abcdef0123456789".to_string(),
            previous_batch_id: 3,
            previous_imported_at: 0,
        };
        assert!(w.to_string().contains("batch 3"));
    }
}
