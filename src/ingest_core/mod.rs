//! Ingest Core - export normalization
//!
//! ```text
//! raw bytes → source (tokenize) → columns (alias resolution)
//!     ↓
//! normalizer (coerce, default UNKNOWN, roll up) per shard
//!     ↓
//! DeltaSet::merge → store commit (one transaction per batch)
//! ```

pub mod batch;
pub mod coerce;
pub mod columns;
pub mod normalizer;
pub mod source;

pub use batch::{content_hash, table_hash, CommittedBatch, ImportBatch, IngestReport, IngestWarning, NewBatch};
pub use columns::{ColumnAliases, ColumnMap, LogicalField};
pub use normalizer::{AnomalyCandidate, CandidateKind, DeltaSet, Normalizer, RowCoercionWarning};
pub use source::{read_delimited, RawRow, RawTable};
