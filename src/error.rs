//! Error taxonomy for the reconciliation engine
//!
//! Only structural problems are errors. Per-row problems are collected as
//! [`IngestWarning`](crate::ingest_core::IngestWarning) values and never abort a batch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The export cannot be tokenized at all (encoding, missing header row).
    #[error("unparsable source: {reason}")]
    UnparsableSource { reason: String },

    /// Routing configuration failed validation at load time.
    #[error("invalid routing config '{config_id}': {reason}")]
    InvalidConfig { config_id: String, reason: String },

    #[error("signal {0} not found")]
    SignalNotFound(i64),

    #[error("signal {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: &'static str,
        to: &'static str,
    },

    #[error("unknown routing config '{0}'")]
    UnknownRoutingConfig(String),

    #[error("aggregate store lock poisoned")]
    StorePoisoned,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl EngineError {
    pub(crate) fn unparsable(reason: impl Into<String>) -> Self {
        EngineError::UnparsableSource {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(config_id: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidConfig {
            config_id: config_id.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
