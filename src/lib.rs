//! qpsflow: traffic reconciliation and signal engine
//!
//! Raw export rows flow one way:
//! `ingest_core` (normalize) → `store` (merge-add aggregates) →
//! `analysis` (coverage, routing constraints, signals) → report objects.

pub mod analysis;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest_core;
pub mod report;
pub mod sqlite_pragma;
pub mod store;

pub use config::{EngineConfig, Thresholds};
pub use engine::TrafficEngine;
pub use error::{EngineError, Result};
