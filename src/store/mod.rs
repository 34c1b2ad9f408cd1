//! Aggregate Store - durable keyed counters with merge-add upserts

pub mod sqlite_store;
pub mod types;

pub use sqlite_store::SqliteStore;
pub use types::{
    DateRange, Dimension, GroupedMeasures, Measures, TrafficAggregate, TrafficKey, UNKNOWN,
};
